use anyhow::Result;
use clap::Args;

use crate::config::Config;
use crate::generate::{GenerationRequest, create_backend};

#[derive(Args)]
pub struct GenerateArgs {
    /// What the snippet should do
    pub prompt: String,

    /// Model hint (mapped through backend.model_map)
    #[arg(short, long)]
    pub model: Option<String>,

    /// System instruction (overrides the configured ground rules)
    #[arg(short, long)]
    pub system: Option<String>,

    /// Output format: text (default) or json
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

pub async fn run(args: GenerateArgs, config: &Config) -> Result<()> {
    let backend = create_backend(&config.backend)?;

    let request = GenerationRequest {
        prompt: args.prompt,
        system_instruction: args.system,
        model: args.model,
    };

    let result = backend.generate(&request).await;

    match (args.format.as_str(), result) {
        ("json", Ok(code)) => {
            println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "code": code }))?);
        }
        ("json", Err(e)) => {
            let output = serde_json::json!({
                "error": e.kind(),
                "message": e.to_string(),
                "upstreamStatus": e.upstream_status(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
            anyhow::bail!("Generation failed");
        }
        (_, Ok(code)) => {
            println!("{}", code);
        }
        (_, Err(e)) => match e.upstream_status() {
            Some(status) => anyhow::bail!("Backend returned {}: {}", status, e),
            None => anyhow::bail!("{}: {}", e.kind().as_str(), e),
        },
    }

    Ok(())
}
