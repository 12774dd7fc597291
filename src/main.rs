use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use scriptrelay::cli::{self, Cli, Commands};
use scriptrelay::config::{Config, LoggingConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref().map(|p| {
        PathBuf::from(shellexpand::tilde(p).into_owned())
    });

    match cli.command {
        Commands::Serve(args) => {
            let config = Config::load(config_path.as_deref())?;
            init_logging(cli.verbose, &config.logging);
            cli::serve::run(args, config).await
        }
        Commands::Generate(args) => {
            let config = Config::load(config_path.as_deref())?;
            init_logging(cli.verbose, &config.logging);
            cli::generate::run(args, &config).await
        }
        Commands::Config(args) => {
            init_logging(cli.verbose, &LoggingConfig::default());
            cli::config::run(args, config_path.as_deref()).await
        }
    }
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let log_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
