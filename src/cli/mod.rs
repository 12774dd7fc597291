pub mod config;
pub mod generate;
pub mod serve;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "scriptrelay")]
#[command(
    author,
    version,
    about = "Generate game script snippets with an LLM and relay them to a polling game server"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "SCRIPTRELAY_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server (generation adapter and/or command relay)
    Serve(serve::ServeArgs),

    /// Generate a snippet once through the configured backend
    Generate(generate::GenerateArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}
