use anyhow::Result;
use clap::Args;

use crate::config::{Config, ServiceSet};
use crate::server::Server;

#[derive(Args)]
pub struct ServeArgs {
    /// Address to bind (overrides config)
    #[arg(long)]
    pub bind: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Services to expose: all, generate or relay (overrides config)
    #[arg(short, long)]
    pub services: Option<ServiceSet>,
}

pub async fn run(args: ServeArgs, mut config: Config) -> Result<()> {
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(services) = args.services {
        config.server.services = services;
    }

    let services = config.server.services;
    println!(
        "Starting ScriptRelay on http://{}:{}",
        config.server.bind, config.server.port
    );
    if services.generate() {
        println!(
            "  Generate: POST /generate -> {} ({}, model {})",
            config.backend.shape,
            config.backend.endpoint(),
            config.backend.default_model()
        );
    }
    if services.relay() {
        println!(
            "  Relay:    POST/GET /queue ({} store)",
            config.relay.store
        );
    }

    let server = Server::new(&config)?;
    server.run().await
}
