use anyhow::Context;
use clap::Parser;
use std::sync::Arc;

use crate::cli::Args;
use crate::nat::config::{self, DiscoverConfig};
use crate::nat::Nats;
use crate::network::UdpNet;
use crate::utils;

/// Parses the command line, runs one discovery and prints the result
pub async fn run_cli() -> crate::Result<()> {
    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => config::load(path)
            .with_context(|| format!("failed to load config {}", path))?,
        None => DiscoverConfig::default(),
    };
    if let Some(server) = args.server {
        cfg.server = server;
    }
    cfg.verbose |= args.verbose;

    utils::init_tracing(cfg.verbose)?;
    tracing::debug!("config: {:?}", cfg);

    let nats = Nats::new(&cfg, Arc::new(UdpNet)).await?;
    let res = nats.discover().await?;

    let json = serde_json::to_string_pretty(&res).context("failed to marshal result")?;
    println!("{}", json);
    Ok(())
}
