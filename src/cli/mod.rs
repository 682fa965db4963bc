use clap::Parser;

pub mod main;

/// NAT behavior discovery (RFC 5780)
///
/// Talks to a STUN server that supports CHANGE-REQUEST and prints the
/// detected mapping and filtering behavior as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// STUN server address (e.g., stun.ekiga.net:3478, port defaults to 3478)
    #[arg(short, long)]
    pub server: Option<String>,

    /// Log every probe
    #[arg(short, long)]
    pub verbose: bool,

    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<String>,
}
