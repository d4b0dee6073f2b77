//! Command-line interface definitions and parsing

use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about = "Serverless group chat over a full TCP mesh", long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (defaults to ~/.kqsp/config.toml when present)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host to bind the listener to
    #[arg(long)]
    pub host: Option<String>,

    /// Peer to connect to at startup, as host[:port] (repeatable)
    #[arg(long = "connect", value_name = "ADDR")]
    pub connect: Vec<String>,

    /// Fixed identity, e.g. K(10.0.0.7) or 10-0-0-7
    #[arg(long)]
    pub identity: Option<String>,

    /// Directory where received files are saved
    #[arg(long)]
    pub downloads_dir: Option<String>,

    /// Print an example configuration file and exit
    #[arg(long)]
    pub print_config: bool,
}
