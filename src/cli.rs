use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[clap(short, long, global = true, help = "Config file (default: <config dir>/offload/config.json)")]
    pub config: Option<PathBuf>,
    #[clap(short, long, global = true, help = "Enable debug logging")]
    pub verbose: bool,
    #[clap(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    #[clap(about = "Watch for media and back it up, forever (default)", display_order = 1)]
    Run,
    #[clap(about = "Scan mounted media once and show how it is classified", display_order = 2)]
    Scan,
    #[clap(about = "Print the effective configuration", display_order = 3)]
    Config,
}
