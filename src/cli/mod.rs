use std::path::PathBuf;

use clap::Parser;

mod analyze;

pub use analyze::run_one_shot;

#[derive(Debug, Parser)]
#[command(name = "firmscan")]
#[command(about = "IoT firmware vulnerability analyzer")]
#[command(version)]
pub struct Cli {
    /// Path to the firmware image
    pub firmware: Option<PathBuf>,

    /// Run in server mode
    #[arg(long)]
    pub server: bool,

    /// Server host
    #[arg(long)]
    pub host: Option<String>,

    /// Server port
    #[arg(long)]
    pub port: Option<u16>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Perform dynamic analysis
    #[arg(short, long)]
    pub dynamic: bool,

    /// Export results to JSON
    #[arg(short, long)]
    pub json: bool,
}

impl Cli {
    /// Default log filter; `RUST_LOG` still wins when set.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "firmscan=debug,tower_http=debug"
        } else {
            "firmscan=info,tower_http=info"
        }
    }
}
