//! CLI flags: `jabs [-c FILE] [-a DIR] [--pidfile FILE] [-v|-q] [-f] [-b] [-s] [SET ...]`.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Unattended, cron-driven backup orchestrator")]
pub struct Cli {
    /// Path to the INI configuration file.
    #[arg(short = 'c', long = "config", default_value = "/etc/jabs/jabs.cfg")]
    pub config: PathBuf,

    /// Directory holding per-set interval cache files.
    #[arg(short = 'a', long = "cachedir", default_value = "/var/cache/jabs")]
    pub cache_dir: PathBuf,

    /// Overrides the config file's [Global] PIDFILE.
    #[arg(long = "pidfile")]
    pub pidfile: Option<PathBuf>,

    /// Raise log verbosity to debug.
    #[arg(short = 'v', long = "verbose", conflicts_with = "quiet")]
    pub verbose: bool,

    /// Lower log verbosity to warnings only.
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose")]
    pub quiet: bool,

    /// Ignore runtime-window and interval constraints.
    #[arg(short = 'f', long = "force")]
    pub force: bool,

    /// Exit 0 silently if another instance is already running.
    #[arg(short = 'b', long = "batch")]
    pub batch: bool,

    /// Dry run: log every side effect instead of performing it.
    #[arg(short = 's', long = "safe")]
    pub safe: bool,

    /// Restrict execution to these set names (case-insensitive).
    pub sets: Vec<String>,
}

impl Cli {
    pub fn verbosity(&self) -> crate::logging::Verbosity {
        if self.verbose {
            crate::logging::Verbosity::Verbose
        } else if self.quiet {
            crate::logging::Verbosity::Quiet
        } else {
            crate::logging::Verbosity::Normal
        }
    }
}
