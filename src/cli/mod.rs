use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "suture-sim")]
#[command(about = "Headless driver for the suturing procedure simulation")]
#[command(long_about = "Runs a multi-site suturing procedure on a simulated clock: tool detections \
                       prepare connection points, sites animate through slide, stitching and reveal, \
                       and the orchestrator paces attempts and reports progress. Start with \
                       'suture-sim run' to sweep every site with a needle.")]
pub struct Cli {
    /// Configuration file (defaults to suture-sim.toml when present)
    #[arg(long, global = true, help = "Read configuration from this TOML file")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a procedure from a detection script or an automatic sweep
    Run {
        /// Number of sites laid out along the incision
        #[arg(long, help = "Number of stitch sites (overrides procedure.site_count)")]
        sites: Option<usize>,
        /// Cooldown between a completion and the next attempt
        #[arg(long, help = "Cooldown in seconds after each completed stitch")]
        cooldown: Option<f64>,
        /// Require sites to be closed in order
        #[arg(long, help = "Enable sites one at a time, in order")]
        sequential: bool,
        /// Total time limit for the run
        #[arg(long, help = "Emit a time-expired event after this many seconds")]
        time_limit: Option<f64>,
        /// Detection script to replay
        #[arg(long, help = "TOML file with [[detection]] entries; defaults to a sweep of every site")]
        script: Option<PathBuf>,
        /// Randomise which point of each site is reached first
        #[arg(long, help = "Shuffle point arrival order in the automatic sweep")]
        shuffle: bool,
        /// Tick at wall-clock speed instead of as fast as possible
        #[arg(long, help = "Pace ticks against the wall clock")]
        realtime: bool,
        /// Print the run report as JSON
        #[arg(long, help = "Print the run report as JSON")]
        json: bool,
    },
    /// Show the effective configuration
    Config {
        /// Write the configuration to a file instead of printing it
        #[arg(long, help = "Write the effective configuration to this file")]
        write: Option<PathBuf>,
    },
}
