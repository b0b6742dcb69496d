use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(
    version = "0.1.0",
    name = "fesim",
    about = "A deterministic time-discrete multi-agent Formula E race simulator"
)]
pub struct SimOpts {
    // FLAGS ---------------------------------------------------------------------------------------
    /// Activate debug printing (per-lap progress of the leader)
    #[clap(short, long)]
    pub debug: bool,

    /// Stream live snapshots to a consumer thread printing interval updates
    #[clap(short, long)]
    pub live: bool,

    // OPTIONS -------------------------------------------------------------------------------------
    /// Set number of simulation runs; seeds are seed, seed+1, ... per run
    #[clap(short, long, default_value = "1")]
    pub no_sim_runs: u32,

    /// Set path to the simulation parameter file (OPTIONAL: if not set, uses a built-in demo race)
    #[clap(short, long)]
    pub parfile_path: Option<PathBuf>,

    /// Override the master seed of the parameter file
    #[clap(short, long)]
    pub seed: Option<u64>,

    /// Override the simulation timestep size in seconds, should be in the range [0.001, 1.0]
    #[clap(short, long)]
    pub timestep_size: Option<f64>,

    /// Override the race distance in laps
    #[clap(long)]
    pub num_laps: Option<u32>,

    /// Write the lap-time table to this CSV file after the run
    #[clap(long)]
    pub csv_path: Option<PathBuf>,
}
