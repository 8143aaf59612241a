use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::duration::parse_duration;
use crate::logging::LogArgs;

#[derive(Debug, Parser)]
#[command(name = "cpuburn", about = "Burn a configurable amount of CPU")]
pub struct Cli {
    /// How much CPU to burn: a core count (1.5 is one core and a half) or a
    /// percentage of total capacity (on 4 cores, 50% is 2 cores, 62.5% is 2.5)
    #[arg(short = 'b', long, allow_hyphen_values = true)]
    pub burn: Option<String>,

    /// How long to run (e.g. 30s, 1m30s, 500ms). 0 runs until interrupted
    #[arg(short = 'd', long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Do not pin each worker to its own OS thread and CPU; lets the host
    /// scheduler move the load across CPUs at the cost of less consistent results
    #[arg(short = 'L', long)]
    pub no_lock_os_thread: bool,

    /// How often to log actual CPU usage. 0 disables it
    #[arg(short = 'l', long, value_parser = parse_duration)]
    pub log_every: Option<Duration>,

    /// Run quietly, no log output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Configuration file path (default: /etc/cpuburn.toml)
    #[arg(long = "config")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub log: LogArgs,
}
