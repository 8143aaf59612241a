mod affinity;
mod cli;
mod config;
mod context;
mod cputime;
mod duration;
mod error;
mod load;
mod logging;
mod report;
mod scheduler;

use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use cli::Cli;
use config::BurnConfig;
use context::RunContext;
use error::Error;
use report::LogSink;
use scheduler::SchedulerOptions;

/// Settings after layering defaults → TOML file → CLI overrides.
struct Settings {
    burn: String,
    duration: Duration,
    lock_os_thread: bool,
    log_every: Duration,
    quiet: bool,
    work_unit: Duration,
}

fn build_settings(cli: &Cli, mut cfg: BurnConfig) -> Result<Settings, Error> {
    cfg.validate();

    Ok(Settings {
        burn: cli.burn.clone().unwrap_or_else(|| cfg.burn.clone()),
        duration: match cli.duration {
            Some(d) => d,
            None => cfg.duration()?,
        },
        lock_os_thread: cfg.lock_os_thread && !cli.no_lock_os_thread,
        log_every: match cli.log_every {
            Some(d) => d,
            None => cfg.log_every()?,
        },
        quiet: cfg.quiet || cli.quiet,
        work_unit: cfg.work_unit(),
    })
}

/// File layer of the settings. A config that cannot be loaded falls back to
/// defaults; the error is handed back so it can be logged once logging is up.
fn file_config(path: Option<&Path>) -> (BurnConfig, Option<Error>) {
    match config::load_config(path) {
        Ok(c) => (c.burn, None),
        Err(e) => (BurnConfig::default(), Some(e)),
    }
}

fn usage_error(err: Error) -> ! {
    Cli::command().error(ErrorKind::ValueValidation, err).exit()
}

fn main() {
    let cli = Cli::parse();

    let (file_cfg, config_err) = file_config(cli.config_file.as_deref());
    let settings = build_settings(&cli, file_cfg).unwrap_or_else(|e| usage_error(e));

    logging::init(&cli.log, settings.quiet);
    if let Some(e) = config_err {
        log::warn!("{}", e);
    }

    let cores = load::available_cores();
    let target = load::parse_load(&settings.burn, cores).unwrap_or_else(|e| usage_error(e));

    if target > cores {
        log::warn!(
            "burn value {:.2} is larger than the number of available CPUs ({:.2})",
            target,
            cores
        );
    }

    let pid = process::id();
    let ctx = if settings.duration.is_zero() {
        log::info!("pid {} consuming {:.2} cpus until the process is interrupted", pid, target);
        RunContext::new(None)
    } else {
        log::info!(
            "pid {} consuming {:.2} cpus for {} milliseconds",
            pid,
            target,
            settings.duration.as_millis()
        );
        RunContext::new(Some(settings.duration))
    };

    context::install_signal_handlers();

    let opts = SchedulerOptions {
        work_unit: settings.work_unit,
        lock_os_thread: settings.lock_os_thread,
        report_interval: settings.log_every,
    };
    let sink = Arc::new(LogSink::new(settings.quiet));

    match scheduler::run(target, &opts, &ctx, sink) {
        Ok(summary) => {
            log::debug!(
                "stopped {} workers (reporter: {}) after {}",
                summary.workers,
                summary.reporter,
                duration::format_duration(summary.elapsed)
            );
        }
        Err(e) => {
            log::error!("{}", e);
            process::exit(1);
        }
    }
}
