use std::fmt;
use std::time::{Duration, Instant};

use crate::context::RunContext;
use crate::cputime;
use crate::error::Error;

/// CPU consumption observed over one reporting interval.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageReport {
    pub pid: u32,
    /// Core-seconds consumed per wall-second.
    pub cpu_burned: f64,
    pub target: f64,
    /// Signed deviation from the target in percent. `None` for a zero target.
    pub delta_pct: Option<f64>,
}

impl UsageReport {
    pub fn new(previous_ns: u64, current_ns: u64, interval: Duration, target: f64) -> Self {
        let consumed = current_ns.saturating_sub(previous_ns) as f64;
        let interval_ns = interval.as_nanos() as f64;
        let cpu_burned = if interval_ns > 0.0 {
            consumed / interval_ns
        } else {
            0.0
        };
        let delta_pct = if target > 0.0 {
            Some((cpu_burned - target) / target * 100.0)
        } else {
            None
        };
        Self {
            pid: std::process::id(),
            cpu_burned,
            target,
            delta_pct,
        }
    }
}

impl fmt::Display for UsageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.delta_pct {
            Some(delta) => write!(
                f,
                "pid {} cpu usage: {:.3} ({:+.1}%)",
                self.pid, self.cpu_burned, delta
            ),
            None => write!(f, "pid {} cpu usage: {:.3} (n/a)", self.pid, self.cpu_burned),
        }
    }
}

/// Destination for usage reports.
pub trait ReportSink: Send + Sync {
    fn report(&self, report: &UsageReport);
}

/// Writes reports through the `log` facade unless quiet.
pub struct LogSink {
    quiet: bool,
}

impl LogSink {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl ReportSink for LogSink {
    fn report(&self, report: &UsageReport) {
        if !self.quiet {
            log::info!("{}", report);
        }
    }
}

/// Sample process CPU time every `interval` until `ctx` is cancelled.
pub fn run_reporter(target: f64, interval: Duration, ctx: &RunContext, sink: &dyn ReportSink) {
    report_with(target, interval, ctx, sink, cputime::process_cpu_time)
}

/// Reporter loop over an arbitrary CPU-time source.
///
/// Until one sample succeeds there is no baseline, so ticks are spent
/// seeding it instead of reporting. After that a failed sample reuses the
/// previous one, which reports zero usage for that tick.
fn report_with<F>(
    target: f64,
    interval: Duration,
    ctx: &RunContext,
    sink: &dyn ReportSink,
    mut sample: F,
) where
    F: FnMut() -> Result<u64, Error>,
{
    let checked = |sample: &mut F| match sample() {
        Ok(ns) => Some(ns),
        Err(e) => {
            log::warn!("failed to sample cpu time: {}", e);
            None
        }
    };

    let mut previous = checked(&mut sample);
    let mut next_tick = Instant::now() + interval;

    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        if ctx.sleep(wait) {
            return;
        }
        next_tick += interval;

        let current = checked(&mut sample);
        match previous {
            Some(prev) => {
                let current = current.unwrap_or(prev);
                sink.report(&UsageReport::new(prev, current, interval, target));
                previous = Some(current);
            }
            None => previous = current,
        }
    }
}
