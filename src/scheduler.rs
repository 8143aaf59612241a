use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::affinity::{self, ThreadBinder};
use crate::context::RunContext;
use crate::error::Error;
use crate::report::{self, ReportSink};

/// Granularity of one busy/sleep duty cycle.
pub const WORK_UNIT: Duration = Duration::from_micros(500);

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub work_unit: Duration,
    pub lock_os_thread: bool,
    /// Zero disables reporting.
    pub report_interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            work_unit: WORK_UNIT,
            lock_os_thread: true,
            report_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub workers: usize,
    pub reporter: bool,
    pub elapsed: Duration,
}

/// Upper bound on workers for one run, one OS thread each.
pub const MAX_WORKERS: usize = 1 << 16;

/// Split `target` cores into per-worker shares: whole cores first, then at
/// most one fractional remainder.
pub fn plan_shares(target: f64) -> Result<Vec<f64>, Error> {
    if target.is_nan() || target <= 0.0 {
        return Ok(Vec::new());
    }
    if target.ceil() > MAX_WORKERS as f64 {
        return Err(Error::InvalidArgs(format!(
            "burn value {} needs more than {} workers",
            target, MAX_WORKERS
        )));
    }
    let whole = target.floor();
    let mut shares = vec![1.0; whole as usize];
    let remainder = target - whole;
    if remainder > 0.0 {
        shares.push(remainder);
    }
    Ok(shares)
}

/// Busy-spin for `share` of every work unit and sleep for the rest, until
/// `ctx` is cancelled. Cancellation is only observed between units.
///
/// Units end on a fixed schedule, so oversleeping one unit shortens the next
/// sleep instead of stretching every unit.
pub fn duty_cycle(share: f64, work_unit: Duration, ctx: &RunContext) {
    let run_for = work_unit.mul_f64(share.clamp(0.0, 1.0));
    let mut unit_end = Instant::now();

    loop {
        let unit_start = Instant::now();
        unit_end += work_unit;
        // Stalled for more than a unit (suspended, starved): start over.
        if unit_start > unit_end {
            unit_end = unit_start + work_unit;
        }

        while unit_start.elapsed() < run_for {
            std::hint::spin_loop();
        }
        let sleep_for = unit_end.saturating_duration_since(Instant::now());
        if !sleep_for.is_zero() {
            thread::sleep(sleep_for);
        }
        if ctx.is_cancelled() {
            return;
        }
    }
}

fn run_worker(
    index: usize,
    share: f64,
    work_unit: Duration,
    binder: &dyn ThreadBinder,
    ctx: &RunContext,
) {
    let binding = match binder.bind(index) {
        Ok(b) => Some(b),
        Err(e) => {
            log::warn!("could not bind worker thread, running unbound: {}", e);
            None
        }
    };

    duty_cycle(share, work_unit, ctx);

    if let Some(b) = binding {
        b.release();
    }
}

fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let name = handle.thread().name().unwrap_or("burn").to_string();
        if handle.join().is_err() {
            log::error!("{} panicked", name);
        }
    }
}

fn spawn_all(
    target: f64,
    opts: &SchedulerOptions,
    ctx: &RunContext,
    sink: Arc<dyn ReportSink>,
    handles: &mut Vec<JoinHandle<()>>,
) -> Result<(), Error> {
    let binder = affinity::binder(opts.lock_os_thread);

    for (i, share) in plan_shares(target)?.into_iter().enumerate() {
        let ctx = ctx.clone();
        let binder = Arc::clone(&binder);
        let work_unit = opts.work_unit;
        let handle = thread::Builder::new()
            .name(format!("burn-{}", i))
            .spawn(move || run_worker(i, share, work_unit, binder.as_ref(), &ctx))?;
        handles.push(handle);
    }

    if !opts.report_interval.is_zero() {
        let ctx = ctx.clone();
        let interval = opts.report_interval;
        let handle = thread::Builder::new()
            .name("burn-reporter".into())
            .spawn(move || report::run_reporter(target, interval, &ctx, sink.as_ref()))?;
        handles.push(handle);
    }

    Ok(())
}

/// Burn `target` cores until `ctx` is cancelled, then join every task.
pub fn run(
    target: f64,
    opts: &SchedulerOptions,
    ctx: &RunContext,
    sink: Arc<dyn ReportSink>,
) -> Result<RunSummary, Error> {
    let start = Instant::now();
    let mut handles = Vec::new();

    if let Err(e) = spawn_all(target, opts, ctx, sink, &mut handles) {
        ctx.cancel();
        join_all(handles);
        return Err(e);
    }

    let reporter = !opts.report_interval.is_zero();
    let workers = handles.len() - usize::from(reporter);
    log::debug!("started {} workers (reporter: {})", workers, reporter);

    ctx.wait();
    join_all(handles);

    Ok(RunSummary {
        workers,
        reporter,
        elapsed: start.elapsed(),
    })
}

/// Serializes tests that burn CPU, since the reporter samples the whole
/// process and would otherwise count other tests' load.
#[cfg(test)]
pub(crate) static BURN_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
