use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// How often `RunContext::wait` looks at the signal flag.
const SIGNAL_POLL: Duration = Duration::from_millis(250);

extern "C" fn signal_handler(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

/// Route SIGINT and SIGTERM into a graceful stop of every `RunContext`.
pub fn install_signal_handlers() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = signal_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
    }
}

fn signal_received() -> bool {
    SHUTDOWN.load(Ordering::Relaxed)
}

struct Inner {
    cancelled: AtomicBool,
    lock: Mutex<bool>,
    cond: Condvar,
}

/// Deadline plus a broadcast cancellation signal shared by every task of a run.
///
/// Clones are cheap handles onto the same signal. Workers poll
/// [`is_cancelled`](Self::is_cancelled); tasks that sleep use
/// [`sleep`](Self::sleep) so that a cancel wakes them early.
#[derive(Clone)]
pub struct RunContext {
    inner: Arc<Inner>,
    deadline: Option<Instant>,
}

impl RunContext {
    /// A context that expires after `timeout`, or never when `None`.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                lock: Mutex::new(false),
                cond: Condvar::new(),
            }),
            deadline: timeout.map(|t| Instant::now() + t),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        let mut cancelled = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.inner.cond.notify_all();
    }

    /// Non-blocking check.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Sleep for `dur` or until cancelled. Returns `true` if cancelled.
    pub fn sleep(&self, dur: Duration) -> bool {
        let until = Instant::now() + dur;
        let mut cancelled = self.inner.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            let now = Instant::now();
            if now >= until {
                return false;
            }
            cancelled = self
                .inner
                .cond
                .wait_timeout(cancelled, until - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Block until the context is cancelled, firing the cancellation itself
    /// when the deadline passes or a termination signal arrives.
    pub fn wait(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            if signal_received() {
                log::info!("termination signal received, stopping");
                self.cancel();
                return;
            }
            let step = match self.deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.cancel();
                        return;
                    }
                    (deadline - now).min(SIGNAL_POLL)
                }
                None => SIGNAL_POLL,
            };
            self.sleep(step);
        }
    }
}
