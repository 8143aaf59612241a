//! Binding a worker to one OS thread and one logical CPU.
//!
//! Every worker already owns a dedicated OS thread, so binding here means
//! pinning that thread's affinity to a single CPU out of the set the process
//! may run on. Workers are spread over that set by index, so two workers
//! only share a CPU when there are more workers than allowed CPUs.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::Error;

/// Capability to bind the calling thread for the rest of its lifetime.
pub trait ThreadBinder: Send + Sync {
    /// `worker` is the index of the calling worker within its run.
    fn bind(&self, worker: usize) -> Result<Binding, Error>;
}

/// An active binding. Dropping it (or calling `release`) undoes the binding.
///
/// Not `Send`: it must be released on the thread that created it.
pub struct Binding {
    restore: Option<Box<dyn FnOnce()>>,
    _not_send: PhantomData<*const ()>,
}

impl Binding {
    fn noop() -> Self {
        Self {
            restore: None,
            _not_send: PhantomData,
        }
    }

    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    fn with_restore(restore: impl FnOnce() + 'static) -> Self {
        Self {
            restore: Some(Box::new(restore)),
            _not_send: PhantomData,
        }
    }

    pub fn release(mut self) {
        self.undo();
    }

    fn undo(&mut self) {
        if let Some(restore) = self.restore.take() {
            restore();
        }
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.undo();
    }
}

/// Leaves the thread free to migrate.
pub struct NoBinder;

impl ThreadBinder for NoBinder {
    fn bind(&self, _worker: usize) -> Result<Binding, Error> {
        Ok(Binding::noop())
    }
}

/// Pins worker `i` to the `i`-th allowed CPU, wrapping around when there are
/// more workers than CPUs. A no-op where the platform has no affinity
/// primitive.
pub struct SpreadCpuBinder;

#[cfg(target_os = "linux")]
impl ThreadBinder for SpreadCpuBinder {
    fn bind(&self, worker: usize) -> Result<Binding, Error> {
        let original = linux::get_affinity()?;
        let cpu = pick_cpu(&linux::allowed_cpus(&original), worker).ok_or_else(|| {
            Error::InvalidArgs("thread affinity mask has no CPUs".into())
        })?;
        linux::pin_to_cpu(cpu)?;
        Ok(Binding::with_restore(move || linux::set_affinity(&original)))
    }
}

#[cfg(not(target_os = "linux"))]
impl ThreadBinder for SpreadCpuBinder {
    fn bind(&self, _worker: usize) -> Result<Binding, Error> {
        Ok(Binding::noop())
    }
}

pub fn binder(lock_os_thread: bool) -> Arc<dyn ThreadBinder> {
    if lock_os_thread {
        Arc::new(SpreadCpuBinder)
    } else {
        Arc::new(NoBinder)
    }
}

/// CPU for `worker` out of `allowed`, round-robin.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn pick_cpu(allowed: &[usize], worker: usize) -> Option<usize> {
    if allowed.is_empty() {
        return None;
    }
    Some(allowed[worker % allowed.len()])
}

#[cfg(target_os = "linux")]
mod linux {
    use std::mem;

    use crate::error::Error;

    pub fn get_affinity() -> Result<libc::cpu_set_t, Error> {
        let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
        let ret = unsafe { libc::sched_getaffinity(0, mem::size_of::<libc::cpu_set_t>(), &mut set) };
        if ret != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(set)
    }

    pub fn set_affinity(set: &libc::cpu_set_t) {
        let ret = unsafe { libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), set) };
        if ret != 0 {
            log::debug!(
                "failed to restore thread affinity: {}",
                std::io::Error::last_os_error()
            );
        }
    }

    pub fn allowed_cpus(set: &libc::cpu_set_t) -> Vec<usize> {
        (0..libc::CPU_SETSIZE as usize)
            .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, set) })
            .collect()
    }

    pub fn pin_to_cpu(cpu: usize) -> Result<(), Error> {
        let mut pinned: libc::cpu_set_t = unsafe { mem::zeroed() };
        unsafe { libc::CPU_SET(cpu, &mut pinned) };
        let ret = unsafe { libc::sched_setaffinity(0, mem::size_of::<libc::cpu_set_t>(), &pinned) };
        if ret != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_no_binder_is_noop() {
        let binding = NoBinder.bind(0).unwrap();
        binding.release();
    }

    #[test]
    fn test_pick_cpu_round_robin() {
        let allowed = [0, 2, 5];
        assert_eq!(pick_cpu(&allowed, 0), Some(0));
        assert_eq!(pick_cpu(&allowed, 1), Some(2));
        assert_eq!(pick_cpu(&allowed, 2), Some(5));
        assert_eq!(pick_cpu(&allowed, 3), Some(0));
        assert_eq!(pick_cpu(&[], 0), None);
    }

    #[test]
    fn test_pick_cpu_distinct_up_to_allowed_count() {
        let allowed: Vec<usize> = (0..8).collect();
        let mut picked: Vec<usize> = (0..8).filter_map(|w| pick_cpu(&allowed, w)).collect();
        picked.sort();
        picked.dedup();
        assert_eq!(picked.len(), 8);
    }

    #[test]
    fn test_binder_selection_does_not_panic() {
        for lock in [true, false] {
            let b = binder(lock);
            thread::spawn(move || {
                if let Ok(binding) = b.bind(0) {
                    binding.release();
                }
            })
            .join()
            .unwrap();
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_spread_binder_pins_workers_to_distinct_cpus() {
        let allowed = linux::allowed_cpus(&linux::get_affinity().unwrap());
        let workers = allowed.len().min(4);

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                thread::spawn(move || {
                    let binding = match SpreadCpuBinder.bind(worker) {
                        Ok(b) => b,
                        // Sandboxes may forbid affinity changes.
                        Err(_) => return None,
                    };
                    let pinned = linux::allowed_cpus(&linux::get_affinity().unwrap());
                    binding.release();
                    Some(pinned)
                })
            })
            .collect();

        let mut cpus = Vec::new();
        for handle in handles {
            match handle.join().unwrap() {
                Some(pinned) => {
                    assert_eq!(pinned.len(), 1);
                    cpus.push(pinned[0]);
                }
                None => return,
            }
        }
        cpus.sort();
        cpus.dedup();
        assert_eq!(cpus.len(), workers);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_spread_binder_restores_original_mask() {
        thread::spawn(|| {
            let before = linux::allowed_cpus(&linux::get_affinity().unwrap());
            let binding = match SpreadCpuBinder.bind(1) {
                Ok(b) => b,
                Err(_) => return,
            };
            binding.release();
            let after = linux::allowed_cpus(&linux::get_affinity().unwrap());
            assert_eq!(after, before);
        })
        .join()
        .unwrap();
    }
}
