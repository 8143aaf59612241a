use crate::error::Error;

fn timeval_ns(tv: libc::timeval) -> u64 {
    (tv.tv_sec as u64)
        .wrapping_mul(1_000_000_000)
        .wrapping_add(tv.tv_usec as u64 * 1_000)
}

/// Cumulative user + system CPU time of the whole process, in nanoseconds.
pub fn process_cpu_time() -> Result<u64, Error> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(timeval_ns(usage.ru_utime) + timeval_ns(usage.ru_stime))
}
