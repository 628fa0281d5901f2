//! POSIX `RLIMIT_AS` enforcement for sandboxed tool subprocesses.
//!
//! Installed inside the child via `pre_exec`, between fork and exec, so the
//! limit applies to the tool's own process image rather than the parent.

#[cfg(unix)]
pub fn apply_memory_limit(max_memory_mb: u32) -> std::io::Result<()> {
    let as_bytes = (max_memory_mb as u64) * 1024 * 1024;
    let limit = libc::rlimit {
        rlim_cur: as_bytes,
        rlim_max: as_bytes,
    };

    // SAFETY: setrlimit is async-signal-safe on Linux/macOS and is the
    // documented way to bound a child's address space from pre_exec.
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn apply_memory_limit(_max_memory_mb: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn rejects_absurd_limit_gracefully() {
        // u32::MAX MB would overflow into a limit larger than any real
        // system; setrlimit should simply fail rather than panic.
        let result = apply_memory_limit(u32::MAX);
        let _ = result;
    }
}
