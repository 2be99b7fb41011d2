//! Locked-memory limit for perf maps

#![allow(unsafe_code)] // setrlimit() requires unsafe

use std::io;

use log::info;

use super::ResourceLimiter;
use crate::domain::SensorError;

/// Sets `RLIMIT_MEMLOCK` through `setrlimit(2)`.
///
/// Kernels before 5.11 charge BPF maps against this limit instead of the
/// memory cgroup, so it has to be raised before the probe is loaded.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemlockLimiter;

impl ResourceLimiter for MemlockLimiter {
    fn raise(&self, limit: u64) -> Result<(), SensorError> {
        let value = libc::rlim_t::try_from(limit).map_err(|_| SensorError::ResourceLimit {
            limit,
            source: io::Error::new(io::ErrorKind::InvalidInput, "limit exceeds rlim_t"),
        })?;
        let rlim = libc::rlimit { rlim_cur: value, rlim_max: value };

        let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
        if ret != 0 {
            return Err(SensorError::ResourceLimit { limit, source: io::Error::last_os_error() });
        }

        info!("✓ Locked-memory limit set to {} MiB", limit / (1024 * 1024));
        Ok(())
    }
}

/// Current `(soft, hard)` `RLIMIT_MEMLOCK` values.
///
/// # Errors
/// Returns the OS error if `getrlimit(2)` fails
pub fn current_memlock() -> io::Result<(u64, u64)> {
    let mut rlim = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    let ret = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut rlim) };
    if ret != 0 {
        return Err(io::Error::last_os_error());
    }
    #[allow(clippy::useless_conversion)]
    let limits = (u64::from(rlim.rlim_cur), u64::from(rlim.rlim_max));
    Ok(limits)
}
