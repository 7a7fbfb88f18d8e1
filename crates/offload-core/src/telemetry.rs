//! Process memory telemetry attached to every execution result.

use serde::{Deserialize, Serialize};

/// Memory usage of the current process at a point in time.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    /// Resident set size in bytes (0 where unsupported).
    pub resident_bytes: u64,
    /// Virtual memory size in bytes (0 where unsupported).
    pub virtual_bytes: u64,
    /// Peak resident set size in bytes.
    pub peak_resident_bytes: u64,
}

impl MemorySnapshot {
    /// Capture the current process's memory usage.
    pub fn capture() -> Self {
        let (virtual_bytes, resident_bytes) = read_statm().unwrap_or((0, 0));
        Self {
            resident_bytes,
            virtual_bytes,
            peak_resident_bytes: peak_rss_bytes(),
        }
    }
}

/// Read `/proc/self/statm`: `size resident shared text lib data dt`, in pages.
#[cfg(target_os = "linux")]
fn read_statm() -> Option<(u64, u64)> {
    let contents = std::fs::read_to_string("/proc/self/statm").ok()?;
    let mut parts = contents.split_whitespace();
    let size: u64 = parts.next()?.parse().ok()?;
    let resident: u64 = parts.next()?.parse().ok()?;

    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let page_size = if page_size > 0 { page_size as u64 } else { 4096 };

    Some((size * page_size, resident * page_size))
}

#[cfg(not(target_os = "linux"))]
fn read_statm() -> Option<(u64, u64)> {
    None
}

#[cfg(unix)]
fn peak_rss_bytes() -> u64 {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::zeroed();
    // SAFETY: getrusage only writes into the provided struct.
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, usage.as_mut_ptr()) };
    if rc != 0 {
        return 0;
    }
    let max_rss = unsafe { usage.assume_init() }.ru_maxrss.max(0) as u64;

    // macOS reports bytes, Linux reports kilobytes
    if cfg!(target_os = "macos") {
        max_rss
    } else {
        max_rss * 1024
    }
}

#[cfg(not(unix))]
fn peak_rss_bytes() -> u64 {
    0
}
