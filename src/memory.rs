// SPDX-License-Identifier: AGPL-3.0-or-later

//! Machine memory statistics
//!
//! System memory metrics come straight from the OS rather than from a
//! counter session: `GlobalMemoryStatusEx` on Windows, `/proc/meminfo` on
//! Linux. On Linux "virtual" is the commit limit and committed memory, the
//! closest analogue of the Windows commit charge.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Bytes per kilobyte
pub const KILOBYTE: f64 = 1024.0;

/// `floor(used * 100 / total)`, kept within `[0, 100]`; 0 when total is 0
pub fn percent_of(used: f64, total: f64) -> f64 {
    if total <= 0.0 || !used.is_finite() {
        return 0.0;
    }
    ((used * 100.0) / total).floor().clamp(0.0, 100.0)
}

/// Bytes expressed in kilobytes, never negative
pub fn kilobytes(bytes: f64) -> f64 {
    (bytes / KILOBYTE).max(0.0)
}

/// Point-in-time memory statistics in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemoryStatus {
    pub total_physical: u64,
    pub available_physical: u64,
    pub total_virtual: u64,
    pub available_virtual: u64,
}

impl MemoryStatus {
    pub fn used_physical(&self) -> u64 {
        self.total_physical.saturating_sub(self.available_physical)
    }

    pub fn used_virtual(&self) -> u64 {
        self.total_virtual.saturating_sub(self.available_virtual)
    }

    /// Physical memory in use, percent
    pub fn physical_percent(&self) -> f64 {
        percent_of(self.used_physical() as f64, self.total_physical as f64)
    }

    /// Physical memory in use, kilobytes
    pub fn physical_kb(&self) -> f64 {
        kilobytes(self.used_physical() as f64)
    }

    /// Virtual memory in use, percent
    pub fn virtual_percent(&self) -> f64 {
        percent_of(self.used_virtual() as f64, self.total_virtual as f64)
    }

    /// Virtual memory in use, kilobytes
    pub fn virtual_kb(&self) -> f64 {
        kilobytes(self.used_virtual() as f64)
    }

    pub fn totals(&self) -> MemoryTotals {
        MemoryTotals {
            physical: self.total_physical as f64,
            virtual_memory: self.total_virtual as f64,
        }
    }
}

/// Machine totals captured once when a process observer is opened
///
/// Passed by value to every process instance the observer owns; total
/// memory is not refreshed per poll.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MemoryTotals {
    pub physical: f64,
    pub virtual_memory: f64,
}

/// Source of [`MemoryStatus`] readings
pub trait MemoryStatusSource: Send + Sync {
    fn memory_status(&self) -> Result<MemoryStatus>;
}

/// The running machine's memory statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeMemory;

#[cfg(windows)]
impl MemoryStatusSource for NativeMemory {
    fn memory_status(&self) -> Result<MemoryStatus> {
        use windows::Win32::System::SystemInformation::{GlobalMemoryStatusEx, MEMORYSTATUSEX};

        let mut status = MEMORYSTATUSEX {
            dwLength: std::mem::size_of::<MEMORYSTATUSEX>() as u32,
            ..Default::default()
        };
        unsafe { GlobalMemoryStatusEx(&mut status) }
            .map_err(|e| crate::error::Error::system(e.code().0 as u32))?;

        Ok(MemoryStatus {
            total_physical: status.ullTotalPhys,
            available_physical: status.ullAvailPhys,
            total_virtual: status.ullTotalVirtual,
            available_virtual: status.ullAvailVirtual,
        })
    }
}

#[cfg(target_os = "linux")]
impl MemoryStatusSource for NativeMemory {
    fn memory_status(&self) -> Result<MemoryStatus> {
        read_meminfo(std::path::Path::new("/proc/meminfo"))
    }
}

#[cfg(target_os = "linux")]
fn read_meminfo(path: &std::path::Path) -> Result<MemoryStatus> {
    let content = std::fs::read_to_string(path).map_err(crate::error::Error::os)?;
    parse_meminfo(&content)
}

#[cfg(not(any(windows, target_os = "linux")))]
impl MemoryStatusSource for NativeMemory {
    fn memory_status(&self) -> Result<MemoryStatus> {
        Err(crate::error::Error::UnsupportedPlatform(
            "memory statistics are available on Windows and Linux only".to_string(),
        ))
    }
}

/// Parse `/proc/meminfo` into a [`MemoryStatus`]
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_meminfo(content: &str) -> Result<MemoryStatus> {
    let mut total = None;
    let mut available = None;
    let mut free = 0u64;
    let mut buffers = 0u64;
    let mut cached = 0u64;
    let mut commit_limit = 0u64;
    let mut committed = 0u64;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(kb) = value.parse::<u64>() else {
            continue;
        };
        let bytes = kb.saturating_mul(1024);
        match key {
            "MemTotal:" => total = Some(bytes),
            "MemAvailable:" => available = Some(bytes),
            "MemFree:" => free = bytes,
            "Buffers:" => buffers = bytes,
            "Cached:" => cached = bytes,
            "CommitLimit:" => commit_limit = bytes,
            "Committed_AS:" => committed = bytes,
            _ => {}
        }
    }

    let total_physical = total
        .ok_or_else(|| crate::error::Error::Parse("MemTotal missing from meminfo".to_string()))?;
    // Kernels before 3.14 have no MemAvailable
    let available_physical = available.unwrap_or(free + buffers + cached);

    Ok(MemoryStatus {
        total_physical,
        available_physical: available_physical.min(total_physical),
        total_virtual: commit_limit,
        available_virtual: commit_limit.saturating_sub(committed),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_floor_semantics() {
        assert_eq!(percent_of(1.0, 3.0), 33.0);
        assert_eq!(percent_of(2.0, 3.0), 66.0);
        assert_eq!(percent_of(3.0, 3.0), 100.0);
        assert_eq!(percent_of(0.0, 3.0), 0.0);
    }

    #[test]
    fn test_percent_bounds() {
        assert_eq!(percent_of(5.0, 0.0), 0.0);
        assert_eq!(percent_of(500.0, 100.0), 100.0);
        assert_eq!(percent_of(-5.0, 100.0), 0.0);
        assert_eq!(percent_of(f64::NAN, 100.0), 0.0);
    }

    #[test]
    fn test_kilobytes() {
        assert_eq!(kilobytes(2048.0), 2.0);
        assert_eq!(kilobytes(1536.0), 1.5);
        assert_eq!(kilobytes(-1.0), 0.0);
    }

    #[test]
    fn test_memory_status_derivations() {
        let status = MemoryStatus {
            total_physical: 8 * 1024 * 1024,
            available_physical: 2 * 1024 * 1024,
            total_virtual: 4096,
            available_virtual: 8192,
        };
        assert_eq!(status.physical_percent(), 75.0);
        assert_eq!(status.physical_kb(), 6.0 * 1024.0);
        assert_eq!(status.used_virtual(), 0);
        assert_eq!(status.virtual_percent(), 0.0);
        assert_eq!(status.totals().physical, (8 * 1024 * 1024) as f64);
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "MemTotal:       16000000 kB\n\
                       MemFree:         1000000 kB\n\
                       MemAvailable:    4000000 kB\n\
                       Buffers:          100000 kB\n\
                       Cached:          2000000 kB\n\
                       CommitLimit:    20000000 kB\n\
                       Committed_AS:    5000000 kB\n";
        let status = parse_meminfo(content).unwrap();
        assert_eq!(status.total_physical, 16_000_000 * 1024);
        assert_eq!(status.available_physical, 4_000_000 * 1024);
        assert_eq!(status.total_virtual, 20_000_000 * 1024);
        assert_eq!(status.available_virtual, 15_000_000 * 1024);
        assert_eq!(status.physical_percent(), 75.0);
    }

    #[test]
    fn test_parse_meminfo_without_memavailable() {
        let content = "MemTotal: 1000 kB\nMemFree: 100 kB\nBuffers: 50 kB\nCached: 250 kB\n";
        let status = parse_meminfo(content).unwrap();
        assert_eq!(status.available_physical, 400 * 1024);
        assert_eq!(status.physical_percent(), 60.0);
    }

    #[test]
    fn test_parse_meminfo_missing_total() {
        assert!(parse_meminfo("MemFree: 1 kB\n").is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unreadable_meminfo_is_system_fault() {
        let err = read_meminfo(std::path::Path::new("/proc/no-such-meminfo")).unwrap_err();
        assert!(matches!(err, crate::error::Error::SystemFault { .. }));
        assert_eq!(err.code(), Some(libc::ENOENT as u32));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_native_memory_status() {
        let status = NativeMemory.memory_status().unwrap();
        assert!(status.total_physical > 0);
        let pct = status.physical_percent();
        assert!((0.0..=100.0).contains(&pct));
    }
}
