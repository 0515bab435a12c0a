//! Process list snapshots
//!
//! A snapshot is the ordered list of running processes at one instant.
//! Process observers walk it to turn a pid or a process name into counter
//! instance ordinals, and [`list_all_processes`](crate::list_all_processes)
//! returns it directly.
//!
//! | Platform | Source |
//! |----------|--------|
//! | Windows  | ToolHelp32 snapshot, enumeration order |
//! | Linux    | `/proc`, ascending pid |

#[cfg(target_os = "linux")]
pub(crate) mod linux;
#[cfg(windows)]
mod toolhelp;

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Pid of the kernel's placeholder process, never listed
#[cfg(windows)]
pub const KERNEL_PLACEHOLDER_PID: u32 = 4;
/// Pid of the kernel's placeholder process, never listed
#[cfg(not(windows))]
pub const KERNEL_PLACEHOLDER_PID: u32 = 2;

/// True for the idle and kernel pseudo-processes
pub fn is_pseudo_process(pid: u32) -> bool {
    pid == 0 || pid == KERNEL_PLACEHOLDER_PID
}

/// One process as seen at snapshot time
///
/// Times are milliseconds (start time since the Unix epoch), memory is
/// kilobytes. Fields the OS refused to reveal stay empty.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    /// Directory holding the executable
    pub path: Option<String>,
    /// `DOMAIN\user` on Windows, user name on Linux
    pub owner: Option<String>,
    pub priority: i32,
    /// Exit code (259 while a Windows process is still running)
    pub status: Option<u32>,
    pub handles: u32,
    pub threads: u32,
    pub kernel_time_ms: f64,
    pub user_time_ms: f64,
    pub start_time_ms: f64,
    /// Working set
    pub physical_memory_kb: f64,
    /// Private bytes
    pub virtual_memory_kb: f64,
}

/// Lists current OS processes
pub trait ProcessSnapshotProvider: Send + Sync {
    /// Processes in enumeration order, pseudo-processes excluded
    ///
    /// Per-process failures leave that record's optional fields empty;
    /// only failing to take the snapshot fails the call.
    fn list_processes(&self) -> Result<Vec<ProcessRecord>>;
}

/// Name of the process with `pid`, if present
pub fn name_of(records: &[ProcessRecord], pid: u32) -> Option<&str> {
    records
        .iter()
        .find(|r| r.pid == pid)
        .map(|r| r.name.as_str())
}

/// Number of processes named `name`
pub fn count_named(records: &[ProcessRecord], name: &str) -> usize {
    records.iter().filter(|r| r.name == name).count()
}

/// Counter instance ordinal of `pid` among processes named `name`
///
/// Walks the snapshot in enumeration order counting same-named processes
/// up to and including `pid`. `None` when no process named `name` has that
/// pid.
pub fn instance_ordinal(records: &[ProcessRecord], name: &str, pid: u32) -> Option<u32> {
    let mut ordinal = 0u32;
    for record in records.iter().filter(|r| r.name == name) {
        if record.pid == pid {
            return Some(ordinal);
        }
        ordinal += 1;
    }
    None
}

/// The running machine's process list
#[derive(Debug, Clone, Copy)]
pub struct NativeSnapshot {
    /// Enable the debug privilege before listing (Windows)
    pub acquire_debug_privilege: bool,
}

impl Default for NativeSnapshot {
    fn default() -> Self {
        Self {
            acquire_debug_privilege: true,
        }
    }
}

impl ProcessSnapshotProvider for NativeSnapshot {
    #[cfg(windows)]
    fn list_processes(&self) -> Result<Vec<ProcessRecord>> {
        toolhelp::list_processes(self.acquire_debug_privilege)
    }

    #[cfg(target_os = "linux")]
    fn list_processes(&self) -> Result<Vec<ProcessRecord>> {
        linux::list_processes()
    }

    #[cfg(not(any(windows, target_os = "linux")))]
    fn list_processes(&self) -> Result<Vec<ProcessRecord>> {
        Err(crate::error::Error::UnsupportedPlatform(
            "process listing is available on Windows and Linux only".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pid: u32, name: &str) -> ProcessRecord {
        ProcessRecord {
            pid,
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn sample() -> Vec<ProcessRecord> {
        vec![
            record(100, "svc.exe"),
            record(200, "notepad.exe"),
            record(300, "svc.exe"),
            record(400, "notepad.exe"),
            record(500, "notepad.exe"),
        ]
    }

    #[test]
    fn test_name_of() {
        let records = sample();
        assert_eq!(name_of(&records, 300), Some("svc.exe"));
        assert_eq!(name_of(&records, 999), None);
    }

    #[test]
    fn test_instance_ordinal_counts_same_name_only() {
        let records = sample();
        assert_eq!(instance_ordinal(&records, "notepad.exe", 200), Some(0));
        assert_eq!(instance_ordinal(&records, "notepad.exe", 400), Some(1));
        assert_eq!(instance_ordinal(&records, "notepad.exe", 500), Some(2));
        assert_eq!(instance_ordinal(&records, "svc.exe", 300), Some(1));
    }

    #[test]
    fn test_instance_ordinal_missing() {
        let records = sample();
        assert_eq!(instance_ordinal(&records, "notepad.exe", 300), None);
        assert_eq!(instance_ordinal(&records, "notepad.exe", 999), None);
        assert_eq!(instance_ordinal(&[], "notepad.exe", 200), None);
    }

    #[test]
    fn test_count_named() {
        let records = sample();
        assert_eq!(count_named(&records, "notepad.exe"), 3);
        assert_eq!(count_named(&records, "svc.exe"), 2);
        assert_eq!(count_named(&records, "calc.exe"), 0);
    }

    #[test]
    fn test_pseudo_processes() {
        assert!(is_pseudo_process(0));
        assert!(is_pseudo_process(KERNEL_PLACEHOLDER_PID));
        assert!(!is_pseudo_process(1));
    }

    #[test]
    fn test_record_serializes_empty_optionals_as_null() {
        let json = serde_json::to_value(record(1, "init")).unwrap();
        assert_eq!(json["pid"], 1);
        assert!(json["path"].is_null());
        assert!(json["owner"].is_null());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_native_listing_excludes_pseudo_and_has_unique_pids() {
        let records = NativeSnapshot::default().list_processes().unwrap();
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| !is_pseudo_process(r.pid)));

        let mut pids: Vec<u32> = records.iter().map(|r| r.pid).collect();
        let total = pids.len();
        pids.sort_unstable();
        pids.dedup();
        assert_eq!(pids.len(), total);

        let me = std::process::id();
        assert!(records.iter().any(|r| r.pid == me));
    }
}
