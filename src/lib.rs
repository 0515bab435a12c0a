//! # Perf Observer
//!
//! Point-in-time snapshots of operating-system performance counters,
//! system-wide and per process, selected by a bitmask of metrics.
//!
//! Per-process counters are addressed by process name plus instance
//! ordinal, not by pid. Observers re-derive the ordinal-to-process mapping
//! on every poll and report the `pid` read back from the counters so the
//! caller can tell which process each result belongs to.
//!
//! ## Quick start
//!
//! ```no_run
//! use perfobs::mask::{process, system};
//!
//! let mut machine = perfobs::open_system_observer()?;
//! let metrics = machine.poll(system::PROCESSOR_USAGE | system::PHYSICAL_MEMORY_USAGE)?;
//! println!("{:?}", metrics);
//!
//! let mut me = perfobs::open_process_observer(std::process::id())?;
//! println!("{:?}", me.poll(process::HANDLE_COUNT | process::THREAD_COUNT)?);
//!
//! for record in perfobs::list_all_processes()? {
//!     println!("{:>6} {}", record.pid, record.name);
//! }
//! # Ok::<(), perfobs::Error>(())
//! ```
//!
//! ## Platforms
//!
//! | Platform | Counters | Processes | Memory |
//! |----------|----------|-----------|--------|
//! | Windows  | PDH | ToolHelp32 | `GlobalMemoryStatusEx` |
//! | Linux    | `/proc` emulation | `/proc` | `/proc/meminfo` |

pub mod config;
pub mod counter;
pub mod error;
pub mod mask;
pub mod memory;
pub mod observer;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use mask::MetricMask;
pub use observer::{Metrics, Observer, ObserverKind, Platform, PollResult};
pub use snapshot::ProcessRecord;

use snapshot::{NativeSnapshot, ProcessSnapshotProvider};

/// Every running process except the idle and kernel pseudo-processes
///
/// Independent of any observer or counter session.
pub fn list_all_processes() -> Result<Vec<ProcessRecord>> {
    NativeSnapshot::default().list_processes()
}

/// Machine-wide observer on the native platform with default settings
pub fn open_system_observer() -> Result<Observer> {
    Observer::system(&Platform::native(&Config::default())?)
}

/// Observer for one pid on the native platform with default settings
pub fn open_process_observer(pid: u32) -> Result<Observer> {
    Observer::process_id(&Platform::native(&Config::default())?, pid)
}

/// Observer for every process named `name` on the native platform
pub fn open_process_name_observer(name: &str) -> Result<Observer> {
    Observer::process_name(&Platform::native(&Config::default())?, name)
}
