//! Observers
//!
//! An [`Observer`] owns exactly one counter session and is polled
//! repeatedly with a [`MetricMask`]. Three variants share one interface:
//!
//! | Variant | Target | Poll result |
//! |---------|--------|-------------|
//! | [`ObserverKind::System`] | the machine | one map |
//! | [`ObserverKind::ProcessId`] | one pid | one map, always with `pid` |
//! | [`ObserverKind::ProcessName`] | every process with a name | one map per process |
//!
//! # Example
//!
//! ```no_run
//! use perfobs::mask::process;
//! use perfobs::{Config, Observer, Platform};
//!
//! let platform = Platform::native(&Config::default())?;
//! let mut observer = Observer::process_name(&platform, "notepad.exe")?;
//! for metrics in observer.poll(process::HANDLE_COUNT | process::THREAD_COUNT)?.into_many() {
//!     println!("{:?}", metrics);
//! }
//! # Ok::<(), perfobs::Error>(())
//! ```
//!
//! Observers are `Send` but not reentrant: poll one observer from one
//! thread at a time. Independent observers need no coordination.

mod instance;
mod platform;
mod process_id;
mod process_name;
mod system;

pub use instance::ProcessInstance;
pub use platform::Platform;
pub use process_id::ProcessIdObserver;
pub use process_name::ProcessNameObserver;
pub use system::SystemObserver;

use crate::error::Result;
use crate::mask::MetricMask;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Metric key to value for one poll of one target
pub type Metrics = BTreeMap<&'static str, f64>;

/// Observer variant tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ObserverKind {
    System,
    ProcessId,
    ProcessName,
}

impl fmt::Display for ObserverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObserverKind::System => write!(f, "System"),
            ObserverKind::ProcessId => write!(f, "ProcessId"),
            ObserverKind::ProcessName => write!(f, "ProcessName"),
        }
    }
}

/// Outcome of one successful poll
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PollResult {
    /// System and pid observers
    Single(Metrics),
    /// Name observers, one entry per live process
    Many(Vec<Metrics>),
}

impl PollResult {
    /// Every map in the result
    pub fn into_many(self) -> Vec<Metrics> {
        match self {
            PollResult::Single(metrics) => vec![metrics],
            PollResult::Many(all) => all,
        }
    }

    pub fn as_single(&self) -> Option<&Metrics> {
        match self {
            PollResult::Single(metrics) => Some(metrics),
            PollResult::Many(_) => None,
        }
    }
}

/// A polled target
#[derive(Debug)]
pub enum Observer {
    System(SystemObserver),
    ProcessId(ProcessIdObserver),
    ProcessName(ProcessNameObserver),
}

impl Observer {
    /// Observe machine-wide metrics
    pub fn system(platform: &Platform) -> Result<Self> {
        Ok(Observer::System(SystemObserver::new(platform)?))
    }

    /// Observe one process; fails with `ProcessNotFound` if `pid` is not running
    pub fn process_id(platform: &Platform, pid: u32) -> Result<Self> {
        Ok(Observer::ProcessId(ProcessIdObserver::new(platform, pid)?))
    }

    /// Observe every process named `name` (`notepad.exe`)
    pub fn process_name(platform: &Platform, name: &str) -> Result<Self> {
        Ok(Observer::ProcessName(ProcessNameObserver::new(platform, name)?))
    }

    pub fn kind(&self) -> ObserverKind {
        match self {
            Observer::System(_) => ObserverKind::System,
            Observer::ProcessId(_) => ObserverKind::ProcessId,
            Observer::ProcessName(_) => ObserverKind::ProcessName,
        }
    }

    /// `System` for the machine, the process name otherwise
    pub fn target_name(&self) -> &str {
        match self {
            Observer::System(_) => "System",
            Observer::ProcessId(o) => o.name(),
            Observer::ProcessName(o) => o.name(),
        }
    }

    /// Collect once and return the metrics selected by `mask`
    ///
    /// Fails atomically: no partial result is returned.
    pub fn poll(&mut self, mask: MetricMask) -> Result<PollResult> {
        match self {
            Observer::System(o) => o.poll(mask).map(PollResult::Single),
            Observer::ProcessId(o) => o.poll(mask).map(PollResult::Single),
            Observer::ProcessName(o) => o.poll(mask).map(PollResult::Many),
        }
    }
}
