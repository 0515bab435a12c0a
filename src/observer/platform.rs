//! OS collaborators an observer is built on

use crate::config::Config;
use crate::counter::{CounterSession, CounterSource};
use crate::error::Result;
use crate::memory::{MemoryStatus, MemoryStatusSource};
use crate::snapshot::{ProcessRecord, ProcessSnapshotProvider};
use std::sync::Arc;

/// Counter backend, process lister and memory statistics, bundled
#[derive(Clone)]
pub struct Platform {
    counters: Arc<dyn CounterSource>,
    snapshots: Arc<dyn ProcessSnapshotProvider>,
    memory: Arc<dyn MemoryStatusSource>,
    prefer_language_neutral: bool,
}

impl Platform {
    pub fn new(
        counters: Arc<dyn CounterSource>,
        snapshots: Arc<dyn ProcessSnapshotProvider>,
        memory: Arc<dyn MemoryStatusSource>,
    ) -> Self {
        Self {
            counters,
            snapshots,
            memory,
            prefer_language_neutral: true,
        }
    }

    /// Whether sessions try the language-neutral binding first
    pub fn with_language_neutral(mut self, prefer: bool) -> Self {
        self.prefer_language_neutral = prefer;
        self
    }

    /// The running machine's backends
    #[cfg(windows)]
    pub fn native(config: &Config) -> Result<Self> {
        use crate::counter::pdh::PdhSource;
        use crate::memory::NativeMemory;
        use crate::snapshot::NativeSnapshot;

        Ok(Self::new(
            Arc::new(PdhSource),
            Arc::new(NativeSnapshot {
                acquire_debug_privilege: config.snapshot.acquire_debug_privilege,
            }),
            Arc::new(NativeMemory),
        )
        .with_language_neutral(config.counters.prefer_language_neutral))
    }

    /// The running machine's backends
    #[cfg(target_os = "linux")]
    pub fn native(config: &Config) -> Result<Self> {
        use crate::counter::procfs::ProcfsSource;
        use crate::memory::NativeMemory;
        use crate::snapshot::NativeSnapshot;

        Ok(Self::new(
            Arc::new(ProcfsSource),
            Arc::new(NativeSnapshot {
                acquire_debug_privilege: config.snapshot.acquire_debug_privilege,
            }),
            Arc::new(NativeMemory),
        )
        .with_language_neutral(config.counters.prefer_language_neutral))
    }

    #[cfg(not(any(windows, target_os = "linux")))]
    pub fn native(_config: &Config) -> Result<Self> {
        Err(crate::error::Error::UnsupportedPlatform(
            "performance counters are available on Windows and Linux only".to_string(),
        ))
    }

    pub fn open_session(&self) -> Result<CounterSession> {
        CounterSession::open(self.counters.as_ref(), self.prefer_language_neutral)
    }

    pub fn list_processes(&self) -> Result<Vec<ProcessRecord>> {
        self.snapshots.list_processes()
    }

    pub fn memory_status(&self) -> Result<MemoryStatus> {
        self.memory.memory_status()
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("prefer_language_neutral", &self.prefer_language_neutral)
            .finish_non_exhaustive()
    }
}
