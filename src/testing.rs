//! Simulated machine for unit tests
//!
//! Implements every platform seam over one shared state so a test can start
//! and stop processes between polls, inject PDH statuses and count how many
//! OS resources are still held.

use crate::counter::path::{self, instance_name, CounterPath, ProcessCounter};
use crate::counter::status::*;
use crate::counter::{CounterQuery, CounterSource, RawCounter};
use crate::error::{Error, Result};
use crate::memory::{MemoryStatus, MemoryStatusSource};
use crate::observer::Platform;
use crate::snapshot::{ProcessRecord, ProcessSnapshotProvider};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

const GIB: u64 = 1024 * 1024 * 1024;

/// One simulated process
#[derive(Debug, Clone)]
pub struct SimProcess {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    pub handles: u32,
    pub threads: u32,
    pub cpu: f64,
    pub working_set: f64,
    pub private_bytes: f64,
}

struct Binding {
    path: String,
    query: usize,
    sample: std::result::Result<f64, Status>,
}

struct State {
    processes: Vec<SimProcess>,
    next_pid: u32,
    system_counters: HashMap<String, f64>,
    memory: MemoryStatus,
    memory_fault: Option<Status>,
    snapshot_fault: Option<Status>,
    open_fault: Option<Status>,
    collect_fault: Option<Status>,
    neutral_fault: Option<Status>,
    language_neutral: bool,
    read_faults: HashMap<String, Status>,
    bindings: HashMap<RawCounter, Binding>,
    next_counter: RawCounter,
    next_query: usize,
    open_queries: usize,
    neutral_bindings: usize,
    localized_bindings: usize,
    collections: usize,
}

impl State {
    fn resolve_instance(&self, name: &str, ordinal: u32) -> Option<&SimProcess> {
        self.processes
            .iter()
            .filter(|p| instance_name(&p.name) == name)
            .nth(ordinal as usize)
    }

    fn validate(&self, raw_path: &str) -> std::result::Result<(), Status> {
        let parsed = CounterPath::parse(raw_path).ok_or(PDH_CSTATUS_BAD_COUNTERNAME)?;
        if parsed.object == path::PROCESS_OBJECT {
            if parsed.instance.is_none() {
                return Err(PDH_INVALID_INSTANCE);
            }
            return ProcessCounter::from_counter_name(parsed.counter)
                .map(|_| ())
                .ok_or(PDH_CSTATUS_NO_COUNTER);
        }
        if self.system_value(raw_path).is_some() {
            return Ok(());
        }
        let object_known = self
            .system_counters
            .keys()
            .map(String::as_str)
            .chain([path::SYSTEM_PROCESSES])
            .filter_map(CounterPath::parse)
            .any(|p| p.object == parsed.object);
        Err(if object_known {
            PDH_CSTATUS_NO_COUNTER
        } else {
            PDH_CSTATUS_NO_OBJECT
        })
    }

    /// Explicitly set values win over the ones derived from the process table
    fn system_value(&self, raw_path: &str) -> Option<f64> {
        if let Some(value) = self.system_counters.get(raw_path) {
            return Some(*value);
        }
        match raw_path {
            path::SYSTEM_PROCESSES => Some(self.processes.len() as f64),
            path::SYSTEM_THREADS => Some(self.processes.iter().map(|p| p.threads as f64).sum()),
            _ => None,
        }
    }

    fn sample(&self, raw_path: &str) -> std::result::Result<f64, Status> {
        let parsed = CounterPath::parse(raw_path).ok_or(PDH_CSTATUS_BAD_COUNTERNAME)?;
        if parsed.object != path::PROCESS_OBJECT {
            return self.system_value(raw_path).ok_or(PDH_CSTATUS_NO_OBJECT);
        }
        let (name, ordinal) = parsed.instance_ordinal().ok_or(PDH_INVALID_INSTANCE)?;
        let counter =
            ProcessCounter::from_counter_name(parsed.counter).ok_or(PDH_CSTATUS_NO_COUNTER)?;
        let process = self
            .resolve_instance(name, ordinal)
            .ok_or(PDH_CSTATUS_NO_INSTANCE)?;
        Ok(match counter {
            ProcessCounter::Id => process.pid as f64,
            ProcessCounter::HandleCount => process.handles as f64,
            ProcessCounter::ThreadCount => process.threads as f64,
            ProcessCounter::ProcessorTime => process.cpu,
            ProcessCounter::WorkingSet => process.working_set,
            ProcessCounter::PrivateBytes => process.private_bytes,
        })
    }
}

/// Shared simulated OS; clones observe the same machine
#[derive(Clone)]
pub struct SimulatedMachine {
    state: Arc<Mutex<State>>,
}

impl SimulatedMachine {
    /// An 8 GiB machine with no processes
    ///
    /// Process and thread totals follow the process table unless set
    /// explicitly.
    pub fn new() -> Self {
        let system_counters = HashMap::from([
            (path::PROCESSOR_TIME_TOTAL.to_string(), 12.5),
            (path::DISK_TIME_TOTAL.to_string(), 3.0),
        ]);
        Self {
            state: Arc::new(Mutex::new(State {
                processes: Vec::new(),
                next_pid: 1000,
                system_counters,
                memory: MemoryStatus {
                    total_physical: 8 * GIB,
                    available_physical: 6 * GIB,
                    total_virtual: 16 * GIB,
                    available_virtual: 12 * GIB,
                },
                memory_fault: None,
                snapshot_fault: None,
                open_fault: None,
                collect_fault: None,
                neutral_fault: None,
                language_neutral: true,
                read_faults: HashMap::new(),
                bindings: HashMap::new(),
                next_counter: 1,
                next_query: 1,
                open_queries: 0,
                neutral_bindings: 0,
                localized_bindings: 0,
                collections: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Platform bundle backed by this machine
    pub fn platform(&self) -> Platform {
        Platform::new(
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            Arc::new(self.clone()),
        )
    }

    /// Start a process at the end of enumeration order
    pub fn spawn(&self, name: &str) -> u32 {
        let index = self.lock().processes.len();
        self.insert_process_at(index, name)
    }

    /// Start a process at `index` in enumeration order
    pub fn insert_process_at(&self, index: usize, name: &str) -> u32 {
        let mut state = self.lock();
        let pid = state.next_pid;
        state.next_pid += 4;
        let process = SimProcess {
            pid,
            ppid: 1,
            name: name.to_string(),
            handles: 10 + pid % 7,
            threads: 1 + pid % 3,
            cpu: 1.5,
            working_set: 4.0 * 1024.0 * 1024.0,
            private_bytes: 2.0 * 1024.0 * 1024.0,
        };
        let index = index.min(state.processes.len());
        state.processes.insert(index, process);
        pid
    }

    /// Stop a process; false if it was not running
    pub fn kill(&self, pid: u32) -> bool {
        let mut state = self.lock();
        let before = state.processes.len();
        state.processes.retain(|p| p.pid != pid);
        state.processes.len() != before
    }

    pub fn with_process(&self, pid: u32, f: impl FnOnce(&mut SimProcess)) {
        let mut state = self.lock();
        if let Some(process) = state.processes.iter_mut().find(|p| p.pid == pid) {
            f(process);
        }
    }

    pub fn pids(&self) -> Vec<u32> {
        self.lock().processes.iter().map(|p| p.pid).collect()
    }

    pub fn set_system_counter(&self, path: &str, value: f64) {
        self.lock().system_counters.insert(path.to_string(), value);
    }

    pub fn set_memory(&self, memory: MemoryStatus) {
        self.lock().memory = memory;
    }

    pub fn fail_memory(&self, status: Option<Status>) {
        self.lock().memory_fault = status;
    }

    pub fn fail_snapshot(&self, status: Option<Status>) {
        self.lock().snapshot_fault = status;
    }

    pub fn fail_open(&self, status: Status) {
        self.lock().open_fault = Some(status);
    }

    pub fn fail_collect(&self, status: Option<Status>) {
        self.lock().collect_fault = status;
    }

    /// Make every later language-neutral binding fail with `status`
    pub fn fail_language_neutral(&self, status: Status) {
        self.lock().neutral_fault = Some(status);
    }

    pub fn set_language_neutral_support(&self, supported: bool) {
        self.lock().language_neutral = supported;
    }

    /// Make reads of `path` fail with `status`; `None` restores them
    pub fn fail_reads(&self, path: &str, status: Option<Status>) {
        let mut state = self.lock();
        match status {
            Some(status) => state.read_faults.insert(path.to_string(), status),
            None => state.read_faults.remove(path),
        };
    }

    pub fn neutral_bindings(&self) -> usize {
        self.lock().neutral_bindings
    }

    pub fn localized_bindings(&self) -> usize {
        self.lock().localized_bindings
    }

    /// Counters bound across all open queries
    pub fn live_counters(&self) -> usize {
        self.lock().bindings.len()
    }

    pub fn open_queries(&self) -> usize {
        self.lock().open_queries
    }

    /// Successful collection ticks across all queries
    pub fn collections(&self) -> usize {
        self.lock().collections
    }
}

impl Default for SimulatedMachine {
    fn default() -> Self {
        Self::new()
    }
}

struct SimQuery {
    id: usize,
    machine: SimulatedMachine,
    closed: bool,
}

impl SimQuery {
    fn bind(&mut self, path: &str, neutral: bool) -> std::result::Result<RawCounter, Status> {
        let mut state = self.machine.lock();
        if self.closed {
            return Err(PDH_INVALID_HANDLE);
        }
        if neutral {
            if let Some(status) = state.neutral_fault {
                return Err(status);
            }
        }
        state.validate(path)?;

        let raw = state.next_counter;
        state.next_counter += 1;
        state.bindings.insert(
            raw,
            Binding {
                path: path.to_string(),
                query: self.id,
                sample: Err(PDH_CSTATUS_INVALID_DATA),
            },
        );
        if neutral {
            state.neutral_bindings += 1;
        } else {
            state.localized_bindings += 1;
        }
        Ok(raw)
    }
}

impl CounterQuery for SimQuery {
    fn supports_language_neutral(&self) -> bool {
        self.machine.lock().language_neutral
    }

    fn add_counter(&mut self, path: &str) -> std::result::Result<RawCounter, Status> {
        self.bind(path, false)
    }

    fn add_language_neutral_counter(&mut self, path: &str) -> std::result::Result<RawCounter, Status> {
        self.bind(path, true)
    }

    fn remove_counter(&mut self, counter: RawCounter) -> Status {
        let mut state = self.machine.lock();
        match state.bindings.get(&counter) {
            Some(binding) if binding.query == self.id => {
                state.bindings.remove(&counter);
                ERROR_SUCCESS
            }
            _ => PDH_INVALID_HANDLE,
        }
    }

    fn collect(&mut self) -> Status {
        let mut guard = self.machine.lock();
        if self.closed {
            return PDH_INVALID_HANDLE;
        }
        if let Some(status) = guard.collect_fault {
            return status;
        }

        let state = &mut *guard;
        let samples: Vec<_> = state
            .bindings
            .iter()
            .filter(|(_, b)| b.query == self.id)
            .map(|(raw, b)| (*raw, state.sample(&b.path)))
            .collect();
        for (raw, sample) in samples {
            if let Some(binding) = state.bindings.get_mut(&raw) {
                binding.sample = sample;
            }
        }
        state.collections += 1;
        ERROR_SUCCESS
    }

    fn formatted_value(&self, counter: RawCounter) -> std::result::Result<f64, Status> {
        let state = self.machine.lock();
        let binding = state
            .bindings
            .get(&counter)
            .filter(|b| b.query == self.id)
            .ok_or(PDH_INVALID_HANDLE)?;
        if let Some(status) = state.read_faults.get(&binding.path) {
            return Err(*status);
        }
        binding.sample
    }

    fn close(&mut self) -> Status {
        let mut state = self.machine.lock();
        if self.closed {
            return PDH_INVALID_HANDLE;
        }
        self.closed = true;
        let id = self.id;
        state.bindings.retain(|_, b| b.query != id);
        state.open_queries -= 1;
        ERROR_SUCCESS
    }
}

impl CounterSource for SimulatedMachine {
    fn open(&self) -> std::result::Result<Box<dyn CounterQuery>, Status> {
        let mut state = self.lock();
        if let Some(status) = state.open_fault {
            return Err(status);
        }
        let id = state.next_query;
        state.next_query += 1;
        state.open_queries += 1;
        Ok(Box::new(SimQuery {
            id,
            machine: self.clone(),
            closed: false,
        }))
    }
}

impl ProcessSnapshotProvider for SimulatedMachine {
    fn list_processes(&self) -> Result<Vec<ProcessRecord>> {
        let state = self.lock();
        if let Some(status) = state.snapshot_fault {
            return Err(Error::system(status));
        }
        Ok(state
            .processes
            .iter()
            .map(|p| ProcessRecord {
                pid: p.pid,
                ppid: p.ppid,
                name: p.name.clone(),
                handles: p.handles,
                threads: p.threads,
                physical_memory_kb: p.working_set / 1024.0,
                virtual_memory_kb: p.private_bytes / 1024.0,
                ..Default::default()
            })
            .collect())
    }
}

impl MemoryStatusSource for SimulatedMachine {
    fn memory_status(&self) -> Result<MemoryStatus> {
        let state = self.lock();
        match state.memory_fault {
            Some(status) => Err(Error::system(status)),
            None => Ok(state.memory),
        }
    }
}
