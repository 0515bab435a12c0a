//! `/proc` counter backend
//!
//! Resolves the same counter paths as `pdh.dll`, sampled from procfs:
//!
//! | Path | Source |
//! |------|--------|
//! | `\System\Processes` | `/proc/[pid]` entries |
//! | `\System\Threads` | `/proc/loadavg` |
//! | `\Processor(_Total)\% Processor Time` | `/proc/stat` deltas |
//! | `\PhysicalDisk(_Total)\% Disk Time` | `/proc/diskstats` io_ticks deltas |
//! | `\Process(name#N)\...` | `/proc/[pid]/{stat,statm,fd}` |
//!
//! Instance `name#N` resolves on every collection to the N-th process, in
//! ascending pid order, whose full command name is `name`.
//! Rate counters read `0.0` until they have two samples of the same process.

use super::path::{self, instance_name, CounterPath, ProcessCounter};
use super::status::*;
use super::{CounterQuery, CounterSource, RawCounter};
use crate::snapshot::linux::{self, StatFields};
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

static NEXT_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// Opens `/proc`-backed queries
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcfsSource;

impl CounterSource for ProcfsSource {
    fn open(&self) -> std::result::Result<Box<dyn CounterQuery>, Status> {
        if !std::path::Path::new("/proc/stat").exists() {
            return Err(PDH_CSTATUS_NO_OBJECT);
        }
        Ok(Box::new(ProcfsQuery::default()))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Target {
    Processes,
    Threads,
    ProcessorTotal,
    DiskTotal,
    Process {
        name: String,
        ordinal: u32,
        counter: ProcessCounter,
    },
}

impl Target {
    fn resolve(raw_path: &str) -> std::result::Result<Self, Status> {
        let parsed = CounterPath::parse(raw_path).ok_or(PDH_CSTATUS_BAD_COUNTERNAME)?;
        match (parsed.object, parsed.instance, parsed.counter) {
            ("System", None, "Processes") => Ok(Target::Processes),
            ("System", None, "Threads") => Ok(Target::Threads),
            ("System", _, _) => Err(PDH_CSTATUS_NO_COUNTER),
            ("Processor", Some("_Total"), "% Processor Time") => Ok(Target::ProcessorTotal),
            ("PhysicalDisk", Some("_Total"), "% Disk Time") => Ok(Target::DiskTotal),
            ("Processor" | "PhysicalDisk", Some("_Total"), _) => Err(PDH_CSTATUS_NO_COUNTER),
            ("Processor" | "PhysicalDisk", _, _) => Err(PDH_CSTATUS_NO_INSTANCE),
            (path::PROCESS_OBJECT, Some(_), counter) => {
                let counter =
                    ProcessCounter::from_counter_name(counter).ok_or(PDH_CSTATUS_NO_COUNTER)?;
                let (name, ordinal) = parsed.instance_ordinal().ok_or(PDH_INVALID_INSTANCE)?;
                Ok(Target::Process {
                    name: name.to_string(),
                    ordinal,
                    counter,
                })
            }
            (path::PROCESS_OBJECT, None, _) => Err(PDH_INVALID_INSTANCE),
            _ => Err(PDH_CSTATUS_NO_OBJECT),
        }
    }

    fn is_process(&self) -> bool {
        matches!(self, Target::Process { .. })
    }
}

/// Previous raw sample of a rate counter
#[derive(Debug, Clone, Copy)]
struct RateBase {
    /// Process the sample came from; 0 for machine-wide counters
    pid: u32,
    busy: u64,
    elapsed: f64,
}

#[derive(Debug)]
struct Bound {
    target: Target,
    base: Option<RateBase>,
    value: std::result::Result<f64, Status>,
}

/// One `/proc` polling query
#[derive(Debug)]
pub struct ProcfsQuery {
    counters: HashMap<RawCounter, Bound>,
    started: Instant,
    closed: bool,
}

impl Default for ProcfsQuery {
    fn default() -> Self {
        Self {
            counters: HashMap::new(),
            started: Instant::now(),
            closed: false,
        }
    }
}

/// Per-tick view of the process table, read once and shared by every counter
struct Tick {
    elapsed: f64,
    ticks_per_sec: f64,
    processes: Vec<(u32, StatFields)>,
    cpu: Option<(u64, u64)>,
    disk: Option<(u64, usize)>,
    threads: Option<u64>,
}

impl Tick {
    fn read(started: Instant, targets: &[&Target]) -> Self {
        let need_processes = targets
            .iter()
            .any(|t| t.is_process() || **t == Target::Processes);
        let processes = if need_processes {
            linux::pids()
                .unwrap_or_default()
                .into_iter()
                .filter_map(|pid| linux::read_stat(pid).map(|stat| (pid, stat)))
                .collect()
        } else {
            Vec::new()
        };

        let wants = |target: Target| targets.iter().any(|t| **t == target);
        Self {
            elapsed: started.elapsed().as_secs_f64(),
            ticks_per_sec: linux::clock_ticks(),
            processes,
            cpu: wants(Target::ProcessorTotal)
                .then(|| fs::read_to_string("/proc/stat").ok())
                .flatten()
                .and_then(|s| parse_cpu_times(&s)),
            disk: wants(Target::DiskTotal)
                .then(|| fs::read_to_string("/proc/diskstats").ok())
                .flatten()
                .map(|s| parse_disk_io_ticks(&s, &block_devices())),
            threads: wants(Target::Threads)
                .then(|| fs::read_to_string("/proc/loadavg").ok())
                .flatten()
                .and_then(|s| parse_loadavg_threads(&s)),
        }
    }

    fn instance(&self, name: &str, ordinal: u32) -> Option<&(u32, StatFields)> {
        self.processes
            .iter()
            .filter(|(_, stat)| instance_name(&stat.name) == name)
            .nth(ordinal as usize)
    }
}

/// Percentage of `busy` over `window` since the previous sample
///
/// The first sample of a source only establishes the baseline.
fn rate(
    base: &mut Option<RateBase>,
    pid: u32,
    busy: u64,
    elapsed: f64,
    scale: impl Fn(f64, f64) -> f64,
) -> std::result::Result<f64, Status> {
    let previous = base.replace(RateBase { pid, busy, elapsed });
    match previous {
        Some(prev) if prev.pid == pid => {
            if busy < prev.busy {
                return Err(PDH_CALC_NEGATIVE_VALUE);
            }
            let window = elapsed - prev.elapsed;
            if window <= 0.0 {
                return Err(PDH_CALC_NEGATIVE_TIMEBASE);
            }
            Ok(scale((busy - prev.busy) as f64, window))
        }
        _ => Ok(0.0),
    }
}

fn sample(bound: &mut Bound, tick: &Tick) -> std::result::Result<f64, Status> {
    match &bound.target {
        Target::Processes => Ok(tick.processes.len() as f64),
        Target::Threads => tick.threads.map(|t| t as f64).ok_or(PDH_NO_DATA),
        Target::ProcessorTotal => {
            let (busy, total) = tick.cpu.ok_or(PDH_NO_DATA)?;
            // Timebase is total jiffies rather than wall time
            rate(&mut bound.base, 0, busy, total as f64, |delta, window| {
                (delta * 100.0 / window).min(100.0)
            })
        }
        Target::DiskTotal => {
            let (io_ms, devices) = tick.disk.ok_or(PDH_NO_DATA)?;
            let devices = devices.max(1) as f64;
            rate(&mut bound.base, 0, io_ms, tick.elapsed, |delta, window| {
                (delta / (window * 1000.0 * devices) * 100.0).min(100.0)
            })
        }
        Target::Process {
            name,
            ordinal,
            counter,
        } => {
            let (pid, stat) = tick
                .instance(name, *ordinal)
                .ok_or(PDH_CSTATUS_NO_INSTANCE)?;
            let pid = *pid;
            match counter {
                ProcessCounter::Id => Ok(pid as f64),
                ProcessCounter::ThreadCount => Ok(stat.num_threads as f64),
                ProcessCounter::HandleCount => linux::count_fds(pid)
                    .map(|n| n as f64)
                    .ok_or(PDH_CSTATUS_NO_INSTANCE),
                ProcessCounter::WorkingSet => linux::read_statm(pid)
                    .map(|(resident, _)| resident as f64)
                    .ok_or(PDH_CSTATUS_NO_INSTANCE),
                ProcessCounter::PrivateBytes => linux::read_statm(pid)
                    .map(|(_, private)| private as f64)
                    .ok_or(PDH_CSTATUS_NO_INSTANCE),
                ProcessCounter::ProcessorTime => {
                    let ticks_per_sec = tick.ticks_per_sec;
                    rate(
                        &mut bound.base,
                        pid,
                        stat.utime + stat.stime,
                        tick.elapsed,
                        |delta, window| delta / ticks_per_sec / window * 100.0,
                    )
                }
            }
        }
    }
}

impl ProcfsQuery {
    fn bind(&mut self, raw_path: &str) -> std::result::Result<RawCounter, Status> {
        if self.closed {
            return Err(PDH_INVALID_HANDLE);
        }
        let target = Target::resolve(raw_path)?;
        let raw = NEXT_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.counters.insert(
            raw,
            Bound {
                target,
                base: None,
                value: Err(PDH_CSTATUS_INVALID_DATA),
            },
        );
        Ok(raw)
    }
}

impl CounterQuery for ProcfsQuery {
    fn supports_language_neutral(&self) -> bool {
        false
    }

    fn add_counter(&mut self, path: &str) -> std::result::Result<RawCounter, Status> {
        self.bind(path)
    }

    fn add_language_neutral_counter(&mut self, path: &str) -> std::result::Result<RawCounter, Status> {
        self.bind(path)
    }

    fn remove_counter(&mut self, counter: RawCounter) -> Status {
        match self.counters.remove(&counter) {
            Some(_) => ERROR_SUCCESS,
            None => PDH_INVALID_HANDLE,
        }
    }

    fn collect(&mut self) -> Status {
        if self.closed {
            return PDH_INVALID_HANDLE;
        }
        let targets: Vec<&Target> = self.counters.values().map(|b| &b.target).collect();
        let tick = Tick::read(self.started, &targets);
        for bound in self.counters.values_mut() {
            bound.value = sample(bound, &tick);
        }
        ERROR_SUCCESS
    }

    fn formatted_value(&self, counter: RawCounter) -> std::result::Result<f64, Status> {
        self.counters
            .get(&counter)
            .ok_or(PDH_INVALID_HANDLE)?
            .value
    }

    fn close(&mut self) -> Status {
        if self.closed {
            return PDH_INVALID_HANDLE;
        }
        self.closed = true;
        self.counters.clear();
        ERROR_SUCCESS
    }
}

/// Busy and total jiffies from the aggregate `cpu` line of `/proc/stat`
fn parse_cpu_times(stat: &str) -> Option<(u64, u64)> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }
    // user nice system idle iowait irq softirq steal; guest time is already
    // counted in user and nice
    let total: u64 = values.iter().take(8).sum();
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some((total - idle, total))
}

/// Total threads, the denominator of the `runnable/total` field
fn parse_loadavg_threads(loadavg: &str) -> Option<u64> {
    loadavg
        .split_whitespace()
        .nth(3)?
        .split_once('/')?
        .1
        .parse()
        .ok()
}

/// Summed io_ticks (ms) over `devices` and how many of them were present
fn parse_disk_io_ticks(diskstats: &str, devices: &[String]) -> (u64, usize) {
    let mut io_ms = 0u64;
    let mut seen = 0usize;
    for line in diskstats.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 13 || !devices.iter().any(|d| d == fields[2]) {
            continue;
        }
        if let Ok(ticks) = fields[12].parse::<u64>() {
            io_ms += ticks;
            seen += 1;
        }
    }
    (io_ms, seen)
}

/// Whole block devices, excluding loop and ram disks
fn block_devices() -> Vec<String> {
    fs::read_dir("/sys/block")
        .map(|dir| {
            dir.filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| !name.starts_with("loop") && !name.starts_with("ram"))
                .collect()
        })
        .unwrap_or_default()
}
