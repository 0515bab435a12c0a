//! Counter path construction and parsing
//!
//! Paths follow the PDH layout `\Object(Instance)\Counter`. Per-process
//! counters are addressed by instance name plus ordinal (`\Process(notepad#2)\...`),
//! never by pid. The instance name is the executable name without its
//! extension; this assumes the default `ProcessNameFormat` value under
//! `HKLM\SYSTEM\CurrentControlSet\Services\PerfProc\Performance`.

use std::fmt;

/// Number of running processes
pub const SYSTEM_PROCESSES: &str = "\\System\\Processes";
/// Number of threads across all processes
pub const SYSTEM_THREADS: &str = "\\System\\Threads";
/// Total processor utilisation
pub const PROCESSOR_TIME_TOTAL: &str = "\\Processor(_Total)\\% Processor Time";
/// Total disk busy time
pub const DISK_TIME_TOTAL: &str = "\\PhysicalDisk(_Total)\\% Disk Time";

/// Object name of per-process counters
pub const PROCESS_OBJECT: &str = "Process";

/// The six counters bound for every process instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessCounter {
    /// Process identifier
    Id,
    /// Open handle count
    HandleCount,
    /// Thread count
    ThreadCount,
    /// Processor utilisation
    ProcessorTime,
    /// Working set in bytes
    WorkingSet,
    /// Private bytes
    PrivateBytes,
}

impl ProcessCounter {
    /// Binding order used by a process instance
    pub const ALL: [ProcessCounter; 6] = [
        ProcessCounter::Id,
        ProcessCounter::HandleCount,
        ProcessCounter::ThreadCount,
        ProcessCounter::ProcessorTime,
        ProcessCounter::WorkingSet,
        ProcessCounter::PrivateBytes,
    ];

    /// English counter name
    pub fn counter_name(self) -> &'static str {
        match self {
            Self::Id => "ID Process",
            Self::HandleCount => "Handle Count",
            Self::ThreadCount => "Thread Count",
            Self::ProcessorTime => "% Processor Time",
            Self::WorkingSet => "Working Set",
            Self::PrivateBytes => "Private Bytes",
        }
    }

    /// Reverse of [`ProcessCounter::counter_name`]
    pub fn from_counter_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.counter_name() == name)
    }
}

/// Executable name stripped of its extension (`notepad.exe` -> `notepad`)
#[cfg(windows)]
pub fn instance_name(process_name: &str) -> &str {
    match process_name.rfind('.') {
        Some(pos) if pos > 0 => &process_name[..pos],
        _ => process_name,
    }
}

/// Process name as listed; `/proc` command names have no extension to strip
#[cfg(not(windows))]
pub fn instance_name(process_name: &str) -> &str {
    process_name
}

/// Instance label for an ordinal; ordinal 0 carries no suffix
pub fn instance_label(process_name: &str, ordinal: u32) -> String {
    let name = instance_name(process_name);
    if ordinal == 0 {
        name.to_string()
    } else {
        format!("{}#{}", name, ordinal)
    }
}

/// Full path of one process counter
pub fn process_counter_path(process_name: &str, ordinal: u32, counter: ProcessCounter) -> String {
    format!(
        "\\{}({})\\{}",
        PROCESS_OBJECT,
        instance_label(process_name, ordinal),
        counter.counter_name()
    )
}

/// Borrowed view of a parsed counter path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterPath<'a> {
    pub object: &'a str,
    pub instance: Option<&'a str>,
    pub counter: &'a str,
}

impl<'a> CounterPath<'a> {
    /// Parse `\Object\Counter` or `\Object(Instance)\Counter`
    ///
    /// Remote machine prefixes (`\\host\...`) are not accepted.
    pub fn parse(path: &'a str) -> Option<Self> {
        let rest = path.strip_prefix('\\')?;
        if rest.starts_with('\\') {
            return None;
        }

        let paren = rest.find('(');
        let slash = rest.find('\\')?;

        let (object, instance, counter) = match paren {
            Some(open) if open < slash => {
                let close = rest.rfind(")\\")?;
                if close < open {
                    return None;
                }
                (&rest[..open], Some(&rest[open + 1..close]), &rest[close + 2..])
            }
            _ => (&rest[..slash], None, &rest[slash + 1..]),
        };

        if object.is_empty() || counter.is_empty() || counter.contains('\\') {
            return None;
        }

        Some(Self {
            object,
            instance,
            counter,
        })
    }

    /// Split the instance into its name and ordinal (`foo#2` -> `("foo", 2)`)
    pub fn instance_ordinal(&self) -> Option<(&'a str, u32)> {
        let instance = self.instance?;
        match instance.rsplit_once('#') {
            Some((name, ordinal)) if !name.is_empty() => match ordinal.parse::<u32>() {
                Ok(ordinal) => Some((name, ordinal)),
                Err(_) => Some((instance, 0)),
            },
            _ => Some((instance, 0)),
        }
    }
}

impl fmt::Display for CounterPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.instance {
            Some(instance) => write!(f, "\\{}({})\\{}", self.object, instance, self.counter),
            None => write!(f, "\\{}\\{}", self.object, self.counter),
        }
    }
}
