//! Metric selection masks
//!
//! A [`MetricMask`] selects which metrics a poll computes. Flags combine by
//! bitwise union and bits outside the observer's catalog are ignored.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Bitset of requested metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricMask(u32);

impl MetricMask {
    pub const EMPTY: MetricMask = MetricMask(0);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set in `self`
    pub const fn contains(self, other: MetricMask) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub const fn union(self, other: MetricMask) -> Self {
        Self(self.0 | other.0)
    }

    /// Bits set in both masks
    pub const fn intersection(self, other: MetricMask) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for MetricMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitAnd for MetricMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.intersection(rhs)
    }
}

impl BitOrAssign for MetricMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<u32> for MetricMask {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

impl fmt::Display for MetricMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Result key strings
pub mod keys {
    pub const PID: &str = "pid";
    pub const PROCESSES: &str = "processes";
    pub const HANDLES: &str = "handles";
    pub const THREADS: &str = "threads";
    pub const PROCESSOR_USAGE: &str = "procusage";
    pub const PHYSICAL_MEMORY_USAGE: &str = "pmemusage";
    pub const PHYSICAL_MEMORY_USAGE_KB: &str = "pmemusagekb";
    pub const VIRTUAL_MEMORY_USAGE: &str = "vmemusage";
    pub const VIRTUAL_MEMORY_USAGE_KB: &str = "vmemusagekb";
    pub const DISK_USAGE: &str = "diskusage";
}

/// System observer flags
pub mod system {
    use super::MetricMask;

    pub const PROCESS_COUNT: MetricMask = MetricMask(1);
    pub const THREAD_COUNT: MetricMask = MetricMask(2);
    pub const PROCESSOR_USAGE: MetricMask = MetricMask(4);
    pub const PHYSICAL_MEMORY_USAGE: MetricMask = MetricMask(8);
    pub const PHYSICAL_MEMORY_USAGE_KB: MetricMask = MetricMask(16);
    pub const VIRTUAL_MEMORY_USAGE: MetricMask = MetricMask(32);
    pub const VIRTUAL_MEMORY_USAGE_KB: MetricMask = MetricMask(64);
    pub const DISK_USAGE: MetricMask = MetricMask(128);
}

/// Process observer flags (pid and name variants)
pub mod process {
    use super::MetricMask;

    pub const HANDLE_COUNT: MetricMask = MetricMask(1);
    pub const THREAD_COUNT: MetricMask = MetricMask(2);
    pub const PROCESSOR_USAGE: MetricMask = MetricMask(4);
    pub const PHYSICAL_MEMORY_USAGE: MetricMask = MetricMask(8);
    pub const PHYSICAL_MEMORY_USAGE_KB: MetricMask = MetricMask(16);
    pub const VIRTUAL_MEMORY_USAGE: MetricMask = MetricMask(32);
    pub const VIRTUAL_MEMORY_USAGE_KB: MetricMask = MetricMask(64);
}

/// Every system metric
pub const SYSTEM_ALL: MetricMask = MetricMask(0xFF);
/// Every process metric
pub const PROCESS_ALL: MetricMask = MetricMask(0x7F);

/// System flags with their result keys, in bit order
pub const SYSTEM_METRICS: [(MetricMask, &str); 8] = [
    (system::PROCESS_COUNT, keys::PROCESSES),
    (system::THREAD_COUNT, keys::THREADS),
    (system::PROCESSOR_USAGE, keys::PROCESSOR_USAGE),
    (system::PHYSICAL_MEMORY_USAGE, keys::PHYSICAL_MEMORY_USAGE),
    (system::PHYSICAL_MEMORY_USAGE_KB, keys::PHYSICAL_MEMORY_USAGE_KB),
    (system::VIRTUAL_MEMORY_USAGE, keys::VIRTUAL_MEMORY_USAGE),
    (system::VIRTUAL_MEMORY_USAGE_KB, keys::VIRTUAL_MEMORY_USAGE_KB),
    (system::DISK_USAGE, keys::DISK_USAGE),
];

/// Process flags with their result keys, in bit order
pub const PROCESS_METRICS: [(MetricMask, &str); 7] = [
    (process::HANDLE_COUNT, keys::HANDLES),
    (process::THREAD_COUNT, keys::THREADS),
    (process::PROCESSOR_USAGE, keys::PROCESSOR_USAGE),
    (process::PHYSICAL_MEMORY_USAGE, keys::PHYSICAL_MEMORY_USAGE),
    (process::PHYSICAL_MEMORY_USAGE_KB, keys::PHYSICAL_MEMORY_USAGE_KB),
    (process::VIRTUAL_MEMORY_USAGE, keys::VIRTUAL_MEMORY_USAGE),
    (process::VIRTUAL_MEMORY_USAGE_KB, keys::VIRTUAL_MEMORY_USAGE_KB),
];

/// Both flag catalogs
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Catalog {
    pub system: &'static [(MetricMask, &'static str)],
    pub process: &'static [(MetricMask, &'static str)],
}

/// The `(bit, key)` pairs each observer family understands
pub fn catalog() -> Catalog {
    Catalog {
        system: &SYSTEM_METRICS,
        process: &PROCESS_METRICS,
    }
}

/// Keys of `metrics` selected by `mask`, in catalog order
pub fn selected_keys(
    metrics: &'static [(MetricMask, &'static str)],
    mask: MetricMask,
) -> impl Iterator<Item = &'static str> {
    metrics
        .iter()
        .filter(move |(flag, _)| mask.contains(*flag))
        .map(|(_, key)| *key)
}
