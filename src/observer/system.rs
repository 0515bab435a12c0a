//! Machine-wide metrics

use super::{Metrics, Platform};
use crate::counter::path;
use crate::counter::{CounterBatch, CounterHandle, CounterSession};
use crate::error::Result;
use crate::mask::{keys, selected_keys, system, MetricMask, SYSTEM_METRICS};

const MEMORY_FLAGS: MetricMask = MetricMask::from_bits(
    system::PHYSICAL_MEMORY_USAGE.bits()
        | system::PHYSICAL_MEMORY_USAGE_KB.bits()
        | system::VIRTUAL_MEMORY_USAGE.bits()
        | system::VIRTUAL_MEMORY_USAGE_KB.bits(),
);

/// Process and thread totals, processor and disk busy time, memory usage
///
/// The four counter-backed metrics are read from the session; the memory
/// pairs come from a memory statistics query on every poll that asks for
/// them.
#[derive(Debug)]
pub struct SystemObserver {
    platform: Platform,
    session: CounterSession,
    processes: CounterHandle,
    threads: CounterHandle,
    processor: CounterHandle,
    disk: CounterHandle,
}

impl SystemObserver {
    pub fn new(platform: &Platform) -> Result<Self> {
        let mut session = platform.open_session()?;
        let mut batch = CounterBatch::new(&mut session);
        let processes = batch.add(path::SYSTEM_PROCESSES)?;
        let threads = batch.add(path::SYSTEM_THREADS)?;
        let processor = batch.add(path::PROCESSOR_TIME_TOTAL)?;
        let disk = batch.add(path::DISK_TIME_TOTAL)?;
        batch.collect()?;
        batch.commit();

        Ok(Self {
            platform: platform.clone(),
            session,
            processes,
            threads,
            processor,
            disk,
        })
    }

    pub fn poll(&mut self, mask: MetricMask) -> Result<Metrics> {
        self.session.collect()?;

        let memory = if !(mask & MEMORY_FLAGS).is_empty() {
            Some(self.platform.memory_status()?)
        } else {
            None
        };

        let mut metrics = Metrics::new();
        for key in selected_keys(&SYSTEM_METRICS, mask) {
            let value = match (key, memory.as_ref()) {
                (keys::PROCESSES, _) => self.session.read_value(self.processes)?,
                (keys::THREADS, _) => self.session.read_value(self.threads)?,
                (keys::PROCESSOR_USAGE, _) => self.session.read_value(self.processor)?,
                (keys::DISK_USAGE, _) => self.session.read_value(self.disk)?,
                (keys::PHYSICAL_MEMORY_USAGE, Some(m)) => m.physical_percent(),
                (keys::PHYSICAL_MEMORY_USAGE_KB, Some(m)) => m.physical_kb(),
                (keys::VIRTUAL_MEMORY_USAGE, Some(m)) => m.virtual_percent(),
                (keys::VIRTUAL_MEMORY_USAGE_KB, Some(m)) => m.virtual_kb(),
                _ => continue,
            };
            metrics.insert(key, value);
        }
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::status::{PDH_CALC_NEGATIVE_DENOMINATOR, PDH_NO_DATA};
    use crate::mask::SYSTEM_ALL;
    use crate::memory::MemoryStatus;
    use crate::testing::SimulatedMachine;
    use std::collections::BTreeSet;

    fn key_set(metrics: &Metrics) -> BTreeSet<&'static str> {
        metrics.keys().copied().collect()
    }

    #[test]
    fn test_process_count_and_disk_usage_only() {
        let machine = SimulatedMachine::new();
        machine.spawn("a.exe");
        machine.spawn("b.exe");
        let mut observer = SystemObserver::new(&machine.platform()).unwrap();

        let metrics = observer
            .poll(system::PROCESS_COUNT | system::DISK_USAGE)
            .unwrap();
        assert_eq!(key_set(&metrics), BTreeSet::from(["processes", "diskusage"]));
        assert_eq!(metrics["processes"], 2.0);
        assert_eq!(metrics["diskusage"], 3.0);
    }

    #[test]
    fn test_every_mask_yields_exactly_its_keys() {
        let machine = SimulatedMachine::new();
        let mut observer = SystemObserver::new(&machine.platform()).unwrap();
        for bits in 0..=0x1FFu32 {
            let mask = MetricMask::from_bits(bits);
            let expected: BTreeSet<_> = selected_keys(&SYSTEM_METRICS, mask).collect();
            assert_eq!(key_set(&observer.poll(mask).unwrap()), expected);
        }
    }

    #[test]
    fn test_memory_pairs_from_memory_statistics() {
        let machine = SimulatedMachine::new();
        machine.set_memory(MemoryStatus {
            total_physical: 3000,
            available_physical: 1000,
            total_virtual: 4096,
            available_virtual: 1024,
        });
        let mut observer = SystemObserver::new(&machine.platform()).unwrap();
        let metrics = observer.poll(SYSTEM_ALL).unwrap();
        assert_eq!(metrics.len(), 8);
        assert_eq!(metrics["pmemusage"], 66.0);
        assert_eq!(metrics["pmemusagekb"], 2000.0 / 1024.0);
        assert_eq!(metrics["vmemusage"], 75.0);
        assert_eq!(metrics["vmemusagekb"], 3.0);
    }

    #[test]
    fn test_memory_failure_fails_poll() {
        let machine = SimulatedMachine::new();
        let mut observer = SystemObserver::new(&machine.platform()).unwrap();
        machine.fail_memory(Some(5));

        assert_eq!(
            observer.poll(system::PHYSICAL_MEMORY_USAGE).unwrap_err().code(),
            Some(5)
        );
        // Counter-only polls never query memory
        assert!(observer.poll(system::PROCESS_COUNT).is_ok());
    }

    #[test]
    fn test_collect_failure_fails_poll_and_observer_recovers() {
        let machine = SimulatedMachine::new();
        let mut observer = SystemObserver::new(&machine.platform()).unwrap();
        machine.fail_collect(Some(PDH_NO_DATA));
        assert!(observer.poll(SYSTEM_ALL).is_err());
        machine.fail_collect(None);
        assert!(observer.poll(SYSTEM_ALL).is_ok());
    }

    #[test]
    fn test_calculation_artifact_reads_zero() {
        let machine = SimulatedMachine::new();
        let mut observer = SystemObserver::new(&machine.platform()).unwrap();
        machine.fail_reads(path::PROCESSOR_TIME_TOTAL, Some(PDH_CALC_NEGATIVE_DENOMINATOR));
        let metrics = observer.poll(system::PROCESSOR_USAGE).unwrap();
        assert_eq!(metrics["procusage"], 0.0);
    }

    #[test]
    fn test_drop_releases_session() {
        let machine = SimulatedMachine::new();
        {
            let _observer = SystemObserver::new(&machine.platform()).unwrap();
            assert_eq!(machine.open_queries(), 1);
            assert_eq!(machine.live_counters(), 4);
        }
        assert_eq!(machine.open_queries(), 0);
        assert_eq!(machine.live_counters(), 0);
    }
}
