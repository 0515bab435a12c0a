//! Counter set of one process instance

use super::Metrics;
use crate::counter::path::{process_counter_path, ProcessCounter};
use crate::counter::{CounterBatch, CounterHandle, CounterSession};
use crate::error::Result;
use crate::mask::{keys, selected_keys, MetricMask, PROCESS_METRICS};
use crate::memory::{kilobytes, percent_of, MemoryTotals};

/// The six counters bound for `(name, ordinal)`
///
/// Counter paths address the instance ordinal, not the pid, so whatever
/// process currently holds that ordinal is what gets read. The `pid` key
/// of every poll comes from the bound `ID Process` counter and tells the
/// caller which process that was.
#[derive(Debug)]
pub struct ProcessInstance {
    name: String,
    ordinal: u32,
    totals: MemoryTotals,
    id: CounterHandle,
    handles: CounterHandle,
    threads: CounterHandle,
    processor: CounterHandle,
    working_set: CounterHandle,
    private_bytes: CounterHandle,
}

impl ProcessInstance {
    /// Bind all six counters and collect once so the first poll has data
    ///
    /// On failure every counter bound so far is removed again.
    pub fn bind(
        session: &mut CounterSession,
        name: &str,
        ordinal: u32,
        totals: MemoryTotals,
    ) -> Result<Self> {
        let mut batch = CounterBatch::new(session);
        let mut add = |counter| batch.add(&process_counter_path(name, ordinal, counter));

        let id = add(ProcessCounter::Id)?;
        let handles = add(ProcessCounter::HandleCount)?;
        let threads = add(ProcessCounter::ThreadCount)?;
        let processor = add(ProcessCounter::ProcessorTime)?;
        let working_set = add(ProcessCounter::WorkingSet)?;
        let private_bytes = add(ProcessCounter::PrivateBytes)?;

        batch.collect()?;
        batch.commit();

        Ok(Self {
            name: name.to_string(),
            ordinal,
            totals,
            id,
            handles,
            threads,
            processor,
            working_set,
            private_bytes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Read the values of the session's last collection
    ///
    /// `pid` is always present; the other keys follow `mask`.
    pub fn poll(&self, session: &CounterSession, mask: MetricMask) -> Result<Metrics> {
        let mut metrics = Metrics::new();
        metrics.insert(keys::PID, session.read_value(self.id)?);

        for key in selected_keys(&PROCESS_METRICS, mask) {
            let value = match key {
                keys::HANDLES => session.read_value(self.handles)?,
                keys::THREADS => session.read_value(self.threads)?,
                keys::PROCESSOR_USAGE => session.read_value(self.processor)?,
                keys::PHYSICAL_MEMORY_USAGE => percent_of(
                    session.read_value(self.working_set)?,
                    self.totals.physical,
                ),
                keys::PHYSICAL_MEMORY_USAGE_KB => kilobytes(session.read_value(self.working_set)?),
                keys::VIRTUAL_MEMORY_USAGE => percent_of(
                    session.read_value(self.private_bytes)?,
                    self.totals.virtual_memory,
                ),
                keys::VIRTUAL_MEMORY_USAGE_KB => {
                    kilobytes(session.read_value(self.private_bytes)?)
                }
                _ => continue,
            };
            metrics.insert(key, value);
        }
        Ok(metrics)
    }

    /// Unbind every counter from `session`
    pub fn release(self, session: &mut CounterSession) {
        for handle in [
            self.id,
            self.handles,
            self.threads,
            self.processor,
            self.working_set,
            self.private_bytes,
        ] {
            session.remove_counter(handle);
        }
    }
}
