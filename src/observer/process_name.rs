//! Observer tracking every process sharing one name

use super::{Metrics, Platform, ProcessInstance};
use crate::counter::CounterSession;
use crate::error::Result;
use crate::mask::MetricMask;
use crate::memory::MemoryTotals;
use crate::snapshot::count_named;

/// Keeps one [`ProcessInstance`] per live process named `name`
///
/// Instances hold ordinals `0..k`. Each poll only reconciles the population
/// size: excess high ordinals are dropped and missing ones appended. Which
/// process sits behind an ordinal is never tracked, so callers identify
/// results by their `pid` key.
///
/// If one process exits and another with the same name starts between two
/// polls, the count is unchanged and an instance may silently switch to the
/// newcomer. The returned `pid` is the only way to notice.
#[derive(Debug)]
pub struct ProcessNameObserver {
    platform: Platform,
    name: String,
    totals: MemoryTotals,
    instances: Vec<ProcessInstance>,
    session: CounterSession,
}

impl ProcessNameObserver {
    /// Bind one instance per matching process; no match is not an error
    pub fn new(platform: &Platform, name: &str) -> Result<Self> {
        let records = platform.list_processes()?;
        let count = count_named(&records, name);
        let totals = platform.memory_status()?.totals();
        let mut session = platform.open_session()?;

        let mut instances = Vec::with_capacity(count);
        for ordinal in 0..count as u32 {
            instances.push(ProcessInstance::bind(&mut session, name, ordinal, totals)?);
        }
        log::debug!("Observing {} instance(s) of {}", count, name);

        Ok(Self {
            platform: platform.clone(),
            name: name.to_string(),
            totals,
            instances,
            session,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instances currently held
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Resize to the live population, collect, then poll every instance
    pub fn poll(&mut self, mask: MetricMask) -> Result<Vec<Metrics>> {
        let records = self.platform.list_processes()?;
        self.reconcile(count_named(&records, &self.name))?;

        self.session.collect()?;
        self.instances
            .iter()
            .map(|instance| instance.poll(&self.session, mask))
            .collect()
    }

    fn reconcile(&mut self, live: usize) -> Result<()> {
        let held = self.instances.len();
        if live < held {
            log::info!("{}: {} -> {} instances", self.name, held, live);
            for instance in self.instances.drain(live..) {
                instance.release(&mut self.session);
            }
        } else if live > held {
            log::info!("{}: {} -> {} instances", self.name, held, live);
            let mut added = Vec::with_capacity(live - held);
            for ordinal in held as u32..live as u32 {
                match ProcessInstance::bind(&mut self.session, &self.name, ordinal, self.totals) {
                    Ok(instance) => added.push(instance),
                    Err(e) => {
                        for instance in added {
                            instance.release(&mut self.session);
                        }
                        return Err(e);
                    }
                }
            }
            self.instances.extend(added);
        }
        Ok(())
    }
}
