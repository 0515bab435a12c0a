//! Observer tracking one process by pid

use super::{Metrics, Platform, ProcessInstance};
use crate::counter::CounterSession;
use crate::error::{Error, Result};
use crate::mask::MetricMask;
use crate::memory::MemoryTotals;
use crate::snapshot::{instance_ordinal, name_of};

#[derive(Debug)]
enum Binding {
    Bound(ProcessInstance),
    /// The pid vanished; every later poll fails
    NotFound,
}

/// Follows a single pid across instance-ordinal changes
///
/// Every poll re-derives the pid's ordinal among same-named processes and
/// rebinds the counter set when it moved, since counters addressed by a
/// stale ordinal would read another process.
#[derive(Debug)]
pub struct ProcessIdObserver {
    platform: Platform,
    pid: u32,
    name: String,
    totals: MemoryTotals,
    binding: Binding,
    session: CounterSession,
}

impl ProcessIdObserver {
    pub fn new(platform: &Platform, pid: u32) -> Result<Self> {
        let records = platform.list_processes()?;
        let name = name_of(&records, pid)
            .ok_or(Error::ProcessNotFound(pid))?
            .to_string();
        let ordinal =
            instance_ordinal(&records, &name, pid).ok_or(Error::ProcessNotFound(pid))?;

        let totals = platform.memory_status()?.totals();
        let mut session = platform.open_session()?;
        let instance = ProcessInstance::bind(&mut session, &name, ordinal, totals)?;
        log::debug!("Observing pid {} as {} instance {}", pid, name, ordinal);

        Ok(Self {
            platform: platform.clone(),
            pid,
            name,
            totals,
            binding: Binding::Bound(instance),
            session,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current instance ordinal, `None` once the process is gone
    pub fn ordinal(&self) -> Option<u32> {
        match &self.binding {
            Binding::Bound(instance) => Some(instance.ordinal()),
            Binding::NotFound => None,
        }
    }

    pub fn poll(&mut self, mask: MetricMask) -> Result<Metrics> {
        let Binding::Bound(instance) = &self.binding else {
            return Err(Error::ProcessNotFound(self.pid));
        };
        let current = instance.ordinal();

        let records = self.platform.list_processes()?;
        match instance_ordinal(&records, &self.name, self.pid) {
            None => {
                log::info!("Process {} ({}) is gone", self.pid, self.name);
                if let Binding::Bound(instance) =
                    std::mem::replace(&mut self.binding, Binding::NotFound)
                {
                    instance.release(&mut self.session);
                }
                return Err(Error::ProcessNotFound(self.pid));
            }
            Some(ordinal) if ordinal != current => {
                log::info!(
                    "Process {} ({}) moved from instance {} to {}, rebinding",
                    self.pid,
                    self.name,
                    current,
                    ordinal
                );
                // Bind the replacement first so a failure keeps the old binding
                let rebound =
                    ProcessInstance::bind(&mut self.session, &self.name, ordinal, self.totals)?;
                if let Binding::Bound(stale) =
                    std::mem::replace(&mut self.binding, Binding::Bound(rebound))
                {
                    stale.release(&mut self.session);
                }
            }
            Some(_) => {}
        }

        self.session.collect()?;
        match &self.binding {
            Binding::Bound(instance) => instance.poll(&self.session, mask),
            Binding::NotFound => Err(Error::ProcessNotFound(self.pid)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::{keys, process};
    use crate::testing::SimulatedMachine;

    #[test]
    fn test_unknown_pid_is_process_not_found() {
        let machine = SimulatedMachine::new();
        machine.spawn("app.exe");
        match ProcessIdObserver::new(&machine.platform(), 999_999) {
            Err(Error::ProcessNotFound(pid)) => assert_eq!(pid, 999_999),
            other => panic!("Expected ProcessNotFound, got {:?}", other.err()),
        }
        assert_eq!(machine.open_queries(), 0);
    }

    #[test]
    fn test_unknown_pid_wins_over_session_failure() {
        let machine = SimulatedMachine::new();
        machine.fail_open(crate::counter::status::PDH_MEMORY_ALLOCATION_FAILURE);
        assert!(matches!(
            ProcessIdObserver::new(&machine.platform(), 42),
            Err(Error::ProcessNotFound(42))
        ));
    }

    #[test]
    fn test_poll_reports_own_pid() {
        let machine = SimulatedMachine::new();
        machine.spawn("notepad.exe");
        let pid = machine.spawn("notepad.exe");
        let mut observer = ProcessIdObserver::new(&machine.platform(), pid).unwrap();
        assert_eq!(observer.ordinal(), Some(1));
        assert_eq!(observer.name(), "notepad.exe");

        let metrics = observer.poll(process::THREAD_COUNT).unwrap();
        assert_eq!(metrics[keys::PID], pid as f64);
        assert!(metrics.contains_key(keys::THREADS));
        assert_eq!(metrics.len(), 2);
    }

    #[test]
    fn test_rebinds_when_earlier_sibling_exits() {
        let machine = SimulatedMachine::new();
        let first = machine.spawn("notepad.exe");
        let target = machine.spawn("notepad.exe");
        let mut observer = ProcessIdObserver::new(&machine.platform(), target).unwrap();
        assert_eq!(observer.ordinal(), Some(1));

        machine.kill(first);
        let metrics = observer.poll(MetricMask::EMPTY).unwrap();
        assert_eq!(observer.ordinal(), Some(0));
        assert_eq!(metrics[keys::PID], target as f64);
        assert_eq!(machine.live_counters(), 6);
    }

    #[test]
    fn test_rebinds_when_sibling_starts_earlier() {
        let machine = SimulatedMachine::new();
        let target = machine.spawn("svc.exe");
        let mut observer = ProcessIdObserver::new(&machine.platform(), target).unwrap();
        assert_eq!(observer.ordinal(), Some(0));

        machine.insert_process_at(0, "svc.exe");
        let metrics = observer.poll(process::HANDLE_COUNT).unwrap();
        assert_eq!(observer.ordinal(), Some(1));
        assert_eq!(metrics[keys::PID], target as f64);
    }

    #[test]
    fn test_exit_is_terminal() {
        let machine = SimulatedMachine::new();
        let pid = machine.spawn("app.exe");
        let mut observer = ProcessIdObserver::new(&machine.platform(), pid).unwrap();
        machine.kill(pid);

        assert!(matches!(
            observer.poll(MetricMask::EMPTY),
            Err(Error::ProcessNotFound(p)) if p == pid
        ));
        assert_eq!(observer.ordinal(), None);
        assert_eq!(machine.live_counters(), 0);

        // Same-named newcomer is not adopted
        machine.spawn("app.exe");
        assert!(matches!(
            observer.poll(MetricMask::EMPTY),
            Err(Error::ProcessNotFound(_))
        ));
    }

    #[test]
    fn test_snapshot_fault_leaves_binding_intact() {
        let machine = SimulatedMachine::new();
        let first = machine.spawn("app.exe");
        let target = machine.spawn("app.exe");
        let mut observer = ProcessIdObserver::new(&machine.platform(), target).unwrap();

        machine.kill(first);
        machine.fail_snapshot(Some(crate::counter::status::PDH_MEMORY_ALLOCATION_FAILURE));
        assert!(matches!(
            observer.poll(process::HANDLE_COUNT),
            Err(Error::SystemFault { .. })
        ));
        assert_eq!(observer.ordinal(), Some(1));
        assert_eq!(machine.live_counters(), 6);

        machine.fail_snapshot(None);
        let metrics = observer.poll(process::HANDLE_COUNT).unwrap();
        assert_eq!(metrics[keys::PID], target as f64);
        assert_eq!(observer.ordinal(), Some(0));
        assert_eq!(machine.live_counters(), 6);
    }

    #[test]
    fn test_failed_rebind_keeps_observer_usable() {
        let machine = SimulatedMachine::new();
        let first = machine.spawn("app.exe");
        let target = machine.spawn("app.exe");
        let mut observer = ProcessIdObserver::new(&machine.platform(), target).unwrap();

        machine.kill(first);
        machine.fail_collect(Some(crate::counter::status::PDH_NO_DATA));
        assert!(observer.poll(MetricMask::EMPTY).is_err());
        assert_eq!(observer.ordinal(), Some(1));
        assert_eq!(machine.live_counters(), 6);

        machine.fail_collect(None);
        let metrics = observer.poll(MetricMask::EMPTY).unwrap();
        assert_eq!(metrics[keys::PID], target as f64);
        assert_eq!(observer.ordinal(), Some(0));
    }
}
