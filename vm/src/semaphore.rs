use log::debug;
use object::{ObjectRef, Value};

use crate::frame::ContextRef;
use crate::{Vm, VmError};

/// A semaphore is a linked list of waiting processes plus a counter.
pub mod semaphore_fields {
    pub use crate::linked_list::linked_list_fields::{FIRST_LINK, LAST_LINK};
    pub const EXCESS_SIGNALS: usize = 2;
    pub const INST_SIZE: usize = 3;
}

use semaphore_fields::EXCESS_SIGNALS;

impl Vm {
    pub fn new_semaphore(&mut self) -> Result<ObjectRef, VmError> {
        let semaphore = self.memory.instantiate(self.specials.semaphore, 0)?;
        self.memory.put(semaphore, EXCESS_SIGNALS, Value::from_i64(0))?;
        Ok(semaphore)
    }

    pub fn excess_signals(&self, semaphore: ObjectRef) -> Result<i64, VmError> {
        Ok(self.memory.at(semaphore, EXCESS_SIGNALS)?.as_i64().unwrap_or(0))
    }

    /// Resume the longest waiting process, or bank the signal when nobody
    /// waits. Answers the context to switch to if the woken process
    /// preempts the active one.
    pub fn signal(
        &mut self,
        semaphore: ObjectRef,
        current: Option<ContextRef>,
    ) -> Result<Option<ContextRef>, VmError> {
        match self.remove_first_link(semaphore)? {
            Some(process) => {
                debug!("semaphore #{} resumes process #{}", semaphore.0, process.0);
                self.resume(process, current)
            }
            None => {
                let excess = self.excess_signals(semaphore)? + 1;
                self.memory.put(semaphore, EXCESS_SIGNALS, Value::from_i64(excess))?;
                Ok(None)
            }
        }
    }

    /// Consume a banked signal, or block the active process on `semaphore`
    /// and answer the context of the process that runs instead.
    pub fn wait(
        &mut self,
        semaphore: ObjectRef,
        current: ContextRef,
    ) -> Result<Option<ContextRef>, VmError> {
        let excess = self.excess_signals(semaphore)?;
        if excess > 0 {
            self.memory.put(semaphore, EXCESS_SIGNALS, Value::from_i64(excess - 1))?;
            return Ok(None);
        }
        let Some(active) = self.active_process()? else {
            return Err(VmError::SchedulerStarvation);
        };
        debug!("process #{} waits on semaphore #{}", active.0, semaphore.0);
        self.add_last_link(semaphore, active)?;
        self.wake_highest_priority(Some(current)).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_method;
    use crate::{VmSettings, bootstrap};

    fn process(vm: &mut Vm, priority: usize) -> (ObjectRef, ContextRef) {
        let method = test_method(vm, 0);
        let ctx = vm.activate_method(None, method, Value::NIL, &[]).unwrap();
        (vm.new_process(ctx, priority).unwrap(), ctx)
    }

    #[test]
    fn signals_are_banked() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let (p, _) = process(&mut vm, 4);
        let running = vm.start(p).unwrap();
        let semaphore = vm.new_semaphore().unwrap();

        assert_eq!(vm.signal(semaphore, Some(running)).unwrap(), None);
        assert_eq!(vm.signal(semaphore, Some(running)).unwrap(), None);
        assert_eq!(vm.excess_signals(semaphore).unwrap(), 2);
        assert_eq!(vm.wait(semaphore, running).unwrap(), None);
        assert_eq!(vm.excess_signals(semaphore).unwrap(), 1);
        assert_eq!(vm.active_process().unwrap(), Some(p));
    }

    #[test]
    fn waiters_resume_in_arrival_order() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let semaphore = vm.new_semaphore().unwrap();
        let (main, _) = process(&mut vm, 3);
        let (x, _) = process(&mut vm, 4);
        let (y, _) = process(&mut vm, 4);

        // x runs first and blocks, then y, leaving main.
        let mut running = vm.start(x).unwrap();
        vm.put_to_sleep(y).unwrap();
        vm.put_to_sleep(main).unwrap();
        running = vm.wait(semaphore, running).unwrap().unwrap();
        assert_eq!(vm.active_process().unwrap(), Some(y));
        running = vm.wait(semaphore, running).unwrap().unwrap();
        assert_eq!(vm.active_process().unwrap(), Some(main));
        assert_eq!(vm.list_members(semaphore).unwrap(), vec![x, y]);

        running = vm.signal(semaphore, Some(running)).unwrap().unwrap();
        assert_eq!(vm.active_process().unwrap(), Some(x));
        let back = vm.wake_highest_priority(Some(running)).unwrap();
        assert_eq!(vm.active_process().unwrap(), Some(main));
        vm.signal(semaphore, Some(back)).unwrap();
        assert_eq!(vm.active_process().unwrap(), Some(y));
        assert_eq!(vm.excess_signals(semaphore).unwrap(), 0);
    }
}
