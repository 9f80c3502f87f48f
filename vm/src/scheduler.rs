//! The process scheduler.
//!
//! Processes are pointers objects; the ready queues are the
//! `processLists` array of the `ProcessorScheduler` instance, one linked
//! list per priority. Exactly one process is active. Its running context is
//! not stored in the process while it runs, only when it is switched out.
use log::{debug, error};
use object::{ObjectRef, Value};

use crate::frame::ContextRef;
use crate::{Vm, VmError};

pub mod process_fields {
    pub const NEXT_LINK: usize = 0;
    pub const SUSPENDED_CONTEXT: usize = 1;
    pub const PRIORITY: usize = 2;
    pub const MY_LIST: usize = 3;
    pub const INST_SIZE: usize = 4;
}

pub mod scheduler_fields {
    pub const PROCESS_LISTS: usize = 0;
    pub const ACTIVE_PROCESS: usize = 1;
    pub const INST_SIZE: usize = 2;
}

use process_fields::*;
use scheduler_fields::*;

impl Vm {
    /// Create a process that will run `context` at `priority`.
    pub fn new_process(&mut self, context: ContextRef, priority: usize) -> Result<ObjectRef, VmError> {
        let process = self.memory.instantiate(self.specials.process, 0)?;
        let context = self.context_value(context)?;
        self.memory.put(process, SUSPENDED_CONTEXT, context)?;
        self.memory.put(process, PRIORITY, Value::from_i64(priority as i64))?;
        Ok(process)
    }

    /// Make `process` the active process with nothing to save. Used to
    /// enter the first process of a run.
    pub fn start(&mut self, process: ObjectRef) -> Result<ContextRef, VmError> {
        self.transfer_to(process, None)
    }

    pub fn active_process(&self) -> Result<Option<ObjectRef>, VmError> {
        Ok(self.memory.at(self.scheduler, ACTIVE_PROCESS)?.as_ref())
    }

    /// Priorities run from 1 to `priority_levels`; anything else is clamped.
    pub fn priority_of(&self, process: ObjectRef) -> Result<usize, VmError> {
        let priority = self.memory.at(process, PRIORITY)?.as_i64().unwrap_or(1);
        Ok((priority.max(1) as usize).min(self.settings.priority_levels))
    }

    fn ready_list(&self, priority: usize) -> Result<ObjectRef, VmError> {
        let lists = self.memory.at(self.scheduler, PROCESS_LISTS)?;
        let lists = self.expect_ref(lists)?;
        let list = self.memory.at(lists, priority.saturating_sub(1))?;
        self.expect_ref(list)
    }

    /// Enqueue `process` at the tail of its priority's ready list.
    pub fn put_to_sleep(&mut self, process: ObjectRef) -> Result<(), VmError> {
        let list = self.ready_list(self.priority_of(process)?)?;
        self.add_last_link(list, process)
    }

    /// Switch to `process`. The running context `current` is saved in the
    /// outgoing active process; answers the context to continue with.
    pub fn transfer_to(
        &mut self,
        process: ObjectRef,
        current: Option<ContextRef>,
    ) -> Result<ContextRef, VmError> {
        if let (Some(active), Some(current)) = (self.active_process()?, current) {
            let saved = self.context_value(current)?;
            self.memory.put(active, SUSPENDED_CONTEXT, saved)?;
        }
        self.memory.put(self.scheduler, ACTIVE_PROCESS, Value::from_ref(process))?;
        let suspended = self.memory.at(process, SUSPENDED_CONTEXT)?;
        self.memory.put(process, SUSPENDED_CONTEXT, Value::NIL)?;
        self.diagnostics.process_switches += 1;
        debug!(
            "switching to process #{} at priority {}",
            process.0,
            self.priority_of(process)?
        );
        self.context_from_value(suspended)
    }

    /// Make `process` runnable. A process of strictly higher priority than
    /// the active one preempts it and the new context is answered; otherwise
    /// it is queued and the caller continues. Resuming the active process
    /// does nothing.
    pub fn resume(
        &mut self,
        process: ObjectRef,
        current: Option<ContextRef>,
    ) -> Result<Option<ContextRef>, VmError> {
        if self.active_process()? == Some(process) {
            return Ok(None);
        }
        if let Some(list) = self.memory.at(process, MY_LIST)?.as_ref() {
            self.remove_link(list, process)?;
        }
        let Some(active) = self.active_process()? else {
            return self.transfer_to(process, current).map(Some);
        };
        if self.priority_of(process)? > self.priority_of(active)? {
            self.put_to_sleep(active)?;
            self.transfer_to(process, current).map(Some)
        } else {
            self.put_to_sleep(process)?;
            Ok(None)
        }
    }

    /// Activate the first process of the highest non-empty ready list.
    pub fn wake_highest_priority(&mut self, current: Option<ContextRef>) -> Result<ContextRef, VmError> {
        for priority in (1..=self.settings.priority_levels).rev() {
            let list = self.ready_list(priority)?;
            if let Some(process) = self.remove_first_link(list)? {
                return self.transfer_to(process, current);
            }
        }
        error!("no runnable process in any of {} ready lists", self.settings.priority_levels);
        Err(VmError::SchedulerStarvation)
    }

    /// Give way to the next process at the active one's priority, if any.
    pub fn yield_process(&mut self, current: ContextRef) -> Result<Option<ContextRef>, VmError> {
        let Some(active) = self.active_process()? else {
            return Ok(None);
        };
        let list = self.ready_list(self.priority_of(active)?)?;
        if self.is_empty_list(list)? {
            return Ok(None);
        }
        self.add_last_link(list, active)?;
        self.wake_highest_priority(Some(current)).map(Some)
    }

    /// Take `process` off whatever list it waits in. Suspending the active
    /// process hands control to the next runnable one.
    pub fn suspend(
        &mut self,
        process: ObjectRef,
        current: Option<ContextRef>,
    ) -> Result<Option<ContextRef>, VmError> {
        if self.active_process()? == Some(process) {
            return self.wake_highest_priority(current).map(Some);
        }
        if let Some(list) = self.memory.at(process, MY_LIST)?.as_ref() {
            self.remove_link(list, process)?;
        }
        Ok(None)
    }

    /// Terminate `process` and every context of it. `current` must be the
    /// running context when `process` is the active process.
    pub fn terminate_process(
        &mut self,
        process: ObjectRef,
        current: Option<ContextRef>,
    ) -> Result<Option<ContextRef>, VmError> {
        if self.active_process()? == Some(process) {
            if let Some(current) = current {
                self.terminate_chain(current)?;
            }
            self.memory.put(self.scheduler, ACTIVE_PROCESS, Value::NIL)?;
            return self.wake_highest_priority(None).map(Some);
        }
        if let Some(list) = self.memory.at(process, MY_LIST)?.as_ref() {
            self.remove_link(list, process)?;
        }
        let suspended = self.memory.at(process, SUSPENDED_CONTEXT)?;
        if !suspended.is_nil() {
            let ctx = self.context_from_value(suspended)?;
            self.terminate_chain(ctx)?;
            self.memory.put(process, SUSPENDED_CONTEXT, Value::NIL)?;
        }
        Ok(None)
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
        let process = vm.new_process(ctx, priority).unwrap();
        (process, ctx)
    }

    // ── resume ──────────────────────────────────────────────────────

    #[test]
    fn higher_priority_preempts() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let (p, p_ctx) = process(&mut vm, 5);
        let (q, q_ctx) = process(&mut vm, 10);
        let running = vm.start(p).unwrap();
        assert!(vm.same_context(running, p_ctx));

        let next = vm.resume(q, Some(running)).unwrap().unwrap();

        assert!(vm.same_context(next, q_ctx));
        assert_eq!(vm.active_process().unwrap(), Some(q));
        let list = vm.ready_list(5).unwrap();
        assert_eq!(vm.list_members(list).unwrap(), vec![p]);
        let saved = vm.memory.at(p, SUSPENDED_CONTEXT).unwrap();
        assert!(vm.same_context(vm.context_from_value(saved).unwrap(), p_ctx));
    }

    #[test]
    fn equal_priority_is_queued() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let (p, _) = process(&mut vm, 5);
        let (q, _) = process(&mut vm, 5);
        let running = vm.start(p).unwrap();

        assert_eq!(vm.resume(q, Some(running)).unwrap(), None);
        assert_eq!(vm.active_process().unwrap(), Some(p));
        assert_eq!(vm.list_members(vm.ready_list(5).unwrap()).unwrap(), vec![q]);
    }

    #[test]
    fn resuming_active_process_is_a_no_op() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let (p, _) = process(&mut vm, 5);
        let running = vm.start(p).unwrap();

        assert_eq!(vm.resume(p, Some(running)).unwrap(), None);
        assert_eq!(vm.active_process().unwrap(), Some(p));
        assert!(vm.list_members(vm.ready_list(5).unwrap()).unwrap().is_empty());
        assert!(vm.memory.at(p, MY_LIST).unwrap().is_nil());
    }

    // ── wake / yield ───────────────────────────────────────────────

    #[test]
    fn wake_prefers_highest_priority() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let (low, _) = process(&mut vm, 2);
        let (high, high_ctx) = process(&mut vm, 7);
        vm.put_to_sleep(low).unwrap();
        vm.put_to_sleep(high).unwrap();

        let next = vm.wake_highest_priority(None).unwrap();
        assert!(vm.same_context(next, high_ctx));
        assert_eq!(vm.active_process().unwrap(), Some(high));
    }

    #[test]
    fn starvation_is_fatal() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let error = vm.wake_highest_priority(None).unwrap_err();
        assert_eq!(error, VmError::SchedulerStarvation);
        assert!(error.is_fatal());
    }

    #[test]
    fn yield_without_peers_is_a_no_op() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let (p, _) = process(&mut vm, 4);
        let running = vm.start(p).unwrap();
        assert_eq!(vm.yield_process(running).unwrap(), None);
        assert_eq!(vm.active_process().unwrap(), Some(p));
    }

    #[test]
    fn yield_rotates_same_priority() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let (p, _) = process(&mut vm, 4);
        let (q, q_ctx) = process(&mut vm, 4);
        let running = vm.start(p).unwrap();
        vm.put_to_sleep(q).unwrap();

        let next = vm.yield_process(running).unwrap().unwrap();
        assert!(vm.same_context(next, q_ctx));
        assert_eq!(vm.list_members(vm.ready_list(4).unwrap()).unwrap(), vec![p]);
    }

    // ── suspend / terminate ───────────────────────────────────────

    #[test]
    fn suspend_removes_waiting_process() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let (p, _) = process(&mut vm, 3);
        let (q, _) = process(&mut vm, 3);
        let running = vm.start(p).unwrap();
        vm.resume(q, Some(running)).unwrap();

        assert_eq!(vm.suspend(q, Some(running)).unwrap(), None);
        assert!(vm.is_empty_list(vm.ready_list(3).unwrap()).unwrap());
    }

    #[test]
    fn terminate_waiting_process_kills_its_contexts() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let (p, _) = process(&mut vm, 3);
        let (q, q_ctx) = process(&mut vm, 3);
        let running = vm.start(p).unwrap();
        vm.resume(q, Some(running)).unwrap();

        vm.terminate_process(q, Some(running)).unwrap();
        assert!(vm.is_terminated(q_ctx));
        assert!(vm.memory.at(q, SUSPENDED_CONTEXT).unwrap().is_nil());
        assert!(!vm.is_terminated(running));
    }
}
