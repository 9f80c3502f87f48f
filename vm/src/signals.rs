//! Semaphore signals raised outside the interpreter thread.
//!
//! Host threads never touch the object memory. They push the semaphore to
//! signal into a [`SignalInbox`]; the execution loop drains it between
//! context runs and performs the signals itself, in arrival order.
use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;
use object::ObjectRef;
use parking_lot::Mutex;

use crate::frame::ContextRef;
use crate::{Vm, VmError};

#[derive(Debug, Clone, Default)]
pub struct SignalInbox {
    pending: Arc<Mutex<VecDeque<ObjectRef>>>,
}

impl SignalInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self, semaphore: ObjectRef) {
        self.pending.lock().push_back(semaphore);
    }

    pub fn drain(&self) -> Vec<ObjectRef> {
        self.pending.lock().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl Vm {
    /// Signal every semaphore queued in the inbox. Answers the context to
    /// continue with if one of the signals made a higher priority process
    /// active.
    pub fn process_external_signals(
        &mut self,
        current: ContextRef,
    ) -> Result<Option<ContextRef>, VmError> {
        let pending = self.signals.drain();
        if pending.is_empty() {
            return Ok(None);
        }
        debug!("handling {} external signals", pending.len());
        let mut switched = None;
        let mut running = current;
        for semaphore in pending {
            self.diagnostics.external_signals += 1;
            if let Some(next) = self.signal(semaphore, Some(running))? {
                running = next;
                switched = Some(next);
            }
        }
        Ok(switched)
    }
}
