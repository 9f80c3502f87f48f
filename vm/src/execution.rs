//! The top-level execution loop.
//!
//! Contexts are run by a [`ContextExecutor`], the bytecode layer. It runs
//! one context until that context answers a [`ControlTransfer`]; the loop
//! then unwinds or switches processes and picks the next context to run.
use log::{debug, error, info};
use object::Value;

use crate::control::ControlTransfer;
use crate::frame::ContextRef;
use crate::unwind::Unwound;
use crate::{Vm, VmError};

/// Runs the code of a single context.
pub trait ContextExecutor {
    /// Run `ctx` until it returns, switches processes or leaves the loop.
    fn execute(&mut self, vm: &mut Vm, ctx: ContextRef) -> Result<ControlTransfer, VmError>;
}

/// Result of running a callee in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// The callee returned locally; its value goes to the caller.
    Returned(Value),
    /// Anything else has to travel up to the loop.
    Transfer(ControlTransfer),
}

impl Vm {
    /// Run a freshly activated `callee` from inside the executor of its
    /// sender. A local return terminates the callee and hands its value
    /// back; every other signal is passed on unchanged.
    pub fn invoke<E: ContextExecutor + ?Sized>(
        &mut self,
        executor: &mut E,
        callee: ContextRef,
    ) -> Result<Invocation, VmError> {
        match executor.execute(self, callee)? {
            ControlTransfer::LocalReturn { value } => {
                self.terminate_context(callee)?;
                Ok(Invocation::Returned(value))
            }
            transfer => Ok(Invocation::Transfer(transfer)),
        }
    }

    /// Run from `initial` until a top-level return and answer its value.
    /// Fatal errors end the loop.
    pub fn run_top_level<E: ContextExecutor + ?Sized>(
        &mut self,
        executor: &mut E,
        initial: ContextRef,
    ) -> Result<Value, VmError> {
        info!("entering top-level loop");
        let result = self.run_loop(executor, initial);
        match &result {
            Ok(value) => info!("top-level loop finished with {:?}", value),
            Err(e) if e.is_fatal() => error!("fatal: {}", e),
            Err(e) => error!("top-level loop failed: {}", e),
        }
        result
    }

    fn run_loop<E: ContextExecutor + ?Sized>(
        &mut self,
        executor: &mut E,
        initial: ContextRef,
    ) -> Result<Value, VmError> {
        let mut active = self.resolve(initial)?;
        loop {
            if let Some(next) = self.process_external_signals(active)? {
                active = next;
            }
            let unwound = match executor.execute(self, active)? {
                ControlTransfer::LocalReturn { value } => {
                    debug!("Local Return on top-level");
                    let sender = self.sender_of(active)?;
                    self.terminate_context(active)?;
                    self.unwind(sender, sender, value)?
                }
                ControlTransfer::NonLocalReturn { target, value } => {
                    debug!("Non Local Return on top-level");
                    let sender = self.sender_of(active)?;
                    self.terminate_context(active)?;
                    self.unwind(sender, Some(target), value)?
                }
                ControlTransfer::NonVirtualReturn {
                    current,
                    target,
                    value,
                } => {
                    debug!("Non Virtual Return on top-level");
                    self.unwind_non_virtual(current, target, value)?
                }
                ControlTransfer::ProcessSwitch { context } => {
                    debug!("Process Switch");
                    Unwound::Resume(self.resolve(context)?)
                }
                ControlTransfer::TopLevelReturn { value } => Unwound::TopLevel(value),
            };
            match unwound {
                Unwound::Resume(next) => active = next,
                Unwound::TopLevel(value) => return Ok(value),
            }
        }
    }
}
