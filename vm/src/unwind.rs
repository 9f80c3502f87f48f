use log::{debug, trace, warn};
use object::Value;

use crate::frame::ContextRef;
use crate::{Vm, VmError};

/// Where execution continues after an unwind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unwound {
    /// Resume this context; the value has been pushed onto it.
    Resume(ContextRef),
    /// The value leaves the execution loop.
    TopLevel(Value),
}

impl Vm {
    /// Terminate the contexts from `start` up to, excluding, `target` and
    /// deliver `value` to `target`.
    ///
    /// A `None` start is a top-level return. A `None` target means the
    /// bottom of the chain: everything from `start` on is terminated and
    /// the value leaves the loop. Reaching a dead end before `target` is a
    /// broken sender chain: it is counted, logged and `target` is used as
    /// the continuation anyway.
    pub fn unwind(
        &mut self,
        start: Option<ContextRef>,
        target: Option<ContextRef>,
        value: Value,
    ) -> Result<Unwound, VmError> {
        let Some(start) = start else {
            return Ok(Unwound::TopLevel(value));
        };
        let target = match target {
            Some(target) => Some(self.resolve(target)?),
            None => None,
        };
        if !self.terminate_span(start, target)? {
            self.diagnostics.broken_sender_chains += 1;
            warn!(
                "broken sender chain: {:?} does not lead to {:?}, resuming target",
                start, target
            );
        }
        self.deliver(target, value)
    }

    /// Unwind for a non-virtual return. The target may legitimately sit
    /// outside `start`'s chain, in which case the whole chain of `start` is
    /// terminated and the target resumed; that is counted apart from broken
    /// chains.
    pub fn unwind_non_virtual(
        &mut self,
        start: ContextRef,
        target: ContextRef,
        value: Value,
    ) -> Result<Unwound, VmError> {
        let target = self.resolve(target)?;
        if !self.terminate_span(start, Some(target))? {
            self.diagnostics.off_chain_returns += 1;
            debug!("{:?} is not on the chain of {:?}, resuming it directly", target, start);
        }
        self.deliver(Some(target), value)
    }

    /// Terminate from `start` until `target`. Answers whether `target` was
    /// reached; a `None` target is reached at the bottom of the chain.
    fn terminate_span(&mut self, start: ContextRef, target: Option<ContextRef>) -> Result<bool, VmError> {
        let mut current = Some(self.resolve(start)?);
        while let Some(ctx) = current {
            if Some(ctx) == target {
                return Ok(true);
            }
            let sender = self.sender_of(ctx)?;
            trace!("unwinding past {:?}", ctx);
            self.terminate_context(ctx)?;
            current = match sender {
                Some(next) if !self.is_terminated(next) => Some(self.resolve(next)?),
                _ => None,
            };
        }
        Ok(target.is_none())
    }

    fn deliver(&mut self, target: Option<ContextRef>, value: Value) -> Result<Unwound, VmError> {
        match target {
            None => Ok(Unwound::TopLevel(value)),
            Some(target) => {
                if self.is_terminated(target) {
                    return Err(VmError::CannotReturn { value });
                }
                self.push(target, value)?;
                Ok(Unwound::Resume(target))
            }
        }
    }

    /// Terminate `ctx` and every sender above it.
    pub fn terminate_chain(&mut self, ctx: ContextRef) -> Result<(), VmError> {
        let mut current = Some(ctx);
        while let Some(ctx) = current {
            if self.is_terminated(ctx) {
                break;
            }
            current = self.sender_of(ctx)?;
            self.terminate_context(ctx)?;
        }
        Ok(())
    }

    /// The first context from `start` towards, excluding, `limit` whose
    /// method is an unwind marker (`ensure:`, `ifCurtailed:`).
    pub fn find_unwind_context(
        &self,
        start: ContextRef,
        limit: Option<ContextRef>,
    ) -> Result<Option<ContextRef>, VmError> {
        let mut current = Some(self.resolve(start)?);
        while let Some(ctx) = current {
            if limit.is_some_and(|l| self.same_context(l, ctx)) {
                break;
            }
            let method = self.context(ctx)?.method;
            let is_marker = method
                .as_ref()
                .and_then(|m| self.memory.method(m).ok())
                .is_some_and(|m| m.primitive() == Some(crate::primitives::UNWIND_MARKER));
            if is_marker {
                return Ok(Some(ctx));
            }
            current = self.sender_of(ctx)?;
        }
        Ok(None)
    }
}
