//! Control-transfer signals.
//!
//! Executing a context ends by answering one of these values instead of
//! unwinding the native stack. Every call boundary passes them up unchanged
//! until [`Vm::run_top_level`](crate::Vm::run_top_level) dispatches them.
use object::Value;

use crate::frame::ContextRef;
use crate::{Vm, VmError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTransfer {
    /// Answer `value` to the sender of the finishing context.
    LocalReturn { value: Value },
    /// Answer `value` to `target`, terminating every context in between.
    NonLocalReturn { target: ContextRef, value: Value },
    /// Answer `value` to `target`, which need not be on `current`'s sender
    /// chain.
    NonVirtualReturn {
        current: ContextRef,
        target: ContextRef,
        value: Value,
    },
    /// Continue with `context` in place of the finishing one.
    ProcessSwitch { context: ContextRef },
    /// Leave the execution loop with `value`.
    TopLevelReturn { value: Value },
}

/// How a context asks to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    /// Return to the sender.
    Local,
    /// `^` from inside a block: return from the home method.
    Home,
    /// Return to an explicit context.
    To(ContextRef),
}

impl Vm {
    /// Build the signal for returning `value` from `ctx`.
    ///
    /// A home return from a method context is a local return. From a block
    /// it targets the sender of the home context and fails with
    /// [`VmError::CannotReturn`] when the home context is dead or has no
    /// sender.
    pub fn return_value(
        &self,
        ctx: ContextRef,
        value: Value,
        kind: ReturnKind,
    ) -> Result<ControlTransfer, VmError> {
        match kind {
            ReturnKind::Local => Ok(ControlTransfer::LocalReturn { value }),
            ReturnKind::To(target) => Ok(ControlTransfer::NonVirtualReturn {
                current: ctx,
                target,
                value,
            }),
            ReturnKind::Home => {
                if self.context(ctx)?.closure.is_nil() {
                    return Ok(ControlTransfer::LocalReturn { value });
                }
                let home = self.home_context(ctx)?;
                if self.is_terminated(home) {
                    return Err(VmError::CannotReturn { value });
                }
                match self.sender_of(home)? {
                    Some(target) if !self.is_terminated(target) => {
                        Ok(ControlTransfer::NonLocalReturn { target, value })
                    }
                    _ => Err(VmError::CannotReturn { value }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_method;
    use crate::{VmSettings, bootstrap};

    #[test]
    fn method_home_return_is_local() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let method = test_method(&mut vm, 0);
        let ctx = vm.activate_method(None, method, Value::NIL, &[]).unwrap();
        assert_eq!(
            vm.return_value(ctx, Value::TRUE, ReturnKind::Home).unwrap(),
            ControlTransfer::LocalReturn { value: Value::TRUE }
        );
    }

    #[test]
    fn block_home_return_targets_home_sender() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let method = test_method(&mut vm, 0);
        let caller = vm.activate_method(None, method, Value::NIL, &[]).unwrap();
        let home = vm.activate_method(Some(caller), method, Value::NIL, &[]).unwrap();
        let block = vm.make_closure(home, method, 0, vec![]).unwrap();
        let block_ctx = vm.activate_closure(Some(home), block, &[]).unwrap();

        let signal = vm.return_value(block_ctx, Value::from_i64(3), ReturnKind::Home).unwrap();
        let ControlTransfer::NonLocalReturn { target, value } = signal else {
            panic!("expected a non-local return, got {signal:?}");
        };
        assert!(vm.same_context(target, caller));
        assert_eq!(value, Value::from_i64(3));
    }

    #[test]
    fn dead_home_cannot_return() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let method = test_method(&mut vm, 0);
        let caller = vm.activate_method(None, method, Value::NIL, &[]).unwrap();
        let home = vm.activate_method(Some(caller), method, Value::NIL, &[]).unwrap();
        let block = vm.make_closure(home, method, 0, vec![]).unwrap();
        vm.terminate_context(home).unwrap();
        let block_ctx = vm.activate_closure(None, block, &[]).unwrap();

        assert_eq!(
            vm.return_value(block_ctx, Value::NIL, ReturnKind::Home),
            Err(VmError::CannotReturn { value: Value::NIL })
        );
    }
}
