pub mod context;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod execution;
pub mod frame;
pub mod linked_list;
pub mod primitives;
pub mod scheduler;
pub mod semaphore;
pub mod signals;
pub mod special;
pub mod unwind;

use object::{ClassRef, ObjectMemory, ObjectRef, Value};

pub use control::{ControlTransfer, ReturnKind};
pub use dispatch::{CallSiteCache, SendOutcome};
pub use error::VmError;
pub use execution::{ContextExecutor, Invocation};
pub use frame::{ContextRef, FrameId};
pub use primitives::{PrimitiveResult, PrimitiveTable};
pub use signals::SignalInbox;
pub use special::{SpecialClasses, bootstrap};
pub use unwind::Unwound;

/// Tunables fixed at bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmSettings {
    /// Number of ready queues, one per priority starting at 1.
    pub priority_levels: usize,
    /// Initial capacity of the frame arena.
    pub frame_capacity: usize,
    /// Entries per call site before it goes megamorphic.
    pub inline_cache_size: usize,
}

impl Default for VmSettings {
    fn default() -> Self {
        Self {
            priority_levels: 80,
            frame_capacity: 256,
            inline_cache_size: 6,
        }
    }
}

/// Counters for recovered anomalies and scheduler activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub broken_sender_chains: usize,
    /// Non-virtual returns whose target was not on the returning chain.
    pub off_chain_returns: usize,
    pub process_switches: usize,
    pub external_signals: usize,
    pub materializations: usize,
}

/// The whole VM state. Built once by [`bootstrap`] and driven by
/// [`Vm::run_top_level`].
pub struct Vm {
    pub memory: ObjectMemory,
    pub frames: frame::FrameArena,
    pub specials: SpecialClasses,
    /// The `ProcessScheduler` instance.
    pub scheduler: ObjectRef,
    pub primitives: PrimitiveTable,
    pub signals: SignalInbox,
    pub diagnostics: Diagnostics,
    pub settings: VmSettings,
}

impl Vm {
    pub fn class_of(&self, value: Value) -> Result<ClassRef, VmError> {
        if let Some(object) = value.as_ref() {
            return Ok(self.memory.class_of(object)?);
        }
        let specials = &self.specials;
        Ok(if value.is_small_integer() {
            specials.small_integer
        } else if value.is_nil() {
            specials.undefined_object
        } else if value == Value::TRUE {
            specials.true_class
        } else if value == Value::FALSE {
            specials.false_class
        } else {
            specials.character
        })
    }

    pub fn intern(&mut self, name: &str) -> Value {
        self.memory.intern(name)
    }

    /// Printable name of a selector symbol.
    pub fn selector_name(&self, selector: Value) -> String {
        self.memory
            .symbol_name(selector)
            .map_or_else(|| format!("{selector:?}"), str::to_owned)
    }

    pub(crate) fn expect_ref(&self, value: Value) -> Result<ObjectRef, VmError> {
        value
            .as_ref()
            .ok_or(VmError::Object(object::ObjectError::WrongKind {
                expected: "object",
                found: "immediate",
            }))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use object::{MethodHeader, Value};

    use crate::{ContextExecutor, ContextRef, ControlTransfer, Vm, VmError};

    /// A method without code taking `num_args` arguments plus one temporary.
    pub(crate) fn test_method(vm: &mut Vm, num_args: u8) -> Value {
        let header = MethodHeader {
            num_args,
            num_temps: num_args + 1,
            ..MethodHeader::default()
        };
        vm.new_method(header, Vec::new(), Vec::new(), Value::NIL)
    }

    /// Closure-backed stand-in for the bytecode layer.
    pub(crate) struct FnExecutor<F>(pub F);

    impl<F> ContextExecutor for FnExecutor<F>
    where
        F: FnMut(&mut Vm, ContextRef) -> Result<ControlTransfer, VmError>,
    {
        fn execute(&mut self, vm: &mut Vm, ctx: ContextRef) -> Result<ControlTransfer, VmError> {
            (self.0)(vm, ctx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediates_have_classes() {
        let vm = bootstrap(VmSettings::default()).unwrap();
        let s = &vm.specials;
        assert_eq!(vm.class_of(Value::from_i64(3)).unwrap(), s.small_integer);
        assert_eq!(vm.class_of(Value::NIL).unwrap(), s.undefined_object);
        assert_eq!(vm.class_of(Value::TRUE).unwrap(), s.true_class);
        assert_eq!(vm.class_of(Value::FALSE).unwrap(), s.false_class);
        assert_eq!(vm.class_of(Value::from_char('c')).unwrap(), s.character);
        assert_eq!(
            vm.class_of(Value::from_ref(vm.scheduler)).unwrap(),
            s.process_scheduler
        );
    }
}
