use std::collections::HashMap;

use object::Value;

use crate::frame::ContextRef;
use crate::{Vm, VmError};

pub mod context;
pub mod fixnum;
pub mod object_access;
pub mod process;

/// Methods carrying this primitive mark unwind-protect activations
/// (`ensure:`, `ifCurtailed:`). It never succeeds.
pub const UNWIND_MARKER: u16 = 198;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveResult {
    /// The send answers this value.
    Answer(Value),
    /// The primitive switched processes. The result for the caller has
    /// already been pushed; continue with this context.
    Switch(ContextRef),
    /// Fall back to the method's code.
    Fail,
}

/// `ctx` is the context performing the send.
pub type PrimitiveFn = fn(&mut Vm, ContextRef, Value, &[Value]) -> Result<PrimitiveResult, VmError>;

#[derive(Clone, Copy)]
pub struct PrimitiveDesc {
    pub name: &'static str,
    pub arity: u8,
    pub func: PrimitiveFn,
}

impl PrimitiveDesc {
    pub const fn new(name: &'static str, arity: u8, func: PrimitiveFn) -> Self {
        Self { name, arity, func }
    }
}

impl std::fmt::Debug for PrimitiveDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimitiveDesc")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish()
    }
}

pub fn default_primitives() -> Vec<(u16, PrimitiveDesc)> {
    vec![
        (1, PrimitiveDesc::new("fixnum_add", 1, fixnum::fixnum_add)),
        (2, PrimitiveDesc::new("fixnum_sub", 1, fixnum::fixnum_sub)),
        (3, PrimitiveDesc::new("fixnum_lt", 1, fixnum::fixnum_lt)),
        (4, PrimitiveDesc::new("fixnum_gt", 1, fixnum::fixnum_gt)),
        (7, PrimitiveDesc::new("fixnum_eq", 1, fixnum::fixnum_eq)),
        (9, PrimitiveDesc::new("fixnum_mul", 1, fixnum::fixnum_mul)),
        (60, PrimitiveDesc::new("object_at", 1, object_access::object_at)),
        (61, PrimitiveDesc::new("object_at_put", 2, object_access::object_at_put)),
        (62, PrimitiveDesc::new("object_size", 0, object_access::object_size)),
        (75, PrimitiveDesc::new("object_identity_hash", 0, object_access::object_identity_hash)),
        (76, PrimitiveDesc::new("context_stackp", 1, context::context_stackp)),
        (85, PrimitiveDesc::new("semaphore_signal", 0, process::semaphore_signal)),
        (86, PrimitiveDesc::new("semaphore_wait", 0, process::semaphore_wait)),
        (87, PrimitiveDesc::new("process_resume", 0, process::process_resume)),
        (88, PrimitiveDesc::new("process_suspend", 0, process::process_suspend)),
        (128, PrimitiveDesc::new("object_become", 1, object_access::object_become)),
        (167, PrimitiveDesc::new("scheduler_yield", 0, process::scheduler_yield)),
        (
            195,
            PrimitiveDesc::new(
                "context_find_next_unwind",
                1,
                context::context_find_next_unwind,
            ),
        ),
        (196, PrimitiveDesc::new("context_terminate_to", 1, context::context_terminate_to)),
        (210, PrimitiveDesc::new("context_at", 1, context::context_at)),
        (211, PrimitiveDesc::new("context_at_put", 2, context::context_at_put)),
        (212, PrimitiveDesc::new("context_size", 0, context::context_size)),
    ]
}

/// Primitive index to implementation.
#[derive(Debug, Default)]
pub struct PrimitiveTable {
    entries: HashMap<u16, PrimitiveDesc>,
}

impl PrimitiveTable {
    pub fn with_defaults() -> Self {
        let mut table = Self::default();
        for (index, desc) in default_primitives() {
            table.register(index, desc);
        }
        table
    }

    pub fn register(&mut self, index: u16, desc: PrimitiveDesc) {
        self.entries.insert(index, desc);
    }

    pub fn get(&self, index: u16) -> Option<&PrimitiveDesc> {
        self.entries.get(&index)
    }
}

impl Vm {
    /// Run primitive `index` for a send from `ctx`. Unknown primitives and
    /// wrong argument counts fail.
    pub fn call_primitive(
        &mut self,
        index: u16,
        ctx: ContextRef,
        receiver: Value,
        args: &[Value],
    ) -> Result<PrimitiveResult, VmError> {
        let Some(desc) = self.primitives.get(index).copied() else {
            return Ok(PrimitiveResult::Fail);
        };
        if desc.arity as usize != args.len() {
            return Ok(PrimitiveResult::Fail);
        }
        let result = (desc.func)(self, ctx, receiver, args)?;
        log::trace!("primitive {} ({}) -> {:?}", index, desc.name, result);
        Ok(result)
    }

    /// Run the primitive of the method `ctx` was activated for, reading the
    /// receiver and arguments from the context.
    pub fn run_primitive(&mut self, ctx: ContextRef) -> Result<PrimitiveResult, VmError> {
        let context = self.context(ctx)?;
        let receiver = context.receiver;
        let method = context.method;
        let method = self.expect_ref(method)?;
        let descriptor = self.memory.method(method)?;
        let Some(index) = descriptor.primitive() else {
            return Ok(PrimitiveResult::Fail);
        };
        let num_args = descriptor.num_args();
        let args = (0..num_args)
            .map(|i| self.read_temp(ctx, i))
            .collect::<Result<Vec<_>, _>>()?;
        self.call_primitive(index, ctx, receiver, &args)
    }
}

pub(crate) fn expect_fixnum(value: Value) -> Option<i64> {
    value.as_i64()
}

pub(crate) fn bool_value(value: bool) -> PrimitiveResult {
    PrimitiveResult::Answer(Value::from_bool(value))
}

/// One-based Smalltalk index to a zero-based slot.
pub(crate) fn slot_index(value: Value) -> Option<usize> {
    value
        .as_i64()
        .filter(|&i| i >= 1)
        .map(|i| (i - 1) as usize)
}
