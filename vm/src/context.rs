//! Context access for the bytecode layer, activation and materialization.
use log::trace;
use object::{ClosureObject, ContextFlags, ContextObject, ObjectBody, ObjectError, ObjectRef, Value};

use crate::frame::{ContextRef, Frame, FrameLookup};
use crate::{Vm, VmError};

impl Vm {
    /// The current form of `ctx`: a materialized frame resolves to its heap
    /// context.
    pub fn resolve(&self, ctx: ContextRef) -> Result<ContextRef, VmError> {
        match ctx {
            ContextRef::Heap(_) => Ok(ctx),
            ContextRef::Virtual(id) => match self.frames.lookup(id) {
                Some(FrameLookup::Live) => Ok(ctx),
                Some(FrameLookup::Materialized(object)) => Ok(ContextRef::Heap(object)),
                None => Err(VmError::StaleFrame(id)),
            },
        }
    }

    /// Whether `a` and `b` designate the same context.
    pub fn same_context(&self, a: ContextRef, b: ContextRef) -> bool {
        match (self.resolve(a), self.resolve(b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => a == b,
        }
    }

    pub fn context(&self, ctx: ContextRef) -> Result<&ContextObject, VmError> {
        match self.resolve(ctx)? {
            ContextRef::Virtual(id) => self
                .frames
                .frame(id)
                .map(|f| &f.context)
                .ok_or(VmError::StaleFrame(id)),
            ContextRef::Heap(object) => Ok(self.memory.context(object)?),
        }
    }

    pub fn context_mut(&mut self, ctx: ContextRef) -> Result<&mut ContextObject, VmError> {
        match self.resolve(ctx)? {
            ContextRef::Virtual(id) => self
                .frames
                .frame_mut(id)
                .map(|f| &mut f.context)
                .ok_or(VmError::StaleFrame(id)),
            ContextRef::Heap(object) => Ok(self.memory.context_mut(object)?),
        }
    }

    /// The heap context `value` refers to.
    pub fn context_from_value(&self, value: Value) -> Result<ContextRef, VmError> {
        let object = value.as_ref().ok_or(VmError::InvalidContext(value))?;
        self.memory
            .context(object)
            .map_err(|_| VmError::InvalidContext(value))?;
        Ok(ContextRef::Heap(object))
    }

    /// The sender of `ctx`, `None` for nil or a sender that no longer exists.
    pub fn sender_of(&self, ctx: ContextRef) -> Result<Option<ContextRef>, VmError> {
        match self.resolve(ctx)? {
            ContextRef::Virtual(id) => {
                let sender = self.frames.frame(id).and_then(|f| f.sender);
                Ok(sender.and_then(|s| self.resolve(s).ok()))
            }
            ContextRef::Heap(object) => {
                let sender = self.memory.context(object)?.sender;
                Ok(sender.as_ref().map(ContextRef::Heap))
            }
        }
    }

    pub fn set_sender(&mut self, ctx: ContextRef, sender: Option<ContextRef>) -> Result<(), VmError> {
        match self.resolve(ctx)? {
            ContextRef::Virtual(id) => {
                let frame = self.frames.frame_mut(id).ok_or(VmError::StaleFrame(id))?;
                frame.sender = sender;
            }
            ContextRef::Heap(object) => {
                let value = match sender {
                    Some(sender) => Value::from_ref(self.materialize(sender)?),
                    None => Value::NIL,
                };
                self.memory.context_mut(object)?.sender = value;
            }
        }
        Ok(())
    }

    /// Stale handles count as terminated: a virtual frame only exists while
    /// its activation does.
    pub fn is_terminated(&self, ctx: ContextRef) -> bool {
        self.context(ctx).map_or(true, ContextObject::is_terminated)
    }

    /// Mark `ctx` dead and release its frame slot. A heap context keeps its
    /// contents readable with pc and sender cleared.
    pub fn terminate_context(&mut self, ctx: ContextRef) -> Result<(), VmError> {
        match ctx {
            ContextRef::Virtual(id) => {
                if let Some(FrameLookup::Materialized(object)) = self.frames.lookup(id) {
                    self.memory.context_mut(object)?.terminate();
                }
                self.frames.release(id);
            }
            ContextRef::Heap(object) => {
                self.memory.context_mut(object)?.terminate();
                self.frames.release_context(object);
            }
        }
        Ok(())
    }

    // ── activation ─────────────────────────────────────────────────

    /// Push a new frame for `method` with `args` as its first temporaries.
    pub fn activate_method(
        &mut self,
        sender: Option<ContextRef>,
        method: Value,
        receiver: Value,
        args: &[Value],
    ) -> Result<ContextRef, VmError> {
        self.activate(sender, method, Value::NIL, receiver, args, &[])
    }

    /// Push a new frame running `closure`'s code. Copied values follow the
    /// arguments.
    pub fn activate_closure(
        &mut self,
        sender: Option<ContextRef>,
        closure: Value,
        args: &[Value],
    ) -> Result<ContextRef, VmError> {
        let object = self.expect_ref(closure)?;
        let ClosureObject {
            method,
            receiver,
            num_args,
            copied,
            start_pc,
            ..
        } = self.memory.closure(object)?.clone();
        if num_args as usize != args.len() {
            return Err(VmError::PrimitiveFailed(201));
        }
        let ctx = self.activate(sender, method, closure, receiver, args, &copied)?;
        self.context_mut(ctx)?.pc = Some(start_pc);
        Ok(ctx)
    }

    fn activate(
        &mut self,
        sender: Option<ContextRef>,
        method: Value,
        closure: Value,
        receiver: Value,
        args: &[Value],
        copied: &[Value],
    ) -> Result<ContextRef, VmError> {
        let object = method.as_ref().ok_or(VmError::NoExecutableCode { method })?;
        let descriptor = self.memory.method(object)?;
        let temps = descriptor.num_temps().max(args.len() + copied.len());
        let mut context = ContextObject::new(method, receiver, descriptor.frame_size().max(temps));
        context.closure = closure;
        for &value in args.iter().chain(copied) {
            context.push(value);
        }
        if !context.set_stack_pointer(temps) {
            return Err(ObjectError::IndexOutOfBounds {
                index: temps,
                size: context.size(),
            }
            .into());
        }
        let sender = match sender {
            Some(sender) => Some(self.resolve(sender)?),
            None => None,
        };
        Ok(ContextRef::Virtual(self.frames.push(Frame { context, sender })))
    }

    // ── operand stack ──────────────────────────────────────────────

    pub fn push(&mut self, ctx: ContextRef, value: Value) -> Result<(), VmError> {
        self.context_mut(ctx)?.push(value);
        Ok(())
    }

    pub fn pop(&mut self, ctx: ContextRef) -> Result<Value, VmError> {
        self.context_mut(ctx)?.pop().ok_or(VmError::StackUnderflow)
    }

    pub fn top(&self, ctx: ContextRef) -> Result<Value, VmError> {
        self.context(ctx)?.top().ok_or(VmError::StackUnderflow)
    }

    pub fn read_temp(&self, ctx: ContextRef, index: usize) -> Result<Value, VmError> {
        let context = self.context(ctx)?;
        if index >= context.sp {
            return Err(ObjectError::IndexOutOfBounds {
                index,
                size: context.sp,
            }
            .into());
        }
        Ok(context.stack[index])
    }

    pub fn write_temp(&mut self, ctx: ContextRef, index: usize, value: Value) -> Result<(), VmError> {
        let context = self.context_mut(ctx)?;
        if index >= context.sp {
            return Err(ObjectError::IndexOutOfBounds {
                index,
                size: context.sp,
            }
            .into());
        }
        context.stack[index] = value;
        Ok(())
    }

    // ── materialization ────────────────────────────────────────────

    /// Promote `ctx` to a heap context, senders first. Answers the heap
    /// context; a context already on the heap is answered as is.
    pub fn materialize(&mut self, ctx: ContextRef) -> Result<ObjectRef, VmError> {
        let id = match self.resolve(ctx)? {
            ContextRef::Heap(object) => return Ok(object),
            ContextRef::Virtual(id) => id,
        };

        let mut chain = vec![id];
        let mut next = self.frames.frame(id).and_then(|f| f.sender);
        while let Some(ContextRef::Virtual(sender)) = next {
            if self.frames.lookup(sender) != Some(FrameLookup::Live) {
                break;
            }
            chain.push(sender);
            next = self.frames.frame(sender).and_then(|f| f.sender);
        }

        let mut materialized = None;
        for id in chain.into_iter().rev() {
            let class = self.specials.method_context;
            let object = self.memory.allocate(class, ObjectBody::Empty);
            let Some(Frame { mut context, sender }) = self.frames.convert(id, object) else {
                return Err(VmError::StaleFrame(id));
            };
            context.sender = match sender.map(|s| self.resolve(s)) {
                Some(Ok(ContextRef::Heap(sender))) => Value::from_ref(sender),
                _ => Value::NIL,
            };
            context.flags.insert(ContextFlags::ESCAPED);
            self.memory.get_mut(object)?.body = ObjectBody::Context(context);
            self.diagnostics.materializations += 1;
            trace!("materialized {:?} as #{}", id, object.0);
            materialized = Some(object);
        }
        materialized.ok_or(VmError::StaleFrame(id))
    }

    /// Materialize `ctx` and answer it as a value.
    pub fn context_value(&mut self, ctx: ContextRef) -> Result<Value, VmError> {
        Ok(Value::from_ref(self.materialize(ctx)?))
    }

    // ── closures ───────────────────────────────────────────────────

    /// Create a closure over `ctx`, which escapes as its outer context.
    pub fn make_closure(
        &mut self,
        ctx: ContextRef,
        method: Value,
        num_args: u8,
        copied: Vec<Value>,
    ) -> Result<Value, VmError> {
        let outer = self.materialize(ctx)?;
        let receiver = self.memory.context(outer)?.receiver;
        let closure = ClosureObject {
            outer_context: Value::from_ref(outer),
            method,
            receiver,
            start_pc: 0,
            num_args,
            copied,
        };
        let class = self.specials.block_closure;
        Ok(Value::from_ref(self.memory.allocate(class, ObjectBody::Closure(closure))))
    }

    /// The method activation lexically enclosing `ctx`.
    pub fn home_context(&self, ctx: ContextRef) -> Result<ContextRef, VmError> {
        let mut current = self.resolve(ctx)?;
        loop {
            let closure = self.context(current)?.closure;
            let Some(closure) = closure.as_ref() else {
                return Ok(current);
            };
            let outer = self.memory.closure(closure)?.outer_context;
            current = self.context_from_value(outer)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_method;
    use crate::{VmSettings, bootstrap};

    #[test]
    fn activation_lays_out_temps() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let method = test_method(&mut vm, 2);
        let ctx = vm
            .activate_method(None, method, Value::NIL, &[Value::from_i64(1), Value::from_i64(2)])
            .unwrap();
        assert_eq!(vm.read_temp(ctx, 1).unwrap(), Value::from_i64(2));
        assert_eq!(vm.read_temp(ctx, 2).unwrap(), Value::NIL);
        assert!(vm.read_temp(ctx, 3).is_err());
        vm.write_temp(ctx, 2, Value::TRUE).unwrap();
        vm.push(ctx, Value::from_i64(9)).unwrap();
        assert_eq!(vm.pop(ctx).unwrap(), Value::from_i64(9));
        assert_eq!(vm.read_temp(ctx, 2).unwrap(), Value::TRUE);
    }

    #[test]
    fn materialize_promotes_sender_chain_first() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let method = test_method(&mut vm, 0);
        let bottom = vm.activate_method(None, method, Value::NIL, &[]).unwrap();
        let middle = vm.activate_method(Some(bottom), method, Value::NIL, &[]).unwrap();
        let top = vm.activate_method(Some(middle), method, Value::NIL, &[]).unwrap();

        vm.push(middle, Value::from_i64(4)).unwrap();
        let heap_middle = vm.materialize(middle).unwrap();

        assert!(matches!(vm.resolve(bottom).unwrap(), ContextRef::Heap(_)));
        assert_eq!(vm.resolve(middle).unwrap(), ContextRef::Heap(heap_middle));
        assert!(matches!(vm.resolve(top).unwrap(), ContextRef::Virtual(_)));
        assert_eq!(vm.sender_of(top).unwrap(), Some(ContextRef::Heap(heap_middle)));
        assert!(vm.same_context(middle, ContextRef::Heap(heap_middle)));

        let heap = vm.memory.context(heap_middle).unwrap();
        assert!(heap.has_escaped());
        assert_eq!(heap.top(), Some(Value::from_i64(4)));
        assert_eq!(vm.sender_of(middle).unwrap(), Some(vm.resolve(bottom).unwrap()));
        assert_eq!(vm.diagnostics.materializations, 2);
        assert_eq!(vm.materialize(middle).unwrap(), heap_middle);
    }

    #[test]
    fn terminated_heap_context_stays_readable() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let method = test_method(&mut vm, 1);
        let caller = vm.activate_method(None, method, Value::NIL, &[Value::NIL]).unwrap();
        let ctx = vm
            .activate_method(Some(caller), method, Value::TRUE, &[Value::from_i64(5)])
            .unwrap();
        let object = vm.materialize(ctx).unwrap();
        vm.terminate_context(ctx).unwrap();

        assert!(vm.is_terminated(ContextRef::Heap(object)));
        let heap = vm.memory.context(object).unwrap();
        assert_eq!(heap.pc, None);
        assert!(heap.sender.is_nil());
        assert_eq!(heap.receiver, Value::TRUE);
        assert!(!vm.is_terminated(caller));
    }

    #[test]
    fn escaped_frames_are_released_on_termination() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let method = test_method(&mut vm, 0);
        let base = vm.frames.len();
        for _ in 0..100 {
            let a = vm.activate_method(None, method, Value::NIL, &[]).unwrap();
            let b = vm.activate_method(Some(a), method, Value::NIL, &[]).unwrap();
            vm.materialize(b).unwrap();
            vm.unwind(Some(b), Some(a), Value::NIL).unwrap();
            vm.terminate_context(a).unwrap();
            assert!(vm.is_terminated(b));
            assert!(vm.is_terminated(a));
        }
        assert_eq!(vm.frames.len(), base);
    }

    #[test]
    fn closures_find_their_home() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let method = test_method(&mut vm, 0);
        let block = test_method(&mut vm, 0);
        let home = vm.activate_method(None, method, Value::from_i64(1), &[]).unwrap();
        let outer_block = vm.make_closure(home, block, 0, vec![]).unwrap();
        let outer_ctx = vm.activate_closure(Some(home), outer_block, &[]).unwrap();
        let inner_block = vm.make_closure(outer_ctx, block, 0, vec![Value::TRUE]).unwrap();
        let inner_ctx = vm.activate_closure(Some(outer_ctx), inner_block, &[]).unwrap();

        assert!(vm.same_context(vm.home_context(inner_ctx).unwrap(), home));
        assert_eq!(vm.context(inner_ctx).unwrap().receiver, Value::from_i64(1));
        assert_eq!(vm.read_temp(inner_ctx, 0).unwrap(), Value::TRUE);
    }
}
