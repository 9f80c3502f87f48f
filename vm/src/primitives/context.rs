//! Primitives on reified contexts. The receiver is always a heap context.
use object::Value;

use crate::frame::ContextRef;
use crate::primitives::{PrimitiveResult, slot_index};
use crate::{Vm, VmError};

fn receiver_context(vm: &Vm, receiver: Value) -> Option<ContextRef> {
    vm.context_from_value(receiver).ok()
}

pub fn context_stackp(
    vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    let (Some(target), Some(sp)) = (
        receiver_context(vm, receiver),
        args.first().and_then(|v| v.as_i64()),
    ) else {
        return Ok(PrimitiveResult::Fail);
    };
    let Ok(sp) = usize::try_from(sp) else {
        return Ok(PrimitiveResult::Fail);
    };
    if !vm.context_mut(target)?.set_stack_pointer(sp) {
        return Ok(PrimitiveResult::Fail);
    }
    Ok(PrimitiveResult::Answer(receiver))
}

/// The nearest unwind-protect context above the receiver, stopping before
/// the argument; nil if there is none.
pub fn context_find_next_unwind(
    vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    let Some(start) = receiver_context(vm, receiver) else {
        return Ok(PrimitiveResult::Fail);
    };
    let limit = args.first().and_then(|&v| receiver_context(vm, v));
    let Some(from) = vm.sender_of(start)? else {
        return Ok(PrimitiveResult::Answer(Value::NIL));
    };
    match vm.find_unwind_context(from, limit)? {
        Some(found) => Ok(PrimitiveResult::Answer(vm.context_value(found)?)),
        None => Ok(PrimitiveResult::Answer(Value::NIL)),
    }
}

/// Terminate the contexts between the receiver and the argument if the
/// argument is on the receiver's sender chain, then make it the sender.
pub fn context_terminate_to(
    vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    let Some(start) = receiver_context(vm, receiver) else {
        return Ok(PrimitiveResult::Fail);
    };
    let previous = match args.first().copied() {
        Some(v) if v.is_nil() => None,
        Some(v) => match receiver_context(vm, v) {
            Some(previous) => Some(previous),
            None => return Ok(PrimitiveResult::Fail),
        },
        None => return Ok(PrimitiveResult::Fail),
    };

    if let Some(previous) = previous {
        if has_sender(vm, start, previous)? {
            let mut current = vm.sender_of(start)?;
            while let Some(ctx) = current {
                if vm.same_context(ctx, previous) {
                    break;
                }
                current = vm.sender_of(ctx)?;
                vm.terminate_context(ctx)?;
            }
        }
    }
    vm.set_sender(start, previous)?;
    Ok(PrimitiveResult::Answer(receiver))
}

fn has_sender(vm: &Vm, ctx: ContextRef, wanted: ContextRef) -> Result<bool, VmError> {
    let mut current = vm.sender_of(ctx)?;
    while let Some(sender) = current {
        if vm.same_context(sender, wanted) {
            return Ok(true);
        }
        current = vm.sender_of(sender)?;
    }
    Ok(false)
}

pub fn context_at(
    vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    let (Some(target), Some(index)) = (
        receiver_context(vm, receiver),
        args.first().copied().and_then(slot_index),
    ) else {
        return Ok(PrimitiveResult::Fail);
    };
    match vm.read_temp(target, index) {
        Ok(value) => Ok(PrimitiveResult::Answer(value)),
        Err(_) => Ok(PrimitiveResult::Fail),
    }
}

pub fn context_at_put(
    vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    let (Some(target), Some(index), Some(&value)) = (
        receiver_context(vm, receiver),
        args.first().copied().and_then(slot_index),
        args.get(1),
    ) else {
        return Ok(PrimitiveResult::Fail);
    };
    match vm.write_temp(target, index, value) {
        Ok(()) => Ok(PrimitiveResult::Answer(value)),
        Err(_) => Ok(PrimitiveResult::Fail),
    }
}

pub fn context_size(
    vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    let Some(target) = receiver_context(vm, receiver) else {
        return Ok(PrimitiveResult::Fail);
    };
    let sp = vm.context(target)?.sp;
    Ok(PrimitiveResult::Answer(Value::from_i64(sp as i64)))
}

#[cfg(test)]
mod tests {
    use object::MethodHeader;

    use super::*;
    use crate::primitives::UNWIND_MARKER;
    use crate::testing::test_method;
    use crate::{VmSettings, bootstrap};

    fn heap_chain(vm: &mut Vm, methods: &[Value]) -> Vec<Value> {
        let mut contexts: Vec<ContextRef> = Vec::new();
        for &method in methods {
            let sender = contexts.last().copied();
            contexts.push(vm.activate_method(sender, method, Value::NIL, &[]).unwrap());
        }
        contexts.iter().map(|&c| vm.context_value(c).unwrap()).collect()
    }

    fn ensure_method(vm: &mut Vm) -> Value {
        let header = MethodHeader {
            primitive: Some(UNWIND_MARKER),
            ..MethodHeader::default()
        };
        vm.new_method(header, Vec::new(), Vec::new(), Value::NIL)
    }

    #[test]
    fn finds_unwind_context_below_limit() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let plain = test_method(&mut vm, 0);
        let ensure = ensure_method(&mut vm);
        // c[3] -> c[2] -> c[1] (ensure) -> c[0]
        let c = heap_chain(&mut vm, &[plain, ensure, plain, plain]);
        let ctx = vm.context_from_value(c[3]).unwrap();

        let found = context_find_next_unwind(&mut vm, ctx, c[3], &[Value::NIL]).unwrap();
        assert_eq!(found, PrimitiveResult::Answer(c[1]));
        let found = context_find_next_unwind(&mut vm, ctx, c[3], &[c[1]]).unwrap();
        assert_eq!(found, PrimitiveResult::Answer(Value::NIL));
    }

    #[test]
    fn terminate_to_cuts_the_chain() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let plain = test_method(&mut vm, 0);
        let c = heap_chain(&mut vm, &[plain, plain, plain, plain]);
        let top = vm.context_from_value(c[3]).unwrap();

        context_terminate_to(&mut vm, top, c[3], &[c[0]]).unwrap();

        let bottom = vm.context_from_value(c[0]).unwrap();
        assert_eq!(vm.sender_of(top).unwrap(), Some(bottom));
        for &dead in &c[1..3] {
            assert!(vm.is_terminated(vm.context_from_value(dead).unwrap()));
        }
        assert!(!vm.is_terminated(bottom));
    }

    #[test]
    fn stack_access_is_bounded_by_stack_pointer() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let method = test_method(&mut vm, 1);
        let ctx = vm
            .activate_method(None, method, Value::NIL, &[Value::from_i64(8)])
            .unwrap();
        let receiver = vm.context_value(ctx).unwrap();
        let one = Value::from_i64(1);

        assert_eq!(
            context_size(&mut vm, ctx, receiver, &[]).unwrap(),
            PrimitiveResult::Answer(Value::from_i64(2))
        );
        assert_eq!(
            context_at(&mut vm, ctx, receiver, &[one]).unwrap(),
            PrimitiveResult::Answer(Value::from_i64(8))
        );
        context_stackp(&mut vm, ctx, receiver, &[Value::from_i64(4)]).unwrap();
        context_at_put(&mut vm, ctx, receiver, &[Value::from_i64(4), Value::TRUE]).unwrap();
        assert_eq!(vm.read_temp(ctx, 3).unwrap(), Value::TRUE);
        assert_eq!(
            context_at(&mut vm, ctx, receiver, &[Value::from_i64(5)]).unwrap(),
            PrimitiveResult::Fail
        );
    }

    #[test]
    fn stack_pointer_beyond_frame_fails() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let method = test_method(&mut vm, 1);
        let ctx = vm
            .activate_method(None, method, Value::NIL, &[Value::from_i64(8)])
            .unwrap();
        let receiver = vm.context_value(ctx).unwrap();
        let frame = vm.context(ctx).unwrap().size() as i64;

        assert_eq!(
            context_stackp(&mut vm, ctx, receiver, &[Value::from_i64(1 << 40)]).unwrap(),
            PrimitiveResult::Fail
        );
        assert_eq!(
            context_stackp(&mut vm, ctx, receiver, &[Value::from_i64(frame + 1)]).unwrap(),
            PrimitiveResult::Fail
        );
        assert_eq!(vm.context(ctx).unwrap().sp, 2);
        assert_eq!(
            context_stackp(&mut vm, ctx, receiver, &[Value::from_i64(frame)]).unwrap(),
            PrimitiveResult::Answer(receiver)
        );
    }
}
