use object::{ObjectError, Value};

use crate::frame::ContextRef;
use crate::primitives::{PrimitiveResult, slot_index};
use crate::{Vm, VmError};

/// Range and kind errors make the primitive fail; anything else is a VM
/// error.
fn recoverable(result: Result<PrimitiveResult, ObjectError>) -> Result<PrimitiveResult, VmError> {
    match result {
        Ok(result) => Ok(result),
        Err(
            ObjectError::IndexOutOfBounds { .. }
            | ObjectError::UnstorableValue { .. }
            | ObjectError::NotIndexable(_)
            | ObjectError::WrongKind { .. },
        ) => Ok(PrimitiveResult::Fail),
        Err(error) => Err(error.into()),
    }
}

pub fn object_at(
    vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    let (Some(object), Some(index)) = (receiver.as_ref(), args.first().copied().and_then(slot_index))
    else {
        return Ok(PrimitiveResult::Fail);
    };
    recoverable(vm.memory.at(object, index).map(PrimitiveResult::Answer))
}

pub fn object_at_put(
    vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    let (Some(object), Some(index), Some(&value)) = (
        receiver.as_ref(),
        args.first().copied().and_then(slot_index),
        args.get(1),
    ) else {
        return Ok(PrimitiveResult::Fail);
    };
    recoverable(
        vm.memory
            .put(object, index, value)
            .map(|()| PrimitiveResult::Answer(value)),
    )
}

pub fn object_size(
    vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    let Some(object) = receiver.as_ref() else {
        return Ok(PrimitiveResult::Answer(Value::from_i64(0)));
    };
    let size = vm.memory.size(object)?;
    Ok(PrimitiveResult::Answer(Value::from_i64(size as i64)))
}

pub fn object_identity_hash(
    vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    let Some(object) = receiver.as_ref() else {
        return Ok(PrimitiveResult::Fail);
    };
    let hash = vm.memory.identity_hash(object)?;
    Ok(PrimitiveResult::Answer(Value::from_i64(hash as i64)))
}

/// `a become: b`. Answers the receiver, which now holds `b`'s old state.
pub fn object_become(
    vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    let (Some(a), Some(b)) = (receiver.as_ref(), args.first().and_then(|v| v.as_ref())) else {
        return Ok(PrimitiveResult::Fail);
    };
    vm.memory.become_forward(a, b)?;
    Ok(PrimitiveResult::Answer(receiver))
}
