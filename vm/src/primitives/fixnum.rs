use object::Value;

use crate::frame::ContextRef;
use crate::primitives::{PrimitiveResult, bool_value, expect_fixnum};
use crate::{Vm, VmError};

fn operands(receiver: Value, args: &[Value]) -> Option<(i64, i64)> {
    let rhs = args.first().copied()?;
    Some((expect_fixnum(receiver)?, expect_fixnum(rhs)?))
}

/// Overflow out of the small integer range fails; large integers are the
/// method's business.
fn arithmetic(receiver: Value, args: &[Value], op: fn(i64, i64) -> Option<i64>) -> PrimitiveResult {
    operands(receiver, args)
        .and_then(|(a, b)| op(a, b))
        .and_then(Value::try_from_i64)
        .map_or(PrimitiveResult::Fail, PrimitiveResult::Answer)
}

fn comparison(receiver: Value, args: &[Value], op: fn(&i64, &i64) -> bool) -> PrimitiveResult {
    operands(receiver, args).map_or(PrimitiveResult::Fail, |(a, b)| bool_value(op(&a, &b)))
}

pub fn fixnum_add(
    _vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    Ok(arithmetic(receiver, args, i64::checked_add))
}

pub fn fixnum_sub(
    _vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    Ok(arithmetic(receiver, args, i64::checked_sub))
}

pub fn fixnum_mul(
    _vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    Ok(arithmetic(receiver, args, i64::checked_mul))
}

pub fn fixnum_lt(
    _vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    Ok(comparison(receiver, args, i64::lt))
}

pub fn fixnum_gt(
    _vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    Ok(comparison(receiver, args, i64::gt))
}

pub fn fixnum_eq(
    _vm: &mut Vm,
    _ctx: ContextRef,
    receiver: Value,
    args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    Ok(comparison(receiver, args, i64::eq))
}
