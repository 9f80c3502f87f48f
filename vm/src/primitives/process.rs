//! Process and semaphore primitives.
//!
//! A primitive that switches processes saves the sending context in the
//! outgoing process. The send's result is pushed onto that context right
//! away so that it finds it there when it is resumed.
use object::{ObjectRef, Value};

use crate::frame::ContextRef;
use crate::primitives::PrimitiveResult;
use crate::{Vm, VmError};

fn instance_of(vm: &Vm, value: Value, class: object::ClassRef) -> Option<ObjectRef> {
    let object = value.as_ref()?;
    (vm.memory.class_of(object).ok()? == class).then_some(object)
}

fn finish(
    vm: &mut Vm,
    ctx: ContextRef,
    answer: Value,
    switched: Option<ContextRef>,
) -> Result<PrimitiveResult, VmError> {
    match switched {
        Some(next) => {
            vm.push(ctx, answer)?;
            Ok(PrimitiveResult::Switch(next))
        }
        None => Ok(PrimitiveResult::Answer(answer)),
    }
}

pub fn semaphore_signal(
    vm: &mut Vm,
    ctx: ContextRef,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    let Some(semaphore) = instance_of(vm, receiver, vm.specials.semaphore) else {
        return Ok(PrimitiveResult::Fail);
    };
    let switched = vm.signal(semaphore, Some(ctx))?;
    finish(vm, ctx, receiver, switched)
}

pub fn semaphore_wait(
    vm: &mut Vm,
    ctx: ContextRef,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    let Some(semaphore) = instance_of(vm, receiver, vm.specials.semaphore) else {
        return Ok(PrimitiveResult::Fail);
    };
    let switched = vm.wait(semaphore, ctx)?;
    finish(vm, ctx, receiver, switched)
}

pub fn process_resume(
    vm: &mut Vm,
    ctx: ContextRef,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    let Some(process) = instance_of(vm, receiver, vm.specials.process) else {
        return Ok(PrimitiveResult::Fail);
    };
    let suspended = vm.memory.at(process, crate::scheduler::process_fields::SUSPENDED_CONTEXT)?;
    if vm.context_from_value(suspended).is_err() {
        return Ok(PrimitiveResult::Fail);
    }
    let switched = vm.resume(process, Some(ctx))?;
    finish(vm, ctx, receiver, switched)
}

pub fn process_suspend(
    vm: &mut Vm,
    ctx: ContextRef,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    let Some(process) = instance_of(vm, receiver, vm.specials.process) else {
        return Ok(PrimitiveResult::Fail);
    };
    let switched = vm.suspend(process, Some(ctx))?;
    finish(vm, ctx, receiver, switched)
}

pub fn scheduler_yield(
    vm: &mut Vm,
    ctx: ContextRef,
    receiver: Value,
    _args: &[Value],
) -> Result<PrimitiveResult, VmError> {
    let switched = vm.yield_process(ctx)?;
    finish(vm, ctx, receiver, switched)
}
