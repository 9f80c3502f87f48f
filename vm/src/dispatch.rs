//! Message sends.
//!
//! A send looks the selector up through the receiver's superclass chain,
//! tries the method's primitive if it has one and otherwise activates the
//! method on top of the sending context. [`CallSiteCache`] remembers the
//! lookups of one send site for a bounded number of receiver classes.
use log::trace;
use object::{ClassRef, Value};

use crate::frame::ContextRef;
use crate::primitives::PrimitiveResult;
use crate::{Vm, VmError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// A primitive answered; the sender continues with this value.
    Answered(Value),
    /// A new context was activated and has to be run.
    Activated(ContextRef),
    /// A primitive switched processes.
    Switched(ContextRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CacheEntry {
    class: ClassRef,
    method: Value,
    primitive: Option<u16>,
}

/// Per send-site lookup cache. After `limit` distinct receiver classes the
/// site goes megamorphic and every send does a full lookup.
#[derive(Debug, Clone)]
pub struct CallSiteCache {
    selector: Value,
    entries: Vec<CacheEntry>,
    megamorphic: bool,
    limit: usize,
}

impl CallSiteCache {
    pub fn new(selector: Value, limit: usize) -> Self {
        Self {
            selector,
            entries: Vec::with_capacity(limit),
            megamorphic: false,
            limit,
        }
    }

    pub fn selector(&self) -> Value {
        self.selector
    }

    pub fn is_megamorphic(&self) -> bool {
        self.megamorphic
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&mut self, vm: &Vm, class: ClassRef) -> Result<CacheEntry, VmError> {
        if let Some(entry) = self.entries.iter().find(|e| e.class == class) {
            return Ok(*entry);
        }
        let method = vm.lookup_or_fail(class, self.selector)?;
        let entry = CacheEntry {
            class,
            method,
            primitive: vm.primitive_of(method),
        };
        if self.megamorphic {
            return Ok(entry);
        }
        if self.entries.len() < self.limit {
            self.entries.push(entry);
        } else {
            trace!("send site {} went megamorphic", vm.selector_name(self.selector));
            self.entries.clear();
            self.megamorphic = true;
        }
        Ok(entry)
    }
}

impl Vm {
    /// The method for `selector` in `class` or its superclasses.
    pub fn lookup(&self, class: ClassRef, selector: Value) -> Option<Value> {
        let mut current = Some(class);
        while let Some(class) = current {
            let descriptor = self.memory.class(class);
            if let Some(method) = descriptor.local_method(selector) {
                return Some(method);
            }
            current = descriptor.superclass;
        }
        None
    }

    fn lookup_or_fail(&self, class: ClassRef, selector: Value) -> Result<Value, VmError> {
        self.lookup(class, selector)
            .ok_or_else(|| VmError::MessageNotUnderstood {
                selector: self.selector_name(selector),
                class: self.memory.class(class).name.clone(),
            })
    }

    fn primitive_of(&self, method: Value) -> Option<u16> {
        let method = method.as_ref()?;
        self.memory.method(method).ok()?.primitive()
    }

    /// Send `selector` to `receiver` from `ctx`.
    pub fn send(
        &mut self,
        ctx: ContextRef,
        selector: Value,
        receiver: Value,
        args: &[Value],
    ) -> Result<SendOutcome, VmError> {
        let class = self.class_of(receiver)?;
        let method = self.lookup_or_fail(class, selector)?;
        let primitive = self.primitive_of(method);
        self.perform(ctx, method, primitive, receiver, args)
    }

    /// Send through `cache`.
    pub fn send_cached(
        &mut self,
        ctx: ContextRef,
        cache: &mut CallSiteCache,
        receiver: Value,
        args: &[Value],
    ) -> Result<SendOutcome, VmError> {
        let class = self.class_of(receiver)?;
        let entry = cache.lookup(self, class)?;
        self.perform(ctx, entry.method, entry.primitive, receiver, args)
    }

    fn perform(
        &mut self,
        ctx: ContextRef,
        method: Value,
        primitive: Option<u16>,
        receiver: Value,
        args: &[Value],
    ) -> Result<SendOutcome, VmError> {
        if let Some(index) = primitive {
            match self.call_primitive(index, ctx, receiver, args)? {
                PrimitiveResult::Answer(value) => return Ok(SendOutcome::Answered(value)),
                PrimitiveResult::Switch(next) => return Ok(SendOutcome::Switched(next)),
                PrimitiveResult::Fail => {}
            }
        }
        let callee = self.activate_method(Some(ctx), method, receiver, args)?;
        Ok(SendOutcome::Activated(callee))
    }
}

#[cfg(test)]
mod tests {
    use object::{ClassDescriptor, InstanceSpec};

    use super::*;
    use crate::testing::test_method;
    use crate::{VmSettings, bootstrap};

    fn caller(vm: &mut Vm) -> ContextRef {
        let method = test_method(vm, 0);
        vm.activate_method(None, method, Value::NIL, &[]).unwrap()
    }

    #[test]
    fn primitive_answers_without_activation() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let ctx = caller(&mut vm);
        let plus = vm.intern("+");
        let outcome = vm
            .send(ctx, plus, Value::from_i64(3), &[Value::from_i64(4)])
            .unwrap();
        assert_eq!(outcome, SendOutcome::Answered(Value::from_i64(7)));
        assert_eq!(vm.frames.len(), 1);
    }

    #[test]
    fn failed_primitive_activates_method() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let ctx = caller(&mut vm);
        let plus = vm.intern("+");
        let outcome = vm.send(ctx, plus, Value::from_i64(3), &[Value::TRUE]).unwrap();
        let SendOutcome::Activated(callee) = outcome else {
            panic!("expected an activation, got {outcome:?}");
        };
        assert_eq!(vm.sender_of(callee).unwrap(), Some(ctx));
        assert_eq!(vm.read_temp(callee, 0).unwrap(), Value::TRUE);
    }

    #[test]
    fn lookup_follows_superclasses() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let ctx = caller(&mut vm);
        let list = vm.memory.instantiate(vm.specials.semaphore, 0).unwrap();
        let size = vm.intern("size");
        let outcome = vm.send(ctx, size, Value::from_ref(list), &[]).unwrap();
        assert_eq!(outcome, SendOutcome::Answered(Value::from_i64(3)));
    }

    #[test]
    fn unknown_selector_is_not_understood() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let ctx = caller(&mut vm);
        let frobnicate = vm.intern("frobnicate");
        let error = vm.send(ctx, frobnicate, Value::TRUE, &[]).unwrap_err();
        assert_eq!(
            error,
            VmError::MessageNotUnderstood {
                selector: "frobnicate".into(),
                class: "True".into(),
            }
        );
    }

    #[test]
    fn call_site_goes_megamorphic_past_limit() {
        let mut vm = bootstrap(VmSettings::default()).unwrap();
        let ctx = caller(&mut vm);
        let object = vm.specials.object;
        let receivers: Vec<Value> = (0..7)
            .map(|i| {
                let class = vm.memory.add_class(ClassDescriptor::new(
                    &format!("Shape{i}"),
                    Some(object),
                    InstanceSpec::Fixed,
                    1,
                ));
                Value::from_ref(vm.memory.instantiate(class, 0).unwrap())
            })
            .collect();
        let size = vm.intern("size");
        let mut cache = CallSiteCache::new(size, vm.settings.inline_cache_size);

        for receiver in &receivers[..6] {
            let outcome = vm.send_cached(ctx, &mut cache, *receiver, &[]).unwrap();
            assert_eq!(outcome, SendOutcome::Answered(Value::from_i64(1)));
        }
        assert_eq!(cache.len(), 6);
        assert!(!cache.is_megamorphic());

        vm.send_cached(ctx, &mut cache, receivers[6], &[]).unwrap();
        assert!(cache.is_megamorphic());
        assert!(cache.is_empty());
        let outcome = vm.send_cached(ctx, &mut cache, receivers[0], &[]).unwrap();
        assert_eq!(outcome, SendOutcome::Answered(Value::from_i64(1)));
    }
}
