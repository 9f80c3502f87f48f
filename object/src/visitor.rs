use crate::objects::{ClosureObject, ContextObject, MethodDescriptor};
use crate::{HeapObject, ObjectBody, ObjectError, ObjectMemory, ObjectRef, SlotStorage, Value};

pub trait Visitable {
    fn visit_edges(&self, visitor: &mut impl Visitor);
}

/// Receives every reference-carrying value an object holds. Immediates are
/// passed through as well; a tracer filters with [`Value::as_ref`].
pub trait Visitor: Sized {
    fn visit(&mut self, value: Value) {
        let _ = value;
    }
    /// Elements of weak objects. Ignored unless overridden.
    fn visit_weak(&mut self, value: Value) {
        let _ = value;
    }
}

impl<F: FnMut(Value)> Visitor for F {
    fn visit(&mut self, value: Value) {
        self(value)
    }
}

// Visiting an object visits its direct edges only. The header's class is not
// a value edge: classes live in the class table, not on the heap.
impl Visitable for HeapObject {
    #[inline]
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        self.body.visit_edges(visitor);
    }
}

impl Visitable for ObjectBody {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        match self {
            ObjectBody::Empty | ObjectBody::Bytes(_) | ObjectBody::Words(_) => (),
            ObjectBody::Pointers(fields) => fields.visit_edges(visitor),
            ObjectBody::Variable { fields, elements } => {
                fields.visit_edges(visitor);
                elements.iter().for_each(|&v| visitor.visit(v));
            }
            ObjectBody::Weak(elements) => elements.iter().for_each(|&v| visitor.visit_weak(v)),
            ObjectBody::Method(method) => method.visit_edges(visitor),
            ObjectBody::Context(ctx) => ctx.visit_edges(visitor),
            ObjectBody::Closure(closure) => closure.visit_edges(visitor),
        }
    }
}

impl Visitable for SlotStorage {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        self.values().for_each(|v| visitor.visit(v));
    }
}

impl Visitable for MethodDescriptor {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit(self.selector);
        self.literals.iter().for_each(|&v| visitor.visit(v));
    }
}

impl Visitable for ContextObject {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit(self.sender);
        visitor.visit(self.method);
        visitor.visit(self.closure);
        visitor.visit(self.receiver);
        self.stack[..self.sp].iter().for_each(|&v| visitor.visit(v));
    }
}

impl Visitable for ClosureObject {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        visitor.visit(self.outer_context);
        visitor.visit(self.method);
        visitor.visit(self.receiver);
        self.copied.iter().for_each(|&v| visitor.visit(v));
    }
}

impl ObjectMemory {
    pub fn trace_edges(&self, object: ObjectRef, visitor: &mut impl Visitor) -> Result<(), ObjectError> {
        self.get(object)?.visit_edges(visitor);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClassDescriptor, InstanceSpec};

    #[test]
    fn weak_elements_are_reported_separately() {
        struct Counter {
            strong: usize,
            weak: usize,
        }
        impl Visitor for Counter {
            fn visit(&mut self, value: Value) {
                if value.is_ref() {
                    self.strong += 1;
                }
            }
            fn visit_weak(&mut self, value: Value) {
                if value.is_ref() {
                    self.weak += 1;
                }
            }
        }

        let mut memory = ObjectMemory::new();
        let array = memory.add_class(ClassDescriptor::new("Array", None, InstanceSpec::Variable, 0));
        let weak = memory.add_class(ClassDescriptor::new("WeakArray", None, InstanceSpec::Weak, 0));
        let target = memory.instantiate(array, 0).unwrap();
        let strong_holder = memory.instantiate(array, 2).unwrap();
        let weak_holder = memory.instantiate(weak, 1).unwrap();
        memory.put(strong_holder, 0, Value::from_ref(target)).unwrap();
        memory.put(strong_holder, 1, Value::from_i64(1)).unwrap();
        memory.put(weak_holder, 0, Value::from_ref(target)).unwrap();

        let mut counter = Counter { strong: 0, weak: 0 };
        memory.trace_edges(strong_holder, &mut counter).unwrap();
        memory.trace_edges(weak_holder, &mut counter).unwrap();
        assert_eq!((counter.strong, counter.weak), (1, 1));
    }

    #[test]
    fn closures_visit_as_visitors() {
        let mut memory = ObjectMemory::new();
        let class = memory.add_class(ClassDescriptor::new("Pair", None, InstanceSpec::Fixed, 2));
        let pair = memory.instantiate(class, 0).unwrap();
        memory.put(pair, 1, Value::from_i64(5)).unwrap();
        let mut seen = Vec::new();
        memory.trace_edges(pair, &mut |v: Value| seen.push(v)).unwrap();
        assert_eq!(seen, vec![Value::NIL, Value::from_i64(5)]);
    }
}
