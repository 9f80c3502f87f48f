use std::collections::HashMap;
use std::rc::Rc;

use crate::{Shape, Value};

/// Index of a class inside the memory's class table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ClassRef(pub u32);

impl ClassRef {
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Storage format of a class's instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceSpec {
    /// No instance variables, not indexable.
    Empty,
    /// Named instance variables only.
    Fixed,
    /// Named instance variables plus indexable pointers.
    Variable,
    /// Indexable weak pointers.
    Weak,
    /// Not supported by this memory.
    Ephemeron,
    Bytes,
    Words,
    CompiledMethod,
    Context,
    Closure,
}

impl InstanceSpec {
    pub fn is_indexable(self) -> bool {
        matches!(
            self,
            InstanceSpec::Variable
                | InstanceSpec::Weak
                | InstanceSpec::Bytes
                | InstanceSpec::Words
                | InstanceSpec::Context
        )
    }

    pub fn has_shape(self) -> bool {
        matches!(self, InstanceSpec::Fixed | InstanceSpec::Variable)
    }
}

/// A class: layout owner and method holder.
#[derive(Debug)]
pub struct ClassDescriptor {
    pub name: String,
    pub superclass: Option<ClassRef>,
    pub spec: InstanceSpec,
    /// Selector symbol → compiled method.
    pub methods: HashMap<Value, Value>,
    shape: Rc<Shape>,
}

impl ClassDescriptor {
    pub fn new(
        name: impl Into<String>,
        superclass: Option<ClassRef>,
        spec: InstanceSpec,
        inst_size: usize,
    ) -> Self {
        let inst_size = if spec.has_shape() { inst_size } else { 0 };
        Self {
            name: name.into(),
            superclass,
            spec,
            methods: HashMap::new(),
            shape: Shape::empty(inst_size),
        }
    }

    /// Number of named instance variables.
    #[inline]
    pub fn basic_inst_size(&self) -> usize {
        self.shape.inst_size()
    }

    /// The latest shape.
    #[inline]
    pub fn shape(&self) -> &Rc<Shape> {
        &self.shape
    }

    /// Install a successor shape; the previous one becomes invalid.
    pub(crate) fn install_shape(&mut self, shape: Rc<Shape>) {
        if !Rc::ptr_eq(&self.shape, &shape) {
            self.shape.invalidate();
            self.shape = shape;
        }
    }

    pub fn add_method(&mut self, selector: Value, method: Value) {
        self.methods.insert(selector, method);
    }

    pub fn local_method(&self, selector: Value) -> Option<Value> {
        self.methods.get(&selector).copied()
    }
}
