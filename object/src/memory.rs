use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::objects::{ClosureObject, ContextObject, MethodDescriptor, MethodHeader};
use crate::{
    ClassDescriptor, ClassRef, Header, HeapObject, IDENTITY_HASH_MASK, InstanceSpec, ObjectBody,
    ObjectError, ObjectRef, Shape, SlotStorage, Value,
};

/// Arena of heap objects plus the class table.
///
/// Objects are addressed by [`ObjectRef`] and never move. Reclamation is left
/// to a companion tracer driving [`ObjectMemory::begin_mark_pass`],
/// [`ObjectMemory::try_to_mark`] and [`ObjectMemory::trace_edges`].
#[derive(Debug)]
pub struct ObjectMemory {
    objects: Vec<Option<HeapObject>>,
    classes: Vec<ClassDescriptor>,
    symbols: HashMap<String, Value>,
    symbol_class: ClassRef,
    marking_flag: bool,
}

impl Default for ObjectMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectMemory {
    /// An empty memory whose class table holds only `Symbol`.
    pub fn new() -> Self {
        let mut memory = Self {
            objects: Vec::new(),
            classes: Vec::new(),
            symbols: HashMap::new(),
            symbol_class: ClassRef(0),
            marking_flag: false,
        };
        memory.symbol_class =
            memory.add_class(ClassDescriptor::new("Symbol", None, InstanceSpec::Bytes, 0));
        memory
    }

    // ── classes ────────────────────────────────────────────────────

    pub fn add_class(&mut self, class: ClassDescriptor) -> ClassRef {
        let class_ref = ClassRef(self.classes.len() as u32);
        self.classes.push(class);
        class_ref
    }

    #[inline]
    pub fn class(&self, class: ClassRef) -> &ClassDescriptor {
        &self.classes[class.index()]
    }

    #[inline]
    pub fn class_mut(&mut self, class: ClassRef) -> &mut ClassDescriptor {
        &mut self.classes[class.index()]
    }

    pub fn symbol_class(&self) -> ClassRef {
        self.symbol_class
    }

    pub fn find_class(&self, name: &str) -> Option<ClassRef> {
        self.classes
            .iter()
            .position(|c| c.name == name)
            .map(|i| ClassRef(i as u32))
    }

    // ── allocation ─────────────────────────────────────────────────

    /// Allocate an object with an explicit payload.
    pub fn allocate(&mut self, class: ClassRef, body: ObjectBody) -> ObjectRef {
        let object_ref = ObjectRef(self.objects.len() as u32);
        self.objects.push(Some(HeapObject {
            header: Header::new(self.marking_flag),
            class,
            body,
        }));
        object_ref
    }

    /// Allocate a fresh instance of `class` with `extra` indexable slots,
    /// dispatching on the class's instance format.
    pub fn instantiate(&mut self, class: ClassRef, extra: usize) -> Result<ObjectRef, ObjectError> {
        let descriptor = self.class(class);
        let body = match descriptor.spec {
            InstanceSpec::Empty => ObjectBody::Empty,
            InstanceSpec::Fixed => ObjectBody::Pointers(SlotStorage::new(Rc::clone(descriptor.shape()))),
            InstanceSpec::Variable => ObjectBody::Variable {
                fields: SlotStorage::new(Rc::clone(descriptor.shape())),
                elements: vec![Value::NIL; extra],
            },
            InstanceSpec::Weak => ObjectBody::Weak(vec![Value::NIL; extra]),
            InstanceSpec::Ephemeron => {
                return Err(ObjectError::UnsupportedObjectKind(InstanceSpec::Ephemeron));
            }
            InstanceSpec::Bytes => ObjectBody::Bytes(vec![0; extra]),
            InstanceSpec::Words => ObjectBody::Words(vec![0; extra]),
            InstanceSpec::CompiledMethod => ObjectBody::Method(MethodDescriptor::new(
                MethodHeader::default(),
                vec![Value::NIL; extra],
                Vec::new(),
            )),
            InstanceSpec::Context => {
                let mut ctx = ContextObject::new(Value::NIL, Value::NIL, extra);
                ctx.pc = None;
                ObjectBody::Context(ctx)
            }
            InstanceSpec::Closure => ObjectBody::Closure(ClosureObject {
                outer_context: Value::NIL,
                method: Value::NIL,
                receiver: Value::NIL,
                start_pc: 0,
                num_args: 0,
                copied: vec![Value::NIL; extra],
            }),
        };
        Ok(self.allocate(class, body))
    }

    // ── access ─────────────────────────────────────────────────────

    #[inline]
    pub fn get(&self, object: ObjectRef) -> Result<&HeapObject, ObjectError> {
        self.objects
            .get(object.index())
            .and_then(Option::as_ref)
            .ok_or(ObjectError::InvalidReference(object))
    }

    #[inline]
    pub fn get_mut(&mut self, object: ObjectRef) -> Result<&mut HeapObject, ObjectError> {
        self.objects
            .get_mut(object.index())
            .and_then(Option::as_mut)
            .ok_or(ObjectError::InvalidReference(object))
    }

    pub fn class_of(&self, object: ObjectRef) -> Result<ClassRef, ObjectError> {
        Ok(self.get(object)?.class)
    }

    pub fn context(&self, object: ObjectRef) -> Result<&ContextObject, ObjectError> {
        let body = &self.get(object)?.body;
        body.as_context().ok_or(ObjectError::WrongKind {
            expected: "context",
            found: body.kind_name(),
        })
    }

    pub fn context_mut(&mut self, object: ObjectRef) -> Result<&mut ContextObject, ObjectError> {
        let body = &mut self.get_mut(object)?.body;
        let found = body.kind_name();
        body.as_context_mut().ok_or(ObjectError::WrongKind {
            expected: "context",
            found,
        })
    }

    pub fn method(&self, object: ObjectRef) -> Result<&MethodDescriptor, ObjectError> {
        let body = &self.get(object)?.body;
        body.as_method().ok_or(ObjectError::WrongKind {
            expected: "compiled method",
            found: body.kind_name(),
        })
    }

    pub fn closure(&self, object: ObjectRef) -> Result<&ClosureObject, ObjectError> {
        let body = &self.get(object)?.body;
        body.as_closure().ok_or(ObjectError::WrongKind {
            expected: "closure",
            found: body.kind_name(),
        })
    }

    pub fn size(&self, object: ObjectRef) -> Result<usize, ObjectError> {
        Ok(self.get(object)?.body.size())
    }

    pub fn at(&self, object: ObjectRef, index: usize) -> Result<Value, ObjectError> {
        self.get(object)?.body.at(index)
    }

    /// Store `value` at `index`. A named field whose location cannot hold
    /// the value first moves the object to a layout that can.
    pub fn put(&mut self, object: ObjectRef, index: usize, value: Value) -> Result<(), ObjectError> {
        loop {
            let heap = self.get_mut(object)?;
            if heap.body.put(index, value)? {
                return Ok(());
            }
            let class = heap.class;
            let current = heap
                .body
                .fields()
                .map(|f| Rc::clone(f.shape()))
                .ok_or(ObjectError::NotIndexable(object))?;
            let latest = Rc::clone(self.class(class).shape());
            let target = if !Rc::ptr_eq(&latest, &current) && latest.can_store(index, value) {
                latest
            } else {
                self.evolve_location(class, index, value)?
            };
            self.migrate(object, target)?;
        }
    }

    // ── shapes ─────────────────────────────────────────────────────

    /// The class's shape if it can already hold `value` at `index`, else a
    /// successor that can, installed as the class's new shape.
    pub fn evolve_location(
        &mut self,
        class: ClassRef,
        index: usize,
        value: Value,
    ) -> Result<Rc<Shape>, ObjectError> {
        let descriptor = &mut self.classes[class.index()];
        let current = descriptor.shape();
        if current.can_store(index, value) {
            return Ok(Rc::clone(current));
        }
        if index >= current.inst_size() {
            return Err(ObjectError::IndexOutOfBounds {
                index,
                size: current.inst_size(),
            });
        }
        let next = Rc::new(current.evolved(index, value));
        debug!(
            "{}: slot {} evolved {:?} -> {:?}",
            descriptor.name,
            index,
            current.location(index),
            next.location(index)
        );
        descriptor.install_shape(Rc::clone(&next));
        Ok(next)
    }

    /// Move `object`'s fields into `to`. A slot whose value does not fit `to`
    /// evolves the class further and the migration is retried.
    pub fn migrate(&mut self, object: ObjectRef, mut to: Rc<Shape>) -> Result<(), ObjectError> {
        loop {
            let heap = self.get_mut(object)?;
            let class = heap.class;
            let fields = heap
                .body
                .fields_mut()
                .ok_or(ObjectError::NotIndexable(object))?;
            match fields.migrate(&to)? {
                None => return Ok(()),
                Some((index, value)) => {
                    debug!("#{}: slot {} does not fit, evolving again", object.0, index);
                    to = self.evolve_location(class, index, value)?;
                }
            }
        }
    }

    /// Change the number of named instance variables of `class`. Existing
    /// locations are kept, new slots start uninitialized, and every instance
    /// is rebuilt on the new shape.
    pub fn reshape_class(&mut self, class: ClassRef, inst_size: usize) -> Result<Rc<Shape>, ObjectError> {
        let descriptor = &mut self.classes[class.index()];
        if !descriptor.spec.has_shape() {
            return Err(ObjectError::WrongKind {
                expected: "pointers",
                found: "non-pointers",
            });
        }
        let resized = Rc::new(descriptor.shape().resized(inst_size));
        debug!(
            "{}: reshaped {} -> {} instance variables",
            descriptor.name,
            descriptor.basic_inst_size(),
            inst_size
        );
        descriptor.install_shape(resized);

        let instances: Vec<ObjectRef> = self.instances_of(class).collect();
        for object in instances {
            self.rebuild(object)?;
        }
        Ok(Rc::clone(self.class(class).shape()))
    }

    fn rebuild(&mut self, object: ObjectRef) -> Result<(), ObjectError> {
        loop {
            let class = self.get(object)?.class;
            let target = Rc::clone(self.class(class).shape());
            let heap = self.get_mut(object)?;
            let Some(fields) = heap.body.fields_mut() else {
                return Ok(());
            };
            match fields.rebuilt(&target) {
                Ok(storage) => {
                    *fields = storage;
                    return Ok(());
                }
                Err(ObjectError::UnstorableValue { index, value }) => {
                    self.evolve_location(class, index, value)?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn instances_of(&self, class: ClassRef) -> impl Iterator<Item = ObjectRef> + '_ {
        self.objects.iter().enumerate().filter_map(move |(i, o)| match o {
            Some(heap) if heap.class == class => Some(ObjectRef(i as u32)),
            _ => None,
        })
    }

    pub fn object_count(&self) -> usize {
        self.objects.iter().filter(|o| o.is_some()).count()
    }

    // ── identity ───────────────────────────────────────────────────

    /// Exchange class, payload and header flags of `a` and `b`. Identity
    /// hashes stay with their references.
    pub fn become_forward(&mut self, a: ObjectRef, b: ObjectRef) -> Result<(), ObjectError> {
        self.get(a)?;
        self.get(b)?;
        if a == b {
            return Ok(());
        }
        let (lo, hi) = if a.index() < b.index() {
            (a.index(), b.index())
        } else {
            (b.index(), a.index())
        };
        let (left, right) = self.objects.split_at_mut(hi);
        let (Some(x), Some(y)) = (left[lo].as_mut(), right[0].as_mut()) else {
            return Err(ObjectError::InvalidReference(a));
        };
        std::mem::swap(&mut x.class, &mut y.class);
        std::mem::swap(&mut x.body, &mut y.body);
        x.header.exchange_flags(&mut y.header);
        Ok(())
    }

    /// The 22 bit identity hash, derived on first request.
    pub fn identity_hash(&mut self, object: ObjectRef) -> Result<u32, ObjectError> {
        let header = &mut self.get_mut(object)?.header;
        if header.needs_hash() {
            let mixed = (object.0.wrapping_add(1)).wrapping_mul(0x9E37_79B1) >> 10;
            let hash = match mixed & IDENTITY_HASH_MASK {
                0 => 1,
                h => h,
            };
            header.set_hash(hash);
        }
        Ok(header.hash())
    }

    pub fn pin(&mut self, object: ObjectRef) -> Result<(), ObjectError> {
        self.get_mut(object)?.header.set_pinned(true);
        Ok(())
    }

    pub fn unpin(&mut self, object: ObjectRef) -> Result<(), ObjectError> {
        self.get_mut(object)?.header.set_pinned(false);
        Ok(())
    }

    pub fn is_pinned(&self, object: ObjectRef) -> Result<bool, ObjectError> {
        Ok(self.get(object)?.header.is_pinned())
    }

    // ── marking ────────────────────────────────────────────────────

    #[inline]
    pub fn marking_flag(&self) -> bool {
        self.marking_flag
    }

    /// Start a new pass: every object reads as unmarked afterwards.
    pub fn begin_mark_pass(&mut self) -> bool {
        self.marking_flag = !self.marking_flag;
        self.marking_flag
    }

    pub fn try_to_mark(&mut self, object: ObjectRef) -> Result<bool, ObjectError> {
        let current = self.marking_flag;
        Ok(self.get_mut(object)?.header.try_to_mark(current))
    }

    pub fn is_marked(&self, object: ObjectRef) -> Result<bool, ObjectError> {
        Ok(self.get(object)?.header.is_marked(self.marking_flag))
    }

    // ── symbols ────────────────────────────────────────────────────

    pub fn intern(&mut self, name: &str) -> Value {
        if let Some(&symbol) = self.symbols.get(name) {
            return symbol;
        }
        let object = self.allocate(self.symbol_class, ObjectBody::Bytes(name.as_bytes().to_vec()));
        let symbol = Value::from_ref(object);
        self.symbols.insert(name.to_owned(), symbol);
        symbol
    }

    pub fn symbol_name(&self, symbol: Value) -> Option<&str> {
        let heap = self.get(symbol.as_ref()?).ok()?;
        if heap.class != self.symbol_class {
            return None;
        }
        match &heap.body {
            ObjectBody::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_class(memory: &mut ObjectMemory) -> ClassRef {
        memory.add_class(ClassDescriptor::new("Point", None, InstanceSpec::Fixed, 2))
    }

    #[test]
    fn put_evolves_class_shape() {
        let mut memory = ObjectMemory::new();
        let point = point_class(&mut memory);
        let p = memory.instantiate(point, 0).unwrap();
        let first = Rc::clone(memory.class(point).shape());

        memory.put(p, 0, Value::from_i64(3)).unwrap();
        memory.put(p, 1, Value::from_i64(4)).unwrap();
        assert_eq!(memory.at(p, 0).unwrap(), Value::from_i64(3));
        assert_eq!(memory.at(p, 1).unwrap(), Value::from_i64(4));
        assert!(!first.is_valid());
        assert!(memory.class(point).shape().is_valid());
    }

    #[test]
    fn stale_instance_follows_latest_shape() {
        let mut memory = ObjectMemory::new();
        let point = point_class(&mut memory);
        let a = memory.instantiate(point, 0).unwrap();
        let b = memory.instantiate(point, 0).unwrap();
        memory.put(a, 0, Value::TRUE).unwrap();
        memory.put(b, 1, Value::from_i64(9)).unwrap();
        memory.put(a, 0, Value::from_char('x')).unwrap();

        let b_shape = Rc::clone(memory.get(b).unwrap().body.fields().unwrap().shape());
        assert!(!b_shape.is_valid());
        memory.put(b, 0, Value::from_char('y')).unwrap();
        assert_eq!(memory.at(b, 0).unwrap(), Value::from_char('y'));
        assert_eq!(memory.at(b, 1).unwrap(), Value::from_i64(9));
        assert_eq!(memory.at(a, 0).unwrap(), Value::from_char('x'));
    }

    #[test]
    fn ephemerons_are_rejected() {
        let mut memory = ObjectMemory::new();
        let class = memory.add_class(ClassDescriptor::new("Ephemeron", None, InstanceSpec::Ephemeron, 0));
        assert_eq!(
            memory.instantiate(class, 3),
            Err(ObjectError::UnsupportedObjectKind(InstanceSpec::Ephemeron))
        );
    }

    #[test]
    fn variable_objects_index_past_named_fields() {
        let mut memory = ObjectMemory::new();
        let class = memory.add_class(ClassDescriptor::new("Set", None, InstanceSpec::Variable, 1));
        let set = memory.instantiate(class, 2).unwrap();
        assert_eq!(memory.size(set).unwrap(), 3);
        memory.put(set, 2, Value::TRUE).unwrap();
        assert_eq!(memory.at(set, 2).unwrap(), Value::TRUE);
        assert!(matches!(
            memory.at(set, 3),
            Err(ObjectError::IndexOutOfBounds { index: 3, size: 3 })
        ));
    }

    #[test]
    fn bytes_reject_non_bytes() {
        let mut memory = ObjectMemory::new();
        let class = memory.add_class(ClassDescriptor::new("ByteArray", None, InstanceSpec::Bytes, 0));
        let bytes = memory.instantiate(class, 1).unwrap();
        memory.put(bytes, 0, Value::from_i64(255)).unwrap();
        assert!(matches!(
            memory.put(bytes, 0, Value::from_i64(256)),
            Err(ObjectError::UnstorableValue { index: 0, .. })
        ));
        assert_eq!(memory.at(bytes, 0).unwrap(), Value::from_i64(255));
    }

    #[test]
    fn become_keeps_hashes_in_place() {
        let mut memory = ObjectMemory::new();
        let point = point_class(&mut memory);
        let a = memory.instantiate(point, 0).unwrap();
        let b = memory.instantiate(point, 0).unwrap();
        memory.put(a, 0, Value::from_i64(1)).unwrap();
        memory.put(b, 0, Value::from_i64(2)).unwrap();
        memory.pin(a).unwrap();
        let (ha, hb) = (memory.identity_hash(a).unwrap(), memory.identity_hash(b).unwrap());

        memory.become_forward(a, b).unwrap();
        assert_eq!(memory.at(a, 0).unwrap(), Value::from_i64(2));
        assert_eq!(memory.at(b, 0).unwrap(), Value::from_i64(1));
        assert!(memory.is_pinned(b).unwrap());
        assert_eq!(memory.identity_hash(a).unwrap(), ha);
        assert_eq!(memory.identity_hash(b).unwrap(), hb);
    }

    #[test]
    fn identity_hash_is_stable_and_nonzero() {
        let mut memory = ObjectMemory::new();
        let point = point_class(&mut memory);
        for _ in 0..64 {
            let p = memory.instantiate(point, 0).unwrap();
            let h = memory.identity_hash(p).unwrap();
            assert_ne!(h, 0);
            assert!(h <= IDENTITY_HASH_MASK);
            assert_eq!(memory.identity_hash(p).unwrap(), h);
        }
    }

    #[test]
    fn mark_pass_flips_flag() {
        let mut memory = ObjectMemory::new();
        let point = point_class(&mut memory);
        let p = memory.instantiate(point, 0).unwrap();
        assert!(memory.is_marked(p).unwrap());
        memory.begin_mark_pass();
        assert!(!memory.is_marked(p).unwrap());
        assert!(memory.try_to_mark(p).unwrap());
        assert!(!memory.try_to_mark(p).unwrap());
    }

    #[test]
    fn intern_answers_same_symbol() {
        let mut memory = ObjectMemory::new();
        let a = memory.intern("value:");
        let b = memory.intern("value:");
        assert_eq!(a, b);
        assert_eq!(memory.symbol_name(a), Some("value:"));
        assert_ne!(memory.intern("value"), a);
    }
}
