use std::rc::Rc;

use crate::shape::{ExtensionCounts, Field, INLINE_FIELDS, Location, Shape};
use crate::{ObjectError, Value};

/// Instance variable storage conforming to a [`Shape`].
///
/// Boolean and primitive fields are `Option`s: `None` means the location
/// exists but was never written and reads as nil.
#[derive(Debug, Clone)]
pub struct SlotStorage {
    shape: Rc<Shape>,
    booleans: [Option<bool>; INLINE_FIELDS],
    primitives: [Option<i64>; INLINE_FIELDS],
    objects: [Value; INLINE_FIELDS],
    boolean_ext: Vec<Option<bool>>,
    primitive_ext: Vec<Option<i64>>,
    object_ext: Vec<Value>,
}

impl SlotStorage {
    pub fn new(shape: Rc<Shape>) -> Self {
        let ExtensionCounts {
            booleans,
            primitives,
            objects,
        } = shape.extensions();
        Self {
            booleans: [None; INLINE_FIELDS],
            primitives: [None; INLINE_FIELDS],
            objects: [Value::NIL; INLINE_FIELDS],
            boolean_ext: vec![None; booleans],
            primitive_ext: vec![None; primitives],
            object_ext: vec![Value::NIL; objects],
            shape,
        }
    }

    #[inline]
    pub fn shape(&self) -> &Rc<Shape> {
        &self.shape
    }

    #[inline]
    pub fn inst_size(&self) -> usize {
        self.shape.inst_size()
    }

    /// Extension vector lengths as currently allocated.
    pub fn extension_lengths(&self) -> ExtensionCounts {
        ExtensionCounts {
            booleans: self.boolean_ext.len(),
            primitives: self.primitive_ext.len(),
            objects: self.object_ext.len(),
        }
    }

    pub fn read(&self, index: usize) -> Result<Value, ObjectError> {
        let location = self.location(index)?;
        Ok(self.read_location(location))
    }

    /// Write without a layout change. Answers `false` if the current shape
    /// cannot hold `value` at `index`.
    pub fn try_write(&mut self, index: usize, value: Value) -> Result<bool, ObjectError> {
        let location = self.location(index)?;
        if !location.can_store(value) {
            return Ok(false);
        }
        self.write_location(location, value);
        Ok(true)
    }

    fn location(&self, index: usize) -> Result<Location, ObjectError> {
        self.shape.location(index).ok_or(ObjectError::IndexOutOfBounds {
            index,
            size: self.shape.inst_size(),
        })
    }

    fn read_location(&self, location: Location) -> Value {
        match location {
            Location::Uninitialized => Value::NIL,
            Location::Boolean(field) => {
                let slot = match field {
                    Field::Inline(i) => self.booleans[i as usize],
                    Field::Extension(e) => self.boolean_ext.get(e as usize).copied().flatten(),
                };
                slot.map_or(Value::NIL, Value::from_bool)
            }
            Location::Primitive(field) => {
                let slot = match field {
                    Field::Inline(i) => self.primitives[i as usize],
                    Field::Extension(e) => self.primitive_ext.get(e as usize).copied().flatten(),
                };
                slot.map_or(Value::NIL, Value::from_i64)
            }
            Location::Object(field) => match field {
                Field::Inline(i) => self.objects[i as usize],
                Field::Extension(e) => self.object_ext.get(e as usize).copied().unwrap_or(Value::NIL),
            },
        }
    }

    /// `location` must be able to store `value` and its field must be
    /// allocated.
    fn write_location(&mut self, location: Location, value: Value) {
        match location {
            Location::Uninitialized => debug_assert!(value.is_nil()),
            Location::Boolean(field) => {
                let b = value.as_bool();
                match field {
                    Field::Inline(i) => self.booleans[i as usize] = b,
                    Field::Extension(e) => self.boolean_ext[e as usize] = b,
                }
            }
            Location::Primitive(field) => {
                let n = value.as_i64();
                match field {
                    Field::Inline(i) => self.primitives[i as usize] = n,
                    Field::Extension(e) => self.primitive_ext[e as usize] = n,
                }
            }
            Location::Object(field) => match field {
                Field::Inline(i) => self.objects[i as usize] = value,
                Field::Extension(e) => self.object_ext[e as usize] = value,
            },
        }
    }

    fn clear_location(&mut self, location: Location) {
        match location {
            Location::Uninitialized => {}
            Location::Boolean(Field::Inline(i)) => self.booleans[i as usize] = None,
            Location::Boolean(Field::Extension(e)) => {
                if let Some(slot) = self.boolean_ext.get_mut(e as usize) {
                    *slot = None;
                }
            }
            Location::Primitive(Field::Inline(i)) => self.primitives[i as usize] = None,
            Location::Primitive(Field::Extension(e)) => {
                if let Some(slot) = self.primitive_ext.get_mut(e as usize) {
                    *slot = None;
                }
            }
            Location::Object(Field::Inline(i)) => self.objects[i as usize] = Value::NIL,
            Location::Object(Field::Extension(e)) => {
                if let Some(slot) = self.object_ext.get_mut(e as usize) {
                    *slot = Value::NIL;
                }
            }
        }
    }

    /// Move every slot into the layout of `to`.
    ///
    /// Values of slots whose location changed are read from the old layout
    /// first, the vacated fields are cleared, extension vectors are resized
    /// (new object fields are nil), and the saved values are written into
    /// their new locations. Answers the first slot whose saved value does
    /// not fit `to`, leaving the storage on the old shape.
    pub fn migrate(&mut self, to: &Rc<Shape>) -> Result<Option<(usize, Value)>, ObjectError> {
        if Rc::ptr_eq(&self.shape, to) {
            return Ok(None);
        }
        let from = Rc::clone(&self.shape);
        if from.inst_size() != to.inst_size() {
            return Err(ObjectError::ShapeEvolution {
                from: from.inst_size(),
                to: to.inst_size(),
            });
        }

        let mut changes = Vec::new();
        for (index, (&old, &new)) in from.locations().iter().zip(to.locations()).enumerate() {
            if old != new {
                let value = self.read_location(old);
                if !new.can_store(value) {
                    return Ok(Some((index, value)));
                }
                changes.push((index, old, new, value));
            }
        }

        for &(_, old, _, _) in &changes {
            self.clear_location(old);
        }

        let counts = to.extensions();
        self.boolean_ext.resize(counts.booleans, None);
        self.primitive_ext.resize(counts.primitives, None);
        self.object_ext.resize(counts.objects, Value::NIL);

        for (_, _, new, value) in changes {
            self.write_location(new, value);
        }
        self.shape = Rc::clone(to);
        Ok(None)
    }

    /// Copy the slot values of `self` into fresh storage for `to`, which may
    /// have a different instance size. Slots past the old size read nil.
    pub fn rebuilt(&self, to: &Rc<Shape>) -> Result<SlotStorage, ObjectError> {
        let mut storage = SlotStorage::new(Rc::clone(to));
        let shared = self.inst_size().min(to.inst_size());
        for index in 0..shared {
            let value = self.read(index)?;
            if !storage.try_write(index, value)? {
                return Err(ObjectError::UnstorableValue { index, value });
            }
        }
        Ok(storage)
    }

    /// Iterate every slot value in index order.
    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.shape.locations().iter().map(|&l| self.read_location(l))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_with(values: &[Value]) -> SlotStorage {
        let mut shape = Shape::empty(values.len());
        for (i, &v) in values.iter().enumerate() {
            if !shape.can_store(i, v) {
                shape = Rc::new(shape.evolved(i, v));
            }
        }
        let mut storage = SlotStorage::new(shape);
        for (i, &v) in values.iter().enumerate() {
            assert!(storage.try_write(i, v).unwrap());
        }
        storage
    }

    #[test]
    fn unwritten_primitive_reads_nil() {
        let shape = Rc::new(Shape::empty(1).evolved(0, Value::from_i64(3)));
        let storage = SlotStorage::new(shape);
        assert_eq!(storage.read(0).unwrap(), Value::NIL);
    }

    #[test]
    fn try_write_refuses_wrong_kind() {
        let mut storage = storage_with(&[Value::from_i64(1)]);
        assert!(!storage.try_write(0, Value::TRUE).unwrap());
        assert_eq!(storage.read(0).unwrap(), Value::from_i64(1));
    }

    #[test]
    fn migrate_same_shape_is_noop() {
        let mut storage = storage_with(&[Value::from_i64(1), Value::TRUE]);
        let shape = Rc::clone(storage.shape());
        assert_eq!(storage.migrate(&shape).unwrap(), None);
        assert_eq!(storage.read(1).unwrap(), Value::TRUE);
    }

    #[test]
    fn migrate_rejects_size_change() {
        let mut storage = storage_with(&[Value::from_i64(1)]);
        let bigger = Rc::new(storage.shape().resized(2));
        assert!(matches!(
            storage.migrate(&bigger),
            Err(ObjectError::ShapeEvolution { from: 1, to: 2 })
        ));
    }

    #[test]
    fn migrate_moves_widened_slot_and_clears_old_field() {
        let mut storage = storage_with(&[Value::from_i64(5), Value::NIL]);
        let widened = Rc::new(storage.shape().evolved(0, Value::from_char('a')));
        assert_eq!(storage.migrate(&widened).unwrap(), None);
        assert_eq!(storage.read(0).unwrap(), Value::from_i64(5));

        // slot 1 now reuses the primitive field slot 0 vacated
        let reuse = Rc::new(widened.evolved(1, Value::from_i64(9)));
        assert_eq!(storage.migrate(&reuse).unwrap(), None);
        assert_eq!(storage.read(1).unwrap(), Value::NIL);
        assert!(storage.try_write(1, Value::from_i64(9)).unwrap());
        assert_eq!(storage.read(0).unwrap(), Value::from_i64(5));
        assert_eq!(storage.read(1).unwrap(), Value::from_i64(9));
    }

    #[test]
    fn extensions_grow_with_nil() {
        let objects: Vec<Value> = (0..5).map(|i| Value::from_char((b'a' + i) as char)).collect();
        let storage = storage_with(&objects);
        assert_eq!(storage.extension_lengths().objects, 2);
        let values: Vec<Value> = storage.values().collect();
        assert_eq!(values, objects);
    }
}
