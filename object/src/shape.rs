//! Per-class field layouts.
//!
//! A [`Shape`] maps every instance variable index to a [`Location`]. A
//! location is classified by the kind of value it can hold and lives either
//! in one of [`INLINE_FIELDS`] inline fields of that kind or in the kind's
//! extension vector.
//!
//! ```text
//!  index:      0          1           2          3
//!  location:   Prim(i0)   Obj(i0)     Bool(i0)   Prim(e0)
//!              │          │           │          └── primitive_ext[0]
//!              │          │           └── booleans[0]
//!              │          └── objects[0]
//!              └── primitives[0]
//! ```
//!
//! Locations only ever widen: `Uninitialized` becomes `Boolean`, `Primitive`
//! or `Object`, and `Boolean`/`Primitive` become `Object`. A shape is owned
//! by one class at a time; once the class installs a successor the old shape
//! is marked invalid and lives on only through instances still using it.
use std::cell::Cell;
use std::rc::Rc;

use crate::Value;

/// Number of inline fields per location kind.
pub const INLINE_FIELDS: usize = 3;

/// Physical place a location's value is stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Inline(u8),
    Extension(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationKind {
    Uninitialized,
    Boolean,
    Primitive,
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    /// Never written. Reads answer nil and only nil can be stored.
    Uninitialized,
    Boolean(Field),
    Primitive(Field),
    Object(Field),
}

impl Location {
    #[inline]
    pub fn kind(self) -> LocationKind {
        match self {
            Location::Uninitialized => LocationKind::Uninitialized,
            Location::Boolean(_) => LocationKind::Boolean,
            Location::Primitive(_) => LocationKind::Primitive,
            Location::Object(_) => LocationKind::Object,
        }
    }

    #[inline]
    pub fn field(self) -> Option<Field> {
        match self {
            Location::Uninitialized => None,
            Location::Boolean(f) | Location::Primitive(f) | Location::Object(f) => Some(f),
        }
    }

    /// nil fits every location: boolean and primitive fields hold it as
    /// "not set".
    #[inline]
    pub fn can_store(self, value: Value) -> bool {
        match self {
            Location::Uninitialized => value.is_nil(),
            Location::Boolean(_) => value.is_nil() || value.is_bool(),
            Location::Primitive(_) => value.is_nil() || value.is_small_integer(),
            Location::Object(_) => true,
        }
    }
}

impl LocationKind {
    /// The narrowest kind able to hold `value`, given the kind currently
    /// assigned to a slot.
    fn widen_for(self, value: Value) -> LocationKind {
        match self {
            LocationKind::Uninitialized if value.is_bool() => LocationKind::Boolean,
            LocationKind::Uninitialized if value.is_small_integer() => LocationKind::Primitive,
            LocationKind::Uninitialized if value.is_nil() => LocationKind::Uninitialized,
            _ => LocationKind::Object,
        }
    }
}

const _: () = assert!(INLINE_FIELDS <= u8::MAX as usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtensionCounts {
    pub booleans: usize,
    pub primitives: usize,
    pub objects: usize,
}

/// Field layout of all instances of one class.
#[derive(Debug)]
pub struct Shape {
    locations: Box<[Location]>,
    extensions: ExtensionCounts,
    valid: Cell<bool>,
}

impl Shape {
    /// A shape where every slot is still uninitialized.
    pub fn empty(inst_size: usize) -> Rc<Shape> {
        Rc::new(Shape {
            locations: vec![Location::Uninitialized; inst_size].into_boxed_slice(),
            extensions: ExtensionCounts::default(),
            valid: Cell::new(true),
        })
    }

    fn from_locations(locations: Vec<Location>) -> Shape {
        let extensions = ExtensionCounts {
            booleans: extension_len(&locations, LocationKind::Boolean),
            primitives: extension_len(&locations, LocationKind::Primitive),
            objects: extension_len(&locations, LocationKind::Object),
        };
        Shape {
            locations: locations.into_boxed_slice(),
            extensions,
            valid: Cell::new(true),
        }
    }

    #[inline]
    pub fn inst_size(&self) -> usize {
        self.locations.len()
    }

    #[inline]
    pub fn location(&self, index: usize) -> Option<Location> {
        self.locations.get(index).copied()
    }

    #[inline]
    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    #[inline]
    pub fn extensions(&self) -> ExtensionCounts {
        self.extensions
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid.get()
    }

    #[inline]
    pub fn invalidate(&self) {
        self.valid.set(false);
    }

    /// Whether `value` can be written at `index` without a layout change.
    #[inline]
    pub fn can_store(&self, index: usize, value: Value) -> bool {
        self.location(index).is_some_and(|l| l.can_store(value))
    }

    /// Derive the successor layout in which `index` can hold `value`. Every
    /// other location is kept as is.
    ///
    /// # Panics
    /// `index` must be below [`Shape::inst_size`].
    pub fn evolved(&self, index: usize, value: Value) -> Shape {
        let mut locations = self.locations.to_vec();
        let current = locations[index];
        let kind = current.kind().widen_for(value);
        locations[index] = Location::Uninitialized;
        locations[index] = match kind {
            LocationKind::Uninitialized => Location::Uninitialized,
            LocationKind::Boolean => Location::Boolean(free_field(&locations, kind)),
            LocationKind::Primitive => Location::Primitive(free_field(&locations, kind)),
            LocationKind::Object => Location::Object(free_field(&locations, kind)),
        };
        Shape::from_locations(locations)
    }

    /// Same locations for the first `inst_size` slots, new slots
    /// uninitialized.
    pub fn resized(&self, inst_size: usize) -> Shape {
        let mut locations: Vec<Location> = self.locations.iter().copied().take(inst_size).collect();
        locations.resize(inst_size, Location::Uninitialized);
        Shape::from_locations(locations)
    }
}

/// Lowest inline field of `kind` not used by `locations`, else the lowest
/// free extension index.
fn free_field(locations: &[Location], kind: LocationKind) -> Field {
    let used: Vec<Field> = locations
        .iter()
        .filter(|l| l.kind() == kind)
        .filter_map(|l| l.field())
        .collect();
    if let Some(i) = (0..INLINE_FIELDS).find(|i| !used.contains(&Field::Inline(*i as u8))) {
        return Field::Inline(i as u8);
    }
    let mut e = 0u32;
    while used.contains(&Field::Extension(e)) {
        e += 1;
    }
    Field::Extension(e)
}

fn extension_len(locations: &[Location], kind: LocationKind) -> usize {
    locations
        .iter()
        .filter(|l| l.kind() == kind)
        .filter_map(|l| match l.field() {
            Some(Field::Extension(e)) => Some(e as usize + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0)
}
