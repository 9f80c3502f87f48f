mod value;
mod header;
mod shape;
mod slot;
mod class;
mod error;
pub mod objects;
mod memory;
mod visitor;

pub use value::{ObjectRef, SMALL_INTEGER_MAX, SMALL_INTEGER_MIN, Value};
pub use header::{HASH_UNINITIALIZED, Header, HeaderFlags, IDENTITY_HASH_MASK};
pub use shape::{ExtensionCounts, Field, INLINE_FIELDS, Location, LocationKind, Shape};
pub use slot::SlotStorage;
pub use class::{ClassDescriptor, ClassRef, InstanceSpec};
pub use error::ObjectError;
pub use objects::{
    ClosureObject, ContextFlags, ContextObject, HeapObject, MethodDescriptor, MethodHeader,
    ObjectBody,
};
pub use memory::ObjectMemory;
pub use visitor::{Visitable, Visitor};
