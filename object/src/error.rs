use thiserror::Error;

use crate::{InstanceSpec, ObjectRef, Value};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    #[error("shape evolution across instance sizes: {from} -> {to}")]
    ShapeEvolution { from: usize, to: usize },
    #[error("cannot instantiate objects with format {0:?}")]
    UnsupportedObjectKind(InstanceSpec),
    #[error("index {index} out of bounds for size {size}")]
    IndexOutOfBounds { index: usize, size: usize },
    #[error("invalid object reference #{}", .0.0)]
    InvalidReference(ObjectRef),
    #[error("object #{} is not indexable", .0.0)]
    NotIndexable(ObjectRef),
    #[error("value {value:?} cannot be stored at {index}")]
    UnstorableValue { index: usize, value: Value },
    #[error("expected {expected} object, found {found}")]
    WrongKind {
        expected: &'static str,
        found: &'static str,
    },
}
