use object::{ObjectError, Value};
use thiserror::Error;

use crate::frame::FrameId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error(transparent)]
    Object(#[from] ObjectError),
    #[error("scheduler could not find a runnable process")]
    SchedulerStarvation,
    #[error("{class} does not understand {selector}")]
    MessageNotUnderstood { selector: String, class: String },
    #[error("cannot return {value:?}: home context is dead")]
    CannotReturn { value: Value },
    #[error("not a context: {0:?}")]
    InvalidContext(Value),
    #[error("operand stack underflow")]
    StackUnderflow,
    #[error("stale frame handle {0:?}")]
    StaleFrame(FrameId),
    #[error("primitive {0} failed")]
    PrimitiveFailed(u16),
    #[error("no executable code for {method:?}")]
    NoExecutableCode { method: Value },
    #[error("invalid settings: {0}")]
    InvalidSettings(&'static str),
}

impl VmError {
    /// Errors after which the VM cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VmError::SchedulerStarvation | VmError::Object(ObjectError::ShapeEvolution { .. })
        )
    }
}
