use bitflags::bitflags;

use crate::{ClassRef, Header, ObjectError, SlotStorage, Value};

// ── Heap object ────────────────────────────────────────────────────

/// One object in the memory: common header, class and per-kind payload.
#[derive(Debug)]
pub struct HeapObject {
    pub header: Header,
    pub class: ClassRef,
    pub body: ObjectBody,
}

/// Per-kind payload. Kind specific behavior (`at`, `put`, `size`) dispatches
/// over this enum.
#[derive(Debug)]
pub enum ObjectBody {
    Empty,
    Pointers(SlotStorage),
    Variable {
        fields: SlotStorage,
        elements: Vec<Value>,
    },
    Weak(Vec<Value>),
    Bytes(Vec<u8>),
    Words(Vec<u32>),
    Method(MethodDescriptor),
    Context(ContextObject),
    Closure(ClosureObject),
}

impl ObjectBody {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ObjectBody::Empty => "empty",
            ObjectBody::Pointers(_) => "pointers",
            ObjectBody::Variable { .. } => "variable pointers",
            ObjectBody::Weak(_) => "weak",
            ObjectBody::Bytes(_) => "bytes",
            ObjectBody::Words(_) => "words",
            ObjectBody::Method(_) => "compiled method",
            ObjectBody::Context(_) => "context",
            ObjectBody::Closure(_) => "closure",
        }
    }

    /// Named instance variable storage, if the kind has a shape.
    pub fn fields(&self) -> Option<&SlotStorage> {
        match self {
            ObjectBody::Pointers(fields) | ObjectBody::Variable { fields, .. } => Some(fields),
            _ => None,
        }
    }

    pub fn fields_mut(&mut self) -> Option<&mut SlotStorage> {
        match self {
            ObjectBody::Pointers(fields) | ObjectBody::Variable { fields, .. } => Some(fields),
            _ => None,
        }
    }

    pub fn as_context(&self) -> Option<&ContextObject> {
        match self {
            ObjectBody::Context(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub fn as_context_mut(&mut self) -> Option<&mut ContextObject> {
        match self {
            ObjectBody::Context(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub fn as_method(&self) -> Option<&MethodDescriptor> {
        match self {
            ObjectBody::Method(method) => Some(method),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&ClosureObject> {
        match self {
            ObjectBody::Closure(closure) => Some(closure),
            _ => None,
        }
    }

    /// Number of slots reachable through `at`/`put`: named fields first,
    /// then indexable elements.
    pub fn size(&self) -> usize {
        match self {
            ObjectBody::Empty => 0,
            ObjectBody::Pointers(fields) => fields.inst_size(),
            ObjectBody::Variable { fields, elements } => fields.inst_size() + elements.len(),
            ObjectBody::Weak(elements) => elements.len(),
            ObjectBody::Bytes(bytes) => bytes.len(),
            ObjectBody::Words(words) => words.len(),
            ObjectBody::Method(method) => method.literals.len(),
            ObjectBody::Context(ctx) => context_fields::INST_SIZE + ctx.size(),
            ObjectBody::Closure(closure) => closure_fields::INST_SIZE + closure.copied.len(),
        }
    }

    pub fn at(&self, index: usize) -> Result<Value, ObjectError> {
        let out_of_bounds = ObjectError::IndexOutOfBounds {
            index,
            size: self.size(),
        };
        let value = match self {
            ObjectBody::Empty => None,
            ObjectBody::Pointers(fields) => return fields.read(index),
            ObjectBody::Variable { fields, elements } => {
                let named = fields.inst_size();
                if index < named {
                    return fields.read(index);
                }
                elements.get(index - named).copied()
            }
            ObjectBody::Weak(elements) => elements.get(index).copied(),
            ObjectBody::Bytes(bytes) => bytes.get(index).map(|&b| Value::from_i64(b as i64)),
            ObjectBody::Words(words) => words.get(index).map(|&w| Value::from_i64(w as i64)),
            ObjectBody::Method(method) => method.literals.get(index).copied(),
            ObjectBody::Context(ctx) => ctx.field(index),
            ObjectBody::Closure(closure) => closure.field(index),
        };
        value.ok_or(out_of_bounds)
    }

    /// Store without changing any layout. Answers `Ok(false)` when a named
    /// field's current shape cannot hold `value`; the caller evolves the
    /// shape and retries.
    pub fn put(&mut self, index: usize, value: Value) -> Result<bool, ObjectError> {
        let size = self.size();
        let out_of_bounds = ObjectError::IndexOutOfBounds { index, size };
        let unstorable = ObjectError::UnstorableValue { index, value };
        match self {
            ObjectBody::Empty => Err(out_of_bounds),
            ObjectBody::Pointers(fields) => fields.try_write(index, value),
            ObjectBody::Variable { fields, elements } => {
                let named = fields.inst_size();
                if index < named {
                    return fields.try_write(index, value);
                }
                let slot = elements.get_mut(index - named).ok_or(out_of_bounds)?;
                *slot = value;
                Ok(true)
            }
            ObjectBody::Weak(elements) => {
                *elements.get_mut(index).ok_or(out_of_bounds)? = value;
                Ok(true)
            }
            ObjectBody::Bytes(bytes) => {
                let slot = bytes.get_mut(index).ok_or(out_of_bounds)?;
                let byte = value
                    .as_i64()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or(unstorable)?;
                *slot = byte;
                Ok(true)
            }
            ObjectBody::Words(words) => {
                let slot = words.get_mut(index).ok_or(out_of_bounds)?;
                let word = value
                    .as_i64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or(unstorable)?;
                *slot = word;
                Ok(true)
            }
            ObjectBody::Method(method) => {
                *method.literals.get_mut(index).ok_or(out_of_bounds)? = value;
                Ok(true)
            }
            ObjectBody::Context(ctx) => {
                if index >= size {
                    return Err(out_of_bounds);
                }
                if !ctx.set_field(index, value) {
                    return Err(unstorable);
                }
                Ok(true)
            }
            ObjectBody::Closure(closure) => {
                if index >= size {
                    return Err(out_of_bounds);
                }
                if !closure.set_field(index, value) {
                    return Err(unstorable);
                }
                Ok(true)
            }
        }
    }
}

// ── CompiledMethod ─────────────────────────────────────────────────

pub const SMALL_FRAME_SIZE: usize = 16;
pub const LARGE_FRAME_SIZE: usize = 56;

/// Header fields as decoded by the method compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodHeader {
    pub num_args: u8,
    pub num_temps: u8,
    pub num_literals: u16,
    pub primitive: Option<u16>,
    pub large_frame: bool,
}

#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub header: MethodHeader,
    pub literals: Vec<Value>,
    pub bytecode: Vec<u8>,
    /// Selector symbol, nil for anonymous code.
    pub selector: Value,
    pub holder: Option<ClassRef>,
}

impl MethodDescriptor {
    pub fn new(header: MethodHeader, literals: Vec<Value>, bytecode: Vec<u8>) -> Self {
        Self {
            header,
            literals,
            bytecode,
            selector: Value::NIL,
            holder: None,
        }
    }

    #[inline]
    pub fn num_args(&self) -> usize {
        self.header.num_args as usize
    }

    /// Arguments plus temporaries.
    #[inline]
    pub fn num_temps(&self) -> usize {
        self.header.num_temps as usize
    }

    #[inline]
    pub fn primitive(&self) -> Option<u16> {
        self.header.primitive
    }

    /// Number of stack slots a context for this method provides.
    pub fn frame_size(&self) -> usize {
        let base = if self.header.large_frame {
            LARGE_FRAME_SIZE
        } else {
            SMALL_FRAME_SIZE
        };
        base.max(self.num_temps())
    }
}

// ── Closure ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ClosureObject {
    /// Context the closure was created in.
    pub outer_context: Value,
    /// Compiled code of the block.
    pub method: Value,
    pub receiver: Value,
    pub start_pc: usize,
    pub num_args: u8,
    pub copied: Vec<Value>,
}

/// Named fields of a closure, in `at:` order. Copied values follow.
pub mod closure_fields {
    pub const OUTER_CONTEXT: usize = 0;
    pub const METHOD: usize = 1;
    pub const NUM_ARGS: usize = 2;
    pub const RECEIVER: usize = 3;
    pub const INST_SIZE: usize = 4;
}

impl ClosureObject {
    pub fn field(&self, index: usize) -> Option<Value> {
        use closure_fields::*;
        match index {
            OUTER_CONTEXT => Some(self.outer_context),
            METHOD => Some(self.method),
            NUM_ARGS => Some(Value::from_i64(self.num_args as i64)),
            RECEIVER => Some(self.receiver),
            _ => self.copied.get(index - INST_SIZE).copied(),
        }
    }

    pub fn set_field(&mut self, index: usize, value: Value) -> bool {
        use closure_fields::*;
        match index {
            OUTER_CONTEXT => self.outer_context = value,
            METHOD => self.method = value,
            NUM_ARGS => match value.as_i64().and_then(|n| u8::try_from(n).ok()) {
                Some(n) => self.num_args = n,
                None => return false,
            },
            RECEIVER => self.receiver = value,
            _ => match self.copied.get_mut(index - INST_SIZE) {
                Some(slot) => *slot = value,
                None => return false,
            },
        }
        true
    }
}

// ── Context ────────────────────────────────────────────────────────

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ContextFlags: u8 {
        /// Captured by a closure, stored into an object or walked.
        const ESCAPED = 1 << 0;
        /// Unwound past or explicitly terminated; can be read, never resumed.
        const TERMINATED = 1 << 1;
    }
}

/// Named fields of a heap context, in `at:` order.
pub mod context_fields {
    pub const SENDER: usize = 0;
    pub const PC: usize = 1;
    pub const STACK_POINTER: usize = 2;
    pub const METHOD: usize = 3;
    pub const CLOSURE: usize = 4;
    pub const RECEIVER: usize = 5;
    pub const INST_SIZE: usize = 6;
}

/// A reified activation record.
///
/// `stack` holds arguments, temporaries and operands; it is sized to the
/// method's frame and `sp` is the number of live entries.
#[derive(Debug, Clone)]
pub struct ContextObject {
    pub sender: Value,
    /// `None` once the context has returned or was terminated.
    pub pc: Option<usize>,
    pub method: Value,
    pub closure: Value,
    pub receiver: Value,
    pub stack: Vec<Value>,
    pub sp: usize,
    pub flags: ContextFlags,
}

impl ContextObject {
    pub fn new(method: Value, receiver: Value, frame_size: usize) -> Self {
        Self {
            sender: Value::NIL,
            pc: Some(0),
            method,
            closure: Value::NIL,
            receiver,
            stack: vec![Value::NIL; frame_size],
            sp: 0,
            flags: ContextFlags::empty(),
        }
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.flags.contains(ContextFlags::TERMINATED)
    }

    #[inline]
    pub fn has_escaped(&self) -> bool {
        self.flags.contains(ContextFlags::ESCAPED)
    }

    /// Mark dead: no pc, no sender.
    pub fn terminate(&mut self) {
        self.flags.insert(ContextFlags::TERMINATED);
        self.pc = None;
        self.sender = Value::NIL;
    }

    pub fn push(&mut self, value: Value) {
        if self.sp < self.stack.len() {
            self.stack[self.sp] = value;
        } else {
            self.stack.push(value);
        }
        self.sp += 1;
    }

    pub fn pop(&mut self) -> Option<Value> {
        if self.sp == 0 {
            return None;
        }
        self.sp -= 1;
        Some(std::mem::replace(&mut self.stack[self.sp], Value::NIL))
    }

    pub fn top(&self) -> Option<Value> {
        self.sp.checked_sub(1).map(|i| self.stack[i])
    }

    /// Set the stack pointer, clearing slots that die. Answers `false` and
    /// leaves the context alone when `sp` is beyond the frame.
    pub fn set_stack_pointer(&mut self, sp: usize) -> bool {
        if sp > self.stack.len() {
            return false;
        }
        for slot in self.stack.iter_mut().take(self.sp).skip(sp) {
            *slot = Value::NIL;
        }
        self.sp = sp;
        true
    }

    /// Number of indexable slots.
    #[inline]
    pub fn size(&self) -> usize {
        self.stack.len()
    }

    /// Read a named field or stack slot in `at:` order.
    pub fn field(&self, index: usize) -> Option<Value> {
        use context_fields::*;
        match index {
            SENDER => Some(self.sender),
            PC => Some(self.pc.map_or(Value::NIL, |pc| Value::from_i64(pc as i64))),
            STACK_POINTER => Some(Value::from_i64(self.sp as i64)),
            METHOD => Some(self.method),
            CLOSURE => Some(self.closure),
            RECEIVER => Some(self.receiver),
            _ => self.stack.get(index - INST_SIZE).copied(),
        }
    }

    /// Write a named field or stack slot in `at:put:` order. Answers `false`
    /// when the index is out of range or the value does not fit the field.
    pub fn set_field(&mut self, index: usize, value: Value) -> bool {
        use context_fields::*;
        match index {
            SENDER => {
                if !(value.is_nil() || value.is_ref()) {
                    return false;
                }
                self.sender = value;
            }
            PC => match value.as_i64() {
                Some(pc) if pc >= 0 => self.pc = Some(pc as usize),
                _ if value.is_nil() => self.pc = None,
                _ => return false,
            },
            STACK_POINTER => match value.as_i64() {
                Some(sp) if sp >= 0 => return self.set_stack_pointer(sp as usize),
                _ => return false,
            },
            METHOD => self.method = value,
            CLOSURE => self.closure = value,
            RECEIVER => self.receiver = value,
            _ => match self.stack.get_mut(index - INST_SIZE) {
                Some(slot) => *slot = value,
                None => return false,
            },
        }
        true
    }
}
