//! Virtual contexts.
//!
//! A freshly activated context lives in a [`FrameArena`] slot and is
//! addressed by a generation-checked [`FrameId`]. Materializing it moves the
//! record into the object memory; the slot is left holding only the heap
//! object's reference, a lookup key so that handles taken earlier still
//! resolve. The slot never owns the heap context, and is released when the
//! heap context terminates.
//!
//! ```text
//!   Live { frame }  --materialize-->  Materialized { context }
//!        |                                   |
//!        +------------ release --------------+-->  Free
//! ```
use std::collections::HashMap;

use object::{ContextObject, ObjectRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    index: u32,
    generation: u32,
}

/// Any context: a live frame or a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextRef {
    Virtual(FrameId),
    Heap(ObjectRef),
}

impl From<ObjectRef> for ContextRef {
    fn from(object: ObjectRef) -> Self {
        ContextRef::Heap(object)
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    /// `context.sender` is unused while the frame is virtual.
    pub context: ContextObject,
    pub sender: Option<ContextRef>,
}

#[derive(Debug)]
enum Slot {
    Free { generation: u32, next_free: Option<u32> },
    Live { generation: u32, frame: Frame },
    Materialized { generation: u32, context: ObjectRef },
}

impl Slot {
    fn generation(&self) -> u32 {
        match *self {
            Slot::Free { generation, .. }
            | Slot::Live { generation, .. }
            | Slot::Materialized { generation, .. } => generation,
        }
    }
}

/// What a [`FrameId`] currently designates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLookup {
    Live,
    Materialized(ObjectRef),
}

#[derive(Debug)]
pub struct FrameArena {
    slots: Vec<Slot>,
    free: Option<u32>,
    live: usize,
    escaped: HashMap<ObjectRef, FrameId>,
}

impl FrameArena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: None,
            live: 0,
            escaped: HashMap::new(),
        }
    }

    pub fn push(&mut self, frame: Frame) -> FrameId {
        self.live += 1;
        let reusable = self.free.and_then(|index| match self.slots.get(index as usize) {
            Some(&Slot::Free {
                generation,
                next_free,
            }) => Some((index, generation, next_free)),
            _ => None,
        });
        if let Some((index, generation, next_free)) = reusable {
            self.slots[index as usize] = Slot::Live { generation, frame };
            self.free = next_free;
            return FrameId { index, generation };
        }
        self.free = None;
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Live { generation: 0, frame });
        FrameId { index, generation: 0 }
    }

    fn slot(&self, id: FrameId) -> Option<&Slot> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation() == id.generation)
    }

    pub fn lookup(&self, id: FrameId) -> Option<FrameLookup> {
        match self.slot(id)? {
            Slot::Free { .. } => None,
            Slot::Live { .. } => Some(FrameLookup::Live),
            Slot::Materialized { context, .. } => Some(FrameLookup::Materialized(*context)),
        }
    }

    pub fn frame(&self, id: FrameId) -> Option<&Frame> {
        match self.slot(id)? {
            Slot::Live { frame, .. } => Some(frame),
            _ => None,
        }
    }

    pub fn frame_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        match self.slots.get_mut(id.index as usize)? {
            Slot::Live { generation, frame } if *generation == id.generation => Some(frame),
            _ => None,
        }
    }

    /// Take the frame out of a live slot, leaving the heap reference behind.
    pub fn convert(&mut self, id: FrameId, context: ObjectRef) -> Option<Frame> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if !matches!(slot, Slot::Live { generation, .. } if *generation == id.generation) {
            return None;
        }
        let old = std::mem::replace(
            slot,
            Slot::Materialized {
                generation: id.generation,
                context,
            },
        );
        self.escaped.insert(context, id);
        match old {
            Slot::Live { frame, .. } => Some(frame),
            _ => None,
        }
    }

    /// Free the slot. Every outstanding handle to it becomes stale.
    pub fn release(&mut self, id: FrameId) -> bool {
        let Some(slot) = self.slots.get_mut(id.index as usize) else {
            return false;
        };
        if matches!(slot, Slot::Free { .. }) || slot.generation() != id.generation {
            return false;
        }
        if let Slot::Materialized { context, .. } = *slot {
            self.escaped.remove(&context);
        }
        *slot = Slot::Free {
            generation: id.generation.wrapping_add(1),
            next_free: self.free,
        };
        self.free = Some(id.index);
        self.live -= 1;
        true
    }

    /// Free the slot left behind by materializing `context`, if any.
    pub fn release_context(&mut self, context: ObjectRef) -> bool {
        match self.escaped.get(&context).copied() {
            Some(id) => self.release(id),
            None => false,
        }
    }

    /// Occupied slots, live or materialized.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
