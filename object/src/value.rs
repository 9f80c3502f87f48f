/// Tag constants.
const FIXNUM_MASK: u64 = 0b1;
const TAG_MASK: u64 = 0b11;
const REF_TAG: u64 = 0b01;
const IMMEDIATE_TAG: u64 = 0b11;

const IMMEDIATE_SHIFT: u64 = 4;
const IMMEDIATE_KIND_MASK: u64 = 0b1100;
const NIL_KIND: u64 = 0b0000;
const BOOL_KIND: u64 = 0b0100;
const CHAR_KIND: u64 = 0b1000;

pub const SMALL_INTEGER_MIN: i64 = -(1i64 << 62);
pub const SMALL_INTEGER_MAX: i64 = (1i64 << 62) - 1;

/// Index of a heap object inside an [`ObjectMemory`](crate::ObjectMemory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ObjectRef(pub u32);

impl ObjectRef {
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A tagged 64-bit value.
///
/// Encoding:
/// - **SmallInteger**: `...XXXXX0` 63-bit signed integer (low bit 0).
/// - **Reference**:    `...XXXX01` arena index shifted left by 2.
/// - **Immediate**:    `...KK11`   nil, booleans and characters, payload
///   above bit 4.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Value(u64);

impl Value {
    pub const NIL: Value = Value(NIL_KIND | IMMEDIATE_TAG);
    pub const FALSE: Value = Value(BOOL_KIND | IMMEDIATE_TAG);
    pub const TRUE: Value = Value((1 << IMMEDIATE_SHIFT) | BOOL_KIND | IMMEDIATE_TAG);

    #[inline(always)]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline(always)]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    // ── SmallInteger ───────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_small_integer(self) -> bool {
        self.0 & FIXNUM_MASK == 0
    }

    #[inline(always)]
    pub const fn fits_small_integer(n: i64) -> bool {
        n >= SMALL_INTEGER_MIN && n <= SMALL_INTEGER_MAX
    }

    /// Encodes `n` as a small integer, or `None` when it needs more than 63
    /// bits.
    #[inline(always)]
    pub const fn try_from_i64(n: i64) -> Option<Self> {
        if Self::fits_small_integer(n) {
            Some(Self((n << 1) as u64))
        } else {
            None
        }
    }

    #[inline(always)]
    pub fn from_i64(n: i64) -> Self {
        debug_assert!(Self::fits_small_integer(n), "small integer overflow: {n}");
        Self((n << 1) as u64)
    }

    #[inline(always)]
    pub const fn as_i64(self) -> Option<i64> {
        if self.is_small_integer() {
            Some((self.0 as i64) >> 1)
        } else {
            None
        }
    }

    // ── Reference ──────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_ref(self) -> bool {
        self.0 & TAG_MASK == REF_TAG
    }

    #[inline(always)]
    pub const fn from_ref(r: ObjectRef) -> Self {
        Self(((r.0 as u64) << 2) | REF_TAG)
    }

    #[inline(always)]
    pub const fn as_ref(self) -> Option<ObjectRef> {
        if self.is_ref() {
            Some(ObjectRef((self.0 >> 2) as u32))
        } else {
            None
        }
    }

    // ── Immediates ─────────────────────────────────────────────────

    #[inline(always)]
    pub const fn is_immediate(self) -> bool {
        self.0 & TAG_MASK == IMMEDIATE_TAG
    }

    #[inline(always)]
    pub const fn is_nil(self) -> bool {
        self.0 == Self::NIL.0
    }

    #[inline(always)]
    pub const fn from_bool(b: bool) -> Self {
        if b { Self::TRUE } else { Self::FALSE }
    }

    #[inline(always)]
    pub const fn is_bool(self) -> bool {
        self.is_immediate() && self.0 & IMMEDIATE_KIND_MASK == BOOL_KIND
    }

    #[inline(always)]
    pub const fn as_bool(self) -> Option<bool> {
        if self.is_bool() {
            Some(self.0 == Self::TRUE.0)
        } else {
            None
        }
    }

    #[inline(always)]
    pub const fn from_char(c: char) -> Self {
        Self(((c as u64) << IMMEDIATE_SHIFT) | CHAR_KIND | IMMEDIATE_TAG)
    }

    #[inline(always)]
    pub const fn is_char(self) -> bool {
        self.is_immediate() && self.0 & IMMEDIATE_KIND_MASK == CHAR_KIND
    }

    #[inline(always)]
    pub fn as_char(self) -> Option<char> {
        if self.is_char() {
            char::from_u32((self.0 >> IMMEDIATE_SHIFT) as u32)
        } else {
            None
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::NIL
    }
}

impl From<ObjectRef> for Value {
    fn from(r: ObjectRef) -> Self {
        Self::from_ref(r)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::from_bool(b)
    }
}

impl core::fmt::Debug for Value {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Some(n) = self.as_i64() {
            write!(f, "SmallInteger({n})")
        } else if let Some(r) = self.as_ref() {
            write!(f, "Ref(#{})", r.0)
        } else if self.is_nil() {
            f.write_str("nil")
        } else if let Some(b) = self.as_bool() {
            write!(f, "{b}")
        } else if let Some(c) = self.as_char() {
            write!(f, "${c}")
        } else {
            write!(f, "Immediate(0x{:016x})", self.0)
        }
    }
}
