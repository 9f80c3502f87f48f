use bitflags::bitflags;

bitflags! {
    /// Bookkeeping flags stored in every object header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        /// The object must not be moved by a host collector.
        const PINNED = 1 << 0;
        /// Marking flag, compared against the memory's current pass flag.
        const MARKED = 1 << 1;
    }
}

/// Generate a new hash if the stored hash is 0.
pub const HASH_UNINITIALIZED: u32 = 0;
pub const IDENTITY_HASH_MASK: u32 = 0x40_0000 - 1;

/// The header shared by every heap object.
///
/// ```text
/// hash:  22 bit identity hash, 0 until first requested
/// flags: Pinned | Marked
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Header {
    hash: u32,
    flags: HeaderFlags,
}

impl Header {
    pub fn new(marking_flag: bool) -> Self {
        let mut flags = HeaderFlags::empty();
        flags.set(HeaderFlags::MARKED, marking_flag);
        Self {
            hash: HASH_UNINITIALIZED,
            flags,
        }
    }

    // ── hash ───────────────────────────────────────────────────────

    #[inline(always)]
    pub fn hash(&self) -> u32 {
        self.hash
    }

    #[inline(always)]
    pub fn needs_hash(&self) -> bool {
        self.hash == HASH_UNINITIALIZED
    }

    #[inline(always)]
    pub fn set_hash(&mut self, hash: u32) {
        self.hash = hash & IDENTITY_HASH_MASK;
    }

    // ── flags ──────────────────────────────────────────────────────

    #[inline(always)]
    pub fn flags(&self) -> HeaderFlags {
        self.flags
    }

    #[inline(always)]
    pub fn has_flag(&self, flag: HeaderFlags) -> bool {
        self.flags.contains(flag)
    }

    #[inline(always)]
    pub fn is_pinned(&self) -> bool {
        self.has_flag(HeaderFlags::PINNED)
    }

    #[inline(always)]
    pub fn set_pinned(&mut self, pinned: bool) {
        self.flags.set(HeaderFlags::PINNED, pinned);
    }

    #[inline(always)]
    pub fn marking_flag(&self) -> bool {
        self.has_flag(HeaderFlags::MARKED)
    }

    #[inline(always)]
    pub fn is_marked(&self, current: bool) -> bool {
        self.marking_flag() == current
    }

    /// Returns `false` if already marked in this pass, `true` otherwise.
    #[inline(always)]
    pub fn try_to_mark(&mut self, current: bool) -> bool {
        if self.marking_flag() == current {
            false
        } else {
            self.flags.set(HeaderFlags::MARKED, current);
            true
        }
    }

    /// Swap everything but the identity hash with `other`.
    pub fn exchange_flags(&mut self, other: &mut Header) {
        std::mem::swap(&mut self.flags, &mut other.flags);
    }
}

impl core::fmt::Debug for Header {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Header")
            .field("hash", &self.hash)
            .field("flags", &self.flags)
            .finish()
    }
}
