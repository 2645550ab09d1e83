//! Ref - bookkeeping record for one tracked allocation
//!
//! Refs are kept outside the allocation they describe, so tracked memory is
//! handed to callers untouched. The heap links all Refs into a singly linked
//! list anchored by a permanently marked sentinel.

use core::{alloc::Layout, fmt, ptr::NonNull};

use bitflags::bitflags;

/// Alignment of every tracked allocation, matching what `malloc` guarantees
pub const ALLOC_ALIGN: usize = 16;

/// Bookkeeping category of a tracked allocation.
///
/// Categories only appear in diagnostics. The collector treats every kind the
/// same way.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RefKind {
    /// A list node
    List = 0,
    /// An environment object
    EnvObject = 1,
    /// A closure
    Closure = 2,
    /// Any other value
    #[default]
    Standard = 3,
}

impl RefKind {
    /// Number of kinds
    pub const COUNT: usize = 4;

    pub const ALL: [RefKind; RefKind::COUNT] = [
        RefKind::List,
        RefKind::EnvObject,
        RefKind::Closure,
        RefKind::Standard,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            RefKind::List => "list",
            RefKind::EnvObject => "env",
            RefKind::Closure => "closure",
            RefKind::Standard => "standard",
        }
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// State bits of a Ref
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RefFlags: u8 {
        /// Reached during the current mark phase
        const MARKED = 1 << 0;
        /// The list head. Never swept.
        const SENTINEL = 1 << 1;
    }
}

/// Bookkeeping record for a single tracked allocation
pub struct Ref {
    /// Start of the tracked allocation, dangling for the sentinel
    ptr: NonNull<u8>,
    /// Layout the allocation was made with
    layout: Layout,
    kind: RefKind,
    flags: RefFlags,
    /// Next Ref in allocation order
    next: Option<NonNull<Ref>>,
}

impl Ref {
    /// Create an unmarked Ref for a live allocation
    #[inline]
    pub(crate) fn new(ptr: NonNull<u8>, layout: Layout, kind: RefKind) -> Ref {
        Ref {
            ptr,
            layout,
            kind,
            flags: RefFlags::empty(),
            next: None,
        }
    }

    /// Create the list head. It is marked from the start and stays marked.
    pub(crate) fn sentinel() -> Ref {
        Ref {
            ptr: NonNull::dangling(),
            layout: Layout::new::<()>(),
            kind: RefKind::Standard,
            flags: RefFlags::MARKED | RefFlags::SENTINEL,
            next: None,
        }
    }

    /// Get the layout to allocate `size` bytes of tracked memory with.
    ///
    /// Zero sized requests are rounded up to one byte so that every tracked
    /// allocation has its own address. Returns `None` if the rounded size
    /// overflows `isize`.
    #[inline]
    pub fn layout_for_size(size: usize) -> Option<Layout> {
        Layout::from_size_align(size.max(1), ALLOC_ALIGN).ok()
    }

    /// Pointer to the start of the tracked allocation
    #[inline]
    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Address of the tracked allocation
    #[inline]
    pub fn address(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Size of the tracked allocation in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    #[inline]
    pub fn kind(&self) -> RefKind {
        self.kind
    }

    #[inline]
    pub fn flags(&self) -> RefFlags {
        self.flags
    }

    #[inline]
    pub fn is_marked(&self) -> bool {
        self.flags.contains(RefFlags::MARKED)
    }

    #[inline]
    pub fn is_sentinel(&self) -> bool {
        self.flags.contains(RefFlags::SENTINEL)
    }

    #[inline]
    pub(crate) fn mark(&mut self) {
        self.flags.insert(RefFlags::MARKED);
    }

    /// Clear the mark bit. The sentinel stays marked.
    #[inline]
    pub(crate) fn unmark(&mut self) {
        if !self.is_sentinel() {
            self.flags.remove(RefFlags::MARKED);
        }
    }

    #[inline]
    pub(crate) fn next(&self) -> Option<NonNull<Ref>> {
        self.next
    }

    #[inline]
    pub(crate) fn set_next(&mut self, next: Option<NonNull<Ref>>) {
        self.next = next;
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sentinel() {
            return f.write_str("Ref(sentinel)");
        }

        f.debug_struct("Ref")
            .field("ptr", &self.ptr)
            .field("size", &self.size())
            .field("kind", &self.kind)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Convert an address into the trie key used to index it.
///
/// The key is the address in native byte order, which is the exact byte
/// sequence a pointer to the allocation occupies when stored in memory.
#[inline]
pub fn address_key(address: usize) -> [u8; crate::ADDRESS_BYTES] {
    address.to_ne_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_marking() {
        let layout = Layout::from_size_align(8, ALLOC_ALIGN).unwrap();
        let mut gc_ref = Ref::new(NonNull::dangling(), layout, RefKind::Closure);
        assert!(!gc_ref.is_marked());

        gc_ref.mark();
        assert!(gc_ref.is_marked());
        assert_eq!(gc_ref.flags(), RefFlags::MARKED);

        gc_ref.unmark();
        assert!(!gc_ref.is_marked());
        assert_eq!(gc_ref.kind(), RefKind::Closure);
    }

    #[test]
    fn test_sentinel_stays_marked() {
        let mut sentinel = Ref::sentinel();
        assert!(sentinel.is_sentinel());
        assert!(sentinel.is_marked());

        sentinel.unmark();
        assert!(sentinel.is_marked());
    }

    #[test]
    fn test_layout_for_size() {
        let layout = Ref::layout_for_size(0).unwrap();
        assert_eq!(layout.size(), 1);
        assert_eq!(layout.align(), ALLOC_ALIGN);

        assert_eq!(Ref::layout_for_size(100).unwrap().size(), 100);
        assert!(Ref::layout_for_size(usize::MAX).is_none());
    }

    #[test]
    fn test_address_key_matches_memory_bytes() {
        let value: usize = 0x1122_3344;
        let in_memory: [u8; crate::ADDRESS_BYTES] =
            unsafe { core::mem::transmute_copy(&value) };
        assert_eq!(address_key(value), in_memory);
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(RefKind::ALL.len(), RefKind::COUNT);
        for (index, kind) in RefKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), index);
        }
        assert_eq!(RefKind::EnvObject.name(), "env");
        assert_eq!(RefKind::default(), RefKind::Standard);
    }
}
