//! Heap - tracked allocator with conservative mark-sweep collection
//!
//! Design:
//! - Uses alloc::alloc for memory allocation
//! - Indexes every tracked allocation in a trie keyed by its address bytes
//! - Maintains a sentinel-anchored linked list of Refs for sweeping
//! - Collection is explicit: nothing is reclaimed until `collect()` is called
//!
//! Roots are found by spilling the callee-saved registers onto the stack, then
//! scanning the stack between the collector's frame and the boundary recorded
//! when the heap was created. Any byte window in that
//! range equal to a tracked address keeps the allocation alive.

use alloc::boxed::Box;
use core::{alloc::Layout, fmt, hint::black_box, marker::PhantomData, ptr::NonNull};

use crate::{
    gc_ref::{address_key, Ref, RefKind},
    stack::{spill_registers, stack_address, ScanRange, StackDirection, SPILLED_REGISTERS},
    trie::Trie,
    ADDRESS_BYTES,
};

/// Result type for allocations
pub type AllocResult<T> = Result<T, AllocError>;

/// Allocation error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// The requested size cannot be described by a `Layout`
    InvalidLayout { size: usize },
    /// The global allocator returned null
    OutOfMemory(Layout),
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::InvalidLayout { size } => {
                write!(f, "cannot allocate {} bytes: size too large", size)
            }
            AllocError::OutOfMemory(layout) => {
                write!(f, "out of memory allocating {} bytes", layout.size())
            }
        }
    }
}

/// Error returned when registering externally allocated memory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterError {
    /// The address is already tracked by this heap
    AlreadyTracked,
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterError::AlreadyTracked => f.write_str("address is already tracked"),
        }
    }
}

/// Statistics for a single collection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollectStats {
    /// Number of stack bytes in the scanned range
    pub bytes_scanned: usize,
    /// Number of windows probed against the trie
    pub windows_probed: usize,
    /// Number of Refs marked live by the scan
    pub objects_marked: usize,
    pub objects_freed: usize,
    pub bytes_freed: usize,
    /// Objects still tracked after the sweep
    pub objects_live: usize,
    /// Bytes still tracked after the sweep
    pub bytes_live: usize,
    pub direction: StackDirection,
}

/// The tracked heap
pub struct Heap {
    /// Address bytes of every tracked allocation, mapped to its Ref
    trie: Trie<NonNull<Ref>, ADDRESS_BYTES>,

    /// Head of the Ref list. Always marked, never swept.
    sentinel: Ref,

    /// Last Ref in the list, `None` when only the sentinel is present
    tail: Option<NonNull<Ref>>,

    /// Far edge of the stack scan
    stack_top: usize,

    /// Number of bytes currently allocated
    bytes_allocated: usize,

    /// Number of objects currently allocated
    num_objects: usize,

    /// Number of completed collections
    num_collections: usize,

    /// A heap scans the stack of the thread it was created on
    _not_send: PhantomData<*mut ()>,
}

impl Heap {
    /// Create a new heap that scans up to `stack_top`.
    ///
    /// `stack_top` is the far edge of every stack scan. It should be the
    /// address of a local in a frame that encloses all frames holding tracked
    /// addresses, e.g. taken with [`stack_address`] near the start of `main`.
    pub fn new(stack_top: *const u8) -> Heap {
        Heap {
            trie: Trie::new(),
            sentinel: Ref::sentinel(),
            tail: None,
            stack_top: stack_top as usize,
            bytes_allocated: 0,
            num_objects: 0,
            num_collections: 0,
            _not_send: PhantomData,
        }
    }

    /// Recorded far edge of the stack scan
    #[inline]
    pub fn stack_top(&self) -> *const u8 {
        self.stack_top as *const u8
    }

    /// Get bytes currently allocated
    #[inline]
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Get number of objects currently allocated
    #[inline]
    pub fn num_objects(&self) -> usize {
        self.num_objects
    }

    #[inline]
    pub fn num_collections(&self) -> usize {
        self.num_collections
    }

    /// Number of Refs in the list, including the sentinel
    #[inline]
    pub fn list_len(&self) -> usize {
        self.num_objects + 1
    }

    /// Allocate `size` bytes of tracked memory.
    ///
    /// Returns a pointer to uninitialized memory aligned to
    /// [`ALLOC_ALIGN`](crate::ALLOC_ALIGN). The memory stays allocated until a
    /// collection no longer finds its address on the stack.
    pub fn alloc(&mut self, size: usize, kind: RefKind) -> AllocResult<NonNull<u8>> {
        let layout = Ref::layout_for_size(size).ok_or(AllocError::InvalidLayout { size })?;

        let ptr = unsafe { alloc::alloc::alloc(layout) };
        let ptr = NonNull::new(ptr).ok_or(AllocError::OutOfMemory(layout))?;

        self.track(ptr, layout, kind);

        Ok(ptr)
    }

    /// Start tracking memory allocated outside of the heap.
    ///
    /// # Safety
    /// `ptr` must have been allocated by the global allocator with `layout`,
    /// and the caller must not free it afterwards. The heap frees it once a
    /// collection no longer finds its address.
    pub unsafe fn register(
        &mut self,
        ptr: NonNull<u8>,
        layout: Layout,
        kind: RefKind,
    ) -> Result<(), RegisterError> {
        if self.contains(ptr.as_ptr()) {
            return Err(RegisterError::AlreadyTracked);
        }

        self.track(ptr, layout, kind);

        Ok(())
    }

    /// Stop tracking an allocation without freeing it.
    ///
    /// Returns the layout the memory was allocated with. The caller takes over
    /// ownership and must free it with that layout.
    pub fn untrack(&mut self, ptr: *const u8) -> Option<Layout> {
        let ref_ptr = self.trie.remove(&address_key(ptr as usize))?;

        unsafe {
            self.unlink(ref_ptr);

            let gc_ref = Box::from_raw(ref_ptr.as_ptr());
            self.bytes_allocated -= gc_ref.size();
            self.num_objects -= 1;

            Some(gc_ref.layout())
        }
    }

    /// Create a Ref for an allocation, index it and append it to the list
    fn track(&mut self, ptr: NonNull<u8>, layout: Layout, kind: RefKind) {
        let gc_ref = Box::new(Ref::new(ptr, layout, kind));
        let ref_ptr = NonNull::from(Box::leak(gc_ref));

        let old_ref = self.trie.insert(&address_key(ptr.as_ptr() as usize), ref_ptr);
        debug_assert!(old_ref.is_none(), "address tracked twice");

        // Link onto the end of the list
        match self.tail {
            Some(tail) => unsafe { (*tail.as_ptr()).set_next(Some(ref_ptr)) },
            None => self.sentinel.set_next(Some(ref_ptr)),
        }
        self.tail = Some(ref_ptr);

        self.bytes_allocated += layout.size();
        self.num_objects += 1;
    }

    /// Remove a Ref from the list. Does not free the Ref.
    unsafe fn unlink(&mut self, target: NonNull<Ref>) {
        let mut prev: Option<NonNull<Ref>> = None;
        let mut current = self.sentinel.next();

        while let Some(ref_ptr) = current {
            let next = (*ref_ptr.as_ptr()).next();
            if ref_ptr == target {
                match prev {
                    Some(prev) => (*prev.as_ptr()).set_next(next),
                    None => self.sentinel.set_next(next),
                }
                if self.tail == Some(target) {
                    self.tail = prev;
                }
                return;
            }

            prev = Some(ref_ptr);
            current = next;
        }
    }

    /// Look up the Ref tracking the allocation that starts at `address`
    #[inline]
    pub fn find(&self, address: *const u8) -> Option<&Ref> {
        let ref_ptr = self.trie.get(&address_key(address as usize))?;
        Some(unsafe { ref_ptr.as_ref() })
    }

    /// Check whether `address` is the start of a tracked allocation
    #[inline]
    pub fn contains(&self, address: *const u8) -> bool {
        self.trie.contains_key(&address_key(address as usize))
    }

    /// Iterate over the tracked Refs in allocation order
    pub fn refs(&self) -> Refs<'_> {
        Refs {
            current: self.sentinel.next(),
            _heap: PhantomData,
        }
    }

    // ========================================================================
    // Collection
    // ========================================================================

    /// Run a full collection.
    ///
    /// Marks every Ref whose address appears in a byte window between this
    /// call's frame and the recorded stack top, then frees every unmarked
    /// allocation.
    #[inline(never)]
    pub fn collect(&mut self) -> CollectStats {
        let mut registers = [0usize; SPILLED_REGISTERS];
        spill_registers(&mut registers);

        let stats = self.collect_stack();
        black_box(&registers);

        stats
    }

    /// Collect from a frame below the one holding the spilled registers, so
    /// that they fall inside the scanned range.
    #[inline(never)]
    fn collect_stack(&mut self) -> CollectStats {
        let near = stack_address() as usize;
        let range = ScanRange::between(near, self.stack_top);

        unsafe { self.collect_range(range) }
    }

    /// Run a full collection that treats only the bytes of `range` as roots.
    ///
    /// For runtimes that keep their roots in a buffer of their own rather than
    /// on the native stack.
    ///
    /// # Safety
    /// Every byte of `range` must be readable.
    pub unsafe fn collect_range(&mut self, range: ScanRange) -> CollectStats {
        let objects_marked = self.mark_range(range);
        let (objects_freed, bytes_freed) = self.sweep();

        self.num_collections += 1;

        CollectStats {
            bytes_scanned: range.len(),
            windows_probed: range.num_windows(),
            objects_marked,
            objects_freed,
            bytes_freed,
            objects_live: self.num_objects,
            bytes_live: self.bytes_allocated,
            direction: range.direction(),
        }
    }

    /// Mark every Ref whose address appears in a window of `range`.
    ///
    /// Returns the number of newly marked Refs.
    ///
    /// # Safety
    /// Every byte of `range` must be readable.
    pub(crate) unsafe fn mark_range(&mut self, range: ScanRange) -> usize {
        let mut objects_marked = 0;

        for (_, window) in range.windows() {
            if let Some(ref_ptr) = self.trie.get(&window) {
                let gc_ref = &mut *ref_ptr.as_ptr();
                if !gc_ref.is_marked() {
                    gc_ref.mark();
                    objects_marked += 1;
                }
            }
        }

        objects_marked
    }

    /// Free every unmarked allocation and clear the marks of the rest.
    ///
    /// Returns the number of objects and bytes freed.
    pub(crate) fn sweep(&mut self) -> (usize, usize) {
        let mut objects_freed = 0;
        let mut bytes_freed = 0;

        let mut prev: Option<NonNull<Ref>> = None;
        let mut current = self.sentinel.next();

        while let Some(ref_ptr) = current {
            unsafe {
                let gc_ref = &mut *ref_ptr.as_ptr();
                let next = gc_ref.next();

                if gc_ref.is_marked() {
                    // Live object - reset for next collection
                    gc_ref.unmark();
                    prev = Some(ref_ptr);
                } else {
                    // Dead object - unlink, unindex and free
                    match prev {
                        Some(p) => (*p.as_ptr()).set_next(next),
                        None => self.sentinel.set_next(next),
                    }

                    let removed = self.trie.remove(&address_key(gc_ref.address()));
                    debug_assert_eq!(removed, Some(ref_ptr));

                    bytes_freed += gc_ref.size();
                    objects_freed += 1;

                    alloc::alloc::dealloc(gc_ref.ptr().as_ptr(), gc_ref.layout());
                    drop(Box::from_raw(ref_ptr.as_ptr()));
                }

                current = next;
            }
        }

        self.tail = prev;
        self.bytes_allocated -= bytes_freed;
        self.num_objects -= objects_freed;

        (objects_freed, bytes_freed)
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    /// Write a listing of every tracked allocation in address-key order,
    /// followed by per-kind totals.
    pub fn dump(&self, out: &mut impl fmt::Write) -> fmt::Result {
        let mut counts = [0usize; RefKind::COUNT];
        let mut sizes = [0usize; RefKind::COUNT];

        for (_, ref_ptr) in self.trie.iter() {
            let gc_ref = unsafe { ref_ptr.as_ref() };
            writeln!(
                out,
                "{:p} {:>8} bytes {}",
                gc_ref.ptr(),
                gc_ref.size(),
                gc_ref.kind()
            )?;

            counts[gc_ref.kind().index()] += 1;
            sizes[gc_ref.kind().index()] += gc_ref.size();
        }

        for kind in RefKind::ALL {
            if counts[kind.index()] > 0 {
                writeln!(
                    out,
                    "{}: {} objects, {} bytes",
                    kind,
                    counts[kind.index()],
                    sizes[kind.index()]
                )?;
            }
        }

        writeln!(
            out,
            "total: {} objects, {} bytes, {} trie nodes",
            self.num_objects,
            self.bytes_allocated,
            self.trie.num_nodes()
        )
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut current = self.sentinel.next();
        while let Some(ref_ptr) = current {
            unsafe {
                let gc_ref = Box::from_raw(ref_ptr.as_ptr());
                current = gc_ref.next();
                alloc::alloc::dealloc(gc_ref.ptr().as_ptr(), gc_ref.layout());
            }
        }

        self.sentinel.set_next(None);
        self.tail = None;
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("stack_top", &self.stack_top())
            .field("num_objects", &self.num_objects)
            .field("bytes_allocated", &self.bytes_allocated)
            .field("num_collections", &self.num_collections)
            .finish()
    }
}

/// Iterator over the tracked Refs of a [`Heap`] in allocation order
pub struct Refs<'a> {
    current: Option<NonNull<Ref>>,
    _heap: PhantomData<&'a Heap>,
}

impl<'a> Iterator for Refs<'a> {
    type Item = &'a Ref;

    fn next(&mut self) -> Option<&'a Ref> {
        let ref_ptr = self.current?;
        let gc_ref = unsafe { &*ref_ptr.as_ptr() };
        self.current = gc_ref.next();
        Some(gc_ref)
    }
}
