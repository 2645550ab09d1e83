//! Stack scanning
//!
//! The collector finds roots by treating every address-width byte window
//! between two stack addresses as a candidate pointer. Windows start at every
//! byte offset, so pointers stored at unaligned offsets are found as well.

use core::hint::black_box;

use crate::ADDRESS_BYTES;

/// Direction the stack grows in, relative to the recorded boundary
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackDirection {
    /// Newer frames live at lower addresses than the boundary
    Down,
    /// Newer frames live at higher addresses than the boundary
    Up,
}

/// Address of a local in the calling frame.
///
/// Use this to record the far edge of the scan: call it in a frame that
/// encloses every frame whose locals should act as roots.
#[inline(always)]
pub fn stack_address() -> *const u8 {
    let marker = 0u8;
    black_box(&marker) as *const u8
}

/// Number of words written by [`spill_registers`]
#[cfg(target_arch = "x86_64")]
pub const SPILLED_REGISTERS: usize = 6;
#[cfg(target_arch = "aarch64")]
pub const SPILLED_REGISTERS: usize = 12;
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub const SPILLED_REGISTERS: usize = 1;

/// Copy the callee-saved registers into `buffer`.
///
/// A caller may hold its only copy of an address in a callee-saved register
/// across a collection. Spilling them into a buffer that lies inside the
/// scanned range makes those addresses visible to the scan.
#[inline(always)]
pub fn spill_registers(buffer: &mut [usize; SPILLED_REGISTERS]) {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::asm!(
            "mov [{0}], rbx",
            "mov [{0} + 8], rbp",
            "mov [{0} + 16], r12",
            "mov [{0} + 24], r13",
            "mov [{0} + 32], r14",
            "mov [{0} + 40], r15",
            in(reg) buffer.as_mut_ptr(),
            options(nostack, preserves_flags),
        );
    }

    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!(
            "stp x19, x20, [{0}]",
            "stp x21, x22, [{0}, #16]",
            "stp x23, x24, [{0}, #32]",
            "stp x25, x26, [{0}, #48]",
            "stp x27, x28, [{0}, #64]",
            "stp x29, x30, [{0}, #80]",
            in(reg) buffer.as_mut_ptr(),
            options(nostack, preserves_flags),
        );
    }

    // Other targets rely on the prologues of the collector's own frames
    black_box(buffer);
}

/// The bytes strictly between a near and a far stack address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanRange {
    /// First scanned address
    start: usize,
    /// One past the last scanned address
    end: usize,
    direction: StackDirection,
}

impl ScanRange {
    /// Create the range strictly between the `near` edge (the current frame)
    /// and the `far` edge (the recorded boundary).
    pub fn between(near: usize, far: usize) -> ScanRange {
        let direction = if near <= far {
            StackDirection::Down
        } else {
            StackDirection::Up
        };

        let (low, high) = if near <= far { (near, far) } else { (far, near) };
        let start = low.saturating_add(1).min(high);

        ScanRange {
            start,
            end: high,
            direction,
        }
    }

    #[inline]
    pub fn start(&self) -> usize {
        self.start
    }

    #[inline]
    pub fn end(&self) -> usize {
        self.end
    }

    #[inline]
    pub fn direction(&self) -> StackDirection {
        self.direction
    }

    /// Number of bytes in the range
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Number of windows [`ScanRange::windows`] will produce
    #[inline]
    pub fn num_windows(&self) -> usize {
        (self.len() + 1).saturating_sub(ADDRESS_BYTES)
    }

    /// Iterate over every address-width window that lies entirely inside the
    /// range, in ascending address order.
    ///
    /// # Safety
    /// Every byte of the range must be readable for the lifetime of the
    /// iterator.
    pub unsafe fn windows(&self) -> Windows {
        let mut window = [0; ADDRESS_BYTES];
        if self.num_windows() > 0 {
            for (offset, byte) in window.iter_mut().enumerate() {
                *byte = read_byte(self.start + offset);
            }
        }

        Windows {
            position: self.start,
            end: self.end,
            window,
        }
    }
}

#[inline(always)]
unsafe fn read_byte(address: usize) -> u8 {
    core::ptr::read_volatile(address as *const u8)
}

/// Rolling window over a [`ScanRange`].
///
/// Yields `(position, bytes)` where `bytes` are the `ADDRESS_BYTES` bytes
/// starting at `position`. Each byte of the range is read exactly once.
pub struct Windows {
    position: usize,
    end: usize,
    window: [u8; ADDRESS_BYTES],
}

impl Iterator for Windows {
    type Item = (usize, [u8; ADDRESS_BYTES]);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.end - self.position < ADDRESS_BYTES {
            return None;
        }

        let item = (self.position, self.window);

        let incoming = self.position + ADDRESS_BYTES;
        self.position += 1;
        if incoming < self.end {
            self.window.rotate_left(1);
            self.window[ADDRESS_BYTES - 1] = unsafe { read_byte(incoming) };
        }

        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.position + 1).saturating_sub(ADDRESS_BYTES);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Windows {}
