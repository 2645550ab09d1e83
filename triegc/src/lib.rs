//! triegc - conservative mark-sweep collector over a trie index
//!
//! Tracked allocations are indexed in a trie keyed by the bytes of their own
//! address. A collection scans the stack between the current frame and a
//! recorded boundary, probing the trie with every address-width byte window,
//! and frees every tracked allocation that was not found.
//!
//! Key types:
//! - `Trie<V, N>`: fixed-length byte key to value map
//! - `Ref`: bookkeeping record for one tracked allocation
//! - `Heap`: the tracked heap, provides `alloc` and `collect`
//! - `ScanRange`: the stack bytes inspected by a collection

#![no_std]
extern crate alloc;

mod gc_ref;
mod heap;
mod stack;
mod trie;

pub use gc_ref::{address_key, Ref, RefFlags, RefKind, ALLOC_ALIGN};
pub use heap::{AllocError, AllocResult, CollectStats, Heap, Refs, RegisterError};
pub use stack::{
    spill_registers, stack_address, ScanRange, StackDirection, Windows, SPILLED_REGISTERS,
};
pub use trie::{Iter, Trie};

/// Width of an address in bytes, and the key length of the heap's trie
pub const ADDRESS_BYTES: usize = core::mem::size_of::<usize>();
