//! triegc runtime
//!
//! Embedding layer over the `triegc` collector: runtime options, the
//! allocation failure policy and diagnostic output.

pub mod common;
pub mod runtime;

pub use common::options::{Options, OptionsBuilder};
pub use runtime::{
    alloc_error::{AllocError, AllocErrorKind, AllocResult},
    heap::{format_gc_stats, Runtime},
};
pub use triegc::{stack_address, CollectStats, Ref, RefKind};
