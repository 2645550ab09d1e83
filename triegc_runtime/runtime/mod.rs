pub mod alloc_error;
pub mod heap;
