//! Runtime - wraps triegc::Heap with runtime-specific functionality
//!
//! This applies the allocation failure policy, the stress test mode and the
//! diagnostic options on top of the tracked heap.

use std::{ptr::NonNull, rc::Rc};

use triegc::{CollectStats, Heap, Ref, RefKind};

use crate::common::options::Options;

use super::alloc_error::AllocResult;

#[cfg(feature = "alloc_error")]
use super::alloc_error::AllocError;

/// Runtime - owns a triegc::Heap
pub struct Runtime {
    /// The underlying tracked heap
    heap: Heap,

    options: Rc<Options>,

    #[cfg(feature = "gc_stress_test")]
    gc_stress_test: bool,
}

impl Runtime {
    /// Create a runtime whose collections scan the stack up to `stack_top`
    pub fn new(stack_top: *const u8, options: Rc<Options>) -> Runtime {
        Runtime {
            heap: Heap::new(stack_top),
            options,

            #[cfg(feature = "gc_stress_test")]
            gc_stress_test: false,
        }
    }

    pub fn options(&self) -> &Rc<Options> {
        &self.options
    }

    /// Run a full collection before every allocation
    #[cfg(feature = "gc_stress_test")]
    pub fn enable_gc_stress_test(&mut self) {
        self.gc_stress_test = true;
    }

    /// Allocate `size` bytes of tracked memory of the given kind.
    pub fn alloc(&mut self, size: usize, kind: RefKind) -> AllocResult<NonNull<u8>> {
        // Run a GC on every allocation in stress test mode
        #[cfg(feature = "gc_stress_test")]
        if self.gc_stress_test {
            self.run_gc();
        }

        match self.heap.alloc(size, kind) {
            Ok(ptr) => Ok(ptr),
            Err(error) => Self::alloc_failed(error),
        }
    }

    #[cfg(feature = "alloc_error")]
    fn alloc_failed<T>(error: triegc::AllocError) -> AllocResult<T> {
        Err(AllocError::from(error))
    }

    #[cfg(not(feature = "alloc_error"))]
    fn alloc_failed<T>(error: triegc::AllocError) -> AllocResult<T> {
        fatal_alloc_error(error)
    }

    /// Run a full garbage collection cycle
    #[inline(never)]
    pub fn run_gc(&mut self) -> CollectStats {
        let stats = self.heap.collect();

        if self.options.print_gc_stats {
            self.options
                .write_output(&format_gc_stats(self.heap.num_collections(), &stats));
        }

        if self.options.dump_heap_after_gc {
            self.dump();
        }

        stats
    }

    /// Print every tracked allocation
    pub fn dump(&self) {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = self.heap.dump(&mut out);
        self.options.write_output(&out);
    }

    pub fn find(&self, address: *const u8) -> Option<&Ref> {
        self.heap.find(address)
    }

    /// Get the underlying tracked heap
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }
}

/// Abort on an allocation failure when errors are not recoverable
#[cfg_attr(feature = "alloc_error", allow(dead_code))]
fn fatal_alloc_error(error: triegc::AllocError) -> ! {
    match error {
        triegc::AllocError::OutOfMemory(layout) => std::alloc::handle_alloc_error(layout),
        triegc::AllocError::InvalidLayout { .. } => panic!("capacity overflow"),
    }
}

/// One line summary of a collection
pub fn format_gc_stats(collection: usize, stats: &CollectStats) -> String {
    format!(
        "gc #{}: scanned {} bytes ({:?}), marked {}, freed {} objects ({} bytes), live {} objects ({} bytes)\n",
        collection,
        stats.bytes_scanned,
        stats.direction,
        stats.objects_marked,
        stats.objects_freed,
        stats.bytes_freed,
        stats.objects_live,
        stats.bytes_live,
    )
}

#[cfg(test)]
mod tests {
    use std::hint::black_box;

    use parking_lot::Mutex;
    use triegc::{stack_address, StackDirection};

    use super::*;
    use crate::common::options::OptionsBuilder;

    fn buffered_options(print_gc_stats: bool, dump_heap_after_gc: bool) -> Rc<Options> {
        Rc::new(
            OptionsBuilder::new()
                .print_gc_stats(print_gc_stats)
                .dump_heap_after_gc(dump_heap_after_gc)
                .dump_buffer(Some(Mutex::new(String::new())))
                .build(),
        )
    }

    /// Run `f` on a runtime whose stack top encloses the frame of `f`
    fn with_runtime<R>(options: Rc<Options>, f: impl FnOnce(&mut Runtime) -> R) -> R {
        let stack_top = stack_address();
        with_runtime_below(stack_top, options, f)
    }

    #[inline(never)]
    fn with_runtime_below<R>(
        stack_top: *const u8,
        options: Rc<Options>,
        f: impl FnOnce(&mut Runtime) -> R,
    ) -> R {
        let mut runtime = Runtime::new(stack_top, options);
        let result = f(&mut runtime);
        black_box(&mut runtime);
        result
    }

    #[inline(never)]
    fn alloc_hidden(runtime: &mut Runtime, count: usize) {
        for _ in 0..count {
            runtime.alloc(16, RefKind::List).unwrap();
        }
    }

    #[inline(never)]
    fn scrub_stack() {
        let mut buffer = [0u8; 32 * 1024];
        black_box(&mut buffer);
    }

    #[test]
    fn test_print_gc_stats() {
        let options = buffered_options(true, false);
        with_runtime(options.clone(), |runtime| {
            alloc_hidden(runtime, 3);
            scrub_stack();
            runtime.run_gc();
            runtime.run_gc();
        });

        let output = options.dump_buffer().unwrap().clone();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("gc #1: scanned "));
        assert!(lines[0].contains("freed 3 objects (48 bytes)"));
        assert!(lines[1].starts_with("gc #2: "));
        assert!(lines[1].contains("live 0 objects"));
    }

    #[test]
    fn test_no_output_without_options() {
        let options = buffered_options(false, false);
        with_runtime(options.clone(), |runtime| {
            alloc_hidden(runtime, 2);
            runtime.run_gc();
        });

        assert!(options.dump_buffer().unwrap().is_empty());
    }

    #[test]
    fn test_dump() {
        let options = buffered_options(false, false);
        let mut runtime = Runtime::new(stack_address(), options.clone());
        let ptr = runtime.alloc(24, RefKind::Closure).unwrap();
        runtime.alloc(8, RefKind::EnvObject).unwrap();

        runtime.dump();

        let output = options.dump_buffer().unwrap().clone();
        assert!(output.contains(&format!("{:p}", ptr)));
        assert!(output.contains("closure: 1 objects, 24 bytes"));
        assert!(output.contains("env: 1 objects, 8 bytes"));
        assert!(output.contains("total: 2 objects, 32 bytes"));
        assert_eq!(runtime.find(ptr.as_ptr()).unwrap().kind(), RefKind::Closure);
    }

    #[test]
    fn test_dump_after_gc() {
        let options = buffered_options(false, true);
        with_runtime(options.clone(), |runtime| {
            alloc_hidden(runtime, 1);
            scrub_stack();
            runtime.run_gc();
        });

        let output = options.dump_buffer().unwrap().clone();
        assert_eq!(output.trim_end(), "total: 0 objects, 0 bytes, 1 trie nodes");
    }

    #[test]
    fn test_format_gc_stats() {
        let stats = CollectStats {
            bytes_scanned: 512,
            windows_probed: 505,
            objects_marked: 1,
            objects_freed: 2,
            bytes_freed: 32,
            objects_live: 1,
            bytes_live: 16,
            direction: StackDirection::Down,
        };

        assert_eq!(
            format_gc_stats(4, &stats),
            "gc #4: scanned 512 bytes (Down), marked 1, freed 2 objects (32 bytes), live 1 objects (16 bytes)\n"
        );
    }

    #[cfg(feature = "alloc_error")]
    #[test]
    fn test_alloc_error_is_returned() {
        use crate::runtime::alloc_error::{AllocError, AllocErrorKind};

        let mut runtime = Runtime::new(stack_address(), Rc::new(Options::default()));
        let error = runtime.alloc(usize::MAX, RefKind::Standard).unwrap_err();
        assert_eq!(error.kind(), AllocErrorKind::InvalidSize);
        assert_eq!(error, AllocError::layout(usize::MAX));
    }

    #[cfg(not(feature = "alloc_error"))]
    #[test]
    #[should_panic(expected = "capacity overflow")]
    fn test_alloc_error_is_fatal() {
        let mut runtime = Runtime::new(stack_address(), Rc::new(Options::default()));
        let _ = runtime.alloc(usize::MAX, RefKind::Standard);
    }

    // Runs whichever allocation error feature the workspace enables
    #[test]
    #[should_panic(expected = "capacity overflow")]
    fn test_invalid_size_is_fatal_without_recovery() {
        fatal_alloc_error(triegc::AllocError::InvalidLayout { size: usize::MAX });
    }

    #[cfg(feature = "gc_stress_test")]
    #[test]
    fn test_gc_stress_test_collects_on_alloc() {
        let options = buffered_options(true, false);
        with_runtime(options.clone(), |runtime| {
            runtime.enable_gc_stress_test();
            alloc_hidden(runtime, 3);
            assert_eq!(runtime.heap().num_collections(), 3);
        });

        assert_eq!(options.dump_buffer().unwrap().lines().count(), 3);
    }
}
