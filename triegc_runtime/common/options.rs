use parking_lot::{Mutex, MutexGuard};

/// Options passed to a runtime.
pub struct Options {
    /// Print a summary line after every collection
    pub print_gc_stats: bool,

    /// Print the tracked heap after every collection
    pub dump_heap_after_gc: bool,

    /// Buffer to write all dumped output into instead of stdout
    pub dump_buffer: Option<Mutex<String>>,
}

impl Options {
    pub fn dump_buffer(&self) -> Option<MutexGuard<'_, String>> {
        self.dump_buffer.as_ref().map(|buffer| buffer.lock())
    }

    /// Write diagnostic output to the dump buffer if there is one, otherwise
    /// to stdout.
    pub fn write_output(&self, text: &str) {
        match self.dump_buffer() {
            Some(mut buffer) => buffer.push_str(text),
            None => print!("{}", text),
        }
    }
}

impl Default for Options {
    /// Create a new options struct with default values.
    fn default() -> Self {
        OptionsBuilder::new().build()
    }
}

pub struct OptionsBuilder(Options);

impl OptionsBuilder {
    /// Create new options with default values.
    pub fn new() -> Self {
        Self(Options {
            print_gc_stats: false,
            dump_heap_after_gc: false,
            dump_buffer: None,
        })
    }

    /// Return the options that have been built, consuming the builder.
    pub fn build(self) -> Options {
        self.0
    }

    pub fn print_gc_stats(mut self, print_gc_stats: bool) -> Self {
        self.0.print_gc_stats = print_gc_stats;
        self
    }

    pub fn dump_heap_after_gc(mut self, dump_heap_after_gc: bool) -> Self {
        self.0.dump_heap_after_gc = dump_heap_after_gc;
        self
    }

    pub fn dump_buffer(mut self, dump_buffer: Option<Mutex<String>>) -> Self {
        self.0.dump_buffer = dump_buffer;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = Options::default();
        assert!(!options.print_gc_stats);
        assert!(!options.dump_heap_after_gc);
        assert!(options.dump_buffer().is_none());
    }

    #[test]
    fn test_write_output_to_buffer() {
        let options = OptionsBuilder::new()
            .print_gc_stats(true)
            .dump_buffer(Some(Mutex::new(String::new())))
            .build();

        options.write_output("first\n");
        options.write_output("second\n");

        assert!(options.print_gc_stats);
        assert_eq!(options.dump_buffer().unwrap().as_str(), "first\nsecond\n");
    }
}
