use clap::{Parser, ValueEnum};

use std::{hint::black_box, rc::Rc};

use triegc_runtime::{stack_address, AllocResult, OptionsBuilder, RefKind, Runtime};

/// Largest number of objects that can be kept alive per round
const MAX_ROOTS: usize = 64;

/// Raw command line arguments.
#[derive(Parser)]
#[command(about = "Allocate tracked objects and reclaim them with a conservative stack scan")]
pub struct Args {
    /// Number of objects to allocate per round
    #[arg(long, default_value_t = 16)]
    pub objects: usize,

    /// Number of objects per round kept reachable from the stack (at most 64)
    #[arg(long, default_value_t = 4)]
    pub keep: usize,

    /// Size of each object in bytes
    #[arg(long, default_value_t = 32)]
    pub size: usize,

    /// Bookkeeping kind of the allocated objects
    #[arg(long, value_enum, default_value_t = KindArg::Standard)]
    pub kind: KindArg,

    /// Number of allocate and collect rounds
    #[arg(long, default_value_t = 1)]
    pub rounds: usize,

    /// Print statistics after every collection
    #[arg(long, default_value_t = false)]
    pub print_gc_stats: bool,

    /// Print the tracked heap before and after every collection
    #[arg(long, default_value_t = false)]
    pub dump: bool,

    /// Do not use colors when printing to terminal. Otherwise use colors if supported.
    #[arg(long, default_value_t = false)]
    pub no_color: bool,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum KindArg {
    List,
    Env,
    Closure,
    Standard,
}

impl From<KindArg> for RefKind {
    fn from(kind: KindArg) -> RefKind {
        match kind {
            KindArg::List => RefKind::List,
            KindArg::Env => RefKind::EnvObject,
            KindArg::Closure => RefKind::Closure,
            KindArg::Standard => RefKind::Standard,
        }
    }
}

trait OptionsBuilderExt {
    fn new_from_args(args: &Args) -> Self;
}

impl OptionsBuilderExt for OptionsBuilder {
    /// Create new options from command line arguments.
    fn new_from_args(args: &Args) -> Self {
        OptionsBuilder::new()
            .print_gc_stats(args.print_gc_stats)
            .dump_heap_after_gc(args.dump)
    }
}

pub fn print_error_message_and_exit(message: &str) -> ! {
    eprintln!("{message}");
    std::process::exit(1);
}

fn use_colors(args: &Args) -> bool {
    !args.no_color && supports_color::on(supports_color::Stream::Stdout).is_some()
}

fn print_heading(colors: bool, heading: &str) {
    if colors {
        println!("\x1b[1;36m== {heading} ==\x1b[0m");
    } else {
        println!("== {heading} ==");
    }
}

/// Allocate one round of objects, storing the first `roots.len()` addresses
/// into `roots`
#[inline(never)]
fn allocate_round(runtime: &mut Runtime, args: &Args, roots: &mut [usize]) -> AllocResult<()> {
    for index in 0..args.objects {
        let ptr = runtime.alloc(args.size, args.kind.into())?;
        unsafe { ptr.as_ptr().write_bytes(0, args.size) };

        if let Some(slot) = roots.get_mut(index) {
            *slot = ptr.as_ptr() as usize;
        }
    }

    Ok(())
}

/// Runs below the frame that recorded the stack top, so `roots` is scanned
#[inline(never)]
fn run(args: &Args, stack_top: *const u8) -> AllocResult<()> {
    let colors = use_colors(args);
    let mut runtime = Runtime::new(stack_top, Rc::new(OptionsBuilder::new_from_args(args).build()));

    #[cfg(feature = "gc_stress_test")]
    runtime.enable_gc_stress_test();

    let mut roots = [0usize; MAX_ROOTS];
    let keep = args.keep.min(MAX_ROOTS).min(args.objects);

    for round in 1..=args.rounds {
        print_heading(colors, &format!("round {round}"));

        // New roots replace the previous round's, which become garbage
        allocate_round(&mut runtime, args, &mut roots[..keep])?;
        black_box(&mut roots);

        if args.dump {
            print_heading(colors, "before collection");
            runtime.dump();
        }

        if args.dump {
            print_heading(colors, "after collection");
        }

        // Prints statistics and the heap dump as configured
        let stats = runtime.run_gc();
        black_box(&roots);

        println!(
            "freed {} objects, {} still tracked",
            stats.objects_freed, stats.objects_live
        );
    }

    Ok(())
}

fn main() {
    let args = Args::parse();
    let stack_top = stack_address();

    if let Err(err) = run(&args, stack_top) {
        print_error_message_and_exit(&err.to_string());
    }
}
