//! This crate captures backtraces of arbitrary threads of the current process by
//! walking their frame-pointer chains. The main purpose is to do it safely from
//! places where almost nothing is allowed: a crash handler, a profiling signal
//! handler, or a watchdog inspecting a suspended thread.
//!
//! A capture takes a register snapshot of the target thread, follows the chain of
//! saved frame pointers through reads that report bad addresses instead of
//! faulting, and writes return addresses into a buffer the caller owns. It does
//! not allocate, lock or panic, and it is bounded by the buffer's capacity.
//! Debug information is never consulted, so code built without frame pointers
//! yields short backtraces; that is an expected outcome, not an error.
//!
//! Simple usage:
//! ```
//! # #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
//! fn main() {
//!     // Do stack backtrace.
//!     let mut pcs = vec![];
//!     framewalk::trace(|pc| {
//!         pcs.push(pc);
//!         true
//!     })
//!     .unwrap();
//!
//!     // Resolve addresses into symbols and display.
//!     for pc in pcs {
//!         println!("{:#x}:", pc);
//!         backtrace::resolve(pc as _, |s| {
//!             println!("    {:?}", s.name());
//!         });
//!     }
//! }
//! # #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
//! # fn main() {}
//! ```
//!
//! Capturing another thread into a fixed buffer, from a signal handler running
//! on it:
//! ```ignore
//! extern "C" fn handler(_: libc::c_int, _: *mut libc::siginfo_t, ucontext: *mut libc::c_void) {
//!     let mut frames = [0u64; 64];
//!     let n = framewalk::capture_backtrace(&framewalk::Ucontext, ucontext, &mut frames).unwrap_or(0);
//!     report(&frames[..n]);
//! }
//! ```
//!
//! Suspending the target thread, choosing it, and symbolicating the addresses
//! are left to the caller.

macro_rules! trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "log")]
        log::trace!($($arg)*);
    };
}

macro_rules! debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "log")]
        log::debug!($($arg)*);
    };
}

pub mod arch;
mod collector;
#[cfg(all(
    target_pointer_width = "64",
    any(target_os = "linux", target_os = "macos"),
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
pub mod ffi;
mod memory;
mod registers;
mod thread;
mod walker;

pub use arch::{Arch, ArchLayout, StackGrowth, WordSize};
pub use collector::{collect, Capture};
pub use memory::{AddressRange, MemoryError, MemoryReader, SafeMemory, StackBounds};
pub use registers::RegisterState;
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
pub use thread::CurrentThread;
#[cfg(target_os = "macos")]
pub use thread::MachThread;
pub use thread::ThreadContextProvider;
#[cfg(all(
    any(target_os = "linux", target_os = "macos"),
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
pub use thread::Ucontext;
pub use walker::{FrameWalker, StopReason, Termination};

/// A result type that wraps [Error].
pub type Result<T> = std::result::Result<T, Error>;

/// Error definition.
///
/// Only failing to obtain the thread's registers is an error. Anything that
/// goes wrong while walking the stack just ends the walk early.
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("thread is unavailable")]
    ThreadUnavailable,

    #[error("no frame layout for this architecture")]
    UnsupportedArch,
}

/// Default distance from the stack pointer that frame records may lie in,
/// used when no exact stack bounds are supplied.
pub const DEFAULT_STACK_SPAN: u64 = 8 * 1024 * 1024;

/// Settings for a capture.
#[derive(Debug, Copy, Clone)]
pub struct WalkOptions {
    layout: Option<&'static ArchLayout>,
    stack_span: u64,
    bounds: Option<StackBounds>,
    link_register: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            layout: None,
            stack_span: DEFAULT_STACK_SPAN,
            bounds: None,
            link_register: true,
        }
    }
}

impl WalkOptions {
    /// Frame record layout to walk with, instead of the compiled-for architecture.
    pub fn layout(mut self, layout: &'static ArchLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// How far from the stack pointer frame records may lie, when `bounds` is unset.
    pub fn stack_span(mut self, span: u64) -> Self {
        self.stack_span = span;
        self
    }

    /// Exact bounds of the target thread's stack.
    pub fn bounds(mut self, bounds: StackBounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Whether the link register is reported after the program counter, on
    /// architectures that have one. On by default: it is the only trace of the
    /// caller while a leaf function runs, though in other functions it may
    /// repeat an address or point back into the current function.
    pub fn link_register(mut self, enabled: bool) -> Self {
        self.link_register = enabled;
        self
    }

    fn resolve_layout(&self) -> Result<&'static ArchLayout> {
        self.layout.or_else(ArchLayout::native).ok_or(Error::UnsupportedArch)
    }

    fn resolve_bounds(&self, registers: &RegisterState, layout: &ArchLayout) -> StackBounds {
        self.bounds
            .unwrap_or_else(|| StackBounds::from_stack_pointer(registers.sp(), self.stack_span, layout))
    }
}

/// `Backtracer` ties a [ThreadContextProvider] to the walk.
///
/// One capture moves through `ContextRead -> Walking -> Stopped | Truncated`.
/// When the context cannot be read the capture fails right away, before any
/// stack memory is read and without touching the output buffer.
#[derive(Debug, Default, Copy, Clone)]
pub struct Backtracer<P> {
    provider: P,
    options: WalkOptions,
}

impl<P: ThreadContextProvider> Backtracer<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            options: WalkOptions::default(),
        }
    }

    pub fn with_options(mut self, options: WalkOptions) -> Self {
        self.options = options;
        self
    }

    /// Captures the backtrace of `thread` into `output`, reading the stack
    /// through [SafeMemory].
    pub fn capture(&self, thread: P::Thread, output: &mut [u64]) -> Result<Capture> {
        let layout = self.options.resolve_layout()?;
        let registers = self.register_state(thread)?;
        let bounds = self.options.resolve_bounds(&registers, layout);
        Ok(self.walk(&registers, SafeMemory::new(bounds), layout, bounds, output))
    }

    /// Like [Backtracer::capture], but reads the stack through `memory`.
    pub fn capture_with<M: MemoryReader>(
        &self,
        thread: P::Thread,
        memory: M,
        output: &mut [u64],
    ) -> Result<Capture> {
        let layout = self.options.resolve_layout()?;
        let registers = self.register_state(thread)?;
        let bounds = self.options.resolve_bounds(&registers, layout);
        Ok(self.walk(&registers, memory, layout, bounds, output))
    }

    // Kept out of line so a snapshot of the calling thread is taken in a frame
    // of its own, one level below `capture`.
    #[inline(never)]
    fn register_state(&self, thread: P::Thread) -> Result<RegisterState> {
        self.provider.register_state(thread).map_err(|err| {
            debug!("failed to read thread context: {}", err);
            err
        })
    }

    fn walk<M: MemoryReader>(
        &self,
        registers: &RegisterState,
        memory: M,
        layout: &ArchLayout,
        bounds: StackBounds,
        output: &mut [u64],
    ) -> Capture {
        let walker = FrameWalker::new(registers, memory, layout, bounds, output.len())
            .link_register(self.options.link_register);
        collect(walker, output)
    }
}

/// Captures the backtrace of `thread` into `output` and returns the number of
/// addresses written, innermost frame first.
///
/// The capacity is `output.len()`; an empty buffer returns `Ok(0)` after the
/// context is read, without reading the stack. The thread should be suspended
/// by the caller for the duration of the call.
pub fn capture_backtrace<P: ThreadContextProvider>(
    provider: P,
    thread: P::Thread,
    output: &mut [u64],
) -> Result<usize> {
    Backtracer::new(provider).capture(thread, output).map(|c| c.len())
}

/// Inspects the current call-stack, passing all active frames into the closure
/// provided to calculate a stack trace.
///
/// The closure's return value is an indication of whether the backtrace should
/// continue. A return value of `false` will terminate the backtrace and return
/// immediately with `Ok(false)`.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[inline(never)]
pub fn trace<F>(f: F) -> Result<bool>
where
    F: FnMut(u64) -> bool,
{
    let registers = RegisterState::current();
    // The snapshot's pc lies in `trace` itself; start the report at its caller.
    trace_registers(&registers, 1, f)
}

/// Inspects the call-stack from `ucontext`, passing all active frames into the closure
/// provided to calculate a stack trace.
///
/// The closure's return value is an indication of whether the backtrace should
/// continue. A return value of `false` will terminate the backtrace and return
/// immediately with `Ok(false)`.
#[cfg(all(
    any(target_os = "linux", target_os = "macos"),
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
pub fn trace_from_ucontext<F>(ucontext: *mut libc::c_void, f: F) -> Result<bool>
where
    F: FnMut(u64) -> bool,
{
    let registers = Ucontext.register_state(ucontext)?;
    trace_registers(&registers, 0, f)
}

fn trace_registers<F>(registers: &RegisterState, skip: usize, mut f: F) -> Result<bool>
where
    F: FnMut(u64) -> bool,
{
    let options = WalkOptions::default();
    let layout = options.resolve_layout()?;
    let bounds = options.resolve_bounds(registers, layout);
    let walker = FrameWalker::new(registers, SafeMemory::new(bounds), layout, bounds, usize::MAX);
    for pc in walker.skip(skip) {
        if !f(pc) {
            return Ok(false);
        }
    }
    Ok(true)
}
