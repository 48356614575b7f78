//! Sources of [RegisterState] snapshots, one per kind of thread handle.

#[cfg(target_os = "macos")]
mod mach;
#[cfg(target_os = "macos")]
pub use mach::MachThread;

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
use crate::arch::ArchLayout;
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
use crate::memory::{MemoryReader, SafeMemory, StackBounds};
use crate::{Error, RegisterState, Result};

/// Produces the register snapshot a walk starts from.
///
/// The target thread should be suspended, or be the thread running the
/// provider, for the snapshot to be meaningful; providers do not suspend
/// anything themselves. A snapshot of a running thread is racy and may not
/// match its stack by the time the stack is read.
pub trait ThreadContextProvider {
    /// A non-owning reference to the thread, used for a single lookup.
    type Thread: Copy;

    /// Captures the registers of `thread`.
    ///
    /// Fails with [Error::ThreadUnavailable] when the handle is stale or
    /// invalid; no partial state is ever returned.
    fn register_state(&self, thread: Self::Thread) -> Result<RegisterState>;
}

impl<P: ThreadContextProvider + ?Sized> ThreadContextProvider for &P {
    type Thread = P::Thread;

    #[inline]
    fn register_state(&self, thread: Self::Thread) -> Result<RegisterState> {
        (**self).register_state(thread)
    }
}

/// Threads identified by the `ucontext_t` the kernel passed to a signal
/// handler running on them, e.g. the third argument of a `SA_SIGINFO` handler.
#[cfg(all(
    any(target_os = "linux", target_os = "macos"),
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
#[derive(Debug, Default, Copy, Clone)]
pub struct Ucontext;

#[cfg(all(
    any(target_os = "linux", target_os = "macos"),
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
impl ThreadContextProvider for Ucontext {
    type Thread = *mut libc::c_void;

    fn register_state(&self, ucontext: *mut libc::c_void) -> Result<RegisterState> {
        RegisterState::from_ucontext(ucontext).ok_or(Error::ThreadUnavailable)
    }
}

/// The calling thread.
///
/// The snapshot describes the caller of the function that asked for it: that
/// function's own frame is gone by the time the stack is walked, while its
/// caller's frame is still live. If that caller's frame record cannot be
/// read safely, the unstepped snapshot is returned instead.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
#[derive(Debug, Default, Copy, Clone)]
pub struct CurrentThread;

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
impl ThreadContextProvider for CurrentThread {
    type Thread = ();

    #[inline(always)]
    fn register_state(&self, _: ()) -> Result<RegisterState> {
        let registers = RegisterState::current();
        let layout = ArchLayout::native().ok_or(Error::UnsupportedArch)?;
        // The caller may be built without frame pointers, so fp is only a guess.
        let bounds = StackBounds::from_stack_pointer(registers.sp(), crate::DEFAULT_STACK_SPAN, layout);
        Ok(step_to_caller(registers, SafeMemory::new(bounds), layout))
    }
}

/// Replaces `registers` with the snapshot of its caller, taken from the frame
/// record at `registers.fp()`. When the record cannot be read, `registers` is
/// returned as it is.
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
fn step_to_caller<M: MemoryReader>(registers: RegisterState, memory: M, layout: &ArchLayout) -> RegisterState {
    let fp = registers.fp();
    let read = |slot: Option<u64>| slot.and_then(|slot| memory.read_word(slot, layout.word_size).ok());
    let return_address = read(layout.return_address_slot(fp));
    let saved_fp = read(layout.saved_fp_slot(fp));
    // The caller's sp is just past the record.
    let sp = fp.checked_add(2 * layout.word_size.bytes());
    match (return_address, saved_fp, sp) {
        (Some(return_address), Some(saved_fp), Some(sp)) => {
            RegisterState::new(return_address & layout.address_mask, saved_fp, sp)
        }
        _ => registers,
    }
}
