//! C ABI for crash handlers written in other languages.
//!
//! Both functions write up to `max_symbols` return addresses into `buffer`,
//! innermost first, and return how many were written. [FRAMEWALK_ERROR] is
//! returned when the thread cannot be read or the arguments are invalid; the
//! buffer is untouched in that case.

use crate::{Backtracer, ThreadContextProvider, Ucontext};
use std::os::raw::{c_int, c_void};

/// Returned instead of a frame count when no capture was made.
pub const FRAMEWALK_ERROR: c_int = -1;

unsafe fn capture<P: ThreadContextProvider>(
    provider: P,
    thread: P::Thread,
    buffer: *mut *mut c_void,
    max_symbols: c_int,
) -> c_int {
    if max_symbols < 0 || (buffer.is_null() && max_symbols > 0) {
        return FRAMEWALK_ERROR;
    }
    let output: &mut [u64] = if max_symbols == 0 {
        &mut []
    } else {
        // Pointers are 64-bit wide wherever this module is built.
        std::slice::from_raw_parts_mut(buffer as *mut u64, max_symbols as usize)
    };
    match Backtracer::new(provider).capture(thread, output) {
        Ok(capture) => capture.len() as c_int,
        Err(_) => FRAMEWALK_ERROR,
    }
}

/// Backtrace of the thread interrupted by a signal, from the `ucontext_t`
/// passed to its `SA_SIGINFO` handler.
///
/// # Safety
///
/// `buffer` must be valid for writes of `max_symbols` pointers, and
/// `ucontext` must be null or point to a `ucontext_t`.
#[no_mangle]
pub unsafe extern "C" fn framewalk_backtrace_ucontext(
    ucontext: *mut c_void,
    buffer: *mut *mut c_void,
    max_symbols: c_int,
) -> c_int {
    capture(Ucontext, ucontext, buffer, max_symbols)
}

/// Backtrace of a Mach thread of the current task, which the caller should
/// have suspended.
///
/// # Safety
///
/// `buffer` must be valid for writes of `max_symbols` pointers.
#[cfg(target_os = "macos")]
#[no_mangle]
pub unsafe extern "C" fn framewalk_backtrace_mach(
    thread: libc::c_uint,
    buffer: *mut *mut c_void,
    max_symbols: c_int,
) -> c_int {
    capture(crate::MachThread, thread, buffer, max_symbols)
}
