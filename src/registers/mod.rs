#[cfg(target_arch = "x86_64")]
mod x64;

#[cfg(target_arch = "aarch64")]
mod aarch64;

/// `RegisterState` is the point-in-time register snapshot a walk starts from.
///
/// Only the registers a frame-pointer walk needs are kept: the program counter,
/// the frame pointer, the stack pointer and, on architectures that have one, the
/// link register. The snapshot is captured once and never re-read from the live
/// thread, so every field is read-only after construction.
///
/// On supported hosts we can capture the calling thread:
/// ```
/// # #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
/// # {
/// use framewalk::RegisterState;
///
/// let registers = RegisterState::current();
/// assert_ne!(registers.pc(), 0);
/// # }
/// ```
///
/// But more suitable for this crate usage scenario is to use an existing
/// `ucontext`, which the kernel hands to a signal handler:
/// ```ignore
/// extern "C" fn signal_handler(_: libc::c_int, _: *mut libc::siginfo_t, ucontext: *mut libc::c_void) {
///     let registers = RegisterState::from_ucontext(ucontext).unwrap();
///     assert_ne!(registers.pc(), 0);
/// }
/// ```
///
/// Synthetic snapshots are built with [RegisterState::new], which is how the
/// walker is exercised against fabricated stacks.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RegisterState {
    pc: u64,
    fp: u64,
    sp: u64,
    lr: u64,
}

impl RegisterState {
    /// Creates a snapshot from raw register values, with no link register.
    #[inline]
    pub const fn new(pc: u64, fp: u64, sp: u64) -> Self {
        Self { pc, fp, sp, lr: 0 }
    }

    /// Returns the same snapshot with the link register set.
    #[inline]
    pub const fn with_link_register(self, lr: u64) -> Self {
        Self { lr, ..self }
    }

    /// Captures the registers of the calling function.
    ///
    /// The program counter points into the caller of `current`, and the frame
    /// pointer is that caller's frame record.
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    #[inline(always)]
    pub fn current() -> Self {
        let mut registers = Self::default();
        unsafe {
            framewalk_init_registers(&mut registers as _);
        }
        registers
    }

    /// Get the value of the PC (Program Counter) register.
    #[inline]
    pub fn pc(&self) -> u64 {
        self.pc
    }

    /// Get the value of the FP (Frame Pointer) register.
    #[inline]
    pub fn fp(&self) -> u64 {
        self.fp
    }

    /// Get the value of the SP (Stack Pointer) register.
    #[inline]
    pub fn sp(&self) -> u64 {
        self.sp
    }

    /// Get the value of the LR (Link Register), zero when unknown or absent.
    #[inline]
    pub fn lr(&self) -> u64 {
        self.lr
    }
}

#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
extern "C" {
    /// Save the registers of the calling function into `RegisterState`.
    ///
    /// The implementation of this function is linked to the assembly code of
    /// different platforms: `src/registers/x64.S`, `src/registers/aarch64.S`.
    pub fn framewalk_init_registers(registers: *mut RegisterState);
}
