use super::RegisterState;

// x29 is the frame pointer in AAPCS64.
#[cfg(target_os = "linux")]
const FP_INDEX: usize = 29;
#[cfg(target_os = "linux")]
const LR_INDEX: usize = 30;

impl RegisterState {
    /// Initialize `RegisterState` with values from `ucontext`.
    #[cfg(target_os = "linux")]
    pub fn from_ucontext(ucontext: *mut libc::c_void) -> Option<Self> {
        let ucontext = ucontext as *mut libc::ucontext_t;
        if ucontext.is_null() {
            return None;
        }
        let mcontext = unsafe { &(*ucontext).uc_mcontext };
        Some(
            Self::new(mcontext.pc, mcontext.regs[FP_INDEX], mcontext.sp)
                .with_link_register(mcontext.regs[LR_INDEX]),
        )
    }

    /// Initialize `RegisterState` with values from `ucontext`.
    #[cfg(target_os = "macos")]
    pub fn from_ucontext(ucontext: *mut libc::c_void) -> Option<Self> {
        let ucontext = ucontext as *mut libc::ucontext_t;
        if ucontext.is_null() {
            return None;
        }
        unsafe {
            let mcontext = (*ucontext).uc_mcontext;
            if mcontext.is_null() {
                return None;
            }
            Some(
                Self::new((*mcontext).__ss.__pc, (*mcontext).__ss.__fp, (*mcontext).__ss.__sp)
                    .with_link_register((*mcontext).__ss.__lr),
            )
        }
    }
}
