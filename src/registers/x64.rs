use super::RegisterState;

impl RegisterState {
    /// Initialize `RegisterState` with values from `ucontext`.
    #[cfg(target_os = "linux")]
    pub fn from_ucontext(ucontext: *mut libc::c_void) -> Option<Self> {
        let ucontext = ucontext as *mut libc::ucontext_t;
        if ucontext.is_null() {
            return None;
        }
        let gregs = unsafe { (*ucontext).uc_mcontext.gregs };
        Some(Self::new(
            gregs[libc::REG_RIP as usize] as _,
            gregs[libc::REG_RBP as usize] as _,
            gregs[libc::REG_RSP as usize] as _,
        ))
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
            Some(Self::new(
                (*mcontext).__ss.__rip,
                (*mcontext).__ss.__rbp,
                (*mcontext).__ss.__rsp,
            ))
        }
    }
}
