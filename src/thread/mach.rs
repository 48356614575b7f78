#![allow(non_camel_case_types)]

use super::ThreadContextProvider;
use crate::{Error, RegisterState, Result};

type mach_port_t = libc::c_uint;
type kern_return_t = libc::c_int;
type thread_state_flavor_t = libc::c_int;
type mach_msg_type_number_t = libc::c_uint;

const KERN_SUCCESS: kern_return_t = 0;

extern "C" {
    fn thread_get_state(
        target_act: mach_port_t,
        flavor: thread_state_flavor_t,
        old_state: *mut libc::c_uint,
        old_state_count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;
}

#[cfg(target_arch = "x86_64")]
mod state {
    pub const FLAVOR: libc::c_int = 4; // x86_THREAD_STATE64

    #[repr(C)]
    #[derive(Default)]
    pub struct ThreadState {
        pub rax: u64,
        pub rbx: u64,
        pub rcx: u64,
        pub rdx: u64,
        pub rdi: u64,
        pub rsi: u64,
        pub rbp: u64,
        pub rsp: u64,
        pub r: [u64; 8], // r8 ~ r15
        pub rip: u64,
        pub rflags: u64,
        pub cs: u64,
        pub fs: u64,
        pub gs: u64,
    }

    impl ThreadState {
        pub fn registers(&self) -> crate::RegisterState {
            crate::RegisterState::new(self.rip, self.rbp, self.rsp)
        }
    }
}

#[cfg(target_arch = "aarch64")]
mod state {
    use crate::arch::{Arch, ArchLayout};

    pub const FLAVOR: libc::c_int = 6; // ARM_THREAD_STATE64

    #[repr(C)]
    #[derive(Default)]
    pub struct ThreadState {
        pub x: [u64; 29], // x0 ~ x28
        pub fp: u64,
        pub lr: u64,
        pub sp: u64,
        pub pc: u64,
        pub cpsr: u32,
        pub flags: u32,
    }

    impl ThreadState {
        pub fn registers(&self) -> crate::RegisterState {
            // arm64e signs these registers; keep only the address bits.
            let mask = ArchLayout::for_arch(Arch::Aarch64).address_mask;
            crate::RegisterState::new(self.pc & mask, self.fp & mask, self.sp)
                .with_link_register(self.lr & mask)
        }
    }
}

/// Threads identified by a Mach thread port of the current task, e.g. from
/// `task_threads` or `pthread_mach_thread_np`.
///
/// The thread should be stopped with `thread_suspend` before the capture and
/// resumed afterwards; neither happens here.
#[derive(Debug, Default, Copy, Clone)]
pub struct MachThread;

impl ThreadContextProvider for MachThread {
    type Thread = mach_port_t;

    fn register_state(&self, thread: mach_port_t) -> Result<RegisterState> {
        let mut state = state::ThreadState::default();
        let mut count = (std::mem::size_of::<state::ThreadState>() / std::mem::size_of::<libc::c_uint>())
            as mach_msg_type_number_t;
        let kr = unsafe {
            thread_get_state(
                thread,
                state::FLAVOR,
                &mut state as *mut state::ThreadState as *mut libc::c_uint,
                &mut count,
            )
        };
        if kr != KERN_SUCCESS {
            return Err(Error::ThreadUnavailable);
        }
        Ok(state.registers())
    }
}
