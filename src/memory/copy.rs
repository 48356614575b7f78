//! OS primitives that copy memory and report bad addresses instead of faulting.

pub enum CopyError {
    /// Some byte of the source is not mapped readable.
    Fault,
    /// The primitive is missing or refused; the address was never looked at.
    #[cfg_attr(target_os = "macos", allow(dead_code))]
    Unsupported,
}

/// Copy `buffer.len()` bytes from `address` in the current process.
#[cfg(target_os = "linux")]
pub fn read_process_memory(address: u64, buffer: &mut [u8]) -> Result<(), CopyError> {
    let local = libc::iovec {
        iov_base: buffer.as_mut_ptr() as _,
        iov_len: buffer.len(),
    };
    let remote = libc::iovec {
        iov_base: address as _,
        iov_len: buffer.len(),
    };
    loop {
        let size = unsafe { libc::process_vm_readv(libc::getpid(), &local, 1, &remote, 1, 0) };
        if size == buffer.len() as isize {
            return Ok(());
        }
        if size != -1 {
            // A partial copy means the word straddles an unmapped page.
            return Err(CopyError::Fault);
        }
        match super::errno() {
            libc::EINTR => continue,
            libc::ENOSYS | libc::EPERM => return Err(CopyError::Unsupported),
            _ => return Err(CopyError::Fault),
        }
    }
}

#[cfg(target_os = "macos")]
mod mach {
    #![allow(non_upper_case_globals)]

    pub type MachPort = libc::c_uint;
    pub type KernReturn = libc::c_int;

    pub const KERN_SUCCESS: KernReturn = 0;

    extern "C" {
        pub static mach_task_self_: MachPort;

        pub fn vm_read_overwrite(
            target_task: MachPort,
            address: usize,
            size: usize,
            data: usize,
            outsize: *mut usize,
        ) -> KernReturn;
    }
}

/// Copy `buffer.len()` bytes from `address` in the current task.
#[cfg(target_os = "macos")]
pub fn read_process_memory(address: u64, buffer: &mut [u8]) -> Result<(), CopyError> {
    let mut outsize = 0usize;
    let kr = unsafe {
        mach::vm_read_overwrite(
            mach::mach_task_self_,
            address as usize,
            buffer.len(),
            buffer.as_mut_ptr() as usize,
            &mut outsize,
        )
    };
    if kr == mach::KERN_SUCCESS && outsize == buffer.len() {
        Ok(())
    } else {
        Err(CopyError::Fault)
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn read_process_memory(_address: u64, _buffer: &mut [u8]) -> Result<(), CopyError> {
    Err(CopyError::Unsupported)
}
