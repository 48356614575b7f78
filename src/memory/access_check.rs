//! Readability probe for when no copy syscall is available.
//!
//! The kernel is asked to `write` one byte from the address into a pipe. An
//! unmapped address fails that write with `EFAULT` instead of raising
//! `SIGSEGV` in this process.

use std::os::raw::c_int;

thread_local! {
    // Never closed: a value with a destructor makes the first access on each
    // thread register a TLS destructor, and that registration allocates.
    static PROBE: Option<ProbePipe> = ProbePipe::open();
}

/// Check whether the byte at `address` is readable.
pub fn can_access(address: u64) -> bool {
    PROBE.with(|probe| match probe {
        Some(pipe) => pipe.probe(address),
        None => false,
    })
}

/// A non-blocking, close-on-exec pipe owned by one thread.
#[derive(Copy, Clone)]
struct ProbePipe {
    read_end: c_int,
    write_end: c_int,
}

impl ProbePipe {
    fn open() -> Option<Self> {
        let mut fds = [-1 as c_int; 2];
        if unsafe { create_pipe(&mut fds) } != 0 {
            return None;
        }
        Some(Self {
            read_end: fds[0],
            write_end: fds[1],
        })
    }

    fn probe(&self, address: u64) -> bool {
        // Each probe leaves at most one byte; empty it so the pipe never fills up.
        if !self.drain() {
            return false;
        }
        loop {
            match unsafe { libc::write(self.write_end, address as *const libc::c_void, 1) } {
                -1 if super::errno() == libc::EINTR => continue,
                -1 => return false,
                n => return n == 1,
            }
        }
    }

    fn drain(&self) -> bool {
        let mut scratch = [0u8; 8];
        loop {
            let n = unsafe { libc::read(self.read_end, scratch.as_mut_ptr() as *mut libc::c_void, scratch.len()) };
            if n != -1 {
                return true;
            }
            match super::errno() {
                libc::EINTR => continue,
                libc::EAGAIN => return true,
                _ => return false,
            }
        }
    }
}

#[cfg(target_os = "linux")]
unsafe fn create_pipe(fds: &mut [c_int; 2]) -> c_int {
    libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK)
}

// No pipe2 on macOS: set both flags on each end by hand.
#[cfg(target_os = "macos")]
unsafe fn create_pipe(fds: &mut [c_int; 2]) -> c_int {
    if libc::pipe(fds.as_mut_ptr()) != 0 {
        return -1;
    }
    for &fd in fds.iter() {
        let fd_flags = libc::fcntl(fd, libc::F_GETFD);
        let status_flags = libc::fcntl(fd, libc::F_GETFL);
        if fd_flags == -1
            || status_flags == -1
            || libc::fcntl(fd, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC) != 0
            || libc::fcntl(fd, libc::F_SETFL, status_flags | libc::O_NONBLOCK) != 0
        {
            libc::close(fds[0]);
            libc::close(fds[1]);
            return -1;
        }
    }
    0
}
