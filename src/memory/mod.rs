//! Word reads from arbitrary addresses that never fault the caller.

#[cfg(all(feature = "mem-protect", any(target_os = "linux", target_os = "macos")))]
mod access_check;
#[cfg(feature = "mem-protect")]
mod copy;
#[cfg(target_os = "linux")]
mod maps;
#[cfg(target_os = "linux")]
pub use maps::region_containing;

use crate::arch::{ArchLayout, StackGrowth, WordSize};

/// Reasons a word could not be read. None of them escape a walk; they only
/// end it.
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("null address")]
    Null,

    #[error("address {0:#x} is not word aligned")]
    Misaligned(u64),

    #[error("address {0:#x} is outside the stack bounds")]
    OutOfBounds(u64),

    #[error("address {0:#x} is not readable")]
    Unreadable(u64),
}

/// The capability the walker reads stack words through.
///
/// Implementations must report an invalid address as an error instead of
/// dereferencing it. [SafeMemory] is the implementation backed by the OS;
/// tests provide their own over fabricated stacks.
pub trait MemoryReader {
    /// Reads one word of `size` bytes at `address`, zero-extended to `u64`.
    fn read_word(&self, address: u64, size: WordSize) -> Result<u64, MemoryError>;
}

impl<M: MemoryReader + ?Sized> MemoryReader for &M {
    #[inline]
    fn read_word(&self, address: u64, size: WordSize) -> Result<u64, MemoryError> {
        (**self).read_word(address, size)
    }
}

/// [start, end)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AddressRange {
    pub start: u64,
    pub end: u64,
}

impl AddressRange {
    /// Determine whether the target address is in the current range.
    #[inline]
    pub fn contains(&self, target: u64) -> bool {
        self.start <= target && target < self.end
    }

    /// Determine whether all of `[target, target + len)` is in the current range.
    #[inline]
    pub fn contains_span(&self, target: u64, len: u64) -> bool {
        match target.checked_add(len) {
            Some(end) => self.start <= target && end <= self.end,
            None => false,
        }
    }
}

/// The region a thread's frame records are expected to live in.
///
/// Frame pointers and the slots read around them must fall inside these
/// bounds. When nothing better is known the bounds are a fixed span measured
/// from the stack pointer toward the stack's origin.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StackBounds {
    range: AddressRange,
}

impl StackBounds {
    /// Bounds over `[low, high)`.
    #[inline]
    pub const fn new(low: u64, high: u64) -> Self {
        Self {
            range: AddressRange { start: low, end: high },
        }
    }

    /// Bounds reaching `span` bytes from `sp` in the direction callers live.
    pub fn from_stack_pointer(sp: u64, span: u64, layout: &ArchLayout) -> Self {
        match layout.growth {
            StackGrowth::Down => Self::new(sp, sp.saturating_add(span)),
            StackGrowth::Up => Self::new(
                sp.saturating_sub(span),
                sp.saturating_add(layout.word_size.bytes()),
            ),
        }
    }

    /// Bounds taken from the readable mapping that contains `sp`.
    ///
    /// This parses `/proc`, so it allocates and must not be called from a
    /// signal handler; compute the bounds ahead of time instead.
    #[cfg(target_os = "linux")]
    pub fn from_maps(sp: u64) -> std::io::Result<Option<Self>> {
        Ok(region_containing(sp)?.map(|r| Self::new(r.start, r.end)))
    }

    #[inline]
    pub fn low(&self) -> u64 {
        self.range.start
    }

    #[inline]
    pub fn high(&self) -> u64 {
        self.range.end
    }

    #[inline]
    pub fn contains(&self, address: u64) -> bool {
        self.range.contains(address)
    }

    /// Whether a whole word at `address` lies inside the bounds.
    #[inline]
    pub fn contains_word(&self, address: u64, size: WordSize) -> bool {
        self.range.contains_span(address, size.bytes())
    }
}

/// [MemoryReader] over the live process.
///
/// Every read is first checked for plausibility (non-null, aligned, inside
/// the stack bounds) so obviously bad addresses never reach the kernel. What
/// passes is copied with an OS primitive that reports a bad address as an
/// error: `process_vm_readv` on Linux, `vm_read_overwrite` on macOS. When that
/// primitive is refused (seccomp filters commonly block it) the address is
/// probed by letting the kernel read it into a pipe before loading it.
///
/// Without the `mem-protect` feature only the plausibility check is done.
#[derive(Debug, Copy, Clone)]
pub struct SafeMemory {
    bounds: StackBounds,
}

impl SafeMemory {
    #[inline]
    pub fn new(bounds: StackBounds) -> Self {
        Self { bounds }
    }

    #[inline]
    pub fn bounds(&self) -> StackBounds {
        self.bounds
    }

    fn check(&self, address: u64, size: WordSize) -> Result<(), MemoryError> {
        if address == 0 {
            return Err(MemoryError::Null);
        }
        if address % size.bytes() != 0 {
            return Err(MemoryError::Misaligned(address));
        }
        if !self.bounds.contains_word(address, size) {
            return Err(MemoryError::OutOfBounds(address));
        }
        Ok(())
    }
}

impl MemoryReader for SafeMemory {
    fn read_word(&self, address: u64, size: WordSize) -> Result<u64, MemoryError> {
        self.check(address, size)?;
        read_checked(address, size)
    }
}

#[cfg(feature = "mem-protect")]
fn read_checked(address: u64, size: WordSize) -> Result<u64, MemoryError> {
    let mut buffer = [0u8; 8];
    let buffer = &mut buffer[..size.bytes() as usize];
    match copy::read_process_memory(address, buffer) {
        Ok(()) => Ok(decode(buffer, size)),
        Err(copy::CopyError::Fault) => Err(MemoryError::Unreadable(address)),
        Err(copy::CopyError::Unsupported) => probe_then_load(address, size),
    }
}

#[cfg(all(feature = "mem-protect", any(target_os = "linux", target_os = "macos")))]
fn probe_then_load(address: u64, size: WordSize) -> Result<u64, MemoryError> {
    // The word is aligned, so it never straddles a page and one probed byte
    // vouches for all of it.
    if access_check::can_access(address) {
        Ok(load(address, size))
    } else {
        Err(MemoryError::Unreadable(address))
    }
}

#[cfg(all(feature = "mem-protect", not(any(target_os = "linux", target_os = "macos"))))]
fn probe_then_load(address: u64, _size: WordSize) -> Result<u64, MemoryError> {
    Err(MemoryError::Unreadable(address))
}

#[cfg(not(feature = "mem-protect"))]
#[inline]
fn read_checked(address: u64, size: WordSize) -> Result<u64, MemoryError> {
    Ok(load(address, size))
}

#[cfg(feature = "mem-protect")]
#[inline]
fn decode(buffer: &[u8], size: WordSize) -> u64 {
    use byteorder::{ByteOrder, NativeEndian};

    match size {
        WordSize::Four => NativeEndian::read_u32(buffer) as u64,
        WordSize::Eight => NativeEndian::read_u64(buffer),
    }
}

/// Load the word at `address` without any check.
///
/// The correctness of the address needs to be guaranteed by the caller.
#[inline]
fn load(address: u64, size: WordSize) -> u64 {
    unsafe {
        match size {
            WordSize::Four => std::ptr::read_volatile(address as *const u32) as u64,
            WordSize::Eight => std::ptr::read_volatile(address as *const u64),
        }
    }
}

#[inline]
#[cfg(all(feature = "mem-protect", target_os = "linux"))]
pub(crate) fn errno() -> libc::c_int {
    unsafe { *libc::__errno_location() }
}

#[inline]
#[cfg(all(feature = "mem-protect", target_os = "macos"))]
pub(crate) fn errno() -> libc::c_int {
    unsafe { *libc::__error() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;

    fn bounds_around<T>(value: &T) -> StackBounds {
        let address = value as *const T as u64;
        StackBounds::new(address & !0xfff, (address | 0xfff) + 1)
    }

    #[test]
    fn test_address_range() {
        let ar = AddressRange { start: 1, end: 3 };
        assert!(ar.contains(1));
        assert!(ar.contains(2));
        assert!(!ar.contains(0));
        assert!(!ar.contains(3));
        assert!(ar.contains_span(1, 2));
        assert!(!ar.contains_span(2, 2));
        assert!(!ar.contains_span(u64::MAX, 2));
    }

    #[test]
    fn test_bounds_from_stack_pointer() {
        let x64 = ArchLayout::for_arch(Arch::X86_64);
        let bounds = StackBounds::from_stack_pointer(0x7000, 0x1000, x64);
        assert_eq!((bounds.low(), bounds.high()), (0x7000, 0x8000));
        assert!(bounds.contains_word(0x7ff8, WordSize::Eight));
        assert!(!bounds.contains_word(0x7ffc, WordSize::Eight));
        assert!(bounds.contains_word(0x7ffc, WordSize::Four));

        let saturated = StackBounds::from_stack_pointer(u64::MAX - 8, 0x1000, x64);
        assert_eq!(saturated.high(), u64::MAX);
    }

    #[test]
    fn test_read_valid_word() {
        let value: u64 = 0xdead_beef_cafe_f00d;
        let memory = SafeMemory::new(bounds_around(&value));
        let address = &value as *const u64 as u64;
        assert_eq!(memory.read_word(address, WordSize::Eight), Ok(value));
    }

    #[test]
    fn test_read_four_bytes() {
        let value: u32 = 0x1234_5678;
        let memory = SafeMemory::new(bounds_around(&value));
        let address = &value as *const u32 as u64;
        assert_eq!(memory.read_word(address, WordSize::Four), Ok(0x1234_5678));
    }

    #[test]
    fn test_plausibility_checks() {
        let value: u64 = 7;
        let memory = SafeMemory::new(bounds_around(&value));
        let address = &value as *const u64 as u64;
        assert_eq!(memory.read_word(0, WordSize::Eight), Err(MemoryError::Null));
        assert_eq!(
            memory.read_word(address + 1, WordSize::Eight),
            Err(MemoryError::Misaligned(address + 1))
        );
        let outside = memory.bounds().high();
        assert_eq!(
            memory.read_word(outside, WordSize::Eight),
            Err(MemoryError::OutOfBounds(outside))
        );
    }

    #[test]
    #[cfg(feature = "mem-protect")]
    fn test_unmapped_word_is_reported() {
        // The first page is never mapped for user processes.
        let memory = SafeMemory::new(StackBounds::new(0x8, 0x1000));
        assert_eq!(memory.read_word(0x8, WordSize::Eight), Err(MemoryError::Unreadable(0x8)));
    }

    // The path taken when the copy syscall is refused, e.g. under seccomp.
    #[test]
    #[cfg(all(feature = "mem-protect", any(target_os = "linux", target_os = "macos")))]
    fn test_probe_then_load() {
        let value: u64 = 0x0123_4567_89ab_cdef;
        let address = &value as *const u64 as u64;
        assert_eq!(probe_then_load(address, WordSize::Eight), Ok(value));
        let half: u32 = 0x89ab_cdef;
        assert_eq!(
            probe_then_load(&half as *const u32 as u64, WordSize::Four),
            Ok(0x89ab_cdef)
        );
        assert_eq!(probe_then_load(0x8, WordSize::Eight), Err(MemoryError::Unreadable(0x8)));
    }
}
