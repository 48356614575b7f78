use crate::memory::MemoryReader;
use crate::walker::{FrameWalker, Termination};

/// The result of one capture: how many slots of the output buffer were
/// written, and why the walk ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Capture {
    len: usize,
    termination: Termination,
}

impl Capture {
    /// Number of addresses written, `output[..len]`.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Zero frames is a legitimate outcome, not an error.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn termination(&self) -> Termination {
        self.termination
    }

    /// Whether the walk stopped because the output buffer was full.
    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.termination == Termination::Truncated
    }
}

/// Drains `walker` into `output`, innermost frame first.
///
/// Writes `output[i]` for every `i` below the number of produced addresses
/// and never past `output.len()`; slots beyond the returned length are left
/// as they were.
pub fn collect<M: MemoryReader>(mut walker: FrameWalker<'_, M>, output: &mut [u64]) -> Capture {
    let mut len = 0;
    // The slot is taken before the walker is advanced, so a full buffer costs no reads.
    for slot in output.iter_mut() {
        match walker.next() {
            Some(address) => {
                *slot = address;
                len += 1;
            }
            None => break,
        }
    }
    Capture {
        len,
        termination: walker.termination().unwrap_or(Termination::Truncated),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{Arch, ArchLayout, WordSize};
    use crate::memory::{MemoryError, StackBounds};
    use crate::walker::StopReason;
    use crate::RegisterState;

    /// A two-record chain at 0x1100 -> 0x1110.
    struct TwoFrames;

    impl MemoryReader for TwoFrames {
        fn read_word(&self, address: u64, _size: WordSize) -> Result<u64, MemoryError> {
            match address {
                0x1100 => Ok(0x1110),
                0x1108 => Ok(0xa1),
                0x1110 => Ok(0),
                0x1118 => Ok(0xa2),
                _ => Err(MemoryError::Unreadable(address)),
            }
        }
    }

    fn walker(max_frames: usize) -> FrameWalker<'static, TwoFrames> {
        let registers = RegisterState::new(0xa0, 0x1100, 0x1000);
        let bounds = StackBounds::new(0x1000, 0x2000);
        FrameWalker::new(&registers, TwoFrames, ArchLayout::for_arch(Arch::X86_64), bounds, max_frames)
    }

    #[test]
    fn test_collect_whole_chain() {
        let mut output = [0u64; 8];
        let capture = collect(walker(usize::MAX), &mut output);
        assert_eq!(capture.len(), 3);
        assert!(!capture.is_truncated());
        assert_eq!(capture.termination(), Termination::Stopped(StopReason::ChainEnd));
        assert_eq!(output, [0xa0, 0xa1, 0xa2, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_output_shorter_than_chain() {
        let mut output = [0u64; 2];
        let capture = collect(walker(usize::MAX), &mut output);
        assert_eq!(capture.len(), 2);
        assert!(capture.is_truncated());
        assert_eq!(output, [0xa0, 0xa1]);
    }

    #[test]
    fn test_walker_limit_below_output() {
        let mut output = [u64::MAX; 4];
        let capture = collect(walker(1), &mut output);
        assert_eq!(capture.len(), 1);
        assert!(capture.is_truncated());
        assert_eq!(output, [0xa0, u64::MAX, u64::MAX, u64::MAX]);
    }

    #[test]
    fn test_empty_output() {
        let capture = collect(walker(usize::MAX), &mut []);
        assert!(capture.is_empty());
        assert!(capture.is_truncated());
    }
}
