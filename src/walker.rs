use crate::arch::ArchLayout;
use crate::memory::{MemoryError, MemoryReader, StackBounds};
use crate::RegisterState;

/// Why a walk ended before filling its capacity. Every reason is an ordinary
/// outcome: the addresses produced up to that point are a valid backtrace.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The saved frame pointer was zero, the usual end of a chain.
    ChainEnd,
    /// A frame record held a zero return address. Ending here is stricter than
    /// the plain walk, which would report the zero and go on to check the
    /// saved frame pointer; a zero return address marks the outermost frame
    /// on the platforms this crate supports.
    NullReturnAddress,
    /// A slot of the frame record could not be read.
    ReadFailed(MemoryError),
    /// The next frame pointer is not aligned for this architecture.
    Misaligned(u64),
    /// The next frame pointer does not move toward the stack's origin.
    NoProgress(u64),
    /// The next frame pointer lies outside the stack bounds.
    OutOfBounds(u64),
}

/// How a walk ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Termination {
    /// The capacity was filled. The chain may have continued beyond it.
    Truncated,
    /// The chain ended, or could not be followed any further.
    Stopped(StopReason),
}

#[derive(Debug, Copy, Clone)]
enum Phase {
    ProgramCounter,
    LinkRegister,
    Chain,
}

/// `FrameWalker` follows the frame-pointer chain of one [RegisterState].
///
/// It is a finite, lazily evaluated iterator of addresses, innermost first:
/// the program counter, then (where the architecture has one and it is
/// known) the link register, then one return address per frame record. The
/// walk stops at `max_frames` addresses, or as soon as the chain is broken:
/// a failed read, a zero frame pointer, or a saved frame pointer that is
/// misaligned, outside the stack bounds, or fails to move toward the stack's
/// origin. The last rule is what keeps cyclic or corrupted chains finite.
///
/// All memory is read through the [MemoryReader], so the walker itself never
/// dereferences a pointer, allocates or locks.
pub struct FrameWalker<'a, M> {
    memory: M,
    layout: &'a ArchLayout,
    bounds: StackBounds,
    registers: RegisterState,
    use_link_register: bool,
    phase: Phase,
    // The frame record to read next, or why there is none.
    cursor: Result<u64, StopReason>,
    // A link register value already produced, skipped once if the chain repeats it.
    skip: Option<u64>,
    produced: usize,
    max_frames: usize,
    termination: Option<Termination>,
}

impl<'a, M: MemoryReader> FrameWalker<'a, M> {
    pub fn new(
        registers: &RegisterState,
        memory: M,
        layout: &'a ArchLayout,
        bounds: StackBounds,
        max_frames: usize,
    ) -> Self {
        let cursor = check_frame_pointer(registers.fp(), layout, &bounds);
        Self {
            memory,
            layout,
            bounds,
            registers: *registers,
            use_link_register: layout.link_register,
            phase: Phase::ProgramCounter,
            cursor,
            skip: None,
            produced: 0,
            max_frames,
            termination: None,
        }
    }

    /// Whether the link register is reported as the second address. Has no
    /// effect on architectures without one.
    pub fn link_register(mut self, enabled: bool) -> Self {
        self.use_link_register = enabled && self.layout.link_register;
        self
    }

    /// How the walk ended, or `None` while it can still produce addresses.
    #[inline]
    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    /// Number of addresses produced so far.
    #[inline]
    pub fn produced(&self) -> usize {
        self.produced
    }

    fn finish(&mut self, termination: Termination) {
        trace!("frame walk ended after {} frames: {:?}", self.produced, termination);
        self.termination = Some(termination);
    }

    fn read(&self, slot: Option<u64>, fp: u64) -> Result<u64, StopReason> {
        let slot = slot.ok_or(StopReason::ReadFailed(MemoryError::OutOfBounds(fp)))?;
        self.memory
            .read_word(slot, self.layout.word_size)
            .map_err(StopReason::ReadFailed)
    }

    /// Reads the record at `fp` and returns its return address, leaving the
    /// cursor on the caller's record (or on the reason it cannot be followed).
    fn step(&mut self) -> Result<u64, StopReason> {
        loop {
            let fp = self.cursor?;
            let return_address =
                self.read(self.layout.return_address_slot(fp), fp)? & self.layout.address_mask;
            if return_address == 0 {
                return Err(StopReason::NullReturnAddress);
            }
            self.cursor = self.caller_frame_pointer(fp);
            if self.skip.take() == Some(return_address) {
                continue;
            }
            return Ok(return_address);
        }
    }

    fn caller_frame_pointer(&self, fp: u64) -> Result<u64, StopReason> {
        let saved = self.read(self.layout.saved_fp_slot(fp), fp)?;
        let saved = check_frame_pointer(saved, self.layout, &self.bounds)?;
        if !self.layout.growth.is_toward_origin(fp, saved) {
            return Err(StopReason::NoProgress(saved));
        }
        Ok(saved)
    }
}

fn check_frame_pointer(fp: u64, layout: &ArchLayout, bounds: &StackBounds) -> Result<u64, StopReason> {
    if fp == 0 {
        return Err(StopReason::ChainEnd);
    }
    if fp % layout.fp_alignment != 0 {
        return Err(StopReason::Misaligned(fp));
    }
    if !bounds.contains(fp) {
        return Err(StopReason::OutOfBounds(fp));
    }
    Ok(fp)
}

impl<M: MemoryReader> Iterator for FrameWalker<'_, M> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.termination.is_some() {
            return None;
        }
        if self.produced >= self.max_frames {
            self.finish(Termination::Truncated);
            return None;
        }
        let address = match self.phase {
            Phase::ProgramCounter => {
                self.phase = if self.use_link_register && self.registers.lr() != 0 {
                    Phase::LinkRegister
                } else {
                    Phase::Chain
                };
                self.registers.pc()
            }
            Phase::LinkRegister => {
                self.phase = Phase::Chain;
                let lr = self.registers.lr() & self.layout.address_mask;
                self.skip = Some(lr);
                lr
            }
            Phase::Chain => match self.step() {
                Ok(address) => address,
                Err(reason) => {
                    self.finish(Termination::Stopped(reason));
                    return None;
                }
            },
        };
        self.produced += 1;
        Some(address)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.termination.is_some() {
            return (0, Some(0));
        }
        (0, Some(self.max_frames.saturating_sub(self.produced)))
    }
}

impl<M: MemoryReader> std::iter::FusedIterator for FrameWalker<'_, M> {}
