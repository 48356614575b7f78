use framewalk::{
    Arch, ArchLayout, Backtracer, Error, MemoryError, MemoryReader, RegisterState, StackBounds, StopReason,
    Termination, ThreadContextProvider, WalkOptions, WordSize,
};
use rand::Rng;
use std::cell::Cell;

const BASE: u64 = 0x7fff_0000;
const RECORD_SIZE: u64 = 32;
const PC: u64 = 0x4000_0000;

/// A fabricated x86_64 stack: one frame record every `RECORD_SIZE` bytes.
struct FakeStack {
    words: Vec<u64>,
    reads: Cell<usize>,
}

impl FakeStack {
    /// A chain producing exactly `len` addresses: the pc plus `len - 1` records.
    fn with_chain(len: usize) -> Self {
        let records = len.saturating_sub(1) as u64;
        let mut words = vec![0u64; ((records + 1) * RECORD_SIZE / 8) as usize];
        for i in 0..records {
            let fp = record(i);
            let saved = if i + 1 == records { 0 } else { record(i + 1) };
            words[((fp - BASE) / 8) as usize] = saved;
            words[((fp - BASE) / 8 + 1) as usize] = address(i as usize + 1);
        }
        Self {
            words,
            reads: Cell::new(0),
        }
    }

    fn set(&mut self, at: u64, value: u64) {
        self.words[((at - BASE) / 8) as usize] = value;
    }

    fn bounds(&self) -> StackBounds {
        StackBounds::new(BASE, BASE + self.words.len() as u64 * 8)
    }
}

impl MemoryReader for FakeStack {
    fn read_word(&self, at: u64, size: WordSize) -> Result<u64, MemoryError> {
        assert_eq!(size, WordSize::Eight);
        self.reads.set(self.reads.get() + 1);
        if at < BASE || at % 8 != 0 {
            return Err(MemoryError::Unreadable(at));
        }
        self.words
            .get(((at - BASE) / 8) as usize)
            .copied()
            .ok_or(MemoryError::Unreadable(at))
    }
}

fn record(i: u64) -> u64 {
    BASE + i * RECORD_SIZE
}

fn address(i: usize) -> u64 {
    if i == 0 {
        PC
    } else {
        0x5000_0000 + i as u64 * 0x10
    }
}

/// Hands out a prepared snapshot, or fails like a stale handle.
struct Snapshot(Option<RegisterState>);

impl ThreadContextProvider for Snapshot {
    type Thread = ();

    fn register_state(&self, _: ()) -> framewalk::Result<RegisterState> {
        self.0.ok_or(Error::ThreadUnavailable)
    }
}

fn backtracer(stack: &FakeStack) -> Backtracer<Snapshot> {
    let registers = RegisterState::new(PC, record(0), BASE);
    let options = WalkOptions::default()
        .layout(ArchLayout::for_arch(Arch::X86_64))
        .bounds(stack.bounds());
    Backtracer::new(Snapshot(Some(registers))).with_options(options)
}

fn expected(len: usize) -> Vec<u64> {
    (0..len).map(address).collect()
}

#[test]
fn test_short_chain_is_captured_in_order() {
    let stack = FakeStack::with_chain(5);
    let mut output = [0u64; 16];
    let capture = backtracer(&stack).capture_with((), &stack, &mut output).unwrap();
    assert_eq!(capture.len(), 5);
    assert_eq!(&output[..5], &expected(5)[..]);
    assert_eq!(capture.termination(), Termination::Stopped(StopReason::ChainEnd));
}

#[test]
fn test_long_chain_is_truncated() {
    let stack = FakeStack::with_chain(40);
    let mut output = [0u64; 8];
    let capture = backtracer(&stack).capture_with((), &stack, &mut output).unwrap();
    assert_eq!(capture.len(), 8);
    assert!(capture.is_truncated());
    assert_eq!(&output[..], &expected(8)[..]);
}

#[test]
fn test_zero_capacity_reads_no_stack() {
    let stack = FakeStack::with_chain(5);
    let capture = backtracer(&stack).capture_with((), &stack, &mut []).unwrap();
    assert_eq!(capture.len(), 0);
    assert_eq!(stack.reads.get(), 0);
}

#[test]
fn test_corrupted_frame_pointer() {
    for k in 2..10usize {
        let mut stack = FakeStack::with_chain(12);
        // The record that produces address k - 1 points its saved frame pointer far away.
        stack.set(record(k as u64 - 2), 0xdead_0000_0000);
        let mut output = [u64::MAX; 16];
        let capture = backtracer(&stack).capture_with((), &stack, &mut output).unwrap();
        assert_eq!(capture.len(), k);
        assert_eq!(&output[..k], &expected(k)[..]);
        assert!(output[k..].iter().all(|&slot| slot == u64::MAX));
        assert_eq!(
            capture.termination(),
            Termination::Stopped(StopReason::OutOfBounds(0xdead_0000_0000))
        );
    }
}

#[test]
fn test_unavailable_thread() {
    let stack = FakeStack::with_chain(5);
    let mut output = [42u64; 4];
    let options = WalkOptions::default().layout(ArchLayout::for_arch(Arch::X86_64));
    let backtracer = Backtracer::new(Snapshot(None)).with_options(options);
    assert_eq!(
        backtracer.capture_with((), &stack, &mut output),
        Err(Error::ThreadUnavailable)
    );
    assert_eq!(output, [42; 4]);
    assert_eq!(stack.reads.get(), 0);
}

#[test]
fn test_count_never_exceeds_capacity() {
    let mut rng = rand::thread_rng();
    for _ in 0..200 {
        let len = rng.gen_range(1..64);
        let capacity = rng.gen_range(0..64);
        let stack = FakeStack::with_chain(len);
        let mut output = vec![0u64; capacity];
        let capture = backtracer(&stack).capture_with((), &stack, &mut output).unwrap();
        assert!(capture.len() <= capacity);
        assert_eq!(capture.len(), len.min(capacity));
        assert_eq!(&output[..capture.len()], &expected(capture.len())[..]);
    }
}

#[test]
fn test_capture_is_deterministic() {
    let stack = FakeStack::with_chain(20);
    let backtracer = backtracer(&stack);
    let mut first = [0u64; 12];
    let mut second = [0u64; 12];
    let a = backtracer.capture_with((), &stack, &mut first).unwrap();
    let b = backtracer.capture_with((), &stack, &mut second).unwrap();
    assert_eq!(a, b);
    assert_eq!(first, second);
}
