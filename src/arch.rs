//! Frame record conventions, one table row per instruction set.
//!
//! Every architecture this crate knows about stores a frame record somewhere
//! around the frame pointer: the caller's saved frame pointer plus the return
//! address. Where exactly differs (x86 pushes the return address above the
//! saved `rbp`, RISC-V points `s0` at the canonical frame address and stores
//! the record *below* it), so the walker never hardcodes an offset and always
//! consults an [ArchLayout].

/// Instruction sets with a row in the layout table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Arch {
    X86,
    X86_64,
    Arm,
    Aarch64,
    Riscv32,
    Riscv64,
}

/// Which way the stack grows as calls nest.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StackGrowth {
    /// Callee frames live at lower addresses, so callers are found upward.
    Down,
    /// Callee frames live at higher addresses, so callers are found downward.
    Up,
}

impl StackGrowth {
    /// Whether moving from frame pointer `from` to `to` steps toward the
    /// stack's origin, i.e. from a callee frame to its caller.
    #[inline]
    pub fn is_toward_origin(self, from: u64, to: u64) -> bool {
        match self {
            StackGrowth::Down => to > from,
            StackGrowth::Up => to < from,
        }
    }
}

/// Word size, in bytes, of a stack slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WordSize {
    Four = 4,
    Eight = 8,
}

impl WordSize {
    #[inline]
    pub fn bytes(self) -> u64 {
        self as u64
    }
}

/// How a frame record is laid out relative to the frame pointer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ArchLayout {
    pub arch: Arch,
    pub word_size: WordSize,
    /// Required alignment of a frame pointer value.
    pub fp_alignment: u64,
    /// Offset from the frame pointer to the caller's saved frame pointer.
    pub saved_fp_offset: i64,
    /// Offset from the frame pointer to the return address.
    pub return_address_offset: i64,
    pub growth: StackGrowth,
    /// The return address of a leaf call lives in a register, not on the stack.
    pub link_register: bool,
    /// Applied to every return address; clears pointer authentication bits.
    pub address_mask: u64,
}

static LAYOUTS: [ArchLayout; 6] = [
    ArchLayout {
        arch: Arch::X86,
        word_size: WordSize::Four,
        fp_alignment: 4,
        saved_fp_offset: 0,
        return_address_offset: 4,
        growth: StackGrowth::Down,
        link_register: false,
        address_mask: u32::MAX as u64,
    },
    ArchLayout {
        arch: Arch::X86_64,
        word_size: WordSize::Eight,
        fp_alignment: 8,
        saved_fp_offset: 0,
        return_address_offset: 8,
        growth: StackGrowth::Down,
        link_register: false,
        address_mask: u64::MAX,
    },
    // Apple's ABI keeps the frame record in r7, {saved r7, lr}.
    ArchLayout {
        arch: Arch::Arm,
        word_size: WordSize::Four,
        fp_alignment: 4,
        saved_fp_offset: 0,
        return_address_offset: 4,
        growth: StackGrowth::Down,
        link_register: true,
        address_mask: u32::MAX as u64,
    },
    ArchLayout {
        arch: Arch::Aarch64,
        word_size: WordSize::Eight,
        fp_alignment: 8,
        saved_fp_offset: 0,
        return_address_offset: 8,
        growth: StackGrowth::Down,
        link_register: true,
        // 48-bit virtual addresses; the upper bits may carry a PAC signature.
        address_mask: 0x0000_ffff_ffff_ffff,
    },
    ArchLayout {
        arch: Arch::Riscv32,
        word_size: WordSize::Four,
        fp_alignment: 4,
        saved_fp_offset: -8,
        return_address_offset: -4,
        growth: StackGrowth::Down,
        link_register: true,
        address_mask: u32::MAX as u64,
    },
    ArchLayout {
        arch: Arch::Riscv64,
        word_size: WordSize::Eight,
        fp_alignment: 8,
        saved_fp_offset: -16,
        return_address_offset: -8,
        growth: StackGrowth::Down,
        link_register: true,
        address_mask: u64::MAX,
    },
];

impl ArchLayout {
    /// Looks up the table row for `arch`.
    pub fn for_arch(arch: Arch) -> &'static ArchLayout {
        // Every `Arch` variant has exactly one row.
        match LAYOUTS.iter().find(|layout| layout.arch == arch) {
            Some(layout) => layout,
            None => unreachable!("no frame layout for {:?}", arch),
        }
    }

    /// The row for the architecture this crate was compiled for, if any.
    pub fn native() -> Option<&'static ArchLayout> {
        Arch::native().map(Self::for_arch)
    }

    /// All known rows.
    pub fn all() -> &'static [ArchLayout] {
        &LAYOUTS
    }

    /// Address of the caller's saved frame pointer in the record at `fp`.
    #[inline]
    pub fn saved_fp_slot(&self, fp: u64) -> Option<u64> {
        fp.checked_add_signed(self.saved_fp_offset)
    }

    /// Address of the return address in the record at `fp`.
    #[inline]
    pub fn return_address_slot(&self, fp: u64) -> Option<u64> {
        fp.checked_add_signed(self.return_address_offset)
    }
}

impl Arch {
    /// The architecture this crate was compiled for.
    pub const fn native() -> Option<Arch> {
        if cfg!(target_arch = "x86_64") {
            Some(Arch::X86_64)
        } else if cfg!(target_arch = "x86") {
            Some(Arch::X86)
        } else if cfg!(target_arch = "aarch64") {
            Some(Arch::Aarch64)
        } else if cfg!(target_arch = "arm") {
            Some(Arch::Arm)
        } else if cfg!(target_arch = "riscv64") {
            Some(Arch::Riscv64)
        } else if cfg!(target_arch = "riscv32") {
            Some(Arch::Riscv32)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_arch_has_one_row() {
        for arch in [Arch::X86, Arch::X86_64, Arch::Arm, Arch::Aarch64, Arch::Riscv32, Arch::Riscv64] {
            let rows = ArchLayout::all().iter().filter(|l| l.arch == arch).count();
            assert_eq!(rows, 1, "{:?}", arch);
            assert_eq!(ArchLayout::for_arch(arch).arch, arch);
        }
    }

    #[test]
    fn test_slots_are_word_aligned() {
        for layout in ArchLayout::all() {
            let word = layout.word_size.bytes() as i64;
            assert_eq!(layout.saved_fp_offset % word, 0);
            assert_eq!(layout.return_address_offset % word, 0);
            assert_ne!(layout.saved_fp_offset, layout.return_address_offset);
        }
    }

    #[test]
    fn test_slot_addresses() {
        let x64 = ArchLayout::for_arch(Arch::X86_64);
        assert_eq!(x64.saved_fp_slot(0x1000), Some(0x1000));
        assert_eq!(x64.return_address_slot(0x1000), Some(0x1008));
        assert_eq!(x64.return_address_slot(u64::MAX), None);

        let rv = ArchLayout::for_arch(Arch::Riscv64);
        assert_eq!(rv.saved_fp_slot(0x1000), Some(0xff0));
        assert_eq!(rv.return_address_slot(0x1000), Some(0xff8));
        assert_eq!(rv.saved_fp_slot(8), None);
    }

    #[test]
    fn test_growth() {
        assert!(StackGrowth::Down.is_toward_origin(0x1000, 0x1010));
        assert!(!StackGrowth::Down.is_toward_origin(0x1000, 0x1000));
        assert!(!StackGrowth::Down.is_toward_origin(0x1000, 0xff0));
        assert!(StackGrowth::Up.is_toward_origin(0x1000, 0xff0));
    }

    #[test]
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    fn test_native() {
        assert!(ArchLayout::native().is_some());
    }
}
