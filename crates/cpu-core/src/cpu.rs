use serde::{Deserialize, Serialize};
use crate::control::{Cr0, Efer};
use crate::flags::RFlags;
use crate::privilege::Privilege;
use crate::segments::{DescriptorFlags, DescriptorTableReg, SegReg, SegState, SegmentCache, SegmentSelector};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CpuMode {
    Real,
    V8086,
    Protected,
    /// IA-32e compatibility mode (EFER.LMA with a 16/32-bit code segment).
    Compat,
    /// IA-32e 64-bit mode.
    Long,
}

/// Guest CPU context consumed by the selector and trap managers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Cpu {
    pub rip: u64,
    pub rflags: RFlags,
    pub segs: SegState,
    pub gdtr: DescriptorTableReg,
    pub idtr: DescriptorTableReg,
    pub ldtr: (SegmentSelector, SegmentCache),
    pub tr: (SegmentSelector, SegmentCache),
    pub cr0: Cr0,
    pub cr2: u64,
    pub efer: Efer,
}

impl Cpu {
    pub fn new() -> Self { Self::default() }

    pub fn reset(&mut self) {
        *self = Self::default();
        // Architectural reset defaults
        self.rflags = RFlags::ID;
        self.rip = 0xFFF0;
        self.idtr = DescriptorTableReg { base: 0, limit: 0x3FF };
    }

    /// A context with flat 4 GiB code/stack/data segments loaded at `cpl`.
    pub fn flat(mode: CpuMode, cpl: u8) -> Self {
        let mut cpu = Self::default();
        let cpl = match mode {
            CpuMode::Real => 0,
            CpuMode::V8086 => 3,
            _ => cpl & 0x3,
        };
        match mode {
            CpuMode::Real => {}
            CpuMode::V8086 => {
                cpu.cr0 = Cr0::PE;
                cpu.rflags = RFlags::VM;
            }
            CpuMode::Protected => cpu.cr0 = Cr0::PE,
            CpuMode::Compat | CpuMode::Long => {
                cpu.cr0 = Cr0::PE | Cr0::PG;
                cpu.efer = Efer::LME | Efer::LMA;
            }
        }
        let common = DescriptorFlags::TYPE | DescriptorFlags::RW | DescriptorFlags::PRESENT | DescriptorFlags::G;
        let code = common | DescriptorFlags::EXEC | if mode == CpuMode::Long { DescriptorFlags::L } else { DescriptorFlags::DB };
        let data = common | DescriptorFlags::DB;
        let cache = |flags: DescriptorFlags| SegmentCache { base: 0, limit: 0xFFFF_FFFF, flags: flags.with_dpl(cpl), valid: true };
        cpu.segs.set(SegReg::CS, SegmentSelector(0x08 | cpl as u16), cache(code));
        for r in [SegReg::DS, SegReg::ES, SegReg::SS] {
            cpu.segs.set(r, SegmentSelector(0x10 | cpl as u16), cache(data));
        }
        cpu
    }

    pub fn mode(&self) -> CpuMode {
        if !self.cr0.contains(Cr0::PE) {
            CpuMode::Real
        } else if self.efer.contains(Efer::LMA) {
            if self.segs.cs.1.flags.contains(DescriptorFlags::L) { CpuMode::Long } else { CpuMode::Compat }
        } else if self.rflags.contains(RFlags::VM) {
            CpuMode::V8086
        } else {
            CpuMode::Protected
        }
    }

    /// IA-32e mode: descriptor tables use 16-byte system entries.
    pub fn is_ia32e(&self) -> bool { self.cr0.contains(Cr0::PE) && self.efer.contains(Efer::LMA) }

    /// CPL follows the stack segment's DPL; CS.RPL stands in while SS is unloaded.
    pub fn current_cpl(&self) -> u8 {
        match self.mode() {
            CpuMode::Real => 0,
            CpuMode::V8086 => 3,
            _ if self.segs.ss.1.valid => self.segs.ss.1.dpl(),
            _ => self.segs.cs.0.rpl(),
        }
    }

    pub fn privilege(&self) -> Privilege { Privilege::from_flags_and_cs(self.current_cpl(), self.rflags) }

    /// The table a selector indexes: GDT for TI=0, the loaded LDT for TI=1.
    pub fn table_for(&self, sel: SegmentSelector) -> Option<DescriptorTableReg> {
        if !sel.ti() {
            return Some(self.gdtr);
        }
        let (ldt_sel, ldt_cache) = self.ldtr;
        if ldt_sel.is_null() || !ldt_cache.valid || !ldt_cache.flags.present() {
            return None;
        }
        Some(DescriptorTableReg { base: ldt_cache.base, limit: ldt_cache.limit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_follows_cr0_efer_and_eflags() {
        let mut cpu = Cpu::new();
        cpu.reset();
        assert_eq!(cpu.mode(), CpuMode::Real);
        assert_eq!(cpu.current_cpl(), 0);
        assert_eq!(Cpu::flat(CpuMode::V8086, 0).mode(), CpuMode::V8086);
        assert_eq!(Cpu::flat(CpuMode::V8086, 0).current_cpl(), 3);
        assert_eq!(Cpu::flat(CpuMode::Protected, 2).current_cpl(), 2);
        assert_eq!(Cpu::flat(CpuMode::Compat, 3).mode(), CpuMode::Compat);
        let long = Cpu::flat(CpuMode::Long, 0);
        assert_eq!(long.mode(), CpuMode::Long);
        assert!(long.is_ia32e());
    }

    #[test]
    fn cpl_falls_back_to_cs_rpl() {
        let mut cpu = Cpu::flat(CpuMode::Protected, 3);
        cpu.segs.ss.1.valid = false;
        assert_eq!(cpu.current_cpl(), 3);
    }

    #[test]
    fn ldt_lookup_requires_loaded_ldtr() {
        let mut cpu = Cpu::flat(CpuMode::Protected, 0);
        assert!(cpu.table_for(SegmentSelector(0x0C)).is_none());
        cpu.ldtr = (
            SegmentSelector(0x28),
            SegmentCache { base: 0x8000, limit: 0xFF, flags: DescriptorFlags::PRESENT, valid: true },
        );
        assert_eq!(cpu.table_for(SegmentSelector(0x0C)), Some(DescriptorTableReg { base: 0x8000, limit: 0xFF }));
        assert_eq!(cpu.table_for(SegmentSelector(0x08)), Some(cpu.gdtr));
    }
}
