use serde::{Deserialize, Serialize};
use crate::desc::X86Desc;
use crate::memory::{MemError, Memory};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SegmentSelector(pub u16);

impl SegmentSelector {
    pub fn index(self) -> u16 { (self.0 >> 3) & 0x1FFF }
    pub fn ti(self) -> bool { (self.0 & 0x4) != 0 }
    pub fn rpl(self) -> u8 { (self.0 & 0x3) as u8 }
    /// Null selectors reference GDT entry 0, whatever their RPL.
    pub fn is_null(self) -> bool { (self.0 & !0x3) == 0 }
    pub fn with_rpl(self, rpl: u8) -> Self { Self((self.0 & !0x3) | (rpl as u16 & 0x3)) }
    /// Byte offset of the entry inside its table (8-byte units).
    pub fn table_offset(self) -> u64 { (self.index() as u64) * 8 }
    /// The selector as pushed with #GP/#NP/#TS/#SS: RPL bits cleared.
    pub fn error_code(self) -> u16 { self.0 & 0xFFFC }
}

impl core::fmt::Display for SegmentSelector {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SegmentCache {
    pub base: u64,
    pub limit: u32,
    pub flags: DescriptorFlags,
    pub valid: bool,
}

impl SegmentCache {
    pub fn from_desc(desc: X86Desc) -> Self {
        Self { base: desc.base() as u64, limit: desc.limit(), flags: desc.flags(), valid: true }
    }
    pub fn dpl(&self) -> u8 { self.flags.dpl() }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct DescriptorFlags: u32 {
        const A = 1<<0;      // Accessed
        const RW = 1<<1;     // Readable/Writable
        const DC = 1<<2;     // Direction/Conforming
        const EXEC = 1<<3;   // Executable
        const TYPE = 1<<4;   // Descriptor type (1=code/data)
        const DPL0 = 1<<5;   // DPL low bit
        const DPL1 = 1<<6;   // DPL high bit
        const PRESENT = 1<<7;// Present
        const AVL = 1<<12;   // Available for system software
        const L = 1<<13;     // 64-bit code segment
        const DB = 1<<14;    // Default operation size (0=16,1=32)
        const G = 1<<15;     // Granularity (0=byte,1=4KiB)
    }
}

impl DescriptorFlags {
    pub fn dpl(&self) -> u8 {
        (((self.bits() >> 5) & 1) | (((self.bits() >> 6) & 1) << 1)) as u8
    }
    pub fn with_dpl(self, dpl: u8) -> Self {
        let cleared = self.bits() & !(0b11 << 5);
        DescriptorFlags::from_bits_retain(cleared | ((dpl as u32 & 0b11) << 5))
    }
    pub fn present(&self) -> bool { self.contains(DescriptorFlags::PRESENT) }
    pub fn is_code(&self) -> bool { self.contains(DescriptorFlags::TYPE | DescriptorFlags::EXEC) }
    pub fn is_data(&self) -> bool { self.contains(DescriptorFlags::TYPE) && !self.contains(DescriptorFlags::EXEC) }
    pub fn is_conforming(&self) -> bool { self.is_code() && self.contains(DescriptorFlags::DC) }
    pub fn is_expand_down(&self) -> bool { self.is_data() && self.contains(DescriptorFlags::DC) }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SegReg { CS, DS, ES, FS, GS, SS }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegState {
    pub cs: (SegmentSelector, SegmentCache),
    pub ds: (SegmentSelector, SegmentCache),
    pub es: (SegmentSelector, SegmentCache),
    pub fs: (SegmentSelector, SegmentCache),
    pub gs: (SegmentSelector, SegmentCache),
    pub ss: (SegmentSelector, SegmentCache),
}

impl Default for SegState {
    fn default() -> Self {
        let null = (SegmentSelector(0), SegmentCache::default());
        Self { cs: null, ds: null, es: null, fs: null, gs: null, ss: null }
    }
}

impl SegState {
    pub fn get(&self, r: SegReg) -> (SegmentSelector, SegmentCache) {
        match r {
            SegReg::CS => self.cs,
            SegReg::DS => self.ds,
            SegReg::ES => self.es,
            SegReg::FS => self.fs,
            SegReg::GS => self.gs,
            SegReg::SS => self.ss,
        }
    }
    pub fn set(&mut self, r: SegReg, sel: SegmentSelector, cache: SegmentCache) {
        match r {
            SegReg::CS => self.cs = (sel, cache),
            SegReg::DS => self.ds = (sel, cache),
            SegReg::ES => self.es = (sel, cache),
            SegReg::FS => self.fs = (sel, cache),
            SegReg::GS => self.gs = (sel, cache),
            SegReg::SS => self.ss = (sel, cache),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("entry at {offset:#x} beyond table limit {limit:#x}")]
    BeyondLimit { offset: u64, limit: u32 },
    #[error(transparent)]
    Memory(#[from] MemError),
}

/// Base and limit of a descriptor table (GDTR, IDTR, or the hidden part of LDTR).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DescriptorTableReg {
    pub base: u64,
    pub limit: u32,
}

impl DescriptorTableReg {
    /// Copies `buf.len()` bytes at `offset` out of the table; the whole entry
    /// must lie within the limit.
    pub fn read_entry(&self, mem: &dyn Memory, offset: u64, buf: &mut [u8]) -> Result<(), TableError> {
        let last = offset.checked_add((buf.len() as u64).saturating_sub(1));
        if last.map_or(true, |last| last > self.limit as u64) {
            return Err(TableError::BeyondLimit { offset, limit: self.limit });
        }
        mem.read(self.base.wrapping_add(offset), buf)?;
        Ok(())
    }

    /// Number of whole entries of `entry_size` bytes inside the limit.
    pub fn entry_count(&self, entry_size: u64) -> u64 {
        (self.limit as u64 + 1) / entry_size
    }
}
