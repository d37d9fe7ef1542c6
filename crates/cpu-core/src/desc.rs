//! Raw descriptor-table entries.
//!
//! Legacy entries are 8 bytes. In IA-32e mode, system descriptors (LDT, TSS)
//! and gates grow to 16 bytes; [`RawDescriptor`] tags which layout produced a
//! value so the upper half is only reachable when it was actually read.

use serde::{Deserialize, Serialize};
use crate::segments::{DescriptorFlags, SegmentSelector};

/// Type-field bits of code/data descriptors.
pub mod typ {
    pub const ACCESSED: u8 = 0x1;
    /// Writable for data, readable for code.
    pub const RW: u8 = 0x2;
    /// Expand-down for data.
    pub const DOWN: u8 = 0x4;
    /// Conforming for code.
    pub const CONF: u8 = 0x4;
    pub const CODE: u8 = 0x8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemDescType {
    Ldt,
    TssAvail16,
    TssBusy16,
    CallGate16,
    TaskGate,
    InterruptGate16,
    TrapGate16,
    TssAvail32,
    TssBusy32,
    CallGate32,
    InterruptGate32,
    TrapGate32,
    TssAvail64,
    TssBusy64,
    CallGate64,
    InterruptGate64,
    TrapGate64,
    Reserved(u8),
}

impl SystemDescType {
    /// Decodes a system-descriptor type nibble. IA-32e mode drops the 16-bit
    /// gates and task gates and widens the 32-bit forms to 64 bits.
    pub fn decode(typ: u8, long_mode: bool) -> Self {
        let typ = typ & 0x0F;
        if long_mode {
            return match typ {
                0b0010 => SystemDescType::Ldt,
                0b1001 => SystemDescType::TssAvail64,
                0b1011 => SystemDescType::TssBusy64,
                0b1100 => SystemDescType::CallGate64,
                0b1110 => SystemDescType::InterruptGate64,
                0b1111 => SystemDescType::TrapGate64,
                other => SystemDescType::Reserved(other),
            };
        }
        match typ {
            0b0001 => SystemDescType::TssAvail16,
            0b0010 => SystemDescType::Ldt,
            0b0011 => SystemDescType::TssBusy16,
            0b0100 => SystemDescType::CallGate16,
            0b0101 => SystemDescType::TaskGate,
            0b0110 => SystemDescType::InterruptGate16,
            0b0111 => SystemDescType::TrapGate16,
            0b1001 => SystemDescType::TssAvail32,
            0b1011 => SystemDescType::TssBusy32,
            0b1100 => SystemDescType::CallGate32,
            0b1110 => SystemDescType::InterruptGate32,
            0b1111 => SystemDescType::TrapGate32,
            other => SystemDescType::Reserved(other),
        }
    }

    pub fn is_gate(self) -> bool {
        matches!(
            self,
            SystemDescType::CallGate16
                | SystemDescType::CallGate32
                | SystemDescType::CallGate64
                | SystemDescType::TaskGate
                | SystemDescType::InterruptGate16
                | SystemDescType::InterruptGate32
                | SystemDescType::InterruptGate64
                | SystemDescType::TrapGate16
                | SystemDescType::TrapGate32
                | SystemDescType::TrapGate64
        )
    }

    pub fn is_interrupt_gate(self) -> bool {
        matches!(self, SystemDescType::InterruptGate16 | SystemDescType::InterruptGate32 | SystemDescType::InterruptGate64)
    }

    pub fn is_trap_gate(self) -> bool {
        matches!(self, SystemDescType::TrapGate16 | SystemDescType::TrapGate32 | SystemDescType::TrapGate64)
    }

    /// LDT and TSS descriptors: segments that live in the GDT but are not code/data.
    pub fn is_system_segment(self) -> bool {
        matches!(
            self,
            SystemDescType::Ldt
                | SystemDescType::TssAvail16
                | SystemDescType::TssBusy16
                | SystemDescType::TssAvail32
                | SystemDescType::TssBusy32
                | SystemDescType::TssAvail64
                | SystemDescType::TssBusy64
        )
    }

    fn has_wide_offset(self) -> bool {
        !matches!(
            self,
            SystemDescType::CallGate16 | SystemDescType::InterruptGate16 | SystemDescType::TrapGate16 | SystemDescType::TaskGate
        )
    }
}

/// Legacy 8-byte descriptor, kept as the little-endian quadword read from the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct X86Desc(pub u64);

impl X86Desc {
    /// Builds a segment descriptor. `access` is the P/DPL/S/type byte and
    /// `flags` the G/DB/L/AVL nibble (bit 3 = G).
    pub const fn new(base: u32, limit: u32, access: u8, flags: u8) -> Self {
        let base = base as u64;
        let limit = limit as u64;
        Self(
            (limit & 0xFFFF)
                | ((base & 0xFF_FFFF) << 16)
                | ((access as u64) << 40)
                | (((limit >> 16) & 0xF) << 48)
                | (((flags as u64) & 0xF) << 52)
                | (((base >> 24) & 0xFF) << 56),
        )
    }

    /// Builds a gate descriptor of system type `typ`.
    pub const fn gate(selector: u16, offset: u32, typ: u8, dpl: u8, present: bool, params: u8) -> Self {
        let access = ((present as u64) << 7) | (((dpl & 3) as u64) << 5) | ((typ & 0x0F) as u64);
        Self(
            ((offset as u64) & 0xFFFF)
                | ((selector as u64) << 16)
                | (((params & 0x1F) as u64) << 32)
                | (access << 40)
                | (((offset as u64) >> 16) << 48),
        )
    }

    pub fn from_bytes(raw: [u8; 8]) -> Self { Self(u64::from_le_bytes(raw)) }
    pub fn to_bytes(self) -> [u8; 8] { self.0.to_le_bytes() }

    pub fn limit_raw(self) -> u32 { ((self.0 & 0xFFFF) | (((self.0 >> 48) & 0xF) << 16)) as u32 }
    pub fn base(self) -> u32 { (((self.0 >> 16) & 0xFF_FFFF) | (((self.0 >> 56) & 0xFF) << 24)) as u32 }
    pub fn typ(self) -> u8 { ((self.0 >> 40) & 0xF) as u8 }
    /// The S bit: set for code/data, clear for system descriptors and gates.
    pub fn is_code_data(self) -> bool { (self.0 >> 44) & 1 != 0 }
    pub fn dpl(self) -> u8 { ((self.0 >> 45) & 0x3) as u8 }
    pub fn present(self) -> bool { (self.0 >> 47) & 1 != 0 }
    pub fn avl(self) -> bool { (self.0 >> 52) & 1 != 0 }
    pub fn long(self) -> bool { (self.0 >> 53) & 1 != 0 }
    pub fn default_big(self) -> bool { (self.0 >> 54) & 1 != 0 }
    pub fn granularity(self) -> bool { (self.0 >> 55) & 1 != 0 }

    /// Limit in bytes, scaled by the granularity bit.
    pub fn limit(self) -> u32 {
        let limit = self.limit_raw();
        if self.granularity() { (limit << 12) | 0xFFF } else { limit }
    }

    pub fn is_code(self) -> bool { self.is_code_data() && self.typ() & typ::CODE != 0 }
    pub fn is_data(self) -> bool { self.is_code_data() && self.typ() & typ::CODE == 0 }
    pub fn is_conforming(self) -> bool { self.is_code() && self.typ() & typ::CONF != 0 }

    pub fn system_type(self, long_mode: bool) -> Option<SystemDescType> {
        if self.is_code_data() { None } else { Some(SystemDescType::decode(self.typ(), long_mode)) }
    }

    pub fn is_gate(self, long_mode: bool) -> bool {
        self.system_type(long_mode).is_some_and(SystemDescType::is_gate)
    }

    pub fn gate_selector(self) -> SegmentSelector { SegmentSelector(((self.0 >> 16) & 0xFFFF) as u16) }
    pub fn param_count(self) -> u8 { ((self.0 >> 32) & 0x1F) as u8 }

    /// Target offset held in a legacy gate; 16-bit gates only carry the low word.
    pub fn gate_offset(self) -> u32 {
        let low = (self.0 & 0xFFFF) as u32;
        match self.system_type(false) {
            Some(t) if t.has_wide_offset() => low | ((((self.0 >> 48) & 0xFFFF) as u32) << 16),
            _ => low,
        }
    }

    /// Decoded view in the layout of a hidden segment-register cache.
    pub fn flags(self) -> DescriptorFlags {
        let typ = self.typ();
        let mut df = DescriptorFlags::empty();
        if (typ & 0x1) != 0 { df |= DescriptorFlags::A; }
        if (typ & 0x2) != 0 { df |= DescriptorFlags::RW; }
        if (typ & 0x4) != 0 { df |= DescriptorFlags::DC; }
        if (typ & 0x8) != 0 { df |= DescriptorFlags::EXEC; }
        if self.is_code_data() { df |= DescriptorFlags::TYPE; }
        if self.present() { df |= DescriptorFlags::PRESENT; }
        if self.avl() { df |= DescriptorFlags::AVL; }
        if self.long() { df |= DescriptorFlags::L; }
        if self.default_big() { df |= DescriptorFlags::DB; }
        if self.granularity() { df |= DescriptorFlags::G; }
        if (self.dpl() & 0x1) != 0 { df |= DescriptorFlags::DPL0; }
        if (self.dpl() & 0x2) != 0 { df |= DescriptorFlags::DPL1; }
        df
    }
}

/// 16-byte IA-32e system descriptor or gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct X86Desc64 {
    pub lo: X86Desc,
    pub hi: u64,
}

impl X86Desc64 {
    pub fn from_bytes(raw: [u8; 16]) -> Self {
        let mut lo = [0u8; 8];
        let mut hi = [0u8; 8];
        lo.copy_from_slice(&raw[..8]);
        hi.copy_from_slice(&raw[8..]);
        Self { lo: X86Desc::from_bytes(lo), hi: u64::from_le_bytes(hi) }
    }

    pub const fn gate(selector: u16, offset: u64, typ: u8, dpl: u8, present: bool, ist: u8) -> Self {
        let lo = X86Desc::gate(selector, offset as u32, typ, dpl, present, ist & 0x7);
        Self { lo, hi: offset >> 32 }
    }

    pub fn base(self) -> u64 { self.lo.base() as u64 | ((self.hi & 0xFFFF_FFFF) << 32) }

    pub fn gate_offset(self) -> u64 {
        (self.lo.0 & 0xFFFF) | (((self.lo.0 >> 48) & 0xFFFF) << 16) | ((self.hi & 0xFFFF_FFFF) << 32)
    }

    /// Interrupt-stack-table index of an IA-32e interrupt/trap gate.
    pub fn ist(self) -> u8 { ((self.lo.0 >> 32) & 0x7) as u8 }
}

/// A descriptor as copied out of guest memory, tagged with the layout it was read in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawDescriptor {
    Legacy(X86Desc),
    Long(X86Desc64),
}

impl Default for RawDescriptor {
    fn default() -> Self { RawDescriptor::Legacy(X86Desc::default()) }
}

impl RawDescriptor {
    /// The first eight bytes, common to both layouts.
    pub fn legacy(&self) -> X86Desc {
        match *self {
            RawDescriptor::Legacy(d) => d,
            RawDescriptor::Long(d) => d.lo,
        }
    }

    pub fn long(&self) -> Option<&X86Desc64> {
        match self {
            RawDescriptor::Long(d) => Some(d),
            RawDescriptor::Legacy(_) => None,
        }
    }

    pub fn is_long_mode(&self) -> bool { matches!(self, RawDescriptor::Long(_)) }

    pub fn system_type(&self) -> Option<SystemDescType> { self.legacy().system_type(self.is_long_mode()) }

    pub fn is_gate(&self) -> bool { self.system_type().is_some_and(SystemDescType::is_gate) }

    /// Segment base. IA-32e system descriptors contribute bits 32..63.
    pub fn base(&self) -> u64 {
        match self {
            RawDescriptor::Long(d) if !d.lo.is_code_data() => d.base(),
            _ => self.legacy().base() as u64,
        }
    }

    pub fn gate_offset(&self) -> u64 {
        match self {
            RawDescriptor::Long(d) => d.gate_offset(),
            RawDescriptor::Legacy(d) => d.gate_offset() as u64,
        }
    }
}
