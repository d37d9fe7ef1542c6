use cpu_core::desc::typ;
use cpu_core::{Cpu, CpuMode, Memory, RawDescriptor, SegmentSelector, X86Desc};
use log::trace;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SelmError};
use crate::table::read_descriptor;
use crate::Selm;

/// The addressing mode a selector was decoded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelMode {
    Real,
    Protected,
    Long,
}

bitflags::bitflags! {
    /// Flag word reported to the debugger. Exactly one of the mode bits is set.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SelInfoFlags: u32 {
        const REAL_MODE = 1 << 0;
        const PROT_MODE = 1 << 1;
        const LONG_MODE = 1 << 2;
        const INVALID = 1 << 3;
        const HYPER = 1 << 4;
        const GATE = 1 << 5;
        const NOT_PRESENT = 1 << 6;
    }
}

bitflags::bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    struct Attrs: u8 {
        const HYPER = 1 << 0;
        const GATE = 1 << 1;
        const INVALID = 1 << 2;
        const NOT_PRESENT = 1 << 3;
    }
}

/// A decoded selector. For gates `base` is the target offset and `sel_gate`
/// the target code selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelInfo {
    pub sel: SegmentSelector,
    pub sel_gate: SegmentSelector,
    pub base: u64,
    pub limit: u64,
    pub raw: RawDescriptor,
    pub mode: SelMode,
    attrs: Attrs,
}

impl SelInfo {
    fn new(sel: SegmentSelector, mode: SelMode, raw: RawDescriptor) -> Self {
        Self { sel, sel_gate: SegmentSelector(0), base: 0, limit: 0, raw, mode, attrs: Attrs::empty() }
    }

    /// Placeholder for a selector that could not be decoded.
    pub fn invalid(sel: SegmentSelector, mode: SelMode) -> Self {
        let mut info = Self::new(sel, mode, RawDescriptor::default());
        info.attrs = Attrs::INVALID;
        info
    }

    pub fn flags(&self) -> SelInfoFlags {
        let mut flags = match self.mode {
            SelMode::Real => SelInfoFlags::REAL_MODE,
            SelMode::Protected => SelInfoFlags::PROT_MODE,
            SelMode::Long => SelInfoFlags::LONG_MODE,
        };
        for (attr, flag) in [
            (Attrs::INVALID, SelInfoFlags::INVALID),
            (Attrs::HYPER, SelInfoFlags::HYPER),
            (Attrs::GATE, SelInfoFlags::GATE),
            (Attrs::NOT_PRESENT, SelInfoFlags::NOT_PRESENT),
        ] {
            if self.attrs.contains(attr) {
                flags |= flag;
            }
        }
        flags
    }

    pub fn is_invalid(&self) -> bool { self.attrs.contains(Attrs::INVALID) }
    pub fn is_hyper(&self) -> bool { self.attrs.contains(Attrs::HYPER) }
    pub fn is_gate(&self) -> bool { self.attrs.contains(Attrs::GATE) }
    pub fn is_present(&self) -> bool { !self.attrs.contains(Attrs::NOT_PRESENT) }
    pub fn is_real_mode(&self) -> bool { self.mode == SelMode::Real }
    pub fn dpl(&self) -> u8 { self.raw.legacy().dpl() }
    pub fn is_code(&self) -> bool { self.raw.legacy().is_code() }
    pub fn is_conforming(&self) -> bool { self.raw.legacy().is_conforming() }
}

/// True for data segments that grow downwards.
pub fn is_expand_down(desc: X86Desc) -> bool {
    desc.is_code_data() && desc.typ() & (typ::DOWN | typ::CODE) == typ::DOWN
}

impl Selm {
    /// Decodes `sel` under the current mode. Not-present entries still decode.
    pub fn selector_info(&self, cpu: &Cpu, mem: &dyn Memory, sel: SegmentSelector) -> Result<SelInfo> {
        if matches!(cpu.mode(), CpuMode::Real | CpuMode::V8086) {
            let base = (sel.0 as u32) << 4;
            let raw = RawDescriptor::Legacy(X86Desc::new(base, 0xFFFF, 0x93, 0));
            let mut info = SelInfo::new(sel, SelMode::Real, raw);
            info.base = base as u64;
            info.limit = 0xFFFF;
            return Ok(info);
        }
        if sel.is_null() {
            return Err(SelmError::InvalidSelector(sel));
        }

        let raw = read_descriptor(cpu, mem, sel)?;
        let mode = if cpu.is_ia32e() { SelMode::Long } else { SelMode::Protected };
        let desc = raw.legacy();
        let mut info = SelInfo::new(sel, mode, raw);
        if raw.is_gate() {
            info.attrs |= Attrs::GATE;
            info.base = raw.gate_offset();
            info.sel_gate = desc.gate_selector();
        } else {
            info.base = raw.base();
            info.limit = desc.limit() as u64;
        }
        if !desc.present() {
            info.attrs |= Attrs::NOT_PRESENT;
        }
        if self.config().hyper.is_some_and(|h| h.contains(sel)) {
            info.attrs |= Attrs::HYPER;
        }
        trace!("selector_info {sel}: base={:#x} limit={:#x} flags={:?}", info.base, info.limit, info.flags());
        Ok(info)
    }
}
