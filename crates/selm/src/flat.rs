use cpu_core::{Cpu, CpuMode, Memory, Privilege, SegReg, SegmentSelector, X86Desc};
use log::{debug, trace};

use crate::error::{Result, SelmError};
use crate::info::is_expand_down;
use crate::table::read_descriptor;
use crate::Selm;

/// How [`Selm::to_flat_ex`] checks privilege.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToFlatFlags {
    pub no_privilege_check: bool,
    /// Check against this CPL instead of the context's, e.g. the target ring
    /// of a call-gate transfer.
    pub explicit_cpl: Option<u8>,
}

impl ToFlatFlags {
    pub fn no_privilege_check() -> Self { Self { no_privilege_check: true, explicit_cpl: None } }
    pub fn with_cpl(cpl: u8) -> Self { Self { no_privilege_check: false, explicit_cpl: Some(cpl & 0x3) } }
}

pub(crate) fn real_mode_flat(sel: SegmentSelector, offset: u64) -> Result<u64> {
    if offset > 0xFFFF {
        return Err(SelmError::LimitExceeded { sel, offset });
    }
    Ok(((sel.0 as u64) << 4) + offset)
}

/// Expand-up segments accept `0..=limit`; expand-down ones accept
/// `limit+1..=0xFFFF` (or `0xFFFF_FFFF` when the B bit is set).
pub fn check_limit(desc: X86Desc, sel: SegmentSelector, offset: u64) -> Result<()> {
    let limit = desc.limit() as u64;
    let ok = if is_expand_down(desc) {
        let upper = if desc.default_big() { 0xFFFF_FFFF } else { 0xFFFF };
        offset > limit && offset <= upper
    } else {
        offset <= limit
    };
    if ok { Ok(()) } else { Err(SelmError::LimitExceeded { sel, offset }) }
}

impl Selm {
    /// Converts `sel:offset` to a linear address without privilege checks.
    pub fn resolve_flat(&self, cpu: &Cpu, mem: &dyn Memory, sel: SegmentSelector, offset: u64) -> Result<u64> {
        self.to_flat_ex(cpu, mem, sel, offset, ToFlatFlags::no_privilege_check())
    }

    /// Converts `sel:offset` to a linear address, walking the descriptor tables.
    pub fn to_flat_ex(&self, cpu: &Cpu, mem: &dyn Memory, sel: SegmentSelector, offset: u64, flags: ToFlatFlags) -> Result<u64> {
        let mode = cpu.mode();
        if matches!(mode, CpuMode::Real | CpuMode::V8086) {
            return real_mode_flat(sel, offset);
        }
        if sel.is_null() {
            // 64-bit code may use a null data selector; the base is zero.
            if mode == CpuMode::Long {
                return Ok(offset);
            }
            return Err(SelmError::InvalidSelector(sel));
        }

        let raw = read_descriptor(cpu, mem, sel)?;
        let desc = raw.legacy();
        if !desc.present() {
            return Err(SelmError::NotPresent(sel));
        }
        if let Some(kind) = desc.system_type(cpu.is_ia32e()) {
            if !kind.is_system_segment() {
                debug!("to_flat: selector {sel} is a {kind:?}, not a segment");
                return Err(SelmError::InvalidSelector(sel));
            }
        }

        if !flags.no_privilege_check {
            let cpl = flags.explicit_cpl.unwrap_or_else(|| cpu.current_cpl());
            let privilege = Privilege { cpl, iopl: cpu.rflags.iopl() };
            // Conforming code is readable from any ring.
            if !desc.is_conforming() && !privilege.may_access(sel.rpl(), desc.dpl()) {
                debug!("to_flat: selector {sel} dpl={} cpl={cpl} rejected", desc.dpl());
                return Err(SelmError::PrivilegeViolation(sel));
            }
        }

        if mode == CpuMode::Long && desc.is_code_data() {
            return Ok(offset);
        }
        check_limit(desc, sel, offset)?;
        let flat = raw.base().wrapping_add(offset);
        let flat = if raw.is_long_mode() && !desc.is_code_data() { flat } else { flat & 0xFFFF_FFFF };
        trace!("to_flat: {sel}:{offset:#x} -> {flat:#x}");
        Ok(flat)
    }
}

/// Converts `seg:offset` using the hidden part of a loaded segment register.
/// No checks: the cache was validated when the register was loaded.
pub fn to_flat_reg(cpu: &Cpu, seg: SegReg, offset: u64) -> u64 {
    let (sel, cache) = cpu.segs.get(seg);
    match cpu.mode() {
        CpuMode::Real | CpuMode::V8086 => ((sel.0 as u64) << 4) + (offset & 0xFFFF),
        CpuMode::Long if matches!(seg, SegReg::FS | SegReg::GS) => cache.base.wrapping_add(offset),
        CpuMode::Long => offset,
        CpuMode::Protected | CpuMode::Compat => cache.base.wrapping_add(offset) & 0xFFFF_FFFF,
    }
}
