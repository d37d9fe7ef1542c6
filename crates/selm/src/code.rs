use cpu_core::{Cpu, DescriptorFlags, Efer, Memory, RFlags, SegmentCache, SegmentSelector};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SelmError};
use crate::table::read_descriptor;
use crate::Selm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeSize {
    Bits16,
    Bits32,
    Bits64,
}

impl CodeSize {
    fn of(cpu: &Cpu, flags: DescriptorFlags) -> Self {
        if cpu.efer.contains(Efer::LMA) && flags.contains(DescriptorFlags::L) {
            CodeSize::Bits64
        } else if flags.contains(DescriptorFlags::DB) {
            CodeSize::Bits32
        } else {
            CodeSize::Bits16
        }
    }
}

impl Selm {
    fn code_cache(&self, cpu: &Cpu, mem: &dyn Memory, sel: SegmentSelector) -> Result<SegmentCache> {
        if sel.is_null() {
            return Err(SelmError::InvalidSelector(sel));
        }
        let desc = read_descriptor(cpu, mem, sel)?.legacy();
        Ok(SegmentCache::from_desc(desc))
    }

    /// Checks that `code_sel:addr` is a valid branch target for a caller
    /// running with `cpl_sel` and returns the flat address.
    #[allow(clippy::too_many_arguments)]
    pub fn validate_cs_addr(
        &self,
        cpu: &Cpu,
        mem: &dyn Memory,
        eflags: RFlags,
        cpl_sel: SegmentSelector,
        code_sel: SegmentSelector,
        hidden: Option<&SegmentCache>,
        addr: u64,
    ) -> Result<u64> {
        if cpu.mode() == cpu_core::CpuMode::Real || eflags.contains(RFlags::VM) {
            return Ok(((code_sel.0 as u64) << 4) + (addr & 0xFFFF));
        }

        let cache = match hidden {
            Some(cache) if cache.valid => *cache,
            _ => self.code_cache(cpu, mem, code_sel)?,
        };
        if !cache.flags.is_code() {
            debug!("validate_cs: {code_sel} is not a code segment");
            return Err(SelmError::InvalidSelector(code_sel));
        }
        if !cache.flags.present() {
            return Err(SelmError::NotPresent(code_sel));
        }

        let level = cpl_sel.rpl().max(code_sel.rpl());
        let dpl = cache.dpl();
        let allowed = if cache.flags.is_conforming() { level >= dpl } else { level <= dpl };
        if !allowed {
            debug!("validate_cs: {code_sel} level={level} dpl={dpl} rejected");
            return Err(SelmError::PrivilegeViolation(code_sel));
        }

        if CodeSize::of(cpu, cache.flags) == CodeSize::Bits64 {
            return Ok(addr);
        }
        if addr > cache.limit as u64 {
            return Err(SelmError::LimitExceeded { sel: code_sel, offset: addr });
        }
        Ok(cache.base.wrapping_add(addr) & 0xFFFF_FFFF)
    }

    /// Default operand size of the code segment `sel`. Uses the hidden CS
    /// cache when `sel` is the loaded CS.
    pub fn code_bitness(&self, cpu: &Cpu, mem: &dyn Memory, sel: SegmentSelector) -> Result<CodeSize> {
        match cpu.mode() {
            cpu_core::CpuMode::Real | cpu_core::CpuMode::V8086 => return Ok(CodeSize::Bits16),
            _ => {}
        }
        let (cs, cs_cache) = cpu.segs.cs;
        let cache = if cs == sel && cs_cache.valid { cs_cache } else { self.code_cache(cpu, mem, sel)? };
        Ok(CodeSize::of(cpu, cache.flags))
    }
}
