use cpu_core::{Cpu, DescriptorTableReg, Memory, RawDescriptor, SegmentSelector, X86Desc, X86Desc64};
use log::trace;

use crate::error::{Result, SelmError};

/// Reads the entry `sel` references from the GDT or the loaded LDT.
pub fn read_descriptor(cpu: &Cpu, mem: &dyn Memory, sel: SegmentSelector) -> Result<RawDescriptor> {
    let table = cpu.table_for(sel).ok_or_else(|| {
        trace!("selector {sel} references the LDT but none is loaded");
        SelmError::InvalidSelector(sel)
    })?;
    read_from_table(mem, table, sel, cpu.is_ia32e())
}

/// Copies one entry out of `table`. In IA-32e mode, system descriptors and
/// gates take two slots and come back as [`RawDescriptor::Long`]; code and
/// data entries keep the eight-byte layout.
pub fn read_from_table(mem: &dyn Memory, table: DescriptorTableReg, sel: SegmentSelector, ia32e: bool) -> Result<RawDescriptor> {
    let offset = sel.table_offset();
    let mut lo = [0u8; 8];
    table.read_entry(mem, offset, &mut lo).map_err(|e| {
        trace!("selector {sel}: {e}");
        SelmError::InvalidSelector(sel)
    })?;
    let lo = X86Desc::from_bytes(lo);
    if !ia32e || lo.is_code_data() {
        return Ok(RawDescriptor::Legacy(lo));
    }
    let mut hi = [0u8; 8];
    table.read_entry(mem, offset + 8, &mut hi).map_err(|e| {
        trace!("selector {sel}: upper half: {e}");
        SelmError::InvalidSelector(sel)
    })?;
    Ok(RawDescriptor::Long(X86Desc64 { lo, hi: u64::from_le_bytes(hi) }))
}
