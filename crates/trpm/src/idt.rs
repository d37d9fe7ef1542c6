//! Resolves the handler an event vectors to, raising the fault the
//! processor would take when the IDT entry or its target is unusable.

use cpu_core::exceptions::{idt_error_code, selector_error_code};
use cpu_core::{Cpu, CpuMode, Exception, Memory, RawDescriptor, SystemDescType, Vector, X86Desc, X86Desc64};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::event::{InterruptionType, TrapRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryTarget {
    /// IVT entry; IF is cleared on entry.
    Real { cs: u16, ip: u16 },
    Gate {
        cs: u16,
        offset: u64,
        new_cpl: u8,
        clears_if: bool,
        /// IA-32e interrupt-stack-table slot, 0 for none.
        ist: u8,
        gate: SystemDescType,
    },
    Task { tss: u16 },
}

pub fn resolve(cpu: &Cpu, mem: &dyn Memory, record: &TrapRecord) -> Result<DeliveryTarget, Exception> {
    match cpu.mode() {
        CpuMode::Real => resolve_real(cpu, mem, record.vector),
        mode => {
            if mode == CpuMode::V8086
                && InterruptionType::of(record) == InterruptionType::SoftwareInt
                && !cpu.privilege().v86_int_allowed()
            {
                debug!("INT {:#04x} in v8086 mode with IOPL {}", record.vector, cpu.rflags.iopl());
                return Err(Exception::gp(0));
            }
            resolve_gate(cpu, mem, record)
        }
    }
}

fn resolve_real(cpu: &Cpu, mem: &dyn Memory, vector: u8) -> Result<DeliveryTarget, Exception> {
    let mut entry = [0u8; 4];
    cpu.idtr.read_entry(mem, vector as u64 * 4, &mut entry).map_err(|e| {
        debug!("IVT entry {vector:#04x}: {e}");
        Exception::new(Vector::GP, None)
    })?;
    let ip = u16::from_le_bytes([entry[0], entry[1]]);
    let cs = u16::from_le_bytes([entry[2], entry[3]]);
    trace!("vector {vector:#04x} -> {cs:04x}:{ip:04x}");
    Ok(DeliveryTarget::Real { cs, ip })
}

fn read_gate(cpu: &Cpu, mem: &dyn Memory, vector: u8) -> Result<RawDescriptor, cpu_core::TableError> {
    if cpu.is_ia32e() {
        let mut raw = [0u8; 16];
        cpu.idtr.read_entry(mem, vector as u64 * 16, &mut raw)?;
        Ok(RawDescriptor::Long(X86Desc64::from_bytes(raw)))
    } else {
        let mut raw = [0u8; 8];
        cpu.idtr.read_entry(mem, vector as u64 * 8, &mut raw)?;
        Ok(RawDescriptor::Legacy(X86Desc::from_bytes(raw)))
    }
}

fn resolve_gate(cpu: &Cpu, mem: &dyn Memory, record: &TrapRecord) -> Result<DeliveryTarget, Exception> {
    let vector = record.vector;
    let ext = record.is_external();
    let idt_fault = Exception::gp(idt_error_code(vector, ext));
    let cpl = cpu.current_cpl();

    let gate = read_gate(cpu, mem, vector).map_err(|e| {
        debug!("IDT entry {vector:#04x}: {e}");
        idt_fault
    })?;
    let kind = match gate.system_type() {
        Some(kind) if kind.is_interrupt_gate() || kind.is_trap_gate() || kind == SystemDescType::TaskGate => kind,
        other => {
            debug!("IDT entry {vector:#04x} is {other:?}");
            return Err(idt_fault);
        }
    };
    let desc = gate.legacy();
    if record.is_software() && !record.icebp && cpl > desc.dpl() {
        debug!("INT {vector:#04x} from CPL {cpl} through DPL {} gate", desc.dpl());
        return Err(idt_fault);
    }
    if !desc.present() {
        return Err(Exception::np(idt_error_code(vector, ext)));
    }
    if kind == SystemDescType::TaskGate {
        return Ok(DeliveryTarget::Task { tss: desc.gate_selector().0 });
    }

    let sel = desc.gate_selector();
    if sel.is_null() {
        return Err(Exception::gp(ext as u32));
    }
    let sel_fault = Exception::gp(selector_error_code(sel.0, ext));
    let code = selm::read_descriptor(cpu, mem, sel).map_err(|_| sel_fault)?.legacy();
    if !code.is_code() || code.dpl() > cpl {
        debug!("IDT {vector:#04x} target {sel} unusable: dpl={} cpl={cpl}", code.dpl());
        return Err(sel_fault);
    }
    if !code.present() {
        return Err(Exception::np(selector_error_code(sel.0, ext)));
    }
    if cpu.is_ia32e() && (!code.long() || code.default_big()) {
        return Err(sel_fault);
    }
    let new_cpl = if code.is_conforming() { cpl } else { code.dpl() };
    if cpu.mode() == CpuMode::V8086 && new_cpl != 0 {
        return Err(sel_fault);
    }

    let offset = gate.gate_offset();
    if !cpu.is_ia32e() && offset > code.limit() as u64 {
        return Err(Exception::gp(0));
    }
    let ist = gate.long().map_or(0, |g| g.ist());
    trace!("vector {vector:#04x} -> {sel}:{offset:#x} cpl {new_cpl}");
    Ok(DeliveryTarget::Gate { cs: sel.0, offset, new_cpl, clears_if: kind.is_interrupt_gate(), ist, gate: kind })
}
