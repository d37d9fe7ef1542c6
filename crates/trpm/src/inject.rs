use cpu_core::exceptions::should_double_fault;
use cpu_core::{Cpu, CpuMode, Exception, Memory, Vector};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::dispatcher::TrapDispatcher;
use crate::error::{Result, TrpmError};
use crate::event::{EventKind, InterruptionInfo, TrapRecord};
use crate::idt::{self, DeliveryTarget};

/// Source of maskable external interrupts (PIC / APIC).
pub trait InterruptController {
    fn has_pending(&self) -> bool;
    /// Takes the highest-priority pending vector, or `None` on a spurious request.
    fn acknowledge(&mut self) -> Option<u8>;
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum InjectorError {
    #[error("event rejected: {0}")]
    Rejected(String),
    #[error("injection slot busy")]
    Busy,
}

/// What the backend must deliver to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInjection {
    pub record: TrapRecord,
    pub target: DeliveryTarget,
    pub info: InterruptionInfo,
}

/// Execution backend that performs the actual guest entry.
pub trait EventInjector {
    fn inject(&mut self, injection: &PendingInjection) -> core::result::Result<(), InjectorError>;
}

fn fault_record(exc: Exception) -> TrapRecord {
    let mut record = TrapRecord::new(exc.vector as u8, EventKind::HardwareException);
    record.error_code = exc.error_code;
    record
}

impl TrapDispatcher {
    /// Picks the next event and hands it to `backend`. Returns `Ok(false)`
    /// when nothing is deliverable at this boundary.
    pub fn inject_event(
        &mut self,
        cpu: &Cpu,
        mem: &dyn Memory,
        pic: &mut dyn InterruptController,
        backend: &mut dyn EventInjector,
    ) -> Result<bool> {
        let shadowed = self.interrupts_inhibited(cpu);
        let if_set = cpu.rflags.interrupts_enabled();

        let mut record = match self.take_pending() {
            Some(r) if r.kind == EventKind::HardwareInterrupt && self.nmi_latched && !self.nmi_inhibited(cpu) => {
                debug!("NMI taken ahead of interrupt {:#04x}", r.vector);
                self.defer_interrupt(r);
                self.take_latched_nmi()
            }
            Some(r) if r.kind == EventKind::HardwareInterrupt && (!if_set || shadowed) => {
                debug!("interrupt {:#04x} deferred: IF={if_set} shadow={shadowed}", r.vector);
                return Ok(false);
            }
            Some(r) if r.is_nmi() && self.nmi_inhibited(cpu) => {
                debug!("NMI deferred");
                return Ok(false);
            }
            Some(r) => r,
            None if self.has_trap() => {
                warn!("inject_event while {:?}", self.state());
                return Ok(false);
            }
            None if self.nmi_latched && !self.nmi_inhibited(cpu) => self.take_latched_nmi(),
            None if if_set && !shadowed && pic.has_pending() => match pic.acknowledge() {
                Some(vector) => {
                    let ext = TrapRecord::new(vector, EventKind::HardwareInterrupt);
                    self.replace_pending(ext);
                    ext
                }
                None => {
                    debug!("spurious interrupt request");
                    return Ok(false);
                }
            },
            None => return Ok(false),
        };

        let target = loop {
            match idt::resolve(cpu, mem, &record) {
                Ok(target) => break target,
                Err(fault) => {
                    record = self.escalate(&record, fault)?;
                    self.replace_pending(record);
                }
            }
        };
        if cpu.mode() == CpuMode::Real && record.error_code.take().is_some() {
            // Real-mode delivery pushes no error code.
            debug!("dropping error code of {:#04x} in real mode", record.vector);
        }

        let injection = PendingInjection { record, target, info: InterruptionInfo::encode(&record) };
        self.begin_injection(record);
        match backend.inject(&injection) {
            Ok(()) => {
                if record.is_nmi() {
                    self.nmi_blocked = true;
                }
                debug!("delivered {:#04x} {:?} via {:?}", record.vector, record.kind, target);
                self.finish_injection();
                Ok(true)
            }
            Err(e) => {
                warn!("backend refused {:#04x}: {e}", record.vector);
                self.replace_pending(record);
                Err(TrpmError::Backend(e))
            }
        }
    }

    fn take_latched_nmi(&mut self) -> TrapRecord {
        self.nmi_latched = false;
        let nmi = TrapRecord::new(Vector::NMI as u8, EventKind::HardwareException);
        self.replace_pending(nmi);
        nmi
    }

    /// The event that replaces `record` after its delivery raised `fault`.
    fn escalate(&mut self, record: &TrapRecord, fault: Exception) -> Result<TrapRecord> {
        let exception = record.kind == EventKind::HardwareException;
        if exception && record.vector == Vector::DF as u8 {
            warn!("fault {:?} while delivering #DF: triple fault", fault.vector);
            self.reset_trap();
            return Err(TrpmError::TripleFault);
        }
        if exception && should_double_fault(record.vector, fault.vector as u8) {
            debug!("{:#04x} during delivery of {:#04x}: double fault", fault.vector as u8, record.vector);
            return Ok(fault_record(Exception::new(Vector::DF, Some(0))));
        }
        debug!("{:#04x} during delivery of {:#04x}", fault.vector as u8, record.vector);
        Ok(fault_record(fault))
    }
}
