use cpu_core::exceptions::takes_priority;
use cpu_core::{Cpu, Exception, Vector};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::config::DispatcherConfig;
use crate::error::{Result, TrpmError};
use crate::event::{EventKind, InterruptionInfo, TrapRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchState {
    Idle,
    /// A trap is asserted and waiting for delivery.
    Pending,
    /// Handed to the injection backend.
    Injecting,
    /// Taken over by the host; the guest never sees it.
    ResolvedByHost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Idle,
    Pending(TrapRecord),
    Injecting(TrapRecord),
    ResolvedByHost(TrapRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShadowKind {
    Sti,
    /// `MOV SS` / `POP SS`.
    MovSs,
}

/// Blocks maskable interrupts for the instruction after STI or a stack-segment load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptShadow {
    pub kind: ShadowKind,
    /// RIP of the instruction the shadow covers.
    pub rip: u64,
}

/// Serialisable dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrapSnapshot {
    pub state: DispatchState,
    pub record: Option<TrapRecord>,
    pub nmi_latched: bool,
    pub nmi_blocked: bool,
    pub shadow: Option<InterruptShadow>,
    /// External interrupt set aside while an NMI is delivered ahead of it.
    #[serde(default)]
    pub deferred: Option<TrapRecord>,
}

/// Per-vCPU trap manager: holds at most one trap record and walks it
/// through `Idle -> Pending -> Injecting -> Idle`.
#[derive(Debug, Clone)]
pub struct TrapDispatcher {
    slot: Slot,
    config: DispatcherConfig,
    pub(crate) nmi_latched: bool,
    pub(crate) nmi_blocked: bool,
    shadow: Option<InterruptShadow>,
    deferred: Option<TrapRecord>,
}

impl Default for TrapDispatcher {
    fn default() -> Self { Self::new(DispatcherConfig::default()) }
}

impl TrapDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self { slot: Slot::Idle, config, nmi_latched: false, nmi_blocked: false, shadow: None, deferred: None }
    }

    pub fn config(&self) -> &DispatcherConfig { &self.config }

    pub fn state(&self) -> DispatchState {
        match self.slot {
            Slot::Idle => DispatchState::Idle,
            Slot::Pending(_) => DispatchState::Pending,
            Slot::Injecting(_) => DispatchState::Injecting,
            Slot::ResolvedByHost(_) => DispatchState::ResolvedByHost,
        }
    }

    /// Host-side invariant broken: fatal in debug builds, a typed error otherwise.
    fn violation(&self, op: &str, err: TrpmError) -> TrpmError {
        error!("{op}: {err} (state {:?})", self.state());
        if cfg!(debug_assertions) {
            panic!("{op}: {err}");
        }
        err
    }

    fn record(&self, op: &str) -> Result<&TrapRecord> {
        match &self.slot {
            Slot::Pending(r) | Slot::Injecting(r) | Slot::ResolvedByHost(r) => Ok(r),
            Slot::Idle => Err(self.violation(op, TrpmError::NoTrapActive)),
        }
    }

    fn pending_mut(&mut self, op: &str) -> Result<&mut TrapRecord> {
        if !matches!(self.slot, Slot::Pending(_)) {
            return Err(self.violation(op, TrpmError::NoTrapActive));
        }
        match &mut self.slot {
            Slot::Pending(r) => Ok(r),
            _ => Err(TrpmError::NoTrapActive),
        }
    }

    fn commit(&mut self, record: TrapRecord) -> Result<()> {
        match self.slot {
            Slot::Idle => {
                debug!("trap {:#04x} {:?} asserted", record.vector, record.kind);
                self.slot = Slot::Pending(record);
                Ok(())
            }
            Slot::Pending(r) | Slot::Injecting(r) | Slot::ResolvedByHost(r) => {
                warn!("trap {:#04x} asserted while {:#04x} is active", record.vector, r.vector);
                Err(TrpmError::TrapAlreadyPending { vector: r.vector })
            }
        }
    }

    pub fn assert_trap(&mut self, vector: u8, kind: EventKind) -> Result<()> {
        self.commit(TrapRecord::new(vector, kind))
    }

    pub fn assert_page_fault(&mut self, fault_address: u64, error_code: u32) -> Result<()> {
        let mut record = TrapRecord::new(Vector::PF as u8, EventKind::HardwareException);
        record.fault_address = Some(fault_address);
        record.error_code = Some(error_code);
        self.commit(record)
    }

    pub fn set_error_code(&mut self, error_code: u32) -> Result<()> {
        let record = self.pending_mut("set_error_code")?;
        if record.kind != EventKind::HardwareException {
            warn!("error code {error_code:#x} set on {:?} {:#04x}", record.kind, record.vector);
        }
        record.error_code = Some(error_code);
        Ok(())
    }

    pub fn set_fault_address(&mut self, addr: u64) -> Result<()> {
        let record = self.pending_mut("set_fault_address")?;
        if record.vector != Vector::PF as u8 {
            warn!("fault address {addr:#x} set on vector {:#04x}", record.vector);
        }
        record.fault_address = Some(addr);
        Ok(())
    }

    pub fn set_instr_len(&mut self, len: u8) -> Result<()> {
        let record = self.pending_mut("set_instr_len")?;
        if !(1..=15).contains(&len) {
            return Err(TrpmError::InvalidInstrLength(len));
        }
        record.instr_len = len;
        Ok(())
    }

    pub fn set_trap_due_to_icebp(&mut self) -> Result<()> {
        let record = self.pending_mut("set_trap_due_to_icebp")?;
        if record.vector != Vector::DB as u8 {
            return Err(TrpmError::NotDebugTrap(record.vector));
        }
        record.icebp = true;
        Ok(())
    }

    pub fn has_trap(&self) -> bool { self.slot != Slot::Idle }

    pub fn query_trap(&self) -> Result<(u8, EventKind)> {
        self.record("query_trap").map(|r| (r.vector, r.kind))
    }

    pub fn query_trap_all(&self) -> Result<TrapRecord> { self.record("query_trap_all").copied() }

    pub fn trap_no(&self) -> Result<u8> { self.record("trap_no").map(|r| r.vector) }
    pub fn error_code(&self) -> Result<Option<u32>> { self.record("error_code").map(|r| r.error_code) }
    pub fn fault_address(&self) -> Result<Option<u64>> { self.record("fault_address").map(|r| r.fault_address) }
    pub fn instr_len(&self) -> Result<u8> { self.record("instr_len").map(|r| r.instr_len) }
    pub fn is_icebp(&self) -> Result<bool> { self.record("is_icebp").map(|r| r.icebp) }

    pub fn is_software_interrupt(&self) -> Result<bool> {
        self.record("is_software_interrupt").map(TrapRecord::is_software)
    }

    /// Drops the active trap and any interrupt set aside behind it.
    pub fn reset_trap(&mut self) {
        if let Slot::Pending(r) | Slot::Injecting(r) | Slot::ResolvedByHost(r) = self.slot {
            debug!("trap {:#04x} reset", r.vector);
        }
        self.slot = Slot::Idle;
        self.deferred = None;
    }

    /// The host handles the pending trap itself instead of injecting it.
    pub fn consume_by_host(&mut self) -> Result<TrapRecord> {
        match self.slot {
            Slot::Pending(r) => {
                debug!("trap {:#04x} resolved by host", r.vector);
                self.slot = Slot::ResolvedByHost(r);
                Ok(r)
            }
            _ => Err(self.violation("consume_by_host", TrpmError::NoTrapActive)),
        }
    }

    pub fn retire(&mut self) -> Result<()> {
        match self.slot {
            Slot::ResolvedByHost(_) => {
                self.reinstate_deferred();
                Ok(())
            }
            _ => Err(self.violation("retire", TrpmError::NoTrapActive)),
        }
    }

    /// Raises a processor exception. When one is already pending the two
    /// are ordered by priority and the loser is discarded; the faulting
    /// instruction re-raises it on restart.
    pub fn raise_exception(&mut self, exc: Exception, fault_address: Option<u64>) -> Result<()> {
        let mut record = TrapRecord::new(exc.vector as u8, EventKind::HardwareException);
        record.error_code = exc.error_code;
        record.fault_address = fault_address;
        match self.slot {
            Slot::Pending(old) if old.kind == EventKind::HardwareException => {
                if takes_priority(record.vector, old.vector) {
                    debug!("exception {:#04x} supersedes pending {:#04x}", record.vector, old.vector);
                    self.slot = Slot::Pending(record);
                } else {
                    debug!("exception {:#04x} dropped behind pending {:#04x}", record.vector, old.vector);
                }
                Ok(())
            }
            _ => self.commit(record),
        }
    }

    /// Re-queues the event an IDT-vectoring exit interrupted. Returns false
    /// when the word carries nothing to re-inject.
    pub fn assert_from_interruption_info(&mut self, info: InterruptionInfo, error_code: u32, instr_len: u8, cr2: u64) -> Result<bool> {
        let Some(mut record) = info.decode(error_code, instr_len) else {
            if info.is_valid() {
                warn!("interruption info {:#010x} has a reserved type", info.0);
            }
            return Ok(false);
        };
        if record.vector == Vector::PF as u8 && record.kind == EventKind::HardwareException {
            record.fault_address = Some(cr2);
        }
        self.commit(record)?;
        Ok(true)
    }

    pub fn assert_nmi(&mut self) {
        debug!("NMI latched");
        self.nmi_latched = true;
    }

    pub fn nmi_latched(&self) -> bool { self.nmi_latched }
    pub fn nmi_blocked(&self) -> bool { self.nmi_blocked }

    /// IRET ends NMI blocking.
    pub fn nmi_unblocked(&mut self) { self.nmi_blocked = false; }

    pub fn set_interrupt_shadow(&mut self, kind: ShadowKind, rip: u64) {
        self.shadow = Some(InterruptShadow { kind, rip });
    }

    pub fn interrupt_shadow(&self) -> Option<InterruptShadow> { self.shadow }

    pub fn retire_instruction(&mut self) { self.shadow = None; }

    fn active_shadow(&self, cpu: &Cpu) -> Option<ShadowKind> {
        self.shadow.filter(|s| s.rip == cpu.rip).map(|s| s.kind)
    }

    pub fn interrupts_inhibited(&self, cpu: &Cpu) -> bool { self.active_shadow(cpu).is_some() }

    pub fn nmi_inhibited(&self, cpu: &Cpu) -> bool {
        self.nmi_blocked
            || match self.active_shadow(cpu) {
                Some(ShadowKind::MovSs) => true,
                Some(ShadowKind::Sti) => self.config.nmi_blocked_by_sti_shadow,
                None => false,
            }
    }

    pub fn snapshot(&self) -> TrapSnapshot {
        let record = match self.slot {
            Slot::Idle => None,
            Slot::Pending(r) | Slot::Injecting(r) | Slot::ResolvedByHost(r) => Some(r),
        };
        TrapSnapshot {
            state: self.state(),
            record,
            nmi_latched: self.nmi_latched,
            nmi_blocked: self.nmi_blocked,
            shadow: self.shadow,
            deferred: self.deferred,
        }
    }

    /// Loads saved state. An in-flight injection comes back as pending.
    pub fn restore(&mut self, snap: &TrapSnapshot) -> Result<()> {
        self.slot = match (snap.state, snap.record) {
            (DispatchState::Idle, _) => Slot::Idle,
            (DispatchState::Pending | DispatchState::Injecting, Some(r)) => Slot::Pending(r),
            (DispatchState::ResolvedByHost, Some(r)) => Slot::ResolvedByHost(r),
            (state, None) => {
                warn!("snapshot in state {state:?} carries no record");
                return Err(TrpmError::NoTrapActive);
            }
        };
        self.nmi_latched = snap.nmi_latched;
        self.nmi_blocked = snap.nmi_blocked;
        self.shadow = snap.shadow;
        self.deferred = snap.deferred;
        Ok(())
    }

    pub(crate) fn take_pending(&self) -> Option<TrapRecord> {
        match self.slot {
            Slot::Pending(r) => Some(r),
            _ => None,
        }
    }

    pub(crate) fn replace_pending(&mut self, record: TrapRecord) { self.slot = Slot::Pending(record); }
    pub(crate) fn begin_injection(&mut self, record: TrapRecord) { self.slot = Slot::Injecting(record); }
    pub(crate) fn finish_injection(&mut self) { self.reinstate_deferred(); }

    /// Parks a pending external interrupt so an NMI can use the slot.
    pub(crate) fn defer_interrupt(&mut self, record: TrapRecord) {
        self.deferred = Some(record);
        self.slot = Slot::Idle;
    }

    fn reinstate_deferred(&mut self) {
        self.slot = match self.deferred.take() {
            Some(r) => {
                debug!("interrupt {:#04x} pending again", r.vector);
                Slot::Pending(r)
            }
            None => Slot::Idle,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_then_query_roundtrip() {
        let mut trpm = TrapDispatcher::default();
        trpm.assert_trap(0x0D, EventKind::HardwareException).unwrap();
        assert_eq!(trpm.query_trap(), Ok((0x0D, EventKind::HardwareException)));
        let all = trpm.query_trap_all().unwrap();
        assert_eq!(all.error_code, None);
        assert_eq!(all.fault_address, None);
        assert_eq!(all.instr_len, 0);
    }

    #[test]
    fn second_assert_is_rejected() {
        let mut trpm = TrapDispatcher::default();
        trpm.assert_trap(0x20, EventKind::HardwareInterrupt).unwrap();
        assert_eq!(trpm.assert_trap(0x0E, EventKind::HardwareException), Err(TrpmError::TrapAlreadyPending { vector: 0x20 }));
        assert_eq!(trpm.trap_no(), Ok(0x20));
    }

    #[test]
    fn page_fault_scenario() {
        let mut trpm = TrapDispatcher::default();
        trpm.assert_trap(14, EventKind::HardwareException).unwrap();
        trpm.set_error_code(0x2).unwrap();
        trpm.set_fault_address(0xDEAD_B000).unwrap();
        let r = trpm.query_trap_all().unwrap();
        assert_eq!((r.vector, r.kind, r.error_code, r.fault_address), (14, EventKind::HardwareException, Some(2), Some(0xDEAD_B000)));

        trpm.reset_trap();
        trpm.assert_page_fault(0x1000, 0x6).unwrap();
        assert_eq!(trpm.fault_address(), Ok(Some(0x1000)));
        assert_eq!(trpm.error_code(), Ok(Some(0x6)));
    }

    #[test]
    fn reset_is_idempotent() {
        let mut trpm = TrapDispatcher::default();
        trpm.reset_trap();
        assert_eq!(trpm.state(), DispatchState::Idle);
        trpm.assert_trap(3, EventKind::SoftwareInterrupt).unwrap();
        trpm.reset_trap();
        trpm.reset_trap();
        assert!(!trpm.has_trap());
        assert!(trpm.assert_trap(4, EventKind::SoftwareInterrupt).is_ok());
    }

    #[test]
    fn setters_validate_arguments() {
        let mut trpm = TrapDispatcher::default();
        trpm.assert_trap(0x80, EventKind::SoftwareInterrupt).unwrap();
        assert_eq!(trpm.set_instr_len(0), Err(TrpmError::InvalidInstrLength(0)));
        assert_eq!(trpm.set_instr_len(16), Err(TrpmError::InvalidInstrLength(16)));
        trpm.set_instr_len(2).unwrap();
        assert_eq!(trpm.instr_len(), Ok(2));
        assert_eq!(trpm.set_trap_due_to_icebp(), Err(TrpmError::NotDebugTrap(0x80)));
        assert_eq!(trpm.is_software_interrupt(), Ok(true));

        trpm.reset_trap();
        trpm.assert_trap(1, EventKind::SoftwareInterrupt).unwrap();
        trpm.set_trap_due_to_icebp().unwrap();
        assert_eq!(trpm.is_icebp(), Ok(true));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "no trap is active"))]
    fn query_while_idle_is_a_contract_violation() {
        let trpm = TrapDispatcher::default();
        assert_eq!(trpm.query_trap(), Err(TrpmError::NoTrapActive));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "set_error_code"))]
    fn setter_while_idle_is_a_contract_violation() {
        let mut trpm = TrapDispatcher::default();
        assert_eq!(trpm.set_error_code(0), Err(TrpmError::NoTrapActive));
    }

    #[test]
    fn host_consumption() {
        let mut trpm = TrapDispatcher::default();
        trpm.assert_trap(6, EventKind::HardwareException).unwrap();
        let r = trpm.consume_by_host().unwrap();
        assert_eq!(r.vector, 6);
        assert_eq!(trpm.state(), DispatchState::ResolvedByHost);
        assert_eq!(trpm.query_trap(), Ok((6, EventKind::HardwareException)));
        trpm.retire().unwrap();
        assert_eq!(trpm.state(), DispatchState::Idle);
    }

    #[test]
    fn simultaneous_exceptions_keep_higher_priority() {
        let mut trpm = TrapDispatcher::default();
        trpm.raise_exception(Exception::gp(0), None).unwrap();
        trpm.raise_exception(Exception::new(Vector::DB, None), None).unwrap();
        assert_eq!(trpm.trap_no(), Ok(1));
        trpm.raise_exception(Exception::new(Vector::PF, Some(4)), Some(0x2000)).unwrap();
        assert_eq!(trpm.trap_no(), Ok(1));

        trpm.reset_trap();
        trpm.raise_exception(Exception::new(Vector::PF, Some(4)), Some(0x2000)).unwrap();
        trpm.raise_exception(Exception::gp(0), None).unwrap();
        assert_eq!(trpm.query_trap_all().unwrap().vector, 13);
    }

    #[test]
    fn reinject_from_interruption_info() {
        let mut trpm = TrapDispatcher::default();
        assert_eq!(trpm.assert_from_interruption_info(InterruptionInfo(0x8000_0B0E), 0x6, 0, 0xC0DE_0000), Ok(true));
        let r = trpm.query_trap_all().unwrap();
        assert_eq!(r.fault_address, Some(0xC0DE_0000));
        assert_eq!(r.error_code, Some(6));
        trpm.reset_trap();
        assert_eq!(trpm.assert_from_interruption_info(InterruptionInfo(0), 0, 0, 0), Ok(false));
        assert!(!trpm.has_trap());
    }

    #[test]
    fn interrupt_shadow_tracks_rip() {
        let mut cpu = Cpu::flat(cpu_core::CpuMode::Protected, 0);
        cpu.rip = 0x100;
        let mut trpm = TrapDispatcher::default();
        trpm.set_interrupt_shadow(ShadowKind::Sti, 0x100);
        assert!(trpm.interrupts_inhibited(&cpu));
        assert!(!trpm.nmi_inhibited(&cpu));
        cpu.rip = 0x101;
        assert!(!trpm.interrupts_inhibited(&cpu));

        trpm.set_interrupt_shadow(ShadowKind::MovSs, 0x101);
        assert!(trpm.nmi_inhibited(&cpu));
        trpm.retire_instruction();
        assert!(!trpm.nmi_inhibited(&cpu));

        let mut strict = TrapDispatcher::new(DispatcherConfig { nmi_blocked_by_sti_shadow: true });
        strict.set_interrupt_shadow(ShadowKind::Sti, 0x101);
        assert!(strict.nmi_inhibited(&cpu));
    }

    #[test]
    fn snapshot_restores_state() {
        let mut trpm = TrapDispatcher::default();
        trpm.assert_page_fault(0xFFFF_F000, 2).unwrap();
        trpm.assert_nmi();
        let snap = trpm.snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        let back: TrapSnapshot = serde_json::from_str(&json).unwrap();

        let mut other = TrapDispatcher::default();
        other.restore(&back).unwrap();
        assert_eq!(other.snapshot(), snap);

        let broken = TrapSnapshot { state: DispatchState::Pending, record: None, ..snap };
        assert_eq!(other.restore(&broken), Err(TrpmError::NoTrapActive));
    }
}
