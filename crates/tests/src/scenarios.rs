use cpu_core::{Cpu, CpuMode, Exception, Memory, SegReg, SegmentSelector, Vector, X86Desc};
use dbgf::{check_code_segment, query_selector_info, validate_code_segment_for_cpl, CsCheckError, QueryFlags, SelInfoLine};
use selm::{is_expand_down, SelInfoFlags, Selm, SelmError, ToFlatFlags};
use trpm::{
    DispatchState, DispatcherConfig, EventInjector, EventKind, InjectorError, InterruptController, PendingInjection,
    TrapSnapshot, Vcpu,
};

use crate::guest::{init_logging, protected, GDT};

#[derive(Default)]
struct NoIrq;

impl InterruptController for NoIrq {
    fn has_pending(&self) -> bool { false }
    fn acknowledge(&mut self) -> Option<u8> { None }
}

#[derive(Default)]
struct Backend(Vec<PendingInjection>);

impl EventInjector for Backend {
    fn inject(&mut self, injection: &PendingInjection) -> Result<(), InjectorError> {
        self.0.push(*injection);
        Ok(())
    }
}

#[test]
fn flat_resolution_of_data_selector() {
    let (cpu, mem) = protected(0);
    let selm = Selm::default();
    let sel = SegmentSelector(0x08);
    assert_eq!(selm.resolve_flat(&cpu, &mem, sel, 0x500), Ok(0x1500));
    assert_eq!(
        selm.resolve_flat(&cpu, &mem, sel, 0x1_0000_0000),
        Err(SelmError::LimitExceeded { sel, offset: 0x1_0000_0000 })
    );
}

#[test]
fn base_is_reassembled_from_split_fields() {
    let (mut cpu, mut mem) = protected(0);
    mem.write(GDT + 0x30, &X86Desc::new(0x1234_5678, 0xFF, 0x92, 0).to_bytes()).unwrap();
    cpu.gdtr.limit = 0x37;
    let info = Selm::default().selector_info(&cpu, &mem, SegmentSelector(0x30)).unwrap();
    assert_eq!(info.base, 0x1234_5678);
    assert_eq!(info.limit, 0xFF);
    assert!(!is_expand_down(info.raw.legacy()));
}

#[test]
fn not_present_segment_is_delivered_as_np() {
    init_logging();
    let (cpu, mem) = protected(0);
    let selm = Selm::default();
    let sel = SegmentSelector(0x20);

    let info = selm.selector_info(&cpu, &mem, sel).unwrap();
    assert!(info.flags().contains(SelInfoFlags::NOT_PRESENT));
    let err = selm.resolve_flat(&cpu, &mem, sel, 0).unwrap_err();
    assert_eq!(err, SelmError::NotPresent(sel));

    let mut vcpu = Vcpu::new(0, cpu, DispatcherConfig::default());
    vcpu.trpm.raise_exception(err.to_exception(SegReg::DS), None).unwrap();
    let mut backend = Backend::default();
    assert_eq!(vcpu.inject_event(&mem, &mut NoIrq, &mut backend), Ok(true));
    let delivered = backend.0[0];
    assert_eq!(delivered.record.vector, Vector::NP as u8);
    assert_eq!(delivered.record.error_code, Some(0x20));
    assert_eq!(delivered.info.0, 0x8000_0B0B);
    assert_eq!(vcpu.trpm.state(), DispatchState::Idle);
}

#[test]
fn page_fault_query() {
    let (cpu, _) = protected(0);
    let mut vcpu = Vcpu::new(1, cpu, DispatcherConfig::default());
    vcpu.trpm.assert_trap(14, EventKind::HardwareException).unwrap();
    vcpu.trpm.set_error_code(0x2).unwrap();
    vcpu.trpm.set_fault_address(0xDEAD_B000).unwrap();
    let r = vcpu.trpm.query_trap_all().unwrap();
    assert_eq!(r.vector, 14);
    assert_eq!(r.kind, EventKind::HardwareException);
    assert_eq!(r.error_code, Some(0x2));
    assert_eq!(r.fault_address, Some(0xDEAD_B000));
}

#[test]
fn reset_and_roundtrip() {
    let (cpu, _) = protected(0);
    let mut vcpu = Vcpu::new(0, cpu, DispatcherConfig::default());
    vcpu.trpm.reset_trap();
    vcpu.trpm.reset_trap();
    assert!(!vcpu.trpm.has_trap());
    vcpu.trpm.assert_trap(0x21, EventKind::HardwareInterrupt).unwrap();
    assert_eq!(vcpu.trpm.query_trap(), Ok((0x21, EventKind::HardwareInterrupt)));
    assert_eq!(vcpu.trpm.error_code(), Ok(None));
    assert_eq!(vcpu.trpm.fault_address(), Ok(None));
}

#[test]
fn call_gate_classification() {
    let (cpu, mem) = protected(3);
    let selm = Selm::default();
    let info = query_selector_info(&selm, &cpu, &mem, SegmentSelector(0x2B), QueryFlags::default());
    assert!(info.is_gate());
    assert_eq!(info.sel_gate, SegmentSelector(0x10));
    assert_eq!(info.base, 0x0040_1000);
    assert_eq!(check_code_segment(&info, 3), Err(CsCheckError::NotCode));
    assert_eq!(SelInfoLine(&info).to_string(), "002b Call32  Sel:Off=0010:00401000 DPL=3 P  Args=0");
    // A gate is not a segment.
    assert_eq!(selm.resolve_flat(&cpu, &mem, SegmentSelector(0x2B), 0), Err(SelmError::InvalidSelector(SegmentSelector(0x2B))));
}

#[test]
fn mode_bits_are_exclusive() {
    let modes = SelInfoFlags::REAL_MODE | SelInfoFlags::PROT_MODE | SelInfoFlags::LONG_MODE;
    let (prot, mem) = protected(0);
    let selm = Selm::default();
    let mut long = Cpu::flat(CpuMode::Long, 0);
    long.gdtr = prot.gdtr;
    let real = Cpu::flat(CpuMode::Real, 0);
    for cpu in [&prot, &long, &real] {
        for sel in [0x00, 0x08, 0x10, 0x20, 0x28, 0x99] {
            let info = query_selector_info(&selm, cpu, &mem, SegmentSelector(sel), QueryFlags::default());
            assert_eq!((info.flags() & modes).bits().count_ones(), 1, "{cpu:?} {sel:#x}");
        }
    }
}

#[test]
fn code_segment_checks_agree() {
    let (cpu, mem) = protected(3);
    let selm = Selm::default();
    let user = SegmentSelector(0x1B);
    let kernel = SegmentSelector(0x10);
    assert_eq!(selm.validate_cs_addr(&cpu, &mem, cpu.rflags, user, user, None, 0x1000), Ok(0x1000));
    assert!(validate_code_segment_for_cpl(&query_selector_info(&selm, &cpu, &mem, user, QueryFlags::default()), 3));

    assert_eq!(
        selm.validate_cs_addr(&cpu, &mem, cpu.rflags, user, kernel, None, 0x1000),
        Err(SelmError::PrivilegeViolation(kernel))
    );
    assert!(!validate_code_segment_for_cpl(&query_selector_info(&selm, &cpu, &mem, kernel, QueryFlags::default()), 3));
    // Privilege checks on data reads follow max(CPL, RPL) <= DPL.
    assert!(selm.to_flat_ex(&cpu, &mem, SegmentSelector(0x0B), 0, ToFlatFlags::default()).is_err());
    assert!(selm.to_flat_ex(&cpu, &mem, SegmentSelector(0x0B), 0, ToFlatFlags::no_privilege_check()).is_ok());
}

#[test]
fn user_int_through_kernel_gate_faults() {
    init_logging();
    let (cpu, mem) = protected(3);
    let mut vcpu = Vcpu::new(0, cpu, DispatcherConfig::default());
    vcpu.trpm.assert_trap(0x30, EventKind::SoftwareInterrupt).unwrap();
    vcpu.trpm.set_instr_len(2).unwrap();
    let mut backend = Backend::default();
    assert_eq!(vcpu.inject_event(&mem, &mut NoIrq, &mut backend), Ok(true));
    let r = backend.0[0].record;
    assert_eq!(Exception::new(Vector::from_u8(r.vector).unwrap(), r.error_code), Exception::gp(0x182));
}

#[test]
fn dispatcher_state_survives_snapshot() {
    let (cpu, _) = protected(0);
    let mut vcpu = Vcpu::new(0, cpu.clone(), DispatcherConfig::default());
    vcpu.trpm.assert_page_fault(0x7000, 0x4).unwrap();
    let json = serde_json::to_string(&vcpu.trpm.snapshot()).unwrap();

    let snap: TrapSnapshot = serde_json::from_str(&json).unwrap();
    let mut restored = Vcpu::new(1, cpu, DispatcherConfig::default());
    restored.trpm.restore(&snap).unwrap();
    assert_eq!(restored.trpm.query_trap_all(), vcpu.trpm.query_trap_all());
}
