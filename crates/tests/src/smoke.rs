use cpu_core::{Cpu, CpuMode};
use selm::Selm;
use trpm::{DispatchState, TrapDispatcher};

#[test]
fn workspace_smoke() {
    let mut cpu = Cpu::new();
    cpu.reset();
    assert_eq!(cpu.mode(), CpuMode::Real);
    assert_eq!(cpu.current_cpl(), 0);
    assert!(Selm::default().config().hyper.is_none());
    assert_eq!(TrapDispatcher::default().state(), DispatchState::Idle);
}
