use cpu_core::{Cpu, Memory};

use crate::config::DispatcherConfig;
use crate::dispatcher::TrapDispatcher;
use crate::error::Result;
use crate::inject::{EventInjector, InterruptController};

/// One virtual CPU: its context and the trap manager that owns its record.
#[derive(Debug, Clone)]
pub struct Vcpu {
    pub id: u32,
    pub cpu: Cpu,
    pub trpm: TrapDispatcher,
}

impl Vcpu {
    pub fn new(id: u32, cpu: Cpu, config: DispatcherConfig) -> Self {
        Self { id, cpu, trpm: TrapDispatcher::new(config) }
    }

    /// Runs one injection decision at the current instruction boundary.
    pub fn inject_event(
        &mut self,
        mem: &dyn Memory,
        pic: &mut dyn InterruptController,
        backend: &mut dyn EventInjector,
    ) -> Result<bool> {
        self.trpm.inject_event(&self.cpu, mem, pic, backend)
    }
}
