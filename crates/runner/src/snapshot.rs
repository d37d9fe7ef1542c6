use std::path::Path;

use anyhow::{Context, Result};
use cpu_core::{Cpu, FlatMem, Memory};
use selm::SelmConfig;
use serde::{Deserialize, Serialize};
use trpm::{DispatcherConfig, TrapSnapshot};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemRegion {
    pub addr: u64,
    pub bytes: Vec<u8>,
}

/// A guest captured to JSON: CPU context, the memory the tables live in,
/// and optional manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestSnapshot {
    pub cpu: Cpu,
    #[serde(default)]
    pub memory: Vec<MemRegion>,
    #[serde(default)]
    pub selm: SelmConfig,
    #[serde(default)]
    pub trpm: DispatcherConfig,
    /// Dispatcher state to resume from.
    #[serde(default)]
    pub trap: Option<TrapSnapshot>,
}

impl GuestSnapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Guest memory large enough to hold every region.
    pub fn memory(&self) -> Result<FlatMem> {
        let end = self
            .memory
            .iter()
            .map(|r| r.addr.checked_add(r.bytes.len() as u64).context("memory region wraps"))
            .try_fold(0u64, |acc, end| end.map(|e| acc.max(e)))?;
        let size = usize::try_from(end).context("memory image too large")?;
        let mut mem = FlatMem::new(size);
        for region in &self.memory {
            mem.write(region.addr, &region.bytes)
                .with_context(|| format!("loading region at {:#x}", region.addr))?;
        }
        log::debug!("loaded {} regions, {size:#x} bytes", self.memory.len());
        Ok(mem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpu_core::CpuMode;

    #[test]
    fn regions_are_loaded_and_defaults_apply() {
        let json = r#"{
            "cpu": { "rip": 16, "gdtr": { "base": 256, "limit": 15 } },
            "memory": [ { "addr": 264, "bytes": [255, 255, 0, 0, 0, 154, 207, 0] } ]
        }"#;
        let guest: GuestSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(guest.cpu.mode(), CpuMode::Real);
        assert!(guest.selm.hyper.is_none());
        assert!(guest.trap.is_none());
        let mem = guest.memory().unwrap();
        assert_eq!(mem.len(), 272);
        let mut buf = [0u8; 1];
        mem.read(269, &mut buf).unwrap();
        assert_eq!(buf[0], 0x9A);
    }
}
