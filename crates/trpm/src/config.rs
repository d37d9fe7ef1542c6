use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Hold NMIs back during an STI shadow as well as a MOV SS shadow.
    /// Processors differ here; a MOV SS shadow always blocks.
    pub nmi_blocked_by_sti_shadow: bool,
}
