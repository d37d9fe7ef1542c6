//! selm: selector manager. Turns `selector:offset` pairs into linear
//! addresses and decodes GDT/LDT entries for the trap dispatcher and the
//! debugger.
//!
//! This crate is part of the `x86-cpu-rust` workspace. See the repository README for an overview.
//! Repository: https://github.com/watchthelight/x86-cpu-rust

pub mod code;
pub mod config;
pub mod error;
pub mod flat;
pub mod info;
pub mod table;

pub use code::CodeSize;
pub use config::{HyperSelectors, SelmConfig};
pub use error::{Result, SelmError};
pub use flat::{check_limit, to_flat_reg, ToFlatFlags};
pub use info::{is_expand_down, SelInfo, SelInfoFlags, SelMode};
pub use table::{read_descriptor, read_from_table};

/// Selector manager for one VM. Holds no guest state: every call reads the
/// descriptor tables afresh through the supplied CPU context and memory.
#[derive(Debug, Clone, Default)]
pub struct Selm {
    config: SelmConfig,
}

impl Selm {
    pub fn new(config: SelmConfig) -> Self { Self { config } }
    pub fn config(&self) -> &SelmConfig { &self.config }
}
