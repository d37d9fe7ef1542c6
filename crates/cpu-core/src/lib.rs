//! cpu-core: x86 descriptor model and the CPU-context / guest-memory collaborators
//! consumed by the selector and trap managers.
//!
//! This crate is part of the `x86-cpu-rust` workspace. See the repository README for an overview.
//! Repository: https://github.com/watchthelight/x86-cpu-rust

pub mod control;
pub mod cpu;
pub mod desc;
pub mod exceptions;
pub mod flags;
pub mod memory;
pub mod privilege;
pub mod segments;

pub use control::{Cr0, Efer};
pub use cpu::{Cpu, CpuMode};
pub use desc::{RawDescriptor, SystemDescType, X86Desc, X86Desc64};
pub use exceptions::{Exception, Vector};
pub use flags::RFlags;
pub use memory::{FlatMem, MemError, Memory};
pub use privilege::Privilege;
pub use segments::{DescriptorFlags, DescriptorTableReg, SegReg, SegState, SegmentCache, SegmentSelector, TableError};
