//! dbgf: read-only selector introspection for the debugger console.
//!
//! This crate is part of the `x86-cpu-rust` workspace. See the repository README for an overview.
//! Repository: https://github.com/watchthelight/x86-cpu-rust

pub mod check;
pub mod dump;
pub mod format;
pub mod query;

pub use check::{check_code_segment, validate_code_segment_for_cpl, CsCheckError};
pub use dump::{dump_table, TableKind};
pub use format::SelInfoLine;
pub use query::{query_selector_info, QueryFlags};
