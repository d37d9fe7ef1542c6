//! trpm: trap manager. Keeps the single pending trap of each virtual CPU,
//! resolves where it vectors to and hands it to the execution backend.
//!
//! This crate is part of the `x86-cpu-rust` workspace. See the repository README for an overview.
//! Repository: https://github.com/watchthelight/x86-cpu-rust

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod idt;
pub mod inject;
pub mod vcpu;

pub use config::DispatcherConfig;
pub use dispatcher::{DispatchState, InterruptShadow, ShadowKind, TrapDispatcher, TrapSnapshot};
pub use error::{Result, TrpmError};
pub use event::{EventKind, InterruptionInfo, InterruptionType, TrapRecord};
pub use idt::DeliveryTarget;
pub use inject::{EventInjector, InjectorError, InterruptController, PendingInjection};
pub use vcpu::Vcpu;
