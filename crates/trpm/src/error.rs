use crate::inject::InjectorError;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TrpmError {
    #[error("no trap is active")]
    NoTrapActive,
    #[error("trap {vector:#04x} is already pending")]
    TrapAlreadyPending { vector: u8 },
    #[error("instruction length {0} outside 1..=15")]
    InvalidInstrLength(u8),
    #[error("vector {0:#04x} is not a debug trap")]
    NotDebugTrap(u8),
    #[error("triple fault")]
    TripleFault,
    #[error("injection backend: {0}")]
    Backend(#[from] InjectorError),
}

pub type Result<T> = core::result::Result<T, TrpmError>;
