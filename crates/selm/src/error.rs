use cpu_core::exceptions::selector_error_code;
use cpu_core::{Exception, SegReg, SegmentSelector};

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum SelmError {
    #[error("invalid selector {0}")]
    InvalidSelector(SegmentSelector),
    #[error("selector {0} references a segment that is not present")]
    NotPresent(SegmentSelector),
    #[error("privilege check failed for selector {0}")]
    PrivilegeViolation(SegmentSelector),
    #[error("offset {offset:#x} is outside the limit of selector {sel}")]
    LimitExceeded { sel: SegmentSelector, offset: u64 },
}

pub type Result<T> = core::result::Result<T, SelmError>;

impl SelmError {
    pub fn selector(&self) -> SegmentSelector {
        match *self {
            SelmError::InvalidSelector(sel)
            | SelmError::NotPresent(sel)
            | SelmError::PrivilegeViolation(sel)
            | SelmError::LimitExceeded { sel, .. } => sel,
        }
    }

    /// The guest exception a failed load or access through `seg` raises.
    pub fn to_exception(&self, seg: SegReg) -> Exception {
        let stack = seg == SegReg::SS;
        match *self {
            SelmError::NotPresent(sel) if stack => Exception::ss(selector_error_code(sel.0, false)),
            SelmError::NotPresent(sel) => Exception::np(selector_error_code(sel.0, false)),
            SelmError::LimitExceeded { .. } if stack => Exception::ss(0),
            SelmError::LimitExceeded { .. } => Exception::gp(0),
            SelmError::InvalidSelector(sel) | SelmError::PrivilegeViolation(sel) => {
                Exception::gp(selector_error_code(sel.0, false))
            }
        }
    }
}
