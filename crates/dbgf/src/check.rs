use selm::{SelInfo, SelMode};

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum CsCheckError {
    #[error("selector is invalid")]
    Invalid,
    #[error("segment is not present")]
    NotPresent,
    #[error("not a code segment")]
    NotCode,
    #[error("privilege level does not permit execution")]
    InvalidRpl,
}

/// Whether code running at `cpl` may execute through the segment `info` describes.
pub fn check_code_segment(info: &SelInfo, cpl: u8) -> Result<(), CsCheckError> {
    if info.is_invalid() {
        return Err(CsCheckError::Invalid);
    }
    if info.mode == SelMode::Real {
        return Ok(());
    }
    let desc = info.raw.legacy();
    if !desc.is_code() {
        return Err(CsCheckError::NotCode);
    }
    if !desc.present() {
        return Err(CsCheckError::NotPresent);
    }
    let level = cpl.max(info.sel.rpl());
    let dpl = desc.dpl();
    let ok = if desc.is_conforming() { level >= dpl } else { level <= dpl };
    if ok { Ok(()) } else { Err(CsCheckError::InvalidRpl) }
}

pub fn validate_code_segment_for_cpl(info: &SelInfo, cpl: u8) -> bool {
    check_code_segment(info, cpl).is_ok()
}
