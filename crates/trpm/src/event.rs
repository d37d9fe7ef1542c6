//! The trap record and its VMX interruption-information encoding.

use cpu_core::Vector;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Faults, traps, aborts and NMI raised by the processor itself.
    HardwareException,
    /// Vectors acknowledged from the interrupt controller.
    HardwareInterrupt,
    /// `INT n`, `INT3`, `INTO` and `ICEBP`.
    SoftwareInterrupt,
}

/// The event a virtual CPU is about to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrapRecord {
    pub vector: u8,
    pub kind: EventKind,
    pub error_code: Option<u32>,
    /// Linear address reported in CR2 for #PF.
    pub fault_address: Option<u64>,
    /// Length of the instruction that raised a software event, for the return address.
    pub instr_len: u8,
    pub icebp: bool,
}

impl TrapRecord {
    pub fn new(vector: u8, kind: EventKind) -> Self {
        Self { vector, kind, error_code: None, fault_address: None, instr_len: 0, icebp: false }
    }

    pub fn is_nmi(&self) -> bool {
        self.vector == Vector::NMI as u8 && self.kind == EventKind::HardwareException
    }

    pub fn is_software(&self) -> bool { self.kind == EventKind::SoftwareInterrupt }

    /// External events set EXT in delivery error codes.
    pub fn is_external(&self) -> bool { self.kind == EventKind::HardwareInterrupt || self.is_nmi() }
}

/// Interruption type, bits 8..10 of the interruption-information field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum InterruptionType {
    ExternalInt = 0,
    Nmi = 2,
    HardwareException = 3,
    SoftwareInt = 4,
    /// ICEBP (`INT1`).
    PrivSoftwareException = 5,
    /// `INT3` and `INTO`.
    SoftwareException = 6,
}

impl InterruptionType {
    pub fn from_bits(bits: u32) -> Option<Self> {
        Some(match bits & 0x7 {
            0 => InterruptionType::ExternalInt,
            2 => InterruptionType::Nmi,
            3 => InterruptionType::HardwareException,
            4 => InterruptionType::SoftwareInt,
            5 => InterruptionType::PrivSoftwareException,
            6 => InterruptionType::SoftwareException,
            _ => return None,
        })
    }

    pub fn of(record: &TrapRecord) -> Self {
        match record.kind {
            EventKind::HardwareInterrupt => InterruptionType::ExternalInt,
            EventKind::HardwareException if record.is_nmi() => InterruptionType::Nmi,
            EventKind::HardwareException => InterruptionType::HardwareException,
            EventKind::SoftwareInterrupt if record.icebp => InterruptionType::PrivSoftwareException,
            EventKind::SoftwareInterrupt if record.vector == Vector::BP as u8 || record.vector == Vector::OF as u8 => {
                InterruptionType::SoftwareException
            }
            EventKind::SoftwareInterrupt => InterruptionType::SoftwareInt,
        }
    }
}

/// VM-entry / IDT-vectoring interruption-information word.
///
/// | Bits  | Field                |
/// |-------|----------------------|
/// | 0..7  | vector               |
/// | 8..10 | interruption type    |
/// | 11    | deliver error code   |
/// | 31    | valid                |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterruptionInfo(pub u32);

impl InterruptionInfo {
    pub const ERROR_CODE_VALID: u32 = 1 << 11;
    pub const VALID: u32 = 1 << 31;

    pub fn encode(record: &TrapRecord) -> Self {
        let mut bits = record.vector as u32 | ((InterruptionType::of(record) as u32) << 8) | Self::VALID;
        if record.error_code.is_some() && record.kind == EventKind::HardwareException {
            bits |= Self::ERROR_CODE_VALID;
        }
        Self(bits)
    }

    pub fn vector(self) -> u8 { (self.0 & 0xFF) as u8 }
    pub fn typ(self) -> Option<InterruptionType> { InterruptionType::from_bits(self.0 >> 8) }
    pub fn is_valid(self) -> bool { self.0 & Self::VALID != 0 }
    pub fn has_error_code(self) -> bool { self.0 & Self::ERROR_CODE_VALID != 0 }

    /// Rebuilds the record an IDT-vectoring exit interrupted. `None` for an
    /// invalid word or a reserved type.
    pub fn decode(self, error_code: u32, instr_len: u8) -> Option<TrapRecord> {
        if !self.is_valid() {
            return None;
        }
        let typ = self.typ()?;
        let kind = match typ {
            InterruptionType::ExternalInt => EventKind::HardwareInterrupt,
            InterruptionType::Nmi | InterruptionType::HardwareException => EventKind::HardwareException,
            InterruptionType::SoftwareInt
            | InterruptionType::PrivSoftwareException
            | InterruptionType::SoftwareException => EventKind::SoftwareInterrupt,
        };
        let mut record = TrapRecord::new(self.vector(), kind);
        if self.has_error_code() {
            record.error_code = Some(error_code);
        }
        if kind == EventKind::SoftwareInterrupt {
            record.instr_len = instr_len;
        }
        record.icebp = typ == InterruptionType::PrivSoftwareException;
        Some(record)
    }
}
