use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Vector {
    DE = 0,  // Divide Error
    DB = 1,  // Debug
    NMI = 2, // Non-maskable
    BP = 3,  // Breakpoint
    OF = 4,  // Overflow
    BR = 5,  // BOUND Range Exceeded
    UD = 6,  // Invalid Opcode
    NM = 7,  // Device Not Available
    DF = 8,  // Double Fault
    TS = 10, // Invalid TSS
    NP = 11, // Segment Not Present
    SS = 12, // Stack Fault
    GP = 13, // General Protection
    PF = 14, // Page Fault
    MF = 16, // x87 FP Exception-Pending
    AC = 17, // Alignment Check
    MC = 18, // Machine Check
    XM = 19, // SIMD FP Exception
    VE = 20, // Virtualization Exception
    CP = 21, // Control Protection (CET)
    HV = 28, // Hypervisor Injection
    VC = 29, // VMM Communication
    SX = 30, // Security Exception
}

impl Vector {
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Vector::DE,
            1 => Vector::DB,
            2 => Vector::NMI,
            3 => Vector::BP,
            4 => Vector::OF,
            5 => Vector::BR,
            6 => Vector::UD,
            7 => Vector::NM,
            8 => Vector::DF,
            10 => Vector::TS,
            11 => Vector::NP,
            12 => Vector::SS,
            13 => Vector::GP,
            14 => Vector::PF,
            16 => Vector::MF,
            17 => Vector::AC,
            18 => Vector::MC,
            19 => Vector::XM,
            20 => Vector::VE,
            21 => Vector::CP,
            28 => Vector::HV,
            29 => Vector::VC,
            30 => Vector::SX,
            _ => return None,
        })
    }

    /// Whether the CPU pushes an error code when delivering this exception.
    pub fn pushes_error_code(self) -> bool {
        matches!(
            self,
            Vector::DF
                | Vector::TS
                | Vector::NP
                | Vector::SS
                | Vector::GP
                | Vector::PF
                | Vector::AC
                | Vector::CP
                | Vector::VC
                | Vector::SX
        )
    }

    pub fn class(self) -> ExceptionClass {
        match self {
            Vector::PF | Vector::VE => ExceptionClass::PageFault,
            Vector::DF => ExceptionClass::DoubleFault,
            Vector::DE | Vector::TS | Vector::NP | Vector::SS | Vector::GP => ExceptionClass::Contributory,
            _ => ExceptionClass::Benign,
        }
    }

    /// Priority tier among events recognised at the same instruction boundary
    /// (SDM Vol. 3 table 6-2). Lower is served first.
    pub fn priority(self) -> u8 {
        match self {
            Vector::MC => 1,
            Vector::DF => 2,
            Vector::DB => 4,
            Vector::NMI => 5,
            Vector::UD | Vector::NM => 9,
            _ => 10,
        }
    }
}

/// Exception classes used for double-fault escalation (SDM Vol. 3 table 6-5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionClass {
    Benign,
    Contributory,
    PageFault,
    DoubleFault,
}

/// True when `second`, raised while delivering `first`, turns into #DF.
pub fn should_double_fault(first: u8, second: u8) -> bool {
    use ExceptionClass as C;
    let class = |v: u8| Vector::from_u8(v).map_or(C::Benign, Vector::class);
    matches!(
        (class(first), class(second)),
        (C::Contributory, C::Contributory) | (C::PageFault, C::Contributory | C::PageFault)
    )
}

/// Orders two vectors recognised at the same boundary; true if `a` wins over `b`.
pub fn takes_priority(a: u8, b: u8) -> bool {
    let tier = |v: u8| Vector::from_u8(v).map_or(10, Vector::priority);
    (tier(a), a) < (tier(b), b)
}

/// Error code for a fault referencing a descriptor-table selector.
pub fn selector_error_code(sel: u16, ext: bool) -> u32 {
    (sel as u32 & 0xFFFC) | ext as u32
}

/// Error code for a fault referencing an IDT entry.
pub fn idt_error_code(vector: u8, ext: bool) -> u32 {
    ((vector as u32) << 3) | 0x2 | ext as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exception {
    pub vector: Vector,
    pub error_code: Option<u32>,
}

impl Exception {
    pub fn new(vector: Vector, error_code: Option<u32>) -> Self { Self { vector, error_code } }
    pub fn gp(code: u32) -> Self { Self::new(Vector::GP, Some(code)) }
    pub fn np(code: u32) -> Self { Self::new(Vector::NP, Some(code)) }
    pub fn ss(code: u32) -> Self { Self::new(Vector::SS, Some(code)) }
    pub fn ts(code: u32) -> Self { Self::new(Vector::TS, Some(code)) }
}
