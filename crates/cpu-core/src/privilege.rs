use crate::flags::RFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Privilege {
    pub cpl: u8,
    pub iopl: u8,
}

impl Privilege {
    pub fn from_flags_and_cs(cpl: u8, flags: RFlags) -> Self {
        Self { cpl, iopl: flags.iopl() }
    }

    /// Software `INT n` in virtual-8086 mode without VME needs IOPL 3.
    pub fn v86_int_allowed(&self) -> bool { self.iopl == 3 }

    /// Privilege a data access runs at: the weaker of CPL and the selector's RPL.
    pub fn effective(&self, rpl: u8) -> u8 { self.cpl.max(rpl) }

    /// Data segments and non-conforming code read as data: max(CPL, RPL) <= DPL.
    pub fn may_access(&self, rpl: u8, dpl: u8) -> bool { self.effective(rpl) <= dpl }
}
