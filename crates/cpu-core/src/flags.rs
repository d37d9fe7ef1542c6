use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Default, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
    pub struct RFlags: u64 {
        const CF = 1 << 0;
        const PF = 1 << 2;
        const AF = 1 << 4;
        const ZF = 1 << 6;
        const SF = 1 << 7;
        /// Single-step.
        const TF = 1 << 8;
        /// Maskable interrupts enabled.
        const IF = 1 << 9;
        const DF = 1 << 10;
        const OF = 1 << 11;
        /// I/O privilege level, two bits.
        const IOPL = 0b11 << 12;
        const NT = 1 << 14;
        const RF = 1 << 16;
        /// Virtual-8086 mode.
        const VM = 1 << 17;
        const AC = 1 << 18;
        const VIF = 1 << 19;
        const VIP = 1 << 20;
        const ID = 1 << 21;
    }
}

impl RFlags {
    pub fn iopl(self) -> u8 { ((self & RFlags::IOPL).bits() >> 12) as u8 }

    pub fn with_iopl(self, iopl: u8) -> Self {
        (self - RFlags::IOPL) | RFlags::from_bits_retain((iopl as u64 & 0b11) << 12)
    }

    pub fn interrupts_enabled(self) -> bool { self.contains(RFlags::IF) }
}
