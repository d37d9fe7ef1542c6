//! Control registers that decide how descriptor tables are interpreted.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// CR0 bits relevant to segmentation and event delivery.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Cr0: u64 {
        /// Protected mode; clear means real mode.
        const PE = 1 << 0;
        const NE = 1 << 5;
        const WP = 1 << 16;
        const PG = 1 << 31;
        const _ = !0;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Efer: u64 {
        const SCE = 1 << 0;
        const LME = 1 << 8;
        /// IA-32e mode active. Set by the processor when paging is enabled with LME.
        const LMA = 1 << 10;
        const NXE = 1 << 11;
        const _ = !0;
    }
}
