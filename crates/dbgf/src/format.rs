//! One-line descriptor listings in the style of the `dg`/`dl` console commands.

use core::fmt;

use cpu_core::desc::typ;
use selm::{SelInfo, SelMode};

const CODE_DATA: [&str; 8] = ["DataRO", "DataRW", "DownRO", "DownRW", "CodeEO", "CodeER", "ConfEO", "ConfER"];

const SYSTEM_LEGACY: [&str; 16] = [
    "Ill-0", "Tss16A", "LDT", "Tss16B", "Call16", "TaskG", "Int16", "Trap16", "Ill-8", "Tss32A", "Ill-A", "Tss32B",
    "Call32", "Ill-D", "Int32", "Trap32",
];

const SYSTEM_LONG: [&str; 16] = [
    "Ill-0", "Ill-1", "LDT", "Ill-3", "Ill-4", "Ill-5", "Ill-6", "Ill-7", "Ill-8", "Tss64A", "Ill-A", "Tss64B",
    "Call64", "Ill-D", "Int64", "Trap64",
];

/// Type mnemonic of the descriptor behind `info`.
pub fn type_name(info: &SelInfo) -> &'static str {
    let desc = info.raw.legacy();
    let t = desc.typ() as usize;
    if desc.is_code_data() {
        CODE_DATA[t >> 1]
    } else if info.raw.is_long_mode() {
        SYSTEM_LONG[t]
    } else {
        SYSTEM_LEGACY[t]
    }
}

/// Formats a [`SelInfo`] as a single console line.
pub struct SelInfoLine<'a>(pub &'a SelInfo);

impl fmt::Display for SelInfoLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.0;
        if info.is_invalid() {
            return write!(f, "{} Invalid", info.sel);
        }
        if info.mode == SelMode::Real {
            return write!(f, "{} RealM   Bas={:08x} Lim={:04x}", info.sel, info.base, info.limit);
        }
        let desc = info.raw.legacy();
        let present = if info.is_present() { "P " } else { "NP" };
        let long = info.raw.is_long_mode();
        if info.is_gate() {
            write!(f, "{} {:<7} Sel:Off={}:", info.sel, type_name(info), info.sel_gate)?;
            if long {
                write!(f, "{:016x}", info.base)?;
            } else {
                write!(f, "{:08x}", info.base)?;
            }
            write!(f, " DPL={} {present}", desc.dpl())?;
            if let Some(g) = info.raw.long() {
                if g.ist() != 0 {
                    write!(f, " IST={}", g.ist())?;
                }
            } else if !long && type_name(info).starts_with("Call") {
                write!(f, " Args={}", desc.param_count())?;
            }
        } else if desc.is_code_data() {
            write!(
                f,
                "{} {:<7} Bas={:08x} Lim={:08x} DPL={} {present} {} {} {} AVL={} L={}",
                info.sel,
                type_name(info),
                info.base,
                info.limit,
                desc.dpl(),
                if desc.typ() & typ::ACCESSED != 0 { "A " } else { "NA" },
                if desc.granularity() { "G" } else { " " },
                if desc.default_big() { "BIG" } else { "   " },
                desc.avl() as u8,
                desc.long() as u8,
            )?;
        } else {
            write!(f, "{} {:<7} Bas=", info.sel, type_name(info))?;
            if long {
                write!(f, "{:016x}", info.base)?;
            } else {
                write!(f, "{:08x}", info.base)?;
            }
            write!(f, " Lim={:08x} DPL={} {present}", info.limit, desc.dpl())?;
        }
        if info.is_hyper() {
            f.write_str(" HYPER")?;
        }
        Ok(())
    }
}
