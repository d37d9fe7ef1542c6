use cpu_core::{Cpu, CpuMode, Memory, SegmentSelector};
use log::{debug, warn};
use selm::{read_from_table, SelInfo, Selm};

use crate::query::{query_selector_info, QueryFlags};

/// A selector has 13 index bits.
const MAX_ENTRIES: u64 = 0x2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Gdt,
    Ldt,
}

/// Decodes every non-empty entry of the GDT or the loaded LDT. IA-32e
/// system descriptors cover two slots and are listed once.
pub fn dump_table(selm: &Selm, cpu: &Cpu, mem: &dyn Memory, kind: TableKind) -> Vec<SelInfo> {
    if matches!(cpu.mode(), CpuMode::Real | CpuMode::V8086) {
        debug!("dump_table: descriptor tables are not in use in real mode");
        return Vec::new();
    }
    let ti = match kind {
        TableKind::Gdt => 0,
        TableKind::Ldt => 4,
    };
    let Some(table) = cpu.table_for(SegmentSelector(ti)) else {
        warn!("dump_table: no LDT loaded");
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut index = 0u64;
    let mut count = table.entry_count(8);
    if count > MAX_ENTRIES {
        debug!("dump_table: limit {:#x} exceeds the selector range", table.limit);
        count = MAX_ENTRIES;
    }
    while index < count {
        let sel = SegmentSelector(((index as u16) << 3) | ti);
        index += 1;
        let raw = match read_from_table(mem, table, sel, cpu.is_ia32e()) {
            Ok(raw) => raw,
            Err(e) => {
                debug!("dump_table: {e}");
                continue;
            }
        };
        if raw.legacy().0 == 0 {
            continue;
        }
        if raw.long().is_some_and(|_| !raw.legacy().is_code_data()) {
            index += 1;
        }
        out.push(query_selector_info(selm, cpu, mem, sel, QueryFlags::default()));
    }
    out
}
