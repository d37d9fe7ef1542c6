use cpu_core::{Cpu, CpuMode, Memory, SegReg, SegmentSelector};
use log::trace;
use selm::{SelInfo, SelMode, Selm};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryFlags {
    /// Report code/data segments the way 64-bit code sees them: base 0
    /// (FS/GS keep their hidden base) and no limit.
    pub adjust_64bit_mode: bool,
}

fn current_mode(cpu: &Cpu) -> SelMode {
    match cpu.mode() {
        CpuMode::Real | CpuMode::V8086 => SelMode::Real,
        _ if cpu.is_ia32e() => SelMode::Long,
        _ => SelMode::Protected,
    }
}

/// Decodes `sel` for display. Never fails: selectors that cannot be
/// decoded come back flagged invalid.
pub fn query_selector_info(selm: &Selm, cpu: &Cpu, mem: &dyn Memory, sel: SegmentSelector, flags: QueryFlags) -> SelInfo {
    let mut info = match selm.selector_info(cpu, mem, sel) {
        Ok(info) => info,
        Err(e) => {
            trace!("dbgf: {e}");
            return SelInfo::invalid(sel, current_mode(cpu));
        }
    };
    if flags.adjust_64bit_mode && cpu.mode() == CpuMode::Long && info.raw.legacy().is_code_data() {
        info.base = [SegReg::FS, SegReg::GS]
            .into_iter()
            .map(|r| cpu.segs.get(r))
            .find(|(s, cache)| *s == sel && cache.valid)
            .map_or(0, |(_, cache)| cache.base);
        info.limit = u64::MAX;
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpu_core::{DescriptorTableReg, FlatMem, SegmentCache, X86Desc};
    use selm::SelInfoFlags;

    fn long_guest() -> (Cpu, FlatMem) {
        let mut cpu = Cpu::flat(CpuMode::Long, 0);
        cpu.gdtr = DescriptorTableReg { base: 0x100, limit: 0x1F };
        let mut mem = FlatMem::new(0x200);
        mem.write(0x108, &X86Desc::new(0, 0xFFFFF, 0x9A, 0xA).to_bytes()).unwrap();
        mem.write(0x110, &X86Desc::new(0x0010_0000, 0xFFFF, 0x92, 0x0).to_bytes()).unwrap();
        (cpu, mem)
    }

    #[test]
    fn invalid_selectors_do_not_fail() {
        let (cpu, mem) = long_guest();
        let info = query_selector_info(&Selm::default(), &cpu, &mem, SegmentSelector(0x40), QueryFlags::default());
        assert!(info.is_invalid());
        assert!(info.flags().contains(SelInfoFlags::INVALID | SelInfoFlags::LONG_MODE));
    }

    #[test]
    fn adjust_64bit_mode_flattens_segments() {
        let (mut cpu, mem) = long_guest();
        let selm = Selm::default();
        let raw = query_selector_info(&selm, &cpu, &mem, SegmentSelector(0x10), QueryFlags::default());
        assert_eq!((raw.base, raw.limit), (0x0010_0000, 0xFFFF));

        let adjust = QueryFlags { adjust_64bit_mode: true };
        let flat = query_selector_info(&selm, &cpu, &mem, SegmentSelector(0x10), adjust);
        assert_eq!((flat.base, flat.limit), (0, u64::MAX));

        cpu.segs.set(SegReg::GS, SegmentSelector(0x10), SegmentCache { base: 0xFFFF_8000_0000_0000, valid: true, ..Default::default() });
        let gs = query_selector_info(&selm, &cpu, &mem, SegmentSelector(0x10), adjust);
        assert_eq!(gs.base, 0xFFFF_8000_0000_0000);
    }
}
