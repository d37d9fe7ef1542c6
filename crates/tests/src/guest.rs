use cpu_core::{Cpu, CpuMode, DescriptorTableReg, FlatMem, Memory, X86Desc};

pub const GDT: u64 = 0x1000;
pub const IDT: u64 = 0x2000;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Protected-mode guest at `cpl` with a small GDT:
///
/// | sel  | entry                               |
/// |------|-------------------------------------|
/// | 0x08 | flat 4 GiB data, base 0x1000        |
/// | 0x10 | ring-0 code                         |
/// | 0x18 | ring-3 code                         |
/// | 0x20 | not-present data                    |
/// | 0x28 | call gate to 0x10:0x00401000, DPL 3 |
///
/// Every IDT vector below 0x40 is an interrupt gate to 0x10:0x8000.
pub fn protected(cpl: u8) -> (Cpu, FlatMem) {
    let mut cpu = Cpu::flat(CpuMode::Protected, cpl);
    cpu.gdtr = DescriptorTableReg { base: GDT, limit: 0x2F };
    cpu.idtr = DescriptorTableReg { base: IDT, limit: 0x1FF };
    let mut mem = FlatMem::new(0x4000);
    let gdt = [
        X86Desc::new(0x1000, 0xFFFFF, 0x92, 0xC),
        X86Desc::new(0, 0xFFFFF, 0x9A, 0xC),
        X86Desc::new(0, 0xFFFFF, 0xFA, 0xC),
        X86Desc::new(0, 0xFFFF, 0x12, 0x4),
        X86Desc::gate(0x10, 0x0040_1000, 0xC, 3, true, 0),
    ];
    for (i, d) in gdt.iter().enumerate() {
        mem.write(GDT + 8 * (i as u64 + 1), &d.to_bytes()).unwrap();
    }
    for v in 0..0x40u64 {
        mem.write(IDT + v * 8, &X86Desc::gate(0x10, 0x8000, 0xE, 0, true, 0).to_bytes()).unwrap();
    }
    (cpu, mem)
}
