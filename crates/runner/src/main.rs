use std::collections::VecDeque;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cpu_core::{SegReg, SegmentSelector};
use dbgf::{dump_table, query_selector_info, validate_code_segment_for_cpl, QueryFlags, SelInfoLine, TableKind};
use selm::{Selm, ToFlatFlags};
use trpm::{EventInjector, EventKind, InjectorError, InterruptController, PendingInjection, Vcpu};

mod snapshot;

use snapshot::GuestSnapshot;

#[derive(Parser, Debug)]
#[command(name = "x86-sel", version, about = "Inspect x86 selectors and drive trap injection against a guest snapshot", long_about=None)]
struct Cli {
    /// Guest snapshot (JSON).
    #[arg(long, short)]
    snapshot: PathBuf,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Decode one selector.
    Info {
        #[arg(value_parser = parse_u16)]
        sel: u16,
        /// Show segments as 64-bit code sees them.
        #[arg(long)]
        adjust64: bool,
    },
    /// Translate selector:offset to a linear address.
    Flat {
        #[arg(value_parser = parse_u16)]
        sel: u16,
        #[arg(value_parser = parse_u64)]
        offset: u64,
        /// Check privilege against this CPL instead of the current one.
        #[arg(long)]
        cpl: Option<u8>,
        #[arg(long, conflicts_with = "cpl")]
        no_pl: bool,
    },
    /// List the GDT (or the LDT with --ldt).
    Dg {
        #[arg(long)]
        ldt: bool,
    },
    /// Queue an event and run one injection step.
    Inject {
        #[arg(long, value_parser = parse_u8)]
        vector: Option<u8>,
        #[arg(long, value_enum, default_value_t = Kind::Exception)]
        kind: Kind,
        #[arg(long, value_parser = parse_u32)]
        error_code: Option<u32>,
        /// #PF linear address.
        #[arg(long, value_parser = parse_u64)]
        addr: Option<u64>,
        #[arg(long, value_parser = parse_u8)]
        instr_len: Option<u8>,
        #[arg(long)]
        nmi: bool,
        /// Vectors waiting at the interrupt controller, highest priority first.
        #[arg(long, value_parser = parse_u8)]
        irq: Vec<u8>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Kind {
    Exception,
    Interrupt,
    Software,
}

impl From<Kind> for EventKind {
    fn from(k: Kind) -> Self {
        match k {
            Kind::Exception => EventKind::HardwareException,
            Kind::Interrupt => EventKind::HardwareInterrupt,
            Kind::Software => EventKind::SoftwareInterrupt,
        }
    }
}

fn parse_u64(s: &str) -> Result<u64, String> {
    let r = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    r.map_err(|e| format!("{s}: {e}"))
}

fn parse_u32(s: &str) -> Result<u32, String> {
    parse_u64(s).and_then(|v| u32::try_from(v).map_err(|e| format!("{s}: {e}")))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    parse_u64(s).and_then(|v| u16::try_from(v).map_err(|e| format!("{s}: {e}")))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    parse_u64(s).and_then(|v| u8::try_from(v).map_err(|e| format!("{s}: {e}")))
}

struct QueuedPic(VecDeque<u8>);

impl InterruptController for QueuedPic {
    fn has_pending(&self) -> bool { !self.0.is_empty() }
    fn acknowledge(&mut self) -> Option<u8> { self.0.pop_front() }
}

/// Prints what would be written to the VM-entry interruption fields.
struct Stdout;

impl EventInjector for Stdout {
    fn inject(&mut self, injection: &PendingInjection) -> Result<(), InjectorError> {
        let json = serde_json::to_string_pretty(injection).map_err(|e| InjectorError::Rejected(e.to_string()))?;
        println!("{json}");
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let guest = GuestSnapshot::load(&cli.snapshot)?;
    let mem = guest.memory()?;
    let selm = Selm::new(guest.selm.clone());
    let cpu = &guest.cpu;

    match cli.cmd {
        Cmd::Info { sel, adjust64 } => {
            let info = query_selector_info(&selm, cpu, &mem, SegmentSelector(sel), QueryFlags { adjust_64bit_mode: adjust64 });
            println!("{}", SelInfoLine(&info));
            println!("flags: {:?}", info.flags());
            if info.is_code() {
                println!("executable at CPL {}: {}", cpu.current_cpl(), validate_code_segment_for_cpl(&info, cpu.current_cpl()));
            }
        }
        Cmd::Flat { sel, offset, cpl, no_pl } => {
            let flags = match (cpl, no_pl) {
                (_, true) => ToFlatFlags::no_privilege_check(),
                (Some(cpl), false) => ToFlatFlags::with_cpl(cpl),
                (None, false) => ToFlatFlags::default(),
            };
            match selm.to_flat_ex(cpu, &mem, SegmentSelector(sel), offset, flags) {
                Ok(flat) => println!("{sel:04x}:{offset:x} -> {flat:#x}"),
                Err(e) => {
                    let exc = e.to_exception(SegReg::DS);
                    bail!("{e} (guest sees {:?} error code {:?})", exc.vector, exc.error_code);
                }
            }
        }
        Cmd::Dg { ldt } => {
            let kind = if ldt { TableKind::Ldt } else { TableKind::Gdt };
            for info in dump_table(&selm, cpu, &mem, kind) {
                println!("{}", SelInfoLine(&info));
            }
        }
        Cmd::Inject { vector, kind, error_code, addr, instr_len, nmi, irq } => {
            let mut vcpu = Vcpu::new(0, guest.cpu.clone(), guest.trpm);
            if let Some(snap) = &guest.trap {
                vcpu.trpm.restore(snap).context("restoring dispatcher state")?;
            }
            if let Some(vector) = vector {
                vcpu.trpm.assert_trap(vector, kind.into())?;
                if let Some(code) = error_code {
                    vcpu.trpm.set_error_code(code)?;
                }
                if let Some(addr) = addr {
                    vcpu.trpm.set_fault_address(addr)?;
                }
                if let Some(len) = instr_len {
                    vcpu.trpm.set_instr_len(len)?;
                }
            }
            if nmi {
                vcpu.trpm.assert_nmi();
            }
            let mut pic = QueuedPic(irq.into());
            let delivered = vcpu.inject_event(&mem, &mut pic, &mut Stdout)?;
            if !delivered {
                println!("nothing deliverable (state {:?})", vcpu.trpm.state());
            }
        }
    }
    Ok(())
}
