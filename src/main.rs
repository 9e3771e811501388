use std::cell::RefCell;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser;
use log::{error, info};

use rust_386::config::{CpuConfig, DEFAULT_RAM_KB, OpcodePolicy};
use rust_386::cpu::{Cpu, StopReason};
use rust_386::diagnostics::RecordingSink;
use rust_386::io::{IoPortBus, POST_CODE_PORT, PostCodePort};
use rust_386::registers::SegReg;

#[derive(Parser, Debug)]
#[command(name = "rust-386", about = "Boot a BIOS image on an emulated 80386")]
struct Args {
    /// BIOS ROM image, mapped at the top of the address space
    bios: PathBuf,

    /// Installed RAM in KiB
    #[arg(long, value_name = "KB", default_value_t = DEFAULT_RAM_KB)]
    ram_kb: usize,

    /// Stop after this many steps
    #[arg(long, value_name = "N")]
    max_steps: Option<u64>,

    /// Write every executed instruction and any core dump to this file
    #[arg(long, value_name = "PATH")]
    trace: Option<PathBuf>,

    /// Log and step over opcodes without a handler instead of stopping
    #[arg(long, action = clap::ArgAction::SetTrue)]
    skip_unknown_opcodes: bool,

    /// Do not treat a step that leaves CS:EIP unchanged as fatal
    #[arg(long, action = clap::ArgAction::SetTrue)]
    no_loop_guard: bool,

    /// Stop when EIP reaches 0
    #[arg(long, action = clap::ArgAction::SetTrue)]
    stop_at_ip_zero: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let rom = match std::fs::read(&args.bios) {
        Ok(rom) => rom,
        Err(e) => {
            error!("[MAIN] Cannot read {}: {}", args.bios.display(), e);
            return ExitCode::FAILURE;
        }
    };
    info!("[MAIN] Loaded {} ({} bytes)", args.bios.display(), rom.len());

    let policy = if args.skip_unknown_opcodes {
        OpcodePolicy::Skip
    } else {
        OpcodePolicy::Fatal
    };
    let mut config = CpuConfig::default()
        .with_ram_kb(args.ram_kb)
        .with_opcode_policy(policy);
    config.loop_guard = !args.no_loop_guard;
    config.stop_at_ip_zero = args.stop_at_ip_zero;
    config.max_steps = args.max_steps;
    config.trace_path = args.trace.clone();

    let mut ports = IoPortBus::new();
    ports.register(POST_CODE_PORT, Box::new(PostCodePort::default()));
    let mut cpu = match Cpu::with_io(config, rom, Box::new(ports)) {
        Ok(cpu) => cpu,
        Err(e) => {
            error!("[MAIN] Cannot create trace: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Without a trace file, keep dumps in memory and print them at the end
    let recorder = Rc::new(RefCell::new(RecordingSink::default()));
    if args.trace.is_none() {
        cpu.set_sink(Box::new(recorder.clone()));
    }

    let outcome = cpu.run();
    let cs = cpu.regs.segment(SegReg::Cs).selector;
    let eip = cpu.regs.eip;

    for dump in &recorder.borrow().dumps {
        eprintln!("{}", dump);
    }

    match outcome.reason {
        StopReason::Fault(e) => {
            error!("[MAIN] Stopped after {} steps at {:04X}:{:08X}: {}", outcome.steps, cs, eip, e);
            ExitCode::FAILURE
        }
        reason => {
            info!("[MAIN] Stopped after {} steps at {:04X}:{:08X}: {:?}", outcome.steps, cs, eip, reason);
            ExitCode::SUCCESS
        }
    }
}
