mod logger;
mod program;

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use isa::cpu::pc_state::ProgramCounter;
use isa::cpu::registers::{NUM_ARCH_REGS, RegIndex};
use isa::cpu::thread::ThreadContext;
use isa::inst::disasm::Symbols;

use crate::logger::{LogKind, init_logger};
use crate::program::{Program, Stop, run};

/// Steps a decoded program through the reference executor and prints the
/// final register state.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Program file (JSON) produced by a decode stage.
    program: PathBuf,

    /// Write the trace to this file instead of stdout.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Stop after this many steps.
    #[arg(long, default_value_t = 10_000)]
    max_steps: usize,

    /// Symbol table (JSON object of address to name) used for disassembly.
    #[arg(long)]
    symbols: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _guard = init_logger(LogKind::from(args.log_file))?;

    println!("armlet v{}", env!("CARGO_PKG_VERSION"));

    let program = Program::load(&args.program)?;
    let symbols = args
        .symbols
        .as_deref()
        .map(|path| -> anyhow::Result<Symbols> {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading symbols {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing symbols {}", path.display()))
        })
        .transpose()?;

    let result = run(&program, symbols.as_ref(), args.max_steps)?;

    match result.stop {
        Stop::NoInstruction(pc) => println!("stopped at 0x{pc:08X} after {} steps", result.steps),
        Stop::StepLimit => println!("step limit reached after {} steps", result.steps),
    }

    let thread = &result.thread;
    for i in 0..NUM_ARCH_REGS {
        #[allow(clippy::cast_possible_truncation)]
        let reg = RegIndex::new(i as u8);
        println!("{:>4} = 0x{:08X}", reg.to_string(), thread.read_reg(reg));
    }
    println!("cpsr = 0x{:08X} ({})", u32::from(thread.cpsr()), thread.cpsr().mode());
    println!("  pc = 0x{:08X}", thread.pc_state().pc());

    Ok(())
}
