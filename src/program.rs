use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

use isa::cpu::cpu_modes::Mode;
use isa::cpu::pc_state::ProgramCounter;
use isa::cpu::psr::Psr;
use isa::cpu::registers::RegIndex;
use isa::cpu::thread::{SimpleThread, ThreadContext};
use isa::inst::disasm::{SymbolTable, Symbols};
use isa::{Executor, Instruction, StaticInst, StepOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterInit {
    pub reg: RegIndex,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInit {
    pub address: u32,
    pub words: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placed {
    pub address: u32,
    pub instruction: Instruction,
}

/// Decoded instructions plus the initial machine state, as written by a
/// decode stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub entry: u32,
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub cpsr_flags: u32,
    #[serde(default)]
    pub spsr: Option<u32>,
    #[serde(default)]
    pub registers: Vec<RegisterInit>,
    #[serde(default)]
    pub banked_sp: Vec<BankedSp>,
    #[serde(default)]
    pub memory: Vec<MemoryInit>,
    pub instructions: Vec<Placed>,
    #[serde(default)]
    pub symbols: Symbols,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankedSp {
    pub mode: Mode,
    pub value: u32,
}

const fn default_mode() -> Mode {
    Mode::Supervisor
}

impl Program {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading program {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing program {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let program: Self = serde_json::from_str(text)?;
        program.instruction_map()?;
        Ok(program)
    }

    fn instruction_map(&self) -> anyhow::Result<BTreeMap<u32, &Instruction>> {
        let mut map = BTreeMap::new();
        for placed in &self.instructions {
            let address = placed.address;
            if address & 3 != 0 {
                bail!("instruction at 0x{address:08X} is not word aligned");
            }
            if map.insert(address, &placed.instruction).is_some() {
                bail!("two instructions at 0x{address:08X}");
            }
        }
        Ok(map)
    }

    /// A thread in the initial state described by the program.
    #[must_use]
    pub fn thread(&self) -> SimpleThread {
        let mut thread = SimpleThread::new(self.entry, self.mode);

        let mut cpsr = Psr::new(self.cpsr_flags);
        cpsr.set_mode(self.mode);
        thread.set_cpsr(cpsr);
        if let Some(spsr) = self.spsr {
            thread.set_spsr(Psr::new(spsr));
        }

        for init in &self.registers {
            thread.write_reg(init.reg, init.value);
        }
        for sp in &self.banked_sp {
            thread.write_banked(RegIndex::SP, sp.mode, sp.value);
        }
        for block in &self.memory {
            thread.bus_mut().load_words(block.address, &block.words);
        }

        thread
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// The PC left the program.
    NoInstruction(u32),

    StepLimit,
}

#[derive(Debug)]
pub struct Run {
    pub thread: SimpleThread,
    pub steps: usize,
    pub stop: Stop,
}

/// Steps the program from its entry point until the PC leaves it or
/// `max_steps` steps were executed.
pub fn run(
    program: &Program,
    extra_symbols: Option<&Symbols>,
    max_steps: usize,
) -> anyhow::Result<Run> {
    let instructions = program.instruction_map()?;
    let symtab: &dyn SymbolTable = extra_symbols.unwrap_or(&program.symbols);
    let executor = Executor::new();
    let mut thread = program.thread();

    for steps in 0..max_steps {
        let state = thread.pc_state();
        let Some(inst) = instructions.get(&state.pc()) else {
            tracing::info!("no instruction at 0x{:08X}, stopping", state.pc());
            return Ok(Run {
                thread,
                steps,
                stop: Stop::NoInstruction(state.pc()),
            });
        };

        if state.upc() == 0 {
            tracing::info!(
                "0x{:08X}: {}",
                state.pc(),
                inst.generate_disassembly(state.pc(), Some(symtab))
            );
        }

        if executor.step(inst, &mut thread) == StepOutcome::PredicateFailed {
            tracing::info!("  condition {} failed", inst.condition());
        }
    }

    tracing::warn!("step limit of {max_steps} reached");
    Ok(Run {
        thread,
        steps: max_steps,
        stop: Stop::StepLimit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PROGRAM: &str = r#"{
        "entry": 256,
        "registers": [{ "reg": 1, "value": 4096 }],
        "memory": [{ "address": 4096, "words": [7, 9] }],
        "instructions": [
            {
                "address": 256,
                "instruction": { "Memory": {
                    "mnemonic": "ldrd", "kind": "Load", "dest": 2, "dest2": 3,
                    "base": 1, "offset": { "Immediate": 0 }, "mode": "PostIndex"
                } }
            },
            {
                "address": 260,
                "instruction": { "Memory": {
                    "mnemonic": "str", "kind": "Store", "dest": 3,
                    "base": 1, "offsetting": "Down", "offset": { "Immediate": 4 }
                } }
            }
        ]
    }"#;

    #[test]
    fn runs_until_the_pc_leaves_the_program() {
        let program = Program::parse(PROGRAM).unwrap();
        let run = run(&program, None, 100).unwrap();

        assert_eq!(run.stop, Stop::NoInstruction(264));
        assert_eq!(run.steps, 2);
        assert_eq!(run.thread.read_reg(RegIndex::new(2)), 7);
        assert_eq!(run.thread.read_reg(RegIndex::new(3)), 9);
        assert_eq!(run.thread.read_reg(RegIndex::new(1)), 4096);
        assert_eq!(run.thread.read_word(4092), 9);
    }

    #[test]
    fn step_limit() {
        let program = Program::parse(PROGRAM).unwrap();
        let run = run(&program, None, 1).unwrap();
        assert_eq!(run.stop, Stop::StepLimit);
        assert_eq!(run.thread.pc_state().pc(), 260);
    }

    #[test]
    fn exception_return_demo() {
        let program = Program::parse(include_str!("../demos/exception_return.json")).unwrap();
        let run = run(&program, None, 100).unwrap();

        assert_eq!(run.stop, Stop::NoInstruction(516));
        assert_eq!(run.steps, 8);

        let thread = &run.thread;
        assert_eq!(thread.cpsr().mode(), Mode::System);
        assert_eq!(thread.read_word(0x3FF8), 512);
        assert_eq!(thread.read_word(0x3FFC), 0x2000_001F);
        assert_eq!(thread.read_banked(RegIndex::SP, Mode::Supervisor), 0x3FF8);
        assert_eq!(thread.read_banked(RegIndex::SP, Mode::Irq), 0x3008);
        assert_eq!(thread.read_reg(RegIndex::new(1)), 0x2000);
        assert_eq!(thread.read_reg(RegIndex::new(2)), 85);
    }

    #[test]
    fn duplicate_addresses_are_rejected() {
        let text = r#"{
            "entry": 0,
            "instructions": [
                { "address": 0, "instruction": { "Rfe": {
                    "base": 13, "addressing": "IncrementAfter", "write_back": true
                } } },
                { "address": 0, "instruction": { "Rfe": {
                    "base": 13, "addressing": "IncrementAfter", "write_back": true
                } } }
            ]
        }"#;
        assert!(Program::parse(text).is_err());
    }

    #[test]
    fn invalid_descriptor_is_rejected() {
        let text = r#"{
            "entry": 0,
            "instructions": [
                { "address": 0, "instruction": { "Memory": {
                    "mnemonic": "strex", "kind": "Store", "exclusive": true, "dest": 0, "base": 1
                } } }
            ]
        }"#;
        let err = format!("{:#}", Program::parse(text).unwrap_err());
        assert!(err.contains("store-exclusive transfers need a result register"));
    }
}
