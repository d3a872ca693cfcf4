//! Memory-access instructions of a predicated, micro-coded ARM-style ISA:
//! effective address resolution, offset/pre-indexed/post-indexed
//! addressing, micro-op decomposition of `RFE`/`SRS` and PC advancement.
//!
//! ```text
//!   decode stage ──► Instruction ──► Executor::step ──► ThreadContext
//!                    (inst)          (exec)             (cpu::thread)
//! ```

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
mod bitwise;

#[allow(clippy::cast_possible_truncation)]
pub mod bus;
pub mod cpu;
mod error;

#[allow(clippy::cast_possible_truncation)]
pub mod exec;

#[allow(clippy::module_name_repetitions)]
pub mod inst;

pub use error::DecodeError;
pub use exec::{Executor, StepOutcome};
pub use inst::{Instruction, StaticInst};
