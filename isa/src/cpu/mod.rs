pub mod condition;
pub mod cpu_modes;

#[allow(clippy::module_name_repetitions)]
pub mod pc_state;
pub mod psr;
pub mod register_bank;
pub mod registers;

#[allow(clippy::cast_possible_wrap)]
#[allow(clippy::cast_sign_loss)]
pub mod shifter;
pub mod thread;
