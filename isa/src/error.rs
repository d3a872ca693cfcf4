use thiserror::Error;

/// A descriptor handed over by the decode stage has fields that do not fit
/// together.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("exclusive transfers only take immediate offsets")]
    RegisterOffsetOnExclusive,

    #[error("a result register is only written by store-exclusive transfers")]
    ResultOnNonExclusiveStore,

    #[error("store-exclusive transfers need a result register")]
    MissingResult,

    #[error("register pairs are always transferred as words")]
    ByteSizedPair,

    #[error("the nv condition is reserved for unconditional instructions")]
    UnconditionalSpace,
}
