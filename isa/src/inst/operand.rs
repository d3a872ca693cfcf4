use serde::{Deserialize, Serialize};

use crate::cpu::registers::RegIndex;

/// The registers a transfer moves data between.
///
/// The result register of the exclusive shapes receives the outcome of a
/// store-exclusive (0 on success, 1 on failure) and is printed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperandShape {
    Single {
        dest: RegIndex,
    },
    SingleExclusive {
        result: RegIndex,
        dest: RegIndex,
    },
    /// Two registers accessed as consecutive words.
    Pair {
        dest: RegIndex,
        dest2: RegIndex,
    },
    PairExclusive {
        result: RegIndex,
        dest: RegIndex,
        dest2: RegIndex,
    },
}

impl OperandShape {
    #[must_use]
    pub const fn dest(&self) -> RegIndex {
        match *self {
            Self::Single { dest }
            | Self::SingleExclusive { dest, .. }
            | Self::Pair { dest, .. }
            | Self::PairExclusive { dest, .. } => dest,
        }
    }

    #[must_use]
    pub const fn dest2(&self) -> Option<RegIndex> {
        match *self {
            Self::Pair { dest2, .. } | Self::PairExclusive { dest2, .. } => Some(dest2),
            _ => None,
        }
    }

    #[must_use]
    pub const fn result(&self) -> Option<RegIndex> {
        match *self {
            Self::SingleExclusive { result, .. } | Self::PairExclusive { result, .. } => {
                Some(result)
            }
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_exclusive(&self) -> bool {
        self.result().is_some()
    }

    #[must_use]
    pub const fn is_pair(&self) -> bool {
        self.dest2().is_some()
    }

    /// Data registers in transfer order: `dest` then `dest2`.
    #[must_use]
    pub fn data_registers(&self) -> Vec<RegIndex> {
        std::iter::once(self.dest()).chain(self.dest2()).collect()
    }

    /// Every register touched by the transfer, in assembly order.
    #[must_use]
    pub fn registers(&self) -> Vec<RegIndex> {
        self.result()
            .into_iter()
            .chain(self.data_registers())
            .collect()
    }

    /// Register list as printed before the address operand.
    #[must_use]
    pub fn render(&self) -> String {
        self.registers()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const R0: RegIndex = RegIndex::new(0);
    const R1: RegIndex = RegIndex::new(1);
    const R2: RegIndex = RegIndex::new(2);

    #[test]
    fn single() {
        let shape = OperandShape::Single { dest: R0 };
        assert_eq!(shape.registers(), vec![R0]);
        assert_eq!(shape.render(), "r0");
        assert!(!shape.is_exclusive());
        assert!(!shape.is_pair());
    }

    #[test]
    fn single_exclusive_prints_result_first() {
        let shape = OperandShape::SingleExclusive {
            result: R2,
            dest: R0,
        };
        assert_eq!(shape.registers(), vec![R2, R0]);
        assert_eq!(shape.data_registers(), vec![R0]);
        assert_eq!(shape.render(), "r2, r0");
    }

    #[test]
    fn pair() {
        let shape = OperandShape::Pair {
            dest: R0,
            dest2: R1,
        };
        assert_eq!(shape.registers(), vec![R0, R1]);
        assert_eq!(shape.render(), "r0, r1");
        assert!(shape.is_pair());
    }

    #[test]
    fn pair_exclusive() {
        let shape = OperandShape::PairExclusive {
            result: R2,
            dest: R0,
            dest2: R1,
        };
        assert_eq!(shape.registers(), vec![R2, R0, R1]);
        assert_eq!(shape.render(), "r2, r0, r1");
        assert_eq!(shape.result(), Some(R2));
    }
}
