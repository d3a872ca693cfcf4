use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cpu::condition::Condition;

/// Resolves addresses to symbol names for disassembly.
pub trait SymbolTable {
    /// The closest symbol at or below `address`, with its start address.
    fn find_nearest(&self, address: u32) -> Option<(&str, u32)>;
}

/// A symbol table backed by an ordered map of start address to name.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbols(BTreeMap<u32, String>);

impl Symbols {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: u32, name: impl Into<String>) {
        self.0.insert(address, name.into());
    }
}

impl FromIterator<(u32, String)> for Symbols {
    fn from_iter<T: IntoIterator<Item = (u32, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl SymbolTable for Symbols {
    fn find_nearest(&self, address: u32) -> Option<(&str, u32)> {
        self.0
            .range(..=address)
            .next_back()
            .map(|(start, name)| (name.as_str(), *start))
    }
}

/// Mnemonic followed by its suffix and condition code, e.g. `rfeia` or `ldrne`.
#[must_use]
pub fn mnemonic(mnemonic: &str, suffix: &str, condition: Condition) -> String {
    format!("{mnemonic}{suffix}{condition}")
}

/// `0x...` address, annotated with `<symbol+offset>` when one is known.
#[must_use]
pub fn address(address: u32, symtab: Option<&dyn SymbolTable>) -> String {
    match symtab.and_then(|s| s.find_nearest(address)) {
        Some((name, start)) if start == address => format!("0x{address:08x} <{name}>"),
        Some((name, start)) => format!("0x{address:08x} <{name}+0x{:x}>", address - start),
        None => format!("0x{address:08x}"),
    }
}
