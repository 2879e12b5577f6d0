//! Global symbol interning.
//!
//! Names (function names, type names, module names) are interned once and
//! referred to by a compact `Symbol` handle. Handle equality is name equality,
//! which keeps hot comparisons free of string traffic.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::OnceLock;

/// Interned name handle.
///
/// Two symbols are equal iff they intern the same string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

struct SymbolTable {
    names: RwLock<SymbolTableInner>,
}

struct SymbolTableInner {
    strings: Vec<&'static str>,
    index: FxHashMap<&'static str, u32>,
}

static SYMBOLS: OnceLock<SymbolTable> = OnceLock::new();

fn table() -> &'static SymbolTable {
    SYMBOLS.get_or_init(|| SymbolTable {
        names: RwLock::new(SymbolTableInner {
            strings: Vec::new(),
            index: FxHashMap::default(),
        }),
    })
}

impl Symbol {
    /// Intern a string, returning its stable handle.
    pub fn intern(name: &str) -> Symbol {
        let tbl = table();
        {
            let inner = tbl.names.read();
            if let Some(&id) = inner.index.get(name) {
                return Symbol(id);
            }
        }
        let mut inner = tbl.names.write();
        if let Some(&id) = inner.index.get(name) {
            return Symbol(id);
        }
        let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let id = inner.strings.len() as u32;
        inner.strings.push(leaked);
        inner.index.insert(leaked, id);
        Symbol(id)
    }

    /// The interned string.
    pub fn as_str(self) -> &'static str {
        table().names.read().strings[self.0 as usize]
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.as_str())
    }
}
