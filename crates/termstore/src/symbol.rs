#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::rc::Rc;

use crate::storage::HashTable;
use crate::storage::hash_of;

/// The index of a function symbol in the symbol table. Like a [crate::TermId]
/// it does not keep the symbol alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(usize);

impl SymbolId {
    pub(crate) fn new(index: usize) -> SymbolId {
        SymbolId(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Anything that identifies a function symbol.
pub trait Symb {
    fn symbol_id(&self) -> SymbolId;
}

impl Symb for SymbolId {
    fn symbol_id(&self) -> SymbolId {
        *self
    }
}

impl<S: Symb + ?Sized> Symb for &S {
    fn symbol_id(&self) -> SymbolId {
        (**self).symbol_id()
    }
}

/// The multiset of explicitly protected symbols. A symbol that was protected
/// `n` times stays alive until it has been unprotected `n` times.
pub struct ProtectedSymbols {
    counts: HashTable<SymbolId, usize>,
}

impl ProtectedSymbols {
    pub fn new() -> Self {
        let equal: fn(&SymbolId, &SymbolId) -> bool = |a, b| a == b;
        Self {
            counts: HashTable::new(75, equal),
        }
    }

    /// Adds one occurrence of the symbol, returns the new count.
    pub fn protect(&mut self, id: SymbolId) -> usize {
        let hash = hash_of(&id);
        match self.counts.get_mut(&id, hash) {
            Some(count) => {
                *count += 1;
                *count
            }
            None => {
                self.counts.put(id, hash, 1);
                1
            }
        }
    }

    /// Removes one occurrence of the symbol.
    pub fn unprotect(&mut self, id: SymbolId) {
        let hash = hash_of(&id);
        let remaining = match self.counts.get_mut(&id, hash) {
            Some(count) => {
                *count -= 1;
                *count
            }
            None => {
                debug_assert!(false, "Symbol {id} was not protected");
                return;
            }
        };

        if remaining == 0 {
            self.counts.remove(&id, hash);
        }
    }

    /// The number of times the symbol is protected.
    pub fn count(&self, id: SymbolId) -> usize {
        self.counts.get(&id, hash_of(&id)).copied().unwrap_or(0)
    }

    /// The distinct protected symbols.
    pub fn iter(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.counts.iter().map(|(id, _)| *id)
    }

    /// The number of distinct protected symbols.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl Default for ProtectedSymbols {
    fn default() -> Self {
        Self::new()
    }
}

/// A protected function symbol, every live `Symbol` counts as one occurrence
/// in the protected multiset.
pub struct Symbol {
    id: SymbolId,
    protected: Rc<RefCell<ProtectedSymbols>>,
}

impl Symbol {
    pub(crate) fn new(id: SymbolId, protected: &Rc<RefCell<ProtectedSymbols>>) -> Symbol {
        protected.borrow_mut().protect(id);
        Symbol {
            id,
            protected: protected.clone(),
        }
    }

    pub fn id(&self) -> SymbolId {
        self.id
    }

    /// The number of guards that currently protect this symbol.
    pub fn protection_count(&self) -> usize {
        self.protected.borrow().count(self.id)
    }
}

impl Symb for Symbol {
    fn symbol_id(&self) -> SymbolId {
        self.id
    }
}

impl Clone for Symbol {
    fn clone(&self) -> Self {
        Symbol::new(self.id, &self.protected)
    }
}

impl Drop for Symbol {
    fn drop(&mut self) {
        self.protected.borrow_mut().unprotect(self.id);
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.id)
    }
}
