#![forbid(unsafe_code)]

use std::collections::VecDeque;

use crate::Marker;
use crate::SymbolId;
use crate::TermId;

/// This trait should be implemented by containers that store unprotected
/// terms or symbols, and that are registered with
/// [crate::TermStore::register_container].
///
/// The implementation should mark all contained terms and symbols that must
/// be kept alive using the provided [Marker].
pub trait Markable {
    /// Marks all contained terms and symbols.
    fn mark(&self, marker: &mut Marker<'_>);

    /// Should return true iff the given term is contained in the object. Used for runtime checks.
    fn contains_term(&self, term: TermId) -> bool;

    /// Should return true iff the given symbol is contained in the object. Used for runtime checks.
    fn contains_symbol(&self, symbol: SymbolId) -> bool;

    /// Returns the number of terms in the instance.
    fn len(&self) -> usize;

    /// Returns true iff the container is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Markable for TermId {
    fn mark(&self, marker: &mut Marker<'_>) {
        marker.mark(self);
    }

    fn contains_term(&self, term: TermId) -> bool {
        *self == term
    }

    fn contains_symbol(&self, _symbol: SymbolId) -> bool {
        false
    }

    fn len(&self) -> usize {
        1
    }
}

impl Markable for SymbolId {
    fn mark(&self, marker: &mut Marker<'_>) {
        marker.mark_symbol(self);
    }

    fn contains_term(&self, _term: TermId) -> bool {
        false
    }

    fn contains_symbol(&self, symbol: SymbolId) -> bool {
        *self == symbol
    }

    fn len(&self) -> usize {
        0
    }
}

impl<T: Markable> Markable for Option<T> {
    fn mark(&self, marker: &mut Marker<'_>) {
        if let Some(value) = self {
            value.mark(marker);
        }
    }

    fn contains_term(&self, term: TermId) -> bool {
        self.as_ref().is_some_and(|v| v.contains_term(term))
    }

    fn contains_symbol(&self, symbol: SymbolId) -> bool {
        self.as_ref().is_some_and(|v| v.contains_symbol(symbol))
    }

    fn len(&self) -> usize {
        self.as_ref().map_or(0, Markable::len)
    }
}

impl<T: Markable> Markable for Vec<T> {
    fn mark(&self, marker: &mut Marker<'_>) {
        for value in self {
            value.mark(marker);
        }
    }

    fn contains_term(&self, term: TermId) -> bool {
        self.iter().any(|v| v.contains_term(term))
    }

    fn contains_symbol(&self, symbol: SymbolId) -> bool {
        self.iter().any(|v| v.contains_symbol(symbol))
    }

    fn len(&self) -> usize {
        self.iter().map(Markable::len).sum()
    }
}

impl<T: Markable> Markable for VecDeque<T> {
    fn mark(&self, marker: &mut Marker<'_>) {
        for value in self {
            value.mark(marker);
        }
    }

    fn contains_term(&self, term: TermId) -> bool {
        self.iter().any(|v| v.contains_term(term))
    }

    fn contains_symbol(&self, symbol: SymbolId) -> bool {
        self.iter().any(|v| v.contains_symbol(symbol))
    }

    fn len(&self) -> usize {
        self.iter().map(Markable::len).sum()
    }
}

impl<A: Markable, B: Markable> Markable for (A, B) {
    fn mark(&self, marker: &mut Marker<'_>) {
        self.0.mark(marker);
        self.1.mark(marker);
    }

    fn contains_term(&self, term: TermId) -> bool {
        self.0.contains_term(term) || self.1.contains_term(term)
    }

    fn contains_symbol(&self, symbol: SymbolId) -> bool {
        self.0.contains_symbol(symbol) || self.1.contains_symbol(symbol)
    }

    fn len(&self) -> usize {
        self.0.len() + self.1.len()
    }
}
