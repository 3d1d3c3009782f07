#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::TermId;

/// Something the collector treats as a root.
pub enum Root {
    Term(TermId),

    /// An array of slots that are all roots, shared with a [crate::TermArray].
    Array(Rc<RefCell<Vec<Option<TermId>>>>),
}

/// Identifies a root in the [RootSet].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RootIndex(usize);

impl fmt::Display for RootIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

enum Entry {
    Filled(Root),
    Free(Option<usize>),
}

/// The explicitly registered roots. Indices of removed roots are reused.
#[derive(Default)]
pub struct RootSet {
    roots: Vec<Entry>,
    free: Option<usize>,
    len: usize,
    number_of_insertions: u64,
}

impl RootSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a root and returns the index that removes it again.
    pub fn protect(&mut self, root: Root) -> RootIndex {
        self.number_of_insertions += 1;
        self.len += 1;

        match self.free {
            Some(index) => {
                if let Entry::Free(next) = self.roots[index] {
                    self.free = next;
                } else {
                    panic!("The free list of the root set points to a filled entry");
                }

                self.roots[index] = Entry::Filled(root);
                RootIndex(index)
            }
            None => {
                self.roots.push(Entry::Filled(root));
                RootIndex(self.roots.len() - 1)
            }
        }
    }

    /// Removes the root at the given index.
    pub fn unprotect(&mut self, index: RootIndex) {
        debug_assert!(
            matches!(self.roots[index.0], Entry::Filled(_)),
            "Root {index} is not protected"
        );

        self.roots[index.0] = Entry::Free(self.free);
        self.free = Some(index.0);
        self.len -= 1;
    }

    /// Replaces the root at the given index.
    pub fn replace(&mut self, index: RootIndex, root: Root) {
        debug_assert!(
            matches!(self.roots[index.0], Entry::Filled(_)),
            "Root {index} is not protected"
        );

        self.roots[index.0] = Entry::Filled(root);
    }

    /// Calls the function for every term that is rooted.
    pub fn for_each_term<F: FnMut(TermId)>(&self, mut f: F) {
        for entry in &self.roots {
            match entry {
                Entry::Filled(Root::Term(id)) => f(*id),
                Entry::Filled(Root::Array(slots)) => slots.borrow().iter().flatten().copied().for_each(&mut f),
                Entry::Free(_) => {}
            }
        }
    }

    /// The number of roots, an array counts as one.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn number_of_insertions(&self) -> u64 {
        self.number_of_insertions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuses_indices() {
        let mut roots = RootSet::new();

        let a = roots.protect(Root::Term(TermId::new(8)));
        let b = roots.protect(Root::Term(TermId::new(16)));
        roots.unprotect(a);

        let c = roots.protect(Root::Term(TermId::new(24)));
        assert_eq!(a, c);
        assert_eq!(roots.len(), 2);
        assert_eq!(roots.number_of_insertions(), 3);

        roots.replace(b, Root::Term(TermId::new(32)));

        let mut terms = Vec::new();
        roots.for_each_term(|id| terms.push(id.address()));
        terms.sort();
        assert_eq!(terms, vec![24, 32]);
    }

    #[test]
    fn test_array_roots() {
        let mut roots = RootSet::new();
        let slots = Rc::new(RefCell::new(vec![None, Some(TermId::new(40)), None]));
        roots.protect(Root::Array(slots.clone()));

        slots.borrow_mut()[0] = Some(TermId::new(48));

        let mut terms = Vec::new();
        roots.for_each_term(|id| terms.push(id.address()));
        assert_eq!(terms, vec![48, 40]);
    }
}
