#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::marker::PhantomData;
use std::num::NonZeroUsize;
use std::rc::Rc;

use delegate::delegate;

use crate::storage::Root;
use crate::storage::RootIndex;
use crate::storage::RootSet;

/// The address of a term cell. A `TermId` does not keep the term alive, it
/// is only valid while the term is reachable from a root.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermId(NonZeroUsize);

impl TermId {
    pub(crate) fn new(address: usize) -> TermId {
        match NonZeroUsize::new(address) {
            Some(address) => TermId(address),
            None => panic!("The null address is not a term"),
        }
    }

    /// Returns the identifier for a payload word, `None` for the null address.
    pub fn from_address(address: usize) -> Option<TermId> {
        NonZeroUsize::new(address).map(TermId)
    }

    pub fn address(self) -> usize {
        self.0.get()
    }
}

impl fmt::Debug for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TermId({:#x})", self.0)
    }
}

/// Anything that identifies a term.
pub trait Term {
    fn id(&self) -> TermId;
}

impl Term for TermId {
    fn id(&self) -> TermId {
        *self
    }
}

impl<T: Term + ?Sized> Term for &T {
    fn id(&self) -> TermId {
        (**self).id()
    }
}

/// A term that is kept alive by something that outlives `'a`, typically the
/// [ATerm] it was obtained from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TermRef<'a> {
    id: TermId,
    marker: PhantomData<&'a ()>,
}

impl TermRef<'_> {
    pub(crate) fn new(id: TermId) -> Self {
        Self {
            id,
            marker: PhantomData,
        }
    }

    pub fn address(&self) -> usize {
        self.id.address()
    }
}

impl Term for TermRef<'_> {
    fn id(&self) -> TermId {
        self.id
    }
}

impl fmt::Debug for TermRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.id)
    }
}

/// A term that is protected from garbage collection for as long as this
/// value exists.
pub struct ATerm {
    term: TermRef<'static>,
    root: RootIndex,
    roots: Rc<RefCell<RootSet>>,
}

impl ATerm {
    pub(crate) fn new(id: TermId, roots: &Rc<RefCell<RootSet>>) -> ATerm {
        let root = roots.borrow_mut().protect(Root::Term(id));
        ATerm {
            term: TermRef::new(id),
            root,
            roots: roots.clone(),
        }
    }

    /// Borrows the term, it stays valid for as long as this guard is not changed.
    pub fn get(&self) -> TermRef<'_> {
        self.term
    }

    /// Replaces the protected term by the given one.
    pub fn set(&mut self, term: &impl Term) {
        let id = term.id();
        self.roots.borrow_mut().replace(self.root, Root::Term(id));
        self.term = TermRef::new(id);
    }

    delegate! {
        to self.term {
            pub fn address(&self) -> usize;
        }
    }
}

impl Term for ATerm {
    fn id(&self) -> TermId {
        self.term.id
    }
}

impl Clone for ATerm {
    fn clone(&self) -> Self {
        ATerm::new(self.term.id, &self.roots)
    }
}

impl Drop for ATerm {
    fn drop(&mut self) {
        self.roots.borrow_mut().unprotect(self.root);
    }
}

impl PartialEq for ATerm {
    fn eq(&self, other: &Self) -> bool {
        self.term == other.term
    }
}

impl Eq for ATerm {}

impl Hash for ATerm {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.term.hash(state)
    }
}

impl fmt::Debug for ATerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ATerm({:?})", self.term.id)
    }
}

/// A fixed length array of term slots that are all roots of the collector.
pub struct TermArray {
    slots: Rc<RefCell<Vec<Option<TermId>>>>,
    root: RootIndex,
    roots: Rc<RefCell<RootSet>>,
}

impl TermArray {
    pub(crate) fn new(len: usize, roots: &Rc<RefCell<RootSet>>) -> TermArray {
        let slots = Rc::new(RefCell::new(vec![None; len]));
        let root = roots.borrow_mut().protect(Root::Array(slots.clone()));
        TermArray {
            slots,
            root,
            roots: roots.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the term in the given slot. Panics when the index is out of bounds.
    pub fn get(&self, index: usize) -> Option<TermRef<'_>> {
        self.slots.borrow()[index].map(TermRef::new)
    }

    pub fn set(&mut self, index: usize, term: &impl Term) {
        self.slots.borrow_mut()[index] = Some(term.id());
    }

    pub fn clear(&mut self, index: usize) {
        self.slots.borrow_mut()[index] = None;
    }

    /// The terms in the occupied slots.
    pub fn iter(&self) -> impl Iterator<Item = TermRef<'_>> {
        let slots: Vec<TermId> = self.slots.borrow().iter().flatten().copied().collect();
        slots.into_iter().map(TermRef::new)
    }
}

impl Drop for TermArray {
    fn drop(&mut self) {
        self.roots.borrow_mut().unprotect(self.root);
    }
}

impl fmt::Debug for TermArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.slots.borrow().iter()).finish()
    }
}
