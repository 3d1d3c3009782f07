#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::cmp::Ordering;
use std::mem::size_of;
use std::rc::Rc;

use log::debug;
use smallvec::SmallVec;

use crate::ATerm;
use crate::CollectionStats;
use crate::GcState;
use crate::Header;
use crate::MAX_HEADER_VALUE;
use crate::MarkCallback;
use crate::Markable;
use crate::Marker;
use crate::RegistrationId;
use crate::StoreConfig;
use crate::StoreMetrics;
use crate::Symb;
use crate::Symbol;
use crate::SymbolId;
use crate::Term;
use crate::TermArray;
use crate::TermId;
use crate::TermRef;
use crate::TermStoreError;
use crate::TermType;
use crate::gc::Collector;
use crate::gc::Roots;
use crate::storage::BlockAllocator;
use crate::storage::CELL_DATA;
use crate::storage::HashTable;
use crate::storage::NULL;
use crate::storage::ProtectedBlock;
use crate::storage::ProtectedBlockAllocator;
use crate::storage::Root;
use crate::storage::RootSet;
use crate::storage::SymbolTable;
use crate::storage::TermTable;
use crate::storage::hash_cell;
use crate::storage::hash_of;
use crate::symbol::ProtectedSymbols;

/// The number of words of the different kinds of cells.
const SYMBOL_CELL_SIZE: usize = CELL_DATA;
const INT_CELL_SIZE: usize = CELL_DATA + 1;
const LIST_CELL_SIZE: usize = CELL_DATA + 2;

/// Stores maximally shared terms. Structurally equal terms are represented by
/// the same cell, so comparing terms is comparing their [TermId].
///
/// Cells are only freed by a garbage collection, which keeps everything that
/// is reachable from a root alive. Roots are the guards handed out by the
/// store ([ATerm], [TermArray] and [Symbol]), protected blocks, registered
/// containers and mark callbacks. Collections run when an allocation finds no
/// free cell, or when [TermStore::collect_garbage] is called.
///
/// The store is single threaded, every thread that needs terms owns its own store.
pub struct TermStore {
    config: StoreConfig,

    blocks: BlockAllocator,
    terms: TermTable,
    symbols: SymbolTable,

    roots: Rc<RefCell<RootSet>>,
    protected_symbols: Rc<RefCell<ProtectedSymbols>>,
    protected_blocks: ProtectedBlockAllocator,
    callbacks: Vec<(RegistrationId, MarkCallback)>,
    containers: Vec<(RegistrationId, Rc<RefCell<dyn Markable>>)>,
    next_registration: usize,

    /// Intermediate results that must survive the allocations of the current construction.
    scratch_terms: Vec<TermId>,
    scratch_symbols: Vec<SymbolId>,

    /// The most recently interned symbol survives the next collection.
    parked: Option<SymbolId>,

    collector: Collector,
    empty_list: TermId,
    automatic_gc: bool,
}

impl TermStore {
    /// Creates a store with the given configuration.
    pub fn new(config: StoreConfig) -> Result<TermStore, TermStoreError> {
        if !config.block_words.is_power_of_two() || config.block_words < 16 {
            return Err(TermStoreError::InvalidOption(format!(
                "block size {} must be a power of two of at least 16 words",
                config.block_words
            )));
        }

        let mut blocks = BlockAllocator::new(&config);
        let mut terms = TermTable::new(config.term_table_class, config.max_load_percent);

        // The empty list exists for as long as the store.
        blocks.expand(LIST_CELL_SIZE)?;
        let address = blocks
            .allocate(LIST_CELL_SIZE)
            .ok_or(TermStoreError::OutOfMemory {
                size_class: LIST_CELL_SIZE,
            })?;
        let header = Header::list(0);
        let payload = [NULL, NULL];
        initialise_cell(&mut blocks, &mut terms, address, header, &payload, hash_cell(header, &payload));

        let empty_list = TermId::new(address);
        let roots = Rc::new(RefCell::new(RootSet::new()));
        roots.borrow_mut().protect(Root::Term(empty_list));

        debug!(
            "Created term store with blocks of {} words and {} term table buckets",
            config.block_words,
            terms.number_of_buckets()
        );

        Ok(TermStore {
            symbols: SymbolTable::new(config.symbol_table_class),
            protected_blocks: ProtectedBlockAllocator::new(&config),
            protected_symbols: Rc::new(RefCell::new(ProtectedSymbols::new())),
            collector: Collector::new(config.verbosity),
            automatic_gc: config.automatic_gc,
            callbacks: Vec::new(),
            containers: Vec::new(),
            next_registration: 0,
            scratch_terms: Vec::new(),
            scratch_symbols: Vec::new(),
            parked: None,
            blocks,
            terms,
            roots,
            empty_list,
            config,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the id of the symbol with the given name, arity and quotation,
    /// creating it when it does not exist yet. The symbol is not protected,
    /// but it survives the next collection.
    pub fn intern(&mut self, name: &str, arity: usize, quoted: bool) -> Result<SymbolId, TermStoreError> {
        if let Some(id) = self.symbols.lookup(name, arity, quoted) {
            self.parked = Some(id);
            return Ok(id);
        }

        self.symbols.reserve()?;
        let cell = self.allocate(SYMBOL_CELL_SIZE)?;
        let id = self.symbols.insert(name, arity, quoted, cell);
        self.blocks.set_header(cell, Header::symbol(id.index(), arity, quoted));

        self.parked = Some(id);
        Ok(id)
    }

    /// Returns a protected, unquoted symbol.
    pub fn create_symbol(&mut self, name: &str, arity: usize) -> Result<Symbol, TermStoreError> {
        let id = self.intern(name, arity, false)?;
        Ok(self.protect_symbol(&id))
    }

    /// Returns a protected symbol whose name starts with the prefix and that did not exist before.
    pub fn fresh_symbol(&mut self, prefix: &str, arity: usize) -> Result<Symbol, TermStoreError> {
        loop {
            let name = self.symbols.fresh_name(prefix)?;
            if self.symbols.lookup(&name, arity, false).is_none() {
                return self.create_symbol(&name, arity);
            }
        }
    }

    /// Makes sure that symbols generated by [TermStore::fresh_symbol] do not clash with existing symbols.
    pub fn register_prefix(&mut self, prefix: &str) {
        self.symbols.register_prefix(prefix);
    }

    pub fn remove_prefix(&mut self, prefix: &str) {
        self.symbols.remove_prefix(prefix);
    }

    /// Protects the symbol for as long as the returned guard exists. Guards nest.
    pub fn protect_symbol(&self, symbol: &impl Symb) -> Symbol {
        Symbol::new(symbol.symbol_id(), &self.protected_symbols)
    }

    /// The number of guards protecting the symbol.
    pub fn symbol_protection_count(&self, symbol: &impl Symb) -> usize {
        self.protected_symbols.borrow().count(symbol.symbol_id())
    }

    pub fn symbol_name(&self, symbol: &impl Symb) -> &str {
        self.symbols.name(symbol.symbol_id())
    }

    pub fn symbol_arity(&self, symbol: &impl Symb) -> usize {
        self.symbols.arity(symbol.symbol_id())
    }

    pub fn symbol_is_quoted(&self, symbol: &impl Symb) -> bool {
        self.symbols.is_quoted(symbol.symbol_id())
    }

    /// Returns true iff the symbol has not been collected.
    pub fn is_live_symbol(&self, symbol: &impl Symb) -> bool {
        self.symbols.is_live(symbol.symbol_id())
    }

    /// Returns the application of the symbol to the given arguments.
    pub fn make_appl<T: Term>(&mut self, symbol: &impl Symb, args: &[T]) -> Result<ATerm, TermStoreError> {
        let id = self.make_appl_id(symbol.symbol_id(), args.iter().map(|arg| arg.id().address()).collect())?;
        Ok(self.protect(&id))
    }

    /// Returns the application of a symbol without arguments.
    pub fn make_constant(&mut self, symbol: &impl Symb) -> Result<ATerm, TermStoreError> {
        self.make_appl::<TermId>(symbol, &[])
    }

    pub fn make_int(&mut self, value: i32) -> Result<ATerm, TermStoreError> {
        let id = self.find_or_create(Header::int(), &[value as u32 as usize])?;
        Ok(self.protect(&id))
    }

    /// Returns the list with the given head in front of the tail, which must be a list.
    pub fn make_list_cons(&mut self, head: &impl Term, tail: &impl Term) -> Result<ATerm, TermStoreError> {
        let id = self.cons(head.id(), tail.id())?;
        Ok(self.protect(&id))
    }

    /// Returns the list containing the given elements in order.
    pub fn make_list<T: Term>(&mut self, elements: &[T]) -> Result<ATerm, TermStoreError> {
        let base = self.scratch_terms.len();
        self.scratch_terms.push(self.empty_list);

        for element in elements.iter().rev() {
            match self.cons(element.id(), self.scratch_terms[base]) {
                Ok(list) => self.scratch_terms[base] = list,
                Err(error) => {
                    self.scratch_terms.truncate(base);
                    return Err(error);
                }
            }
        }

        let list = self.scratch_terms[base];
        self.scratch_terms.truncate(base);
        Ok(self.protect(&list))
    }

    /// Returns the application that is equal to the given one, except that
    /// argument `n` is replaced. The annotations of the term are kept.
    pub fn set_argument(&mut self, term: &impl Term, n: usize, arg: &impl Term) -> Result<ATerm, TermStoreError> {
        if self.term_type(term) != TermType::Appl {
            return Err(TermStoreError::NotAnApplication);
        }

        let address = term.id().address();
        let symbol = self.symbol(term);
        let mut args: SmallVec<[usize; 8]> = SmallVec::from_slice(self.fields(address));
        if n >= args.len() {
            return Err(TermStoreError::ArgumentOutOfRange {
                index: n,
                arity: args.len(),
            });
        }

        args[n] = arg.id().address();
        let id = self.make_appl_id(symbol, args)?;
        match self.annotations(term).map(|annotations| annotations.id()) {
            Some(annotations) => {
                let result = self.protect(&id);
                self.set_annotations(&result, &annotations)
            }
            None => Ok(self.protect(&id)),
        }
    }

    /// The empty list.
    pub fn empty_list(&self) -> ATerm {
        self.protect(&self.empty_list)
    }

    pub fn term_type(&self, term: &impl Term) -> TermType {
        self.blocks.term_type(term.id().address())
    }

    /// The number of arguments of an application, zero for other terms.
    pub fn arity(&self, term: &impl Term) -> usize {
        match self.term_type(term) {
            TermType::Appl => self.symbols.arity(self.symbol(term)),
            _ => 0,
        }
    }

    /// The symbol of an application. Panics for other terms.
    pub fn symbol(&self, term: &impl Term) -> SymbolId {
        let header = self.blocks.header(term.id().address());
        assert_eq!(header.term_type(), TermType::Appl, "Only applications have a symbol");
        SymbolId::new(header.value())
    }

    /// The argument `n` of an application. Panics when it does not exist.
    pub fn arg<'a>(&self, term: &'a impl Term, n: usize) -> TermRef<'a> {
        debug_assert_eq!(self.term_type(term), TermType::Appl, "Only applications have arguments");
        TermRef::new(TermId::new(self.fields(term.id().address())[n]))
    }

    /// The arguments of an application.
    pub fn args<'a>(&self, term: &'a impl Term) -> Vec<TermRef<'a>> {
        debug_assert_eq!(self.term_type(term), TermType::Appl, "Only applications have arguments");
        self.fields(term.id().address())
            .iter()
            .map(|arg| TermRef::new(TermId::new(*arg)))
            .collect()
    }

    /// The value of an integer term. Panics for other terms.
    pub fn int_value(&self, term: &impl Term) -> i32 {
        let address = term.id().address();
        assert_eq!(self.blocks.term_type(address), TermType::Int, "Term is not an integer");
        self.blocks.payload(address)[0] as u32 as i32
    }

    pub fn is_list(&self, term: &impl Term) -> bool {
        self.term_type(term) == TermType::List
    }

    /// Returns true iff the term is the empty list, possibly annotated.
    pub fn is_empty_list(&self, term: &impl Term) -> bool {
        let header = self.blocks.header(term.id().address());
        header.term_type() == TermType::List && header.value() == 0
    }

    pub fn list_len(&self, term: &impl Term) -> Result<usize, TermStoreError> {
        let header = self.blocks.header(term.id().address());
        if header.term_type() != TermType::List {
            return Err(TermStoreError::NotAList);
        }

        if header.value() < MAX_HEADER_VALUE {
            Ok(header.value())
        } else {
            Ok(self.list_iter(term)?.count())
        }
    }

    pub fn list_head<'a>(&self, term: &'a impl Term) -> Result<TermRef<'a>, TermStoreError> {
        self.list_field(term, 0)
    }

    pub fn list_tail<'a>(&self, term: &'a impl Term) -> Result<TermRef<'a>, TermStoreError> {
        self.list_field(term, 1)
    }

    /// Iterates over the elements of the list.
    pub fn list_iter<'a>(&'a self, term: &'a impl Term) -> Result<ListIter<'a>, TermStoreError> {
        if !self.is_list(term) {
            return Err(TermStoreError::NotAList);
        }

        Ok(ListIter {
            store: self,
            current: term.id(),
        })
    }

    /// The number of collections the term survived, saturated at [crate::MAX_AGE].
    pub fn age(&self, term: &impl Term) -> u8 {
        self.blocks.header(term.id().address()).age()
    }

    /// Sets the age of the term back to zero.
    pub fn reset_age(&mut self, term: &impl Term) {
        let address = term.id().address();
        let header = self.blocks.header(address);
        self.blocks.set_header(address, header.with_age_reset());
    }

    /// Returns true iff the address is the address of a live cell.
    pub fn is_valid_term(&self, address: usize) -> bool {
        self.blocks.is_valid_term(address) && self.blocks.term_type(address) != TermType::Symbol
    }

    /// Converts a raw address, for example one read back from a container, into a term.
    pub fn term_from_address(&self, address: usize) -> Result<TermId, TermStoreError> {
        if self.is_valid_term(address) {
            Ok(TermId::new(address))
        } else {
            Err(TermStoreError::InvalidTerm(address))
        }
    }

    /// The annotations of the term, a non-empty list.
    pub fn annotations<'a>(&self, term: &'a impl Term) -> Option<TermRef<'a>> {
        let address = term.id().address();
        if self.blocks.header(address).is_annotated() {
            self.blocks
                .payload(address)
                .last()
                .map(|annotations| TermRef::new(TermId::new(*annotations)))
        } else {
            None
        }
    }

    /// Returns the term with its annotations replaced by the given list.
    /// Setting the empty list removes the annotations.
    pub fn set_annotations(&mut self, term: &impl Term, annotations: &impl Term) -> Result<ATerm, TermStoreError> {
        if !self.is_list(annotations) {
            return Err(TermStoreError::NotAList);
        }

        if self.is_empty_list(annotations) {
            return self.remove_annotations(term);
        }

        let address = term.id().address();
        let header = self.blocks.header(address);
        let mut payload: SmallVec<[usize; 8]> = SmallVec::from_slice(self.fields(address));

        let max = self.blocks.max_cell_size() - CELL_DATA;
        if payload.len() + 1 > max {
            return Err(TermStoreError::ArityTooLarge {
                arity: payload.len(),
                max: max - 1,
            });
        }

        payload.push(annotations.id().address());
        let id = self.find_or_create(header.with_annotations(true), &payload)?;
        Ok(self.protect(&id))
    }

    /// Returns the term without annotations.
    pub fn remove_annotations(&mut self, term: &impl Term) -> Result<ATerm, TermStoreError> {
        let address = term.id().address();
        let header = self.blocks.header(address);
        if !header.is_annotated() {
            return Ok(self.protect(term));
        }

        let payload: SmallVec<[usize; 8]> = SmallVec::from_slice(self.fields(address));
        let id = self.find_or_create(header.with_annotations(false), &payload)?;
        Ok(self.protect(&id))
    }

    /// The value of the annotation with the given label. Annotations are
    /// stored as a list of `[label, value]` pairs.
    pub fn annotation<'a>(&self, term: &'a impl Term, label: &impl Term) -> Option<TermRef<'a>> {
        let annotations = self.annotations(term)?;
        self.list_iter(&annotations)
            .ok()?
            .filter_map(|element| self.annotation_pair(element.id()))
            .find(|(candidate, _)| *candidate == label.id())
            .map(|(_, value)| TermRef::new(value))
    }

    /// Returns the term with the annotation for the label set to the value.
    /// A new label is put in front of the existing annotations.
    pub fn set_annotation(
        &mut self,
        term: &impl Term,
        label: &impl Term,
        value: &impl Term,
    ) -> Result<ATerm, TermStoreError> {
        if self.annotation(term, label).map(|current| current.id()) == Some(value.id()) {
            return Ok(self.protect(term));
        }

        let existing = self.annotation_elements(term);
        let pair = self.make_list(&[label.id(), value.id()])?;

        let mut elements = Vec::with_capacity(existing.len() + 1);
        let mut replaced = false;
        for element in existing {
            if !replaced && self.annotation_label(element) == Some(label.id()) {
                elements.push(pair.clone());
                replaced = true;
            } else {
                elements.push(self.protect(&element));
            }
        }

        if !replaced {
            elements.insert(0, pair);
        }

        let annotations = self.make_list(&elements)?;
        self.set_annotations(term, &annotations)
    }

    /// Returns the term without the annotation for the label.
    pub fn remove_annotation(&mut self, term: &impl Term, label: &impl Term) -> Result<ATerm, TermStoreError> {
        let existing = self.annotation_elements(term);
        let remaining: Vec<ATerm> = existing
            .iter()
            .filter(|element| self.annotation_label(**element) != Some(label.id()))
            .map(|element| self.protect(element))
            .collect();

        if remaining.len() == existing.len() {
            return Ok(self.protect(term));
        }

        let annotations = self.make_list(&remaining)?;
        self.set_annotations(term, &annotations)
    }

    /// The number of distinct cells reachable from the term, the term included.
    pub fn unique_subterms(&self, term: &impl Term) -> usize {
        let equal: fn(&usize, &usize) -> bool = |a, b| a == b;
        let mut visited = HashTable::new(75, equal);
        let mut stack = vec![term.id().address()];

        while let Some(address) = stack.pop() {
            if visited.put(address, hash_of(&address), ()).is_some() {
                continue;
            }

            stack.extend(self.children(address));
        }

        visited.len()
    }

    /// The length of the longest path from the term to a leaf, a leaf has depth one.
    pub fn term_depth(&self, term: &impl Term) -> usize {
        let equal: fn(&usize, &usize) -> bool = |a, b| a == b;
        let mut depths: HashTable<usize, usize> = HashTable::new(75, equal);
        let mut stack = vec![(term.id().address(), false)];

        while let Some((address, children_done)) = stack.pop() {
            if depths.contains_key(&address, hash_of(&address)) {
                continue;
            }

            let children = self.children(address);
            if children_done {
                let depth = 1 + children
                    .iter()
                    .map(|child| depths.get(child, hash_of(child)).copied().unwrap_or(0))
                    .max()
                    .unwrap_or(0);
                depths.put(address, hash_of(&address), depth);
            } else {
                stack.push((address, true));
                stack.extend(children.into_iter().map(|child| (child, false)));
            }
        }

        depths.get(&term.id().address(), hash_of(&term.id().address())).copied().unwrap_or(0)
    }

    /// The number of distinct symbols that occur in the term. Integers,
    /// list cells, empty lists and annotations each count as one symbol.
    pub fn unique_symbols(&self, term: &impl Term) -> usize {
        let equal: fn(&usize, &usize) -> bool = |a, b| a == b;
        let mut visited = HashTable::new(75, equal);
        let same_symbol: fn(&SymbolId, &SymbolId) -> bool = |a, b| a == b;
        let mut symbols = HashTable::new(75, same_symbol);
        let mut kinds = [false; 4];
        let mut stack = vec![term.id().address()];

        while let Some(address) = stack.pop() {
            if visited.put(address, hash_of(&address), ()).is_some() {
                continue;
            }

            let header = self.blocks.header(address);
            match header.term_type() {
                TermType::Appl => {
                    let symbol = SymbolId::new(header.value());
                    symbols.put(symbol, hash_of(&symbol), ());
                }
                TermType::Int => kinds[0] = true,
                TermType::List if header.value() == 0 => kinds[1] = true,
                TermType::List => kinds[2] = true,
                TermType::Symbol | TermType::Free => {}
            }

            if header.is_annotated() {
                kinds[3] = true;
            }

            stack.extend(self.children(address));
        }

        symbols.len() + kinds.iter().filter(|kind| **kind).count()
    }

    /// The number of bytes used by the distinct cells of the term and by
    /// the symbols that occur in it, including their names.
    pub fn core_size(&self, term: &impl Term) -> usize {
        let equal: fn(&usize, &usize) -> bool = |a, b| a == b;
        let mut visited = HashTable::new(75, equal);
        let same_symbol: fn(&SymbolId, &SymbolId) -> bool = |a, b| a == b;
        let mut symbols = HashTable::new(75, same_symbol);
        let mut words = 0;
        let mut name_bytes = 0;
        let mut stack = vec![term.id().address()];

        while let Some(address) = stack.pop() {
            if visited.put(address, hash_of(&address), ()).is_some() {
                continue;
            }

            words += self.blocks.cell_size(address);

            let header = self.blocks.header(address);
            if header.term_type() == TermType::Appl {
                let symbol = SymbolId::new(header.value());
                if symbols.put(symbol, hash_of(&symbol), ()).is_none() {
                    words += SYMBOL_CELL_SIZE;
                    name_bytes += self.symbols.name(symbol).len();
                }
            }

            stack.extend(self.children(address));
        }

        words * size_of::<usize>() + name_bytes
    }

    /// A total order on terms. Applications come before integers, which come
    /// before lists. Applications are ordered by symbol name, arity, quotation
    /// and then by their arguments from left to right. Lists are ordered by
    /// their elements, a proper prefix comes first. Terms that are equal
    /// apart from their annotations are ordered by them, where terms without
    /// annotations come first.
    pub fn compare(&self, left: &impl Term, right: &impl Term) -> Ordering {
        enum Task {
            Terms(usize, usize),
            Annotations(usize, usize),
        }

        let mut stack = vec![Task::Terms(left.id().address(), right.id().address())];
        while let Some(task) = stack.pop() {
            let (left, right) = match task {
                Task::Terms(left, right) => (left, right),
                Task::Annotations(left, right) => {
                    let left = self.annotations(&TermId::new(left)).map(|term| term.address());
                    let right = self.annotations(&TermId::new(right)).map(|term| term.address());
                    match (left, right) {
                        (Some(left), Some(right)) => stack.push(Task::Terms(left, right)),
                        (Some(_), None) => return Ordering::Greater,
                        (None, Some(_)) => return Ordering::Less,
                        (None, None) => {}
                    }
                    continue;
                }
            };

            if left == right {
                continue;
            }

            let left_header = self.blocks.header(left);
            let right_header = self.blocks.header(right);
            let ordering = (left_header.term_type() as usize).cmp(&(right_header.term_type() as usize));
            if ordering.is_ne() {
                return ordering;
            }

            stack.push(Task::Annotations(left, right));
            match left_header.term_type() {
                TermType::Appl => {
                    let left_symbol = SymbolId::new(left_header.value());
                    let right_symbol = SymbolId::new(right_header.value());
                    let ordering = self
                        .symbols
                        .name(left_symbol)
                        .cmp(self.symbols.name(right_symbol))
                        .then(self.symbols.arity(left_symbol).cmp(&self.symbols.arity(right_symbol)))
                        .then(left_header.is_quoted().cmp(&right_header.is_quoted()));
                    if ordering.is_ne() {
                        return ordering;
                    }

                    let left_args = self.fields(left);
                    let right_args = self.fields(right);
                    stack.extend(
                        left_args
                            .iter()
                            .zip(right_args)
                            .rev()
                            .map(|(left, right)| Task::Terms(*left, *right)),
                    );
                }
                TermType::Int => {
                    let ordering = self.int_value(&TermId::new(left)).cmp(&self.int_value(&TermId::new(right)));
                    if ordering.is_ne() {
                        return ordering;
                    }
                }
                TermType::List => match (left_header.value() == 0, right_header.value() == 0) {
                    (true, true) => {}
                    (true, false) => return Ordering::Less,
                    (false, true) => return Ordering::Greater,
                    (false, false) => {
                        let left = self.blocks.payload(left);
                        let right = self.blocks.payload(right);
                        stack.push(Task::Terms(left[1], right[1]));
                        stack.push(Task::Terms(left[0], right[0]));
                    }
                },
                TermType::Symbol | TermType::Free => {
                    debug_assert!(false, "Comparing cells that are not terms");
                }
            }
        }

        Ordering::Equal
    }

    /// Protects the term for as long as the returned guard exists.
    pub fn protect(&self, term: &impl Term) -> ATerm {
        debug_assert!(self.is_valid_term(term.id().address()), "Protecting {:?} which is not a term", term.id());
        ATerm::new(term.id(), &self.roots)
    }

    /// Returns an array of `len` empty slots whose terms are protected.
    pub fn protect_array(&self, len: usize) -> TermArray {
        TermArray::new(len, &self.roots)
    }

    /// Returns a protected block with `min_size` empty slots, see [ProtectedBlockAllocator::acquire].
    pub fn acquire_block(&mut self, min_size: usize, max_size: usize) -> Result<ProtectedBlock, TermStoreError> {
        self.protected_blocks.acquire(min_size, max_size)
    }

    pub fn resize_block(
        &mut self,
        block: ProtectedBlock,
        min_size: usize,
        max_size: usize,
    ) -> Result<ProtectedBlock, TermStoreError> {
        self.protected_blocks.resize(block, min_size, max_size)
    }

    pub fn grow_block(&mut self, block: ProtectedBlock, size: usize) -> Result<ProtectedBlock, TermStoreError> {
        self.protected_blocks.grow(block, size)
    }

    pub fn release_block(&mut self, block: ProtectedBlock) -> Result<(), TermStoreError> {
        self.protected_blocks.release(block)
    }

    /// The number of protected slots of the block.
    pub fn block_len(&self, block: ProtectedBlock) -> Result<usize, TermStoreError> {
        Ok(self.protected_blocks.slots(block)?.len())
    }

    /// The term in slot `index` of the block. Panics when the index is not protected.
    pub fn block_get(&self, block: ProtectedBlock, index: usize) -> Result<Option<TermRef<'_>>, TermStoreError> {
        Ok(self.protected_blocks.slots(block)?[index].map(TermRef::new))
    }

    pub fn block_set(&mut self, block: ProtectedBlock, index: usize, term: &impl Term) -> Result<(), TermStoreError> {
        self.protected_blocks.slots_mut(block)?[index] = Some(term.id());
        Ok(())
    }

    pub fn block_clear(&mut self, block: ProtectedBlock, index: usize) -> Result<(), TermStoreError> {
        self.protected_blocks.slots_mut(block)?[index] = None;
        Ok(())
    }

    /// Registers a function that marks additional terms during every collection.
    pub fn add_mark_callback<F>(&mut self, callback: F) -> RegistrationId
    where
        F: FnMut(&mut Marker<'_>) + 'static,
    {
        let id = self.next_registration_id();
        self.callbacks.push((id, Box::new(callback)));
        id
    }

    /// Returns true iff the callback was registered.
    pub fn remove_mark_callback(&mut self, id: RegistrationId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(registration, _)| *registration != id);
        before != self.callbacks.len()
    }

    /// Registers a container whose contents are marked during every collection.
    pub fn register_container<M: Markable + 'static>(&mut self, container: Rc<RefCell<M>>) -> RegistrationId {
        let id = self.next_registration_id();
        let container: Rc<RefCell<dyn Markable>> = container;
        self.containers.push((id, container));
        debug!("Registered container {id:?}, {} containers", self.containers.len());
        id
    }

    /// Returns true iff the container was registered.
    pub fn unregister_container(&mut self, id: RegistrationId) -> bool {
        let before = self.containers.len();
        self.containers.retain(|(registration, _)| *registration != id);
        before != self.containers.len()
    }

    /// Enables or disables collections triggered by allocation.
    pub fn set_automatic_garbage_collection(&mut self, enabled: bool) {
        self.automatic_gc = enabled;
    }

    /// Runs a full collection. Fails when a registered container is
    /// mutably borrowed, since its contents cannot be marked.
    pub fn collect_garbage(&mut self) -> Result<CollectionStats, TermStoreError> {
        if let Some((id, _)) = self
            .containers
            .iter()
            .find(|(_, container)| container.try_borrow().is_err())
        {
            return Err(TermStoreError::ContainerBorrowed(*id));
        }

        let root_set = self.roots.borrow();
        let protected_symbols = self.protected_symbols.borrow();

        Ok(self.collector.collect(
            &mut self.blocks,
            &mut self.terms,
            &mut self.symbols,
            Roots {
                scratch_terms: &self.scratch_terms,
                scratch_symbols: &self.scratch_symbols,
                root_set: &root_set,
                protected_blocks: &self.protected_blocks,
                callbacks: &mut self.callbacks,
                containers: &self.containers,
                protected_symbols: &protected_symbols,
                parked: self.parked,
            },
        ))
    }

    pub fn gc_state(&self) -> GcState {
        self.collector.state()
    }

    /// The number of terms in the store.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// A store always contains the empty list.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn number_of_symbols(&self) -> usize {
        self.symbols.len()
    }

    /// Returns the metrics of the store, can be formatted and written to output.
    pub fn metrics(&self) -> StoreMetrics {
        let roots = self.roots.borrow();

        StoreMetrics {
            terms: self.terms.len(),
            term_table_buckets: self.terms.number_of_buckets(),
            symbols: self.symbols.len(),
            protected_symbols: self.protected_symbols.borrow().len(),
            blocks_per_size: self
                .blocks
                .sizes()
                .map(|size| (size, self.blocks.blocks_of_size(size)))
                .collect(),
            unused_blocks: self.blocks.number_of_unused_blocks(),
            block_words: self.blocks.block_words(),
            roots: roots.len(),
            root_insertions: roots.number_of_insertions(),
            protected_blocks: self.protected_blocks.len(),
            collections: self.collector.collections(),
            reclaimed_cells: self.collector.total_reclaimed_cells(),
        }
    }

    fn next_registration_id(&mut self) -> RegistrationId {
        self.next_registration += 1;
        RegistrationId(self.next_registration)
    }

    fn make_appl_id(&mut self, symbol: SymbolId, args: SmallVec<[usize; 8]>) -> Result<TermId, TermStoreError> {
        let arity = self.symbols.arity(symbol);
        if arity != args.len() {
            return Err(TermStoreError::ArityMismatch {
                expected: arity,
                actual: args.len(),
            });
        }

        let max = self.blocks.max_cell_size() - CELL_DATA;
        if arity > max {
            return Err(TermStoreError::ArityTooLarge { arity, max });
        }

        let header = Header::appl(symbol.index(), arity, self.symbols.is_quoted(symbol));
        self.find_or_create(header, &args)
    }

    fn cons(&mut self, head: TermId, tail: TermId) -> Result<TermId, TermStoreError> {
        let length = self.list_len(&tail)?;
        self.find_or_create(
            Header::list(length.saturating_add(1)),
            &[head.address(), tail.address()],
        )
    }

    /// Returns the existing cell with the header and payload, or a new one.
    fn find_or_create(&mut self, header: Header, payload: &[usize]) -> Result<TermId, TermStoreError> {
        let hash = hash_cell(header, payload);
        if let Some(address) = self.terms.find(&self.blocks, hash, header, payload) {
            return Ok(TermId::new(address));
        }

        // The children and the symbol must survive a collection during the allocation.
        let terms_base = self.scratch_terms.len();
        let symbols_base = self.scratch_symbols.len();
        match header.term_type() {
            TermType::Appl => {
                self.scratch_symbols.push(SymbolId::new(header.value()));
                self.scratch_terms.extend(payload.iter().map(|arg| TermId::new(*arg)));
            }
            TermType::List => self.scratch_terms.extend(payload.iter().filter_map(|child| TermId::from_address(*child))),
            TermType::Int if header.is_annotated() => {
                self.scratch_terms.extend(payload.last().map(|annotations| TermId::new(*annotations)))
            }
            _ => {}
        }

        let address = self.allocate(CELL_DATA + payload.len());
        self.scratch_terms.truncate(terms_base);
        self.scratch_symbols.truncate(symbols_base);

        let address = address?;
        initialise_cell(&mut self.blocks, &mut self.terms, address, header, payload, hash);
        Ok(TermId::new(address))
    }

    /// Returns a cell of the given size, collecting garbage or adding blocks when necessary.
    fn allocate(&mut self, size: usize) -> Result<usize, TermStoreError> {
        if let Some(address) = self.blocks.allocate(size) {
            return Ok(address);
        }

        let mut collected = false;
        if self.should_collect(size) {
            collected = self.automatic_collection();

            if let Some(address) = self.blocks.allocate(size) {
                return Ok(address);
            }
        }

        if let Err(error) = self.blocks.expand(size) {
            debug!("Adding a block for cells of size {size} failed: {error}");

            let mut expanded = false;
            if self.automatic_gc && !collected && self.automatic_collection() {
                if let Some(address) = self.blocks.allocate(size) {
                    return Ok(address);
                }
                expanded = self.blocks.expand(size).is_ok();
            }

            if !expanded {
                self.blocks.release_unused();
                self.blocks.expand(size)?;
            }
        }

        self.blocks
            .allocate(size)
            .ok_or(TermStoreError::OutOfMemory { size_class: size })
    }

    /// Runs a collection for an allocation, returns false when it had to be skipped.
    fn automatic_collection(&mut self) -> bool {
        match self.collect_garbage() {
            Ok(_) => true,
            Err(error) => {
                debug!("Skipped garbage collection: {error}");
                false
            }
        }
    }

    /// Decides whether a collection is preferred over adding a block of the given size.
    fn should_collect(&self, size: usize) -> bool {
        if !self.automatic_gc {
            return false;
        }

        let number_of_blocks = self.blocks.blocks_of_size(size);
        if number_of_blocks <= self.config.gc_min_number_of_blocks {
            return false;
        }

        let live_before = self.blocks.live_blocks_before(size);
        let reclaimed_words = self.blocks.reclaimed_cells(size) * size;
        let reclaimed_ratio = (100 * reclaimed_words) / (1 + live_before * self.blocks.block_words());
        if reclaimed_ratio > self.config.good_gc_ratio {
            return true;
        }

        let allocation_rate = (100 * number_of_blocks.saturating_sub(live_before)) / (1 + live_before);
        allocation_rate >= self.config.small_allocation_rate_ratio
    }

    fn list_field<'a>(&self, term: &'a impl Term, index: usize) -> Result<TermRef<'a>, TermStoreError> {
        if !self.is_list(term) {
            return Err(TermStoreError::NotAList);
        }

        if self.is_empty_list(term) {
            return Err(TermStoreError::EmptyList);
        }

        Ok(TermRef::new(TermId::new(self.blocks.payload(term.id().address())[index])))
    }

    /// The addresses of the subterms of the cell, annotations included.
    fn children(&self, address: usize) -> SmallVec<[usize; 8]> {
        let header = self.blocks.header(address);
        match header.term_type() {
            TermType::Appl | TermType::List => self
                .blocks
                .payload(address)
                .iter()
                .copied()
                .filter(|child| *child != NULL)
                .collect(),
            TermType::Int if header.is_annotated() => self.blocks.payload(address).last().copied().into_iter().collect(),
            _ => SmallVec::new(),
        }
    }

    /// The payload of the cell without its annotations.
    fn fields(&self, address: usize) -> &[usize] {
        let payload = self.blocks.payload(address);
        if self.blocks.header(address).is_annotated() {
            &payload[..payload.len() - 1]
        } else {
            payload
        }
    }

    /// The elements of the annotation list of the term.
    fn annotation_elements(&self, term: &impl Term) -> Vec<TermId> {
        match self.annotations(term) {
            Some(annotations) => self
                .list_iter(&annotations)
                .map(|elements| elements.map(|element| element.id()).collect())
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    fn annotation_label(&self, element: TermId) -> Option<TermId> {
        self.annotation_pair(element).map(|(label, _)| label)
    }

    /// The label and value of an annotation, which is a list of two elements.
    fn annotation_pair(&self, element: TermId) -> Option<(TermId, TermId)> {
        if self.list_len(&element).ok()? != 2 {
            return None;
        }

        let payload = self.blocks.payload(element.address());
        let tail = self.blocks.payload(payload[1]);
        Some((TermId::new(payload[0]), TermId::new(tail[0])))
    }
}

/// Writes the header and payload of a new cell and adds it to the term table.
fn initialise_cell(
    blocks: &mut BlockAllocator,
    terms: &mut TermTable,
    address: usize,
    header: Header,
    payload: &[usize],
    hash: usize,
) {
    blocks.set_header(address, header);
    blocks.payload_mut(address).copy_from_slice(payload);
    terms.insert(blocks, address, hash);
}

/// Iterates over the elements of a list, see [TermStore::list_iter].
pub struct ListIter<'a> {
    store: &'a TermStore,
    current: TermId,
}

impl<'a> Iterator for ListIter<'a> {
    type Item = TermRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.store.is_empty_list(&self.current) {
            return None;
        }

        let payload = self.store.blocks.payload(self.current.address());
        let head = TermId::new(payload[0]);
        self.current = TermId::new(payload[1]);
        Some(TermRef::new(head))
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use crate::random_term;
    use crate::random_test;
    use crate::test_logger;

    use super::*;

    fn small_store() -> TermStore {
        TermStore::new(
            StoreConfig::default()
                .with_block_words(16)
                .with_gc_min_number_of_blocks(0),
        )
        .unwrap()
    }

    #[test]
    fn test_maximal_sharing() {
        test_logger();
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        let f = store.create_symbol("f", 2).unwrap();
        let a = store.create_symbol("a", 0).unwrap();
        let b = store.create_symbol("b", 0).unwrap();

        let a = store.make_constant(&a).unwrap();
        let b = store.make_constant(&b).unwrap();

        let t1 = store.make_appl(&f, &[a.clone(), b.clone()]).unwrap();
        let t2 = store.make_appl(&f, &[a.clone(), b.clone()]).unwrap();
        let t3 = store.make_appl(&f, &[b.clone(), a.clone()]).unwrap();

        assert_eq!(t1, t2);
        assert_ne!(t1, t3);
        assert_eq!(store.symbol(&t1), f.id());
        assert_eq!(store.arity(&t1), 2);
        assert_eq!(store.arg(&t1, 0).id(), a.id());
        assert_eq!(store.args(&t3).iter().map(Term::id).collect::<Vec<_>>(), vec![b.id(), a.id()]);

        // The empty list, a, b, f(a, b) and f(b, a).
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_symbols_are_unique() {
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        let f1 = store.intern("f", 2, false).unwrap();
        let f2 = store.intern("f", 2, false).unwrap();
        let f3 = store.intern("f", 1, false).unwrap();
        let f4 = store.intern("f", 2, true).unwrap();

        assert_eq!(f1, f2);
        assert_ne!(f1, f3);
        assert_ne!(f1, f4);
        assert_eq!(store.symbol_name(&f3), "f");
        assert_eq!(store.symbol_arity(&f3), 1);
        assert!(store.symbol_is_quoted(&f4));
        assert_eq!(store.number_of_symbols(), 3);
    }

    #[test]
    fn test_garbage_is_collected() {
        test_logger();
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        let f = store.create_symbol("f", 2).unwrap();
        let g = store.create_symbol("g", 2).unwrap();
        let c = store.create_symbol("c", 0).unwrap();
        let c = store.make_constant(&c).unwrap();

        let f_term = store.make_appl(&f, &[c.clone(), c.clone()]).unwrap();
        let g_term = store.make_appl(&g, &[c.clone(), c.clone()]).unwrap();
        let f_address = f_term.address();
        assert_eq!(store.len(), 4);

        drop(f_term);
        let stats = store.collect_garbage().unwrap();
        assert_eq!(stats.reclaimed_cells, 1);
        assert_eq!(store.len(), 3);
        assert!(!store.is_valid_term(f_address));
        assert!(store.is_valid_term(g_term.address()));
        assert_eq!(store.arg(&g_term, 1).id(), c.id());

        // The freed cell is the first one handed out for the next term of the same size.
        let f_term = store.make_appl(&f, &[c.clone(), c]).unwrap();
        assert_eq!(f_term.address(), f_address);
        assert_eq!(store.len(), 4);
        assert_eq!(store.symbol(&f_term), f.id());
    }

    #[test]
    fn test_unprotected_symbols_are_collected() {
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        let x = store.intern("x", 0, false).unwrap();
        let kept = store.create_symbol("kept", 0).unwrap();
        let y = store.intern("y", 1, false).unwrap();

        store.collect_garbage().unwrap();
        assert!(!store.is_live_symbol(&x));
        assert!(store.is_live_symbol(&kept));
        assert!(store.is_live_symbol(&y), "The last interned symbol survives");

        // A symbol stays alive while a term uses it.
        let c = store.intern("c", 0, false).unwrap();
        let constant = store.make_constant(&c).unwrap();
        store.intern("z", 0, false).unwrap();
        store.collect_garbage().unwrap();
        assert!(store.is_live_symbol(&c));
        assert_eq!(store.symbol_name(&store.symbol(&constant)), "c");
    }

    #[test]
    fn test_symbol_protection_nests() {
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        let s = store.create_symbol("s", 0).unwrap();
        let copy = s.clone();
        let again = store.protect_symbol(&s);
        assert_eq!(store.symbol_protection_count(&s), 3);

        let id = s.id();
        drop(s);
        drop(again);
        assert_eq!(store.symbol_protection_count(&id), 1);

        store.intern("other", 0, false).unwrap();
        store.collect_garbage().unwrap();
        assert!(store.is_live_symbol(&id));

        drop(copy);
        store.collect_garbage().unwrap();
        assert!(!store.is_live_symbol(&id));
    }

    #[test]
    fn test_int_terms() {
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        for value in [0, 1, -1, i32::MAX, i32::MIN] {
            let term = store.make_int(value).unwrap();
            assert_eq!(store.term_type(&term), TermType::Int);
            assert_eq!(store.int_value(&term), value);
            assert_eq!(store.make_int(value).unwrap(), term);
        }
    }

    #[test]
    fn test_lists() {
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        let elements: Vec<ATerm> = (0..5).map(|i| store.make_int(i).unwrap()).collect();
        let list = store.make_list(&elements).unwrap();

        assert_eq!(store.list_len(&list).unwrap(), 5);
        assert_eq!(
            store.list_iter(&list).unwrap().map(|t| store.int_value(&t)).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
        assert_eq!(store.list_head(&list).unwrap().id(), elements[0].id());

        let tail = store.list_tail(&list).unwrap();
        assert_eq!(store.list_len(&tail).unwrap(), 4);

        // Consing the head onto the tail gives back the same list.
        let cons = store.make_list_cons(&elements[0], &tail).unwrap();
        assert_eq!(cons, list);

        let empty = store.empty_list();
        assert!(store.is_empty_list(&empty));
        assert_eq!(store.list_len(&empty).unwrap(), 0);
        assert!(matches!(store.list_head(&empty), Err(TermStoreError::EmptyList)));
        assert!(matches!(store.list_tail(&elements[0]), Err(TermStoreError::NotAList)));
        assert!(matches!(
            store.make_list_cons(&elements[0], &elements[1]),
            Err(TermStoreError::NotAList)
        ));
        assert_eq!(store.make_list::<TermId>(&[]).unwrap(), empty);
    }

    #[test]
    fn test_arity_checks() {
        let mut store = small_store();

        let f = store.create_symbol("f", 2).unwrap();
        let c = store.create_symbol("c", 0).unwrap();
        let c = store.make_constant(&c).unwrap();

        assert!(matches!(
            store.make_appl(&f, &[c.clone()]),
            Err(TermStoreError::ArityMismatch { expected: 2, actual: 1 })
        ));

        // Blocks of 16 words hold applications of at most 14 arguments.
        let large = store.create_symbol("large", 15).unwrap();
        let args = vec![c.clone(); 15];
        assert!(matches!(
            store.make_appl(&large, &args),
            Err(TermStoreError::ArityTooLarge { arity: 15, max: 14 })
        ));

        let fits = store.create_symbol("fits", 14).unwrap();
        let term = store.make_appl(&fits, &args[..14]).unwrap();
        assert_eq!(store.arity(&term), 14);
    }

    #[test]
    fn test_set_argument() {
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        let f = store.create_symbol("f", 2).unwrap();
        let a = store.create_symbol("a", 0).unwrap();
        let b = store.create_symbol("b", 0).unwrap();
        let a = store.make_constant(&a).unwrap();
        let b = store.make_constant(&b).unwrap();

        let f_aa = store.make_appl(&f, &[a.clone(), a.clone()]).unwrap();
        let f_ab = store.set_argument(&f_aa, 1, &b).unwrap();
        assert_eq!(f_ab, store.make_appl(&f, &[a.clone(), b.clone()]).unwrap());
        assert_eq!(store.arg(&f_aa, 1).id(), a.id(), "The original term is unchanged");

        assert!(matches!(
            store.set_argument(&f_aa, 2, &b),
            Err(TermStoreError::ArgumentOutOfRange { index: 2, arity: 2 })
        ));
        assert!(matches!(store.set_argument(&a, 0, &b), Err(TermStoreError::NotAnApplication)));

        // Annotations survive replacing an argument.
        let label = store.make_int(0).unwrap();
        let annotated = store.set_annotation(&f_aa, &label, &b).unwrap();
        let replaced = store.set_argument(&annotated, 0, &b).unwrap();
        assert_eq!(store.arg(&replaced, 0).id(), b.id());
        assert_eq!(store.annotation(&replaced, &label).map(|t| t.id()), Some(b.id()));
        assert_eq!(store.remove_annotations(&replaced).unwrap(), store.make_appl(&f, &[b.clone(), a.clone()]).unwrap());
    }

    #[test]
    fn test_annotations_are_part_of_the_term() {
        test_logger();
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        let f = store.create_symbol("f", 1).unwrap();
        let c = store.create_symbol("c", 0).unwrap();
        let c = store.make_constant(&c).unwrap();
        let term = store.make_appl(&f, &[c.clone()]).unwrap();
        assert!(store.annotations(&term).is_none());

        let label = store.make_int(1).unwrap();
        let other_label = store.make_int(2).unwrap();
        let value = store.make_int(10).unwrap();
        let other_value = store.make_int(20).unwrap();

        let annotated = store.set_annotation(&term, &label, &value).unwrap();
        assert_ne!(annotated, term);
        assert_eq!(store.set_annotation(&term, &label, &value).unwrap(), annotated, "Annotated terms are shared");
        assert_eq!(store.annotation(&annotated, &label).map(|t| t.id()), Some(value.id()));
        assert!(store.annotation(&annotated, &other_label).is_none());
        assert_eq!(store.symbol(&annotated), f.id());
        assert_eq!(store.args(&annotated).len(), 1);
        assert_eq!(store.arg(&annotated, 0).id(), c.id());

        // Setting the same value again gives back the same term.
        assert_eq!(store.set_annotation(&annotated, &label, &value).unwrap(), annotated);

        let both = store.set_annotation(&annotated, &other_label, &other_value).unwrap();
        let annotations = store.annotations(&both).unwrap();
        assert_eq!(store.list_len(&annotations).unwrap(), 2);
        let first = store.list_head(&annotations).unwrap();
        assert_eq!(store.list_head(&first).unwrap().id(), other_label.id(), "New labels come first");

        let updated = store.set_annotation(&both, &label, &other_value).unwrap();
        assert_eq!(store.annotation(&updated, &label).map(|t| t.id()), Some(other_value.id()));
        assert_eq!(store.list_len(&store.annotations(&updated).unwrap()).unwrap(), 2);

        let removed = store.remove_annotation(&both, &other_label).unwrap();
        assert_eq!(removed, annotated);
        assert_eq!(store.remove_annotation(&removed, &other_label).unwrap(), annotated);
        assert_eq!(store.remove_annotation(&removed, &label).unwrap(), term);
        assert_eq!(store.remove_annotations(&both).unwrap(), term);

        // Integers and lists carry annotations as well.
        let int = store.set_annotation(&value, &label, &c).unwrap();
        assert_eq!(store.int_value(&int), 10);
        let list = store.make_list(&[c.clone()]).unwrap();
        let annotated_list = store.set_annotation(&list, &label, &c).unwrap();
        assert_eq!(store.list_len(&annotated_list).unwrap(), 1);
        assert_eq!(store.list_iter(&annotated_list).unwrap().count(), 1);

        let empty = store.empty_list();
        let annotated_empty = store.set_annotation(&empty, &label, &c).unwrap();
        assert!(store.is_empty_list(&annotated_empty));
        assert_eq!(store.list_iter(&annotated_empty).unwrap().count(), 0);
        assert!(matches!(store.list_head(&annotated_empty), Err(TermStoreError::EmptyList)));

        assert!(matches!(store.set_annotations(&term, &c), Err(TermStoreError::NotAList)));
        assert_eq!(store.set_annotations(&annotated, &empty).unwrap(), term);
    }

    #[test]
    fn test_annotations_survive_collections() {
        let mut store = small_store();

        let label = store.make_int(-1).unwrap();
        let mut annotated = Vec::new();
        for value in 0..50 {
            let term = store.make_int(value).unwrap();
            let annotation = store.make_int(value + 1000).unwrap();
            annotated.push(store.set_annotation(&term, &label, &annotation).unwrap());
        }
        drop(label);

        store.collect_garbage().unwrap();
        for (value, term) in (0..50).zip(&annotated) {
            assert_eq!(store.int_value(term), value);

            let annotations = store.annotations(term).unwrap();
            let pair = store.list_head(&annotations).unwrap();
            let tail = store.list_tail(&pair).unwrap();
            let annotation = store.list_head(&tail).unwrap();
            assert_eq!(store.int_value(&annotation), value + 1000);
            assert_eq!(store.int_value(&store.list_head(&pair).unwrap()), -1);
        }
    }

    #[test]
    fn test_compare_is_a_total_order() {
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        let f = store.create_symbol("f", 1).unwrap();
        let g = store.create_symbol("g", 1).unwrap();
        let f2 = store.create_symbol("f", 2).unwrap();
        let a = store.create_symbol("a", 0).unwrap();
        let b = store.create_symbol("b", 0).unwrap();
        let a = store.make_constant(&a).unwrap();
        let b = store.make_constant(&b).unwrap();

        let fa = store.make_appl(&f, &[a.clone()]).unwrap();
        let fb = store.make_appl(&f, &[b.clone()]).unwrap();
        let ga = store.make_appl(&g, &[a.clone()]).unwrap();
        let faa = store.make_appl(&f2, &[a.clone(), a.clone()]).unwrap();
        let one = store.make_int(1).unwrap();
        let two = store.make_int(2).unwrap();
        let short = store.make_list(&[a.clone()]).unwrap();
        let long = store.make_list(&[a.clone(), a.clone()]).unwrap();
        let other = store.make_list(&[b.clone()]).unwrap();
        let empty = store.empty_list();
        let annotated = store.set_annotation(&fa, &one, &two).unwrap();

        let ordered = [a, b, fa.clone(), annotated, fb, faa, ga, one, two, empty, short, long, other];
        for (i, left) in ordered.iter().enumerate() {
            for (j, right) in ordered.iter().enumerate() {
                assert_eq!(store.compare(left, right), i.cmp(&j), "Comparing terms {i} and {j}");
            }
        }
    }

    #[test]
    fn test_unique_symbols_and_core_size() {
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        let f = store.create_symbol("f", 2).unwrap();
        let c = store.create_symbol("c", 0).unwrap();
        let c = store.make_constant(&c).unwrap();
        let fcc = store.make_appl(&f, &[c.clone(), c.clone()]).unwrap();
        assert_eq!(store.unique_symbols(&fcc), 2);

        // f, c, the integer, the list cell and the empty list.
        let one = store.make_int(1).unwrap();
        let list = store.make_list(&[one.clone()]).unwrap();
        let term = store.make_appl(&f, &[fcc.clone(), list]).unwrap();
        assert_eq!(store.unique_symbols(&term), 5);

        let annotated = store.set_annotation(&fcc, &one, &one).unwrap();
        assert_eq!(store.unique_symbols(&annotated), 6);

        // Two cells of four words and one of two, plus the symbols and their names.
        let word = size_of::<usize>();
        assert_eq!(store.core_size(&c), 2 * word + 2 * word + 1);
        assert_eq!(store.core_size(&fcc), (4 + 2 + 2 + 2) * word + 2);
    }

    #[test]
    fn test_fresh_symbols_run_out() {
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        let _largest = store.create_symbol(&format!("x{}", usize::MAX), 0).unwrap();
        store.register_prefix("x");
        assert!(matches!(
            store.fresh_symbol("x", 0),
            Err(TermStoreError::FreshNamesExhausted(_))
        ));
        let fresh = store.fresh_symbol("y", 0).unwrap();
        assert_eq!(store.symbol_name(&fresh), "y0");
    }

    #[test]
    fn test_roots_keep_terms_alive() {
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        let c = store.create_symbol("c", 0).unwrap();
        let d = store.create_symbol("d", 0).unwrap();
        let e = store.create_symbol("e", 0).unwrap();
        let c = store.make_constant(&c).unwrap().id();
        let d = store.make_constant(&d).unwrap().id();
        let e = store.make_constant(&e).unwrap().id();

        let mut array = store.protect_array(2);
        array.set(0, &c);

        let block = store.acquire_block(1, 4).unwrap();
        store.block_set(block, 0, &d).unwrap();

        store.collect_garbage().unwrap();
        assert!(store.is_valid_term(c.address()));
        assert!(store.is_valid_term(d.address()));
        assert!(!store.is_valid_term(e.address()));
        assert_eq!(store.block_get(block, 0).unwrap().map(|t| t.id()), Some(d));

        array.clear(0);
        store.release_block(block).unwrap();
        store.collect_garbage().unwrap();
        assert!(!store.is_valid_term(c.address()));
        assert!(!store.is_valid_term(d.address()));
        assert!(matches!(store.block_len(block), Err(TermStoreError::InvalidBlockHandle)));
    }

    #[test]
    fn test_ages() {
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        let c = store.create_symbol("c", 0).unwrap();
        let c = store.make_constant(&c).unwrap();
        assert_eq!(store.age(&c), 0);

        for expected in 1..=5u8 {
            store.collect_garbage().unwrap();
            assert_eq!(store.age(&c), expected.min(crate::MAX_AGE));
        }

        store.reset_age(&c);
        assert_eq!(store.age(&c), 0);
        assert_eq!(store.make_constant(&store.symbol(&c)).unwrap(), c, "The age does not affect sharing");
    }

    #[test]
    fn test_term_from_address() {
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        let term = store.make_int(42).unwrap();
        assert_eq!(store.term_from_address(term.address()).unwrap(), term.id());
        assert!(matches!(store.term_from_address(0), Err(TermStoreError::InvalidTerm(0))));
        assert!(store.term_from_address(term.address() + 1).is_err());

        let symbol = store.intern("s", 0, false).unwrap();
        let cell = store.symbols.cell(symbol);
        assert!(store.term_from_address(cell).is_err(), "Symbol cells are not terms");
    }

    #[test]
    fn test_unique_subterms_and_depth() {
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        let f = store.create_symbol("f", 2).unwrap();
        let c = store.create_symbol("c", 0).unwrap();
        let mut term = store.make_constant(&c).unwrap();
        for _ in 0..10 {
            let next = store.make_appl(&f, &[term.clone(), term.clone()]).unwrap();
            term = next;
        }

        assert_eq!(store.unique_subterms(&term), 11);
        assert_eq!(store.term_depth(&term), 11);
    }

    #[test]
    fn test_fresh_symbols() {
        let mut store = TermStore::new(StoreConfig::default()).unwrap();

        let _x3 = store.create_symbol("x3", 0).unwrap();
        store.register_prefix("x");

        let fresh = store.fresh_symbol("x", 0).unwrap();
        assert_eq!(store.symbol_name(&fresh), "x4");

        let _x10 = store.create_symbol("x10", 0).unwrap();
        let fresh = store.fresh_symbol("x", 0).unwrap();
        assert_eq!(store.symbol_name(&fresh), "x11");
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_construction_survives_collections() {
        test_logger();
        let mut store = small_store();

        let elements: Vec<ATerm> = (0..200).map(|i| store.make_int(i).unwrap()).collect();
        let list = store.make_list(&elements).unwrap();
        drop(elements);

        assert!(store.metrics().collections > 0, "Small blocks force collections");
        assert_eq!(
            store.list_iter(&list).unwrap().map(|t| store.int_value(&t)).collect::<Vec<_>>(),
            (0..200).collect::<Vec<_>>()
        );
    }

    #[test]
    #[cfg_attr(miri, ignore)]
    fn test_random_terms_survive_collections() {
        random_test(20, |rng| {
            let mut store = small_store();

            let symbols = vec![("f".to_string(), 2), ("g".to_string(), 1), ("h".to_string(), 3)];
            let constants = vec!["a".to_string(), "b".to_string()];

            let mut terms = Vec::new();
            for _ in 0..10 {
                let iterations = rng.random_range(1..30);
                let term = random_term(&mut store, rng, &symbols, &constants, iterations).unwrap();
                let size = store.unique_subterms(&term);
                terms.push((term, size));
            }

            store.collect_garbage().unwrap();
            for (term, size) in &terms {
                assert_eq!(store.unique_subterms(term), *size);
            }

            // Everything is shared, so rebuilding the first term finds the existing cells.
            let (term, _) = &terms[0];
            if store.term_type(term) == TermType::Appl {
                let symbol = store.protect_symbol(&store.symbol(term));
                let args: Vec<TermId> = store.args(term).iter().map(Term::id).collect();
                let before = store.len();
                assert_eq!(store.make_appl(&symbol, &args).unwrap(), *term);
                assert_eq!(store.len(), before);
            }
        });
    }
}
