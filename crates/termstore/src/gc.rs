#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;
use std::time::Instant;

use log::debug;
use log::info;
use log::trace;

use crate::Markable;
use crate::Symb;
use crate::SymbolId;
use crate::Term;
use crate::TermId;
use crate::TermType;
use crate::Verbosity;
use crate::storage::BlockAllocator;
use crate::storage::NULL;
use crate::storage::ProtectedBlockAllocator;
use crate::storage::RootSet;
use crate::storage::SymbolTable;
use crate::storage::TermTable;
use crate::symbol::ProtectedSymbols;

/// A function that is called during every mark phase.
pub type MarkCallback = Box<dyn FnMut(&mut Marker<'_>)>;

/// Identifies a registered mark callback or container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegistrationId(pub(crate) usize);

/// The phases of a collection. Collections run to completion inside a single call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GcState {
    #[default]
    Idle,
    Marking,
    Sweeping,
}

/// Sets the mark bit of every cell reachable from the terms and symbols it is given.
pub struct Marker<'a> {
    blocks: &'a mut BlockAllocator,
    symbols: &'a SymbolTable,
    stack: &'a mut Vec<usize>,
    marked: usize,
}

impl Marker<'_> {
    /// Marks the term and everything reachable from it.
    pub fn mark(&mut self, term: &impl Term) {
        let address = term.id().address();
        debug_assert!(self.blocks.is_valid_term(address), "Marking {address:#x} which is not a term");

        self.stack.push(address);
        while let Some(address) = self.stack.pop() {
            let header = self.blocks.header(address);
            if header.is_marked() {
                continue;
            }

            self.blocks.set_header(address, header.marked());
            self.marked += 1;

            match header.term_type() {
                TermType::Appl => {
                    self.mark_symbol(&SymbolId::new(header.value()));
                    let arguments = self.blocks.payload(address);
                    self.stack.extend_from_slice(arguments);
                }
                TermType::List => {
                    let payload = self.blocks.payload(address);
                    self.stack.extend(payload.iter().copied().filter(|child| *child != NULL));
                }
                TermType::Int if header.is_annotated() => {
                    self.stack.extend(self.blocks.payload(address).last().copied());
                }
                TermType::Int | TermType::Symbol | TermType::Free => {}
            }
        }
    }

    /// Marks the cell of the symbol.
    pub fn mark_symbol(&mut self, symbol: &impl Symb) {
        let cell = self.symbols.cell(symbol.symbol_id());
        let header = self.blocks.header(cell);
        if !header.is_marked() {
            self.blocks.set_header(cell, header.marked());
            self.marked += 1;
        }
    }

    /// The number of cells marked so far.
    pub fn marked(&self) -> usize {
        self.marked
    }
}

/// Everything the mark phase starts from, in the order in which it is marked.
pub(crate) struct Roots<'a> {
    /// Intermediate results of a construction that is in progress.
    pub scratch_terms: &'a [TermId],
    pub scratch_symbols: &'a [SymbolId],
    pub root_set: &'a RootSet,
    pub protected_blocks: &'a ProtectedBlockAllocator,
    pub callbacks: &'a mut [(RegistrationId, MarkCallback)],
    pub containers: &'a [(RegistrationId, Rc<RefCell<dyn Markable>>)],
    pub protected_symbols: &'a ProtectedSymbols,

    /// The most recently interned symbol.
    pub parked: Option<SymbolId>,
}

/// The results of a single collection.
#[derive(Clone, Copy, Debug, Default)]
pub struct CollectionStats {
    pub marked_cells: usize,
    pub reclaimed_cells: usize,
    pub reclaimed_blocks: usize,
    pub mark_time: Duration,
    pub sweep_time: Duration,
}

impl fmt::Display for CollectionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "marked {} cells in {}ms, reclaimed {} cells and {} blocks in {}ms",
            self.marked_cells,
            self.mark_time.as_millis(),
            self.reclaimed_cells,
            self.reclaimed_blocks,
            self.sweep_time.as_millis()
        )
    }
}

/// Runs collections and keeps track of their totals.
#[derive(Default)]
pub(crate) struct Collector {
    state: GcState,
    stack: Vec<usize>,
    collections: usize,
    total_reclaimed_cells: usize,
    verbosity: Verbosity,
}

impl Collector {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            ..Self::default()
        }
    }

    /// Marks everything reachable from the roots and frees all other cells.
    pub fn collect(
        &mut self,
        blocks: &mut BlockAllocator,
        terms: &mut TermTable,
        symbols: &mut SymbolTable,
        roots: Roots<'_>,
    ) -> CollectionStats {
        debug_assert_eq!(self.state, GcState::Idle, "Collections cannot be nested");

        blocks.snapshot();

        self.state = GcState::Marking;
        let mark_start = Instant::now();
        let marked_cells = self.mark(blocks, symbols, roots);
        let mark_time = mark_start.elapsed();

        self.state = GcState::Sweeping;
        let sweep_start = Instant::now();
        let (reclaimed_cells, reclaimed_blocks) = sweep(blocks, terms, symbols);
        let sweep_time = sweep_start.elapsed();

        self.state = GcState::Idle;
        self.collections += 1;
        self.total_reclaimed_cells += reclaimed_cells;

        let stats = CollectionStats {
            marked_cells,
            reclaimed_cells,
            reclaimed_blocks,
            mark_time,
            sweep_time,
        };

        debug!("Garbage collection {}: {stats}", self.collections);
        if self.verbosity == Verbosity::Verbose {
            info!(
                "Garbage collection {}: {stats}, {} blocks in use",
                self.collections,
                blocks.number_of_blocks()
            );
        }

        stats
    }

    fn mark(&mut self, blocks: &mut BlockAllocator, symbols: &SymbolTable, mut roots: Roots<'_>) -> usize {
        self.stack.clear();
        let mut marker = Marker {
            blocks,
            symbols,
            stack: &mut self.stack,
            marked: 0,
        };

        for term in roots.scratch_terms {
            marker.mark(term);
        }

        for symbol in roots.scratch_symbols {
            marker.mark_symbol(symbol);
        }

        roots.root_set.for_each_term(|term| marker.mark(&term));
        roots.protected_blocks.for_each_term(|term| marker.mark(&term));

        for (_, callback) in roots.callbacks.iter_mut() {
            callback(&mut marker);
        }

        for (_, container) in roots.containers {
            container.borrow().mark(&mut marker);
        }

        for symbol in roots.protected_symbols.iter() {
            marker.mark_symbol(&symbol);
        }

        if let Some(symbol) = roots.parked {
            marker.mark_symbol(&symbol);
        }

        marker.marked()
    }

    pub fn state(&self) -> GcState {
        self.state
    }

    pub fn collections(&self) -> usize {
        self.collections
    }

    pub fn total_reclaimed_cells(&self) -> usize {
        self.total_reclaimed_cells
    }
}

/// Clears the marks of live cells and frees the others. Blocks that end up
/// entirely free are reclaimed. Returns the number of freed cells and blocks.
fn sweep(blocks: &mut BlockAllocator, terms: &mut TermTable, symbols: &mut SymbolTable) -> (usize, usize) {
    let mut total_cells = 0;
    let mut total_blocks = 0;

    let sizes: Vec<usize> = blocks.sizes().collect();
    for size in sizes {
        blocks.take_free_list(size);
        let mut reclaimed = 0;

        for slot in blocks.blocks_of(size) {
            let free_list_before = blocks.free_list(size);
            let mut alive = 0;

            for address in blocks.cells(slot) {
                let header = blocks.header(address);
                if header.is_marked() {
                    blocks.set_header(address, header.unmarked().aged());
                    alive += 1;
                    continue;
                }

                match header.term_type() {
                    TermType::Free => {}
                    TermType::Appl | TermType::Int | TermType::List => {
                        let removed = terms.remove(blocks, address);
                        debug_assert!(removed, "Term {address:#x} was not in the term table");
                        reclaimed += 1;
                    }
                    TermType::Symbol => {
                        symbols.release(SymbolId::new(header.value()));
                        reclaimed += 1;
                    }
                }

                blocks.push_free(address);
            }

            if alive == 0 && !blocks.is_current(slot) {
                blocks.set_free_list(size, free_list_before);
                blocks.reclaim(slot);
                total_blocks += 1;
            }
        }

        trace!("Swept cells of size {size}, {reclaimed} reclaimed");
        blocks.add_reclaimed(size, reclaimed);
        total_cells += reclaimed;
    }

    (total_cells, total_blocks)
}
