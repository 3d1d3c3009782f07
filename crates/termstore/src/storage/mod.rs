//! The storage underneath the [crate::TermStore].
//!
//! Cells are allocated from fixed size blocks by the [BlockAllocator]. A cell
//! is identified by its word address, which encodes the block slot in the
//! high bits and the offset within the block in the low bits. The address zero
//! is never handed out and plays the role of a null pointer.
//!
//! The [TermTable] chains all term cells through their second word so that
//! equal terms are only stored once. Symbols are kept in the [SymbolTable],
//! every symbol owns a cell so that the collector can mark and sweep symbols
//! together with terms.

mod block_allocator;
mod hashtable;
mod protected_blocks;
mod root_set;
mod symbol_table;
mod term_table;

pub use block_allocator::*;
pub use hashtable::*;
pub use protected_blocks::*;
pub use root_set::*;
pub use symbol_table::*;
pub use term_table::*;
