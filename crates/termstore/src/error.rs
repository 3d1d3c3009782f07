#![forbid(unsafe_code)]

use thiserror::Error;

use crate::RegistrationId;

/// All failures that the term store reports to its callers.
#[derive(Error, Debug)]
pub enum TermStoreError {
    #[error("Out of memory while allocating a cell of {size_class} words")]
    OutOfMemory { size_class: usize },

    #[error("The symbol table is full, at most {limit} symbols can be alive at the same time")]
    SymbolCapacityExceeded { limit: usize },

    #[error("No fresh names are left for prefix {0}")]
    FreshNamesExhausted(String),

    #[error("Arity {arity} exceeds the maximum arity {max}")]
    ArityTooLarge { arity: usize, max: usize },

    #[error("Symbol has arity {expected}, but {actual} arguments were given")]
    ArityMismatch { expected: usize, actual: usize },

    #[error("Argument {index} does not exist, the arity is {arity}")]
    ArgumentOutOfRange { index: usize, arity: usize },

    #[error("Term is not a function application")]
    NotAnApplication,

    #[error("Address {0:#x} does not refer to a live term")]
    InvalidTerm(usize),

    #[error("Value {value} does not fit in the 32-bit portable header")]
    PortableOverflow { value: usize },

    #[error("Term is not a list")]
    NotAList,

    #[error("Operation is not defined on the empty list")]
    EmptyList,

    #[error("Container {0:?} is mutably borrowed, it cannot be marked")]
    ContainerBorrowed(RegistrationId),

    #[error("Protected block handle is not valid, it was released or belongs to another store")]
    InvalidBlockHandle,

    #[error("Invalid term library option: {0}")]
    InvalidOption(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
