#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

mod aterm;
mod config;
mod error;
mod gc;
mod header;
mod markable;
mod metrics;
mod portable;
mod random_term;
mod symbol;
mod term_store;
mod test_utility;

pub mod storage;

pub use aterm::*;
pub use config::*;
pub use error::*;
pub use gc::*;
pub use header::*;
pub use markable::*;
pub use metrics::*;
pub use portable::*;
pub use random_term::*;
pub use symbol::*;
pub use term_store::*;
pub use test_utility::*;
