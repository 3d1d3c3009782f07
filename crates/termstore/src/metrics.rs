#![forbid(unsafe_code)]

use std::fmt;

use itertools::Itertools;

/// A snapshot of the sizes of the different parts of a [crate::TermStore].
#[derive(Clone, Debug, Default)]
pub struct StoreMetrics {
    pub terms: usize,
    pub term_table_buckets: usize,
    pub symbols: usize,
    pub protected_symbols: usize,

    /// The number of blocks for every size class that has blocks, as `(cell size, blocks)`.
    pub blocks_per_size: Vec<(usize, usize)>,
    pub unused_blocks: usize,
    pub block_words: usize,

    pub roots: usize,
    pub root_insertions: u64,
    pub protected_blocks: usize,

    pub collections: usize,
    pub reclaimed_cells: usize,
}

impl StoreMetrics {
    /// The total number of blocks in use.
    pub fn blocks(&self) -> usize {
        self.blocks_per_size.iter().map(|(_, blocks)| blocks).sum()
    }

    /// The number of bytes occupied by the blocks in use.
    pub fn block_bytes(&self) -> usize {
        self.blocks() * self.block_words * size_of::<usize>()
    }
}

impl fmt::Display for StoreMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} terms in {} buckets, {} symbols of which {} protected",
            self.terms, self.term_table_buckets, self.symbols, self.protected_symbols
        )?;
        writeln!(
            f,
            "{} blocks ({}) and {} unused, per cell size: {}",
            self.blocks(),
            BytesFormatter(self.block_bytes()),
            self.unused_blocks,
            self.blocks_per_size
                .iter()
                .format_with(", ", |(size, blocks), f| f(&format_args!("{size}: {blocks}")))
        )?;
        writeln!(
            f,
            "{} roots ({} insertions), {} protected blocks",
            self.roots, self.root_insertions, self.protected_blocks
        )?;
        write!(
            f,
            "{} collections reclaimed {} cells",
            self.collections, self.reclaimed_cells
        )
    }
}

/// Formats a number of bytes with a binary unit.
pub struct BytesFormatter(pub usize);

impl fmt::Display for BytesFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];

        let mut size = self.0 as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < UNITS.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }

        if unit == 0 {
            write!(f, "{} {}", self.0, UNITS[0])
        } else {
            write!(f, "{size:.2} {}", UNITS[unit])
        }
    }
}
