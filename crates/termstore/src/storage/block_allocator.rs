#![forbid(unsafe_code)]

use log::trace;

use crate::Header;
use crate::StoreConfig;
use crate::TermStoreError;
use crate::TermType;

/// Word offset of the header in every cell.
pub const CELL_HEADER: usize = 0;

/// Word offset of the link to the next cell, used by the hash chains of the
/// term table and by the free lists.
pub const CELL_NEXT: usize = 1;

/// Word offset of the first payload word.
pub const CELL_DATA: usize = 2;

/// Every cell has at least a header and a next word.
pub const MIN_CELL_SIZE: usize = CELL_DATA;

/// The null address, no cell ever lives here since block slot zero is never used.
pub const NULL: usize = 0;

/// A fixed size arena containing cells of a single size.
struct Block {
    /// The number of words in every cell, zero for unused slots.
    cell_size: usize,

    /// The words of all cells, `block_words` long for used slots.
    words: Vec<usize>,

    /// The number of words that are occupied by whole cells.
    end: usize,
}

impl Block {
    fn empty() -> Block {
        Block {
            cell_size: 0,
            words: Vec::new(),
            end: 0,
        }
    }
}

/// The blocks and free cells of one cell size.
#[derive(Default)]
struct SizeClass {
    /// The slots of all blocks of this size, the last one is bump allocated from.
    blocks: Vec<usize>,

    /// The first free cell, linked through [CELL_NEXT].
    free_list: usize,

    /// The slot of the block that is bump allocated from, zero when there is none.
    current: usize,

    /// The next address to bump allocate and the end of the current block.
    top: usize,
    end: usize,

    /// The number of blocks at the start of the last collection.
    live_blocks_before: usize,

    /// The number of cells freed by the last collection.
    reclaimed_cells: usize,
}

/// Hands out cells of a requested size. Addresses are virtual: the block
/// slot in the high bits and the word offset in the low bits, which makes
/// finding the block that owns an address a shift.
pub struct BlockAllocator {
    blocks: Vec<Block>,

    /// Slots in `blocks` that are not in use.
    free_slots: Vec<usize>,

    /// Cleared buffers of reclaimed blocks that can be reused by any size.
    unused: Vec<Vec<usize>>,

    /// Indexed by cell size.
    classes: Vec<SizeClass>,

    block_words: usize,
    block_shift: u32,
    max_unused_blocks: usize,
    max_blocks: Option<usize>,

    /// Blocks in use plus cached unused buffers.
    allocated_buffers: usize,
}

impl BlockAllocator {
    pub fn new(config: &StoreConfig) -> Self {
        debug_assert!(config.block_words.is_power_of_two(), "Block size must be a power of two");

        Self {
            // Slot zero stays empty so that address zero is never handed out.
            blocks: vec![Block::empty()],
            free_slots: Vec::new(),
            unused: Vec::new(),
            classes: Vec::new(),
            block_words: config.block_words,
            block_shift: config.block_words.trailing_zeros(),
            max_unused_blocks: config.max_unused_blocks,
            max_blocks: config.max_blocks,
            allocated_buffers: 0,
        }
    }

    /// The number of words in a block.
    pub fn block_words(&self) -> usize {
        self.block_words
    }

    /// The largest cell that fits in a block.
    pub fn max_cell_size(&self) -> usize {
        self.block_words
    }

    /// Takes a cell from the free list, or from the current block. Returns
    /// `None` when the size class has to be expanded first.
    pub fn allocate(&mut self, size: usize) -> Option<usize> {
        self.pop_free(size).or_else(|| self.bump(size))
    }

    fn pop_free(&mut self, size: usize) -> Option<usize> {
        let head = self.classes.get(size)?.free_list;
        if head == NULL {
            return None;
        }

        let next = self.word(head, CELL_NEXT);
        self.classes[size].free_list = next;
        Some(head)
    }

    fn bump(&mut self, size: usize) -> Option<usize> {
        let class = self.classes.get_mut(size)?;
        if class.top == class.end {
            return None;
        }

        let address = class.top;
        class.top += size;
        Some(address)
    }

    /// Adds a block for cells of the given size. Reuses an unused block when
    /// available, fails when the block limit is reached or the system
    /// allocator cannot provide the memory.
    pub fn expand(&mut self, size: usize) -> Result<(), TermStoreError> {
        debug_assert!(
            (MIN_CELL_SIZE..=self.max_cell_size()).contains(&size),
            "Cell size {size} is out of range"
        );

        let words = match self.unused.pop() {
            Some(words) => words,
            None => {
                if self.max_blocks.is_some_and(|max| self.allocated_buffers >= max) {
                    return Err(TermStoreError::OutOfMemory { size_class: size });
                }

                let mut words = Vec::new();
                words
                    .try_reserve_exact(self.block_words)
                    .map_err(|_| TermStoreError::OutOfMemory { size_class: size })?;
                words.resize(self.block_words, 0);
                self.allocated_buffers += 1;
                words
            }
        };

        let slot = match self.free_slots.pop() {
            Some(slot) => slot,
            None => {
                self.blocks.push(Block::empty());
                self.blocks.len() - 1
            }
        };

        let end = (self.block_words / size) * size;
        self.blocks[slot] = Block {
            cell_size: size,
            words,
            end,
        };

        if self.classes.len() <= size {
            self.classes.resize_with(size + 1, SizeClass::default);
        }

        let base = slot << self.block_shift;
        let class = &mut self.classes[size];
        class.blocks.push(slot);
        class.current = slot;
        class.top = base;
        class.end = base + end;

        trace!("Added block {slot} for cells of size {size}, {} blocks in use", self.number_of_blocks());
        Ok(())
    }

    /// Removes an entirely free block from its size class. The memory is kept
    /// in the unused cache or released when the cache is full.
    pub fn reclaim(&mut self, slot: usize) {
        let size = self.blocks[slot].cell_size;
        debug_assert!(size != 0, "Block {slot} is not in use");

        let class = &mut self.classes[size];
        if let Some(position) = class.blocks.iter().position(|s| *s == slot) {
            class.blocks.remove(position);
        }

        if class.current == slot {
            class.current = 0;
            class.top = 0;
            class.end = 0;
        }

        let mut block = std::mem::replace(&mut self.blocks[slot], Block::empty());
        self.free_slots.push(slot);

        if self.unused.len() < self.max_unused_blocks {
            block.words.fill(0);
            self.unused.push(block.words);
        } else {
            self.allocated_buffers -= 1;
        }

        trace!("Reclaimed block {slot} of size {size}");
    }

    /// Releases the memory of all cached unused blocks.
    pub fn release_unused(&mut self) {
        self.allocated_buffers -= self.unused.len();
        self.unused.clear();
    }

    /// Returns the slots of the blocks that contain cells of the given size.
    pub fn blocks_of(&self, size: usize) -> Vec<usize> {
        self.classes.get(size).map(|c| c.blocks.clone()).unwrap_or_default()
    }

    /// The cell sizes for which blocks have been allocated.
    pub fn sizes(&self) -> impl Iterator<Item = usize> + '_ {
        self.classes
            .iter()
            .enumerate()
            .filter(|(_, class)| !class.blocks.is_empty())
            .map(|(size, _)| size)
    }

    /// The addresses of all cells of a block that have been handed out at some point.
    pub fn cells(&self, slot: usize) -> impl Iterator<Item = usize> + use<> {
        let block = &self.blocks[slot];
        let base = slot << self.block_shift;

        let class = &self.classes[block.cell_size];
        let limit = if class.current == slot { class.top } else { base + block.end };

        (base..limit).step_by(block.cell_size)
    }

    /// Returns true iff the address is the start of a handed out cell that is not free.
    pub fn is_valid_term(&self, address: usize) -> bool {
        let slot = address >> self.block_shift;
        let offset = address & (self.block_words - 1);

        let Some(block) = self.blocks.get(slot) else {
            return false;
        };

        if block.cell_size == 0 || offset >= block.end || offset % block.cell_size != 0 {
            return false;
        }

        let class = &self.classes[block.cell_size];
        if class.current == slot && address >= class.top {
            return false;
        }

        !Header::from_word(block.words[offset]).is_free()
    }

    /// The size of the cell at the given address.
    pub fn cell_size(&self, address: usize) -> usize {
        self.blocks[address >> self.block_shift].cell_size
    }

    pub fn word(&self, address: usize, index: usize) -> usize {
        let offset = address & (self.block_words - 1);
        self.blocks[address >> self.block_shift].words[offset + index]
    }

    pub fn set_word(&mut self, address: usize, index: usize, value: usize) {
        let offset = address & (self.block_words - 1);
        self.blocks[address >> self.block_shift].words[offset + index] = value;
    }

    /// The payload words of the cell, everything after the header and next word.
    pub fn payload(&self, address: usize) -> &[usize] {
        let block = &self.blocks[address >> self.block_shift];
        let offset = address & (self.block_words - 1);
        &block.words[offset + CELL_DATA..offset + block.cell_size]
    }

    pub fn payload_mut(&mut self, address: usize) -> &mut [usize] {
        let block = &mut self.blocks[address >> self.block_shift];
        let offset = address & (self.block_words - 1);
        &mut block.words[offset + CELL_DATA..offset + block.cell_size]
    }

    pub fn header(&self, address: usize) -> Header {
        Header::from_word(self.word(address, CELL_HEADER))
    }

    pub fn set_header(&mut self, address: usize, header: Header) {
        self.set_word(address, CELL_HEADER, header.word());
    }

    pub fn term_type(&self, address: usize) -> TermType {
        self.header(address).term_type()
    }

    /// Empties the free list of the given size, it is rebuilt by the sweep.
    pub fn take_free_list(&mut self, size: usize) -> usize {
        std::mem::replace(&mut self.classes[size].free_list, NULL)
    }

    pub fn free_list(&self, size: usize) -> usize {
        self.classes.get(size).map_or(NULL, |c| c.free_list)
    }

    pub fn set_free_list(&mut self, size: usize, head: usize) {
        self.classes[size].free_list = head;
    }

    /// Marks the cell as free and pushes it on the free list of its size.
    pub fn push_free(&mut self, address: usize) {
        let size = self.cell_size(address);
        let head = self.classes[size].free_list;
        self.set_header(address, Header::free());
        self.set_word(address, CELL_NEXT, head);
        self.classes[size].free_list = address;
    }

    /// Returns true iff the block still has room for bump allocation.
    pub fn is_current(&self, slot: usize) -> bool {
        let class = &self.classes[self.blocks[slot].cell_size];
        class.current == slot && class.top != class.end
    }

    /// Records the number of blocks of every size at the start of a collection.
    pub fn snapshot(&mut self) {
        for class in &mut self.classes {
            class.live_blocks_before = class.blocks.len();
            class.reclaimed_cells = 0;
        }
    }

    pub fn add_reclaimed(&mut self, size: usize, cells: usize) {
        self.classes[size].reclaimed_cells += cells;
    }

    /// The number of blocks of the given size.
    pub fn blocks_of_size(&self, size: usize) -> usize {
        self.classes.get(size).map_or(0, |c| c.blocks.len())
    }

    pub fn live_blocks_before(&self, size: usize) -> usize {
        self.classes.get(size).map_or(0, |c| c.live_blocks_before)
    }

    pub fn reclaimed_cells(&self, size: usize) -> usize {
        self.classes.get(size).map_or(0, |c| c.reclaimed_cells)
    }

    /// The number of blocks in use over all sizes.
    pub fn number_of_blocks(&self) -> usize {
        self.classes.iter().map(|c| c.blocks.len()).sum()
    }

    /// The number of cached unused blocks.
    pub fn number_of_unused_blocks(&self) -> usize {
        self.unused.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator(block_words: usize) -> BlockAllocator {
        BlockAllocator::new(&StoreConfig::default().with_block_words(block_words))
    }

    #[test]
    fn test_bump_then_expand() {
        let mut blocks = allocator(16);
        assert_eq!(blocks.allocate(4), None);

        blocks.expand(4).unwrap();
        let cells: Vec<usize> = (0..4).map(|_| blocks.allocate(4).unwrap()).collect();
        assert_eq!(blocks.allocate(4), None, "A block of 16 words holds four cells of size 4");

        for cell in &cells {
            assert_ne!(*cell, NULL);
            assert_eq!(blocks.cell_size(*cell), 4);
        }
    }

    #[test]
    fn test_free_list_first() {
        let mut blocks = allocator(16);
        blocks.expand(3).unwrap();

        let first = blocks.allocate(3).unwrap();
        blocks.set_header(first, Header::int());
        let _second = blocks.allocate(3).unwrap();

        blocks.push_free(first);
        assert_eq!(blocks.allocate(3), Some(first));
    }

    #[test]
    fn test_valid_terms() {
        let mut blocks = allocator(16);
        blocks.expand(4).unwrap();

        let cell = blocks.allocate(4).unwrap();
        assert!(!blocks.is_valid_term(cell), "A cell with a free header is not a term");

        blocks.set_header(cell, Header::list(0));
        assert!(blocks.is_valid_term(cell));
        assert!(!blocks.is_valid_term(cell + 1));
        assert!(!blocks.is_valid_term(cell + 4), "Not yet handed out");
        assert!(!blocks.is_valid_term(NULL));
        assert!(!blocks.is_valid_term(usize::MAX));
    }

    #[test]
    fn test_unused_cache_bounded() {
        let config = StoreConfig::default().with_block_words(16);
        let mut blocks = BlockAllocator::new(&StoreConfig {
            max_unused_blocks: 1,
            ..config
        });

        blocks.expand(4).unwrap();
        blocks.expand(4).unwrap();
        blocks.expand(2).unwrap();

        for slot in blocks.blocks_of(4) {
            blocks.reclaim(slot);
        }

        assert_eq!(blocks.number_of_unused_blocks(), 1);
        assert_eq!(blocks.number_of_blocks(), 1);

        // The cached block is reused, even for a different size.
        blocks.expand(8).unwrap();
        assert_eq!(blocks.number_of_unused_blocks(), 0);
        assert_eq!(blocks.blocks_of_size(8), 1);
    }

    #[test]
    fn test_block_limit() {
        let config = StoreConfig::default().with_block_words(16).with_max_blocks(Some(2));
        let mut blocks = BlockAllocator::new(&config);

        blocks.expand(2).unwrap();
        blocks.expand(2).unwrap();
        assert!(matches!(blocks.expand(2), Err(TermStoreError::OutOfMemory { size_class: 2 })));
    }

    #[test]
    fn test_cells_of_current_block() {
        let mut blocks = allocator(16);
        blocks.expand(5).unwrap();

        let slot = blocks.blocks_of(5)[0];
        assert_eq!(blocks.cells(slot).count(), 0);

        blocks.allocate(5).unwrap();
        blocks.allocate(5).unwrap();
        assert_eq!(blocks.cells(slot).count(), 2);

        // Three cells of five words fit, the last word is unused.
        blocks.allocate(5).unwrap();
        assert_eq!(blocks.allocate(5), None);
        assert!(!blocks.is_current(slot));
        assert_eq!(blocks.cells(slot).count(), 3);
    }
}
