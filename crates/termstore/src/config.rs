#![forbid(unsafe_code)]

use crate::TermStoreError;

/// Controls how much the collector reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// Only warnings and errors.
    Silent,
    #[default]
    Normal,
    /// Print a summary after every collection.
    Verbose,
}

/// The tuning parameters of a [crate::TermStore].
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// The number of words in a single block, must be a power of two.
    pub block_words: usize,

    /// The initial number of term table buckets is `2^term_table_class`.
    pub term_table_class: u32,

    /// The term table doubles when the number of entries exceeds this percentage of the buckets.
    pub max_load_percent: usize,

    /// The initial capacity of the symbol table is `2^symbol_table_class`.
    pub symbol_table_class: u32,

    /// Below this number of blocks for a size class no collection is attempted.
    pub gc_min_number_of_blocks: usize,

    /// Maximum number of empty blocks kept for reuse.
    pub max_unused_blocks: usize,

    /// A collection is preferred when the previous one reclaimed more than this percentage.
    pub good_gc_ratio: usize,

    /// A block is added instead of collecting when fewer than this percentage of blocks were added since the last collection.
    pub small_allocation_rate_ratio: usize,

    /// Hard limit on the number of blocks, `None` means unbounded.
    pub max_blocks: Option<usize>,

    /// The minimum capacity of a freshly allocated protected block.
    pub min_protected_block_size: usize,

    /// Maximum number of released protected blocks kept for reuse.
    pub max_unused_protected_blocks: usize,

    /// When false, allocation never triggers a collection.
    pub automatic_gc: bool,

    pub low_memory: bool,
    pub verbosity: Verbosity,
}

/// Default number of words per block.
pub const DEFAULT_BLOCK_WORDS: usize = 1 << 13;

impl StoreConfig {
    /// A configuration that trades speed for a smaller memory footprint.
    pub fn low_memory() -> Self {
        Self::default().with_low_memory(true)
    }

    /// Sets the number of words per block, rounded up to a power of two.
    pub fn with_block_words(mut self, words: usize) -> Self {
        self.block_words = words.max(16).next_power_of_two();
        self
    }

    pub fn with_term_table_class(mut self, class: u32) -> Self {
        self.term_table_class = class;
        self
    }

    pub fn with_symbol_table_class(mut self, class: u32) -> Self {
        self.symbol_table_class = class;
        self
    }

    pub fn with_max_blocks(mut self, max_blocks: Option<usize>) -> Self {
        self.max_blocks = max_blocks;
        self
    }

    pub fn with_automatic_gc(mut self, enabled: bool) -> Self {
        self.automatic_gc = enabled;
        self
    }

    pub fn with_gc_min_number_of_blocks(mut self, blocks: usize) -> Self {
        self.gc_min_number_of_blocks = blocks;
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Switches between the normal and the low-memory parameter sets.
    pub fn with_low_memory(mut self, enabled: bool) -> Self {
        self.low_memory = enabled;
        if enabled {
            self.gc_min_number_of_blocks = 2;
            self.max_unused_blocks = 30;
            self.small_allocation_rate_ratio = 25;
            self.min_protected_block_size = 8;
        } else {
            let defaults = Self::default();
            self.gc_min_number_of_blocks = defaults.gc_min_number_of_blocks;
            self.max_unused_blocks = defaults.max_unused_blocks;
            self.small_allocation_rate_ratio = defaults.small_allocation_rate_ratio;
            self.min_protected_block_size = defaults.min_protected_block_size;
        }
        self
    }

    /// Parses the term library options from the given arguments. Arguments
    /// that are not recognised are returned in [StoreOptions::remaining].
    pub fn from_args<I, S>(args: I) -> Result<StoreOptions, TermStoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut config = StoreConfig::default();
        let mut help_requested = false;
        let mut remaining = Vec::new();

        let mut args = args.into_iter().map(Into::into);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-at-silent" => config.verbosity = Verbosity::Silent,
                "-at-verbose" => config.verbosity = Verbosity::Verbose,
                "-at-low-memory" => config = config.with_low_memory(true),
                "-at-help" => help_requested = true,
                "-at-termtable" => config.term_table_class = parse_class(&arg, args.next())?,
                "-at-symboltable" => config.symbol_table_class = parse_class(&arg, args.next())?,
                _ => remaining.push(arg),
            }
        }

        Ok(StoreOptions {
            config,
            help_requested,
            remaining,
        })
    }

    /// Returns the description of the options recognised by [StoreConfig::from_args].
    pub fn help() -> &'static str {
        "Term library options:\n    \
            -at-silent               Do not print collection statistics\n    \
            -at-verbose              Print a summary after every collection\n    \
            -at-low-memory           Try to use as little memory as possible\n    \
            -at-termtable <class>    Start with a term table of 2^<class> buckets\n    \
            -at-symboltable <class>  Start with a symbol table of 2^<class> entries\n    \
            -at-help                 Print this help\n"
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        let block_bytes = DEFAULT_BLOCK_WORDS * size_of::<usize>();

        Self {
            block_words: DEFAULT_BLOCK_WORDS,
            term_table_class: 17,
            max_load_percent: 75,
            symbol_table_class: 10,
            gc_min_number_of_blocks: 2 * (20 * 1024 * 1024) / (10 * block_bytes),
            max_unused_blocks: 100,
            good_gc_ratio: 50,
            small_allocation_rate_ratio: 75,
            max_blocks: None,
            min_protected_block_size: 256,
            max_unused_protected_blocks: 16,
            automatic_gc: true,
            low_memory: false,
            verbosity: Verbosity::Normal,
        }
    }
}

/// The result of [StoreConfig::from_args].
#[derive(Debug)]
pub struct StoreOptions {
    pub config: StoreConfig,
    pub help_requested: bool,

    /// The arguments that are not term library options, in their original order.
    pub remaining: Vec<String>,
}

/// Table classes are bounded so that `2^class` buckets fit in memory.
const MAX_TABLE_CLASS: u32 = 40;

fn parse_class(option: &str, value: Option<String>) -> Result<u32, TermStoreError> {
    let value = value.ok_or_else(|| TermStoreError::InvalidOption(format!("{option} expects a table class")))?;
    let class = value
        .parse::<u32>()
        .map_err(|_| TermStoreError::InvalidOption(format!("{option} {value} is not a number")))?;

    if class == 0 || class > MAX_TABLE_CLASS {
        return Err(TermStoreError::InvalidOption(format!(
            "{option} {class} must be between 1 and {MAX_TABLE_CLASS}"
        )));
    }

    Ok(class)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options() {
        let options = StoreConfig::from_args(["tool", "-at-termtable", "12", "input.txt", "-at-silent"]).unwrap();

        assert_eq!(options.config.term_table_class, 12);
        assert_eq!(options.config.verbosity, Verbosity::Silent);
        assert!(!options.help_requested);
        assert_eq!(options.remaining, vec!["tool".to_string(), "input.txt".to_string()]);
    }

    #[test]
    fn test_low_memory_option() {
        let options = StoreConfig::from_args(["-at-low-memory", "-at-help"]).unwrap();

        assert!(options.config.low_memory);
        assert!(options.help_requested);
        assert_eq!(options.config.gc_min_number_of_blocks, 2);
        assert_eq!(options.config.max_unused_blocks, 30);
        assert_eq!(options.config.small_allocation_rate_ratio, 25);
    }

    #[test]
    fn test_invalid_options() {
        assert!(matches!(
            StoreConfig::from_args(["-at-termtable"]),
            Err(TermStoreError::InvalidOption(_))
        ));
        assert!(matches!(
            StoreConfig::from_args(["-at-symboltable", "many"]),
            Err(TermStoreError::InvalidOption(_))
        ));
        assert!(matches!(
            StoreConfig::from_args(["-at-termtable", "0"]),
            Err(TermStoreError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_default_min_blocks() {
        // 20 MB worth of 64 KB blocks on 64-bit machines.
        if cfg!(target_pointer_width = "64") {
            assert_eq!(StoreConfig::default().gc_min_number_of_blocks, 64);
        }
        assert!(StoreConfig::low_memory().with_low_memory(false).gc_min_number_of_blocks > 2);
    }
}
