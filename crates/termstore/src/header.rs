#![forbid(unsafe_code)]

//! Every cell starts with a single machine word that describes it. From the
//! least significant bit upwards the word contains:
//!
//! | bits                | field                                  |
//! |---------------------|----------------------------------------|
//! | 0..2                | age, saturates at [MAX_AGE]            |
//! | 2                   | mark                                   |
//! | 3                   | quoted                                 |
//! | 4                   | annotated                              |
//! | 5..8                | [TermType]                             |
//! | 8..8+[ARITY_BITS]   | arity, saturates at [MAX_INLINE_ARITY] |
//! | remaining high bits | symbol id, or the length of a list     |
//!
//! The arity field is eight bits wide on 64-bit machines and three bits wide
//! on 32-bit machines. Applications with a saturated arity field obtain their
//! arity from the symbol table. Annotated cells carry the address of their
//! annotations in the last payload word.

use std::fmt;

use crate::TermStoreError;

const AGE_BITS: u32 = 2;
const AGE_MASK: usize = (1 << AGE_BITS) - 1;
const MARK_BIT: usize = 1 << 2;
const QUOTED_BIT: usize = 1 << 3;
const ANNOTATED_BIT: usize = 1 << 4;
const TYPE_SHIFT: u32 = 5;
const TYPE_MASK: usize = 0b111 << TYPE_SHIFT;
const ARITY_SHIFT: u32 = 8;

#[cfg(target_pointer_width = "64")]
pub const ARITY_BITS: u32 = 8;
#[cfg(not(target_pointer_width = "64"))]
pub const ARITY_BITS: u32 = 3;

const ARITY_MASK: usize = ((1 << ARITY_BITS) - 1) << ARITY_SHIFT;
const VALUE_SHIFT: u32 = ARITY_SHIFT + ARITY_BITS;

/// The largest age a cell can reach.
pub const MAX_AGE: u8 = AGE_MASK as u8;

/// The largest arity that is stored in the header itself.
pub const MAX_INLINE_ARITY: usize = (1 << ARITY_BITS) - 1;

/// The largest symbol id or list length that fits in the header.
pub const MAX_HEADER_VALUE: usize = usize::MAX >> VALUE_SHIFT;

/// The kind of cell described by a header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TermType {
    /// An unused cell, either on a free list or not yet handed out.
    Free = 0,
    Appl = 1,
    Int = 2,
    List = 3,
    Symbol = 4,
}

impl TermType {
    fn from_bits(bits: usize) -> TermType {
        match bits {
            1 => TermType::Appl,
            2 => TermType::Int,
            3 => TermType::List,
            4 => TermType::Symbol,
            _ => TermType::Free,
        }
    }
}

/// The decoded contents of a [Header], ignoring the age and mark bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderFields {
    pub term_type: TermType,
    pub arity: usize,

    /// The symbol id of applications and symbols, or the length of a list.
    pub value: usize,
    pub quoted: bool,
    pub annotated: bool,
}

/// A bit-packed cell header, see the module documentation for the layout.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header(usize);

impl Header {
    /// The header of an unused cell. A zeroed word is a free header.
    pub const fn free() -> Header {
        Header(0)
    }

    /// The header of a function application of the given symbol.
    pub fn appl(symbol: usize, arity: usize, quoted: bool) -> Header {
        Header::encode(HeaderFields {
            term_type: TermType::Appl,
            arity: arity.min(MAX_INLINE_ARITY),
            value: symbol,
            quoted,
            annotated: false,
        })
    }

    /// The header of an integer cell.
    pub fn int() -> Header {
        Header::encode(HeaderFields {
            term_type: TermType::Int,
            arity: 0,
            value: 0,
            quoted: false,
            annotated: false,
        })
    }

    /// The header of a list cell. Lengths that do not fit saturate at [MAX_HEADER_VALUE].
    pub fn list(length: usize) -> Header {
        Header::encode(HeaderFields {
            term_type: TermType::List,
            arity: 0,
            value: length.min(MAX_HEADER_VALUE),
            quoted: false,
            annotated: false,
        })
    }

    /// The header of the cell that represents a symbol during collection.
    pub fn symbol(id: usize, arity: usize, quoted: bool) -> Header {
        Header::encode(HeaderFields {
            term_type: TermType::Symbol,
            arity: arity.min(MAX_INLINE_ARITY),
            value: id,
            quoted,
            annotated: false,
        })
    }

    /// Packs the given fields, the age is zero and the mark is cleared.
    pub fn encode(fields: HeaderFields) -> Header {
        debug_assert!(fields.arity <= MAX_INLINE_ARITY, "Arity {} does not fit", fields.arity);
        debug_assert!(fields.value <= MAX_HEADER_VALUE, "Value {} does not fit", fields.value);

        let mut word = (fields.term_type as usize) << TYPE_SHIFT;
        word |= fields.arity << ARITY_SHIFT;
        word |= fields.value << VALUE_SHIFT;
        if fields.quoted {
            word |= QUOTED_BIT;
        }
        if fields.annotated {
            word |= ANNOTATED_BIT;
        }

        Header(word)
    }

    pub fn decode(self) -> HeaderFields {
        HeaderFields {
            term_type: self.term_type(),
            arity: self.arity(),
            value: self.value(),
            quoted: self.is_quoted(),
            annotated: self.is_annotated(),
        }
    }

    pub const fn from_word(word: usize) -> Header {
        Header(word)
    }

    pub const fn word(self) -> usize {
        self.0
    }

    pub fn term_type(self) -> TermType {
        TermType::from_bits((self.0 & TYPE_MASK) >> TYPE_SHIFT)
    }

    /// The arity field, saturated at [MAX_INLINE_ARITY].
    pub fn arity(self) -> usize {
        (self.0 & ARITY_MASK) >> ARITY_SHIFT
    }

    /// The symbol id or list length.
    pub fn value(self) -> usize {
        self.0 >> VALUE_SHIFT
    }

    pub fn is_quoted(self) -> bool {
        self.0 & QUOTED_BIT != 0
    }

    pub fn is_annotated(self) -> bool {
        self.0 & ANNOTATED_BIT != 0
    }

    /// The header of the same term with or without annotations, the age and mark are cleared.
    pub fn with_annotations(self, annotated: bool) -> Header {
        Header::encode(HeaderFields {
            annotated,
            ..self.decode()
        })
    }

    pub fn is_marked(self) -> bool {
        self.0 & MARK_BIT != 0
    }

    pub fn is_free(self) -> bool {
        self.term_type() == TermType::Free
    }

    pub fn age(self) -> u8 {
        (self.0 & AGE_MASK) as u8
    }

    pub fn marked(self) -> Header {
        Header(self.0 | MARK_BIT)
    }

    pub fn unmarked(self) -> Header {
        Header(self.0 & !MARK_BIT)
    }

    /// Increments the age, it never exceeds [MAX_AGE].
    pub fn aged(self) -> Header {
        if self.age() < MAX_AGE {
            Header(self.0 + 1)
        } else {
            self
        }
    }

    pub fn with_age_reset(self) -> Header {
        Header(self.0 & !AGE_MASK)
    }

    /// The header without the age and mark bits, used for hashing.
    pub fn hide_age_mark(self) -> usize {
        self.0 & !(AGE_MASK | MARK_BIT)
    }

    /// Converts the header to the 32-bit layout used in interchange formats.
    ///
    /// The arity saturates at seven and list lengths saturate at the largest
    /// portable value. Symbol ids that do not fit are an error. The age and
    /// mark are dropped.
    pub fn to_portable(self) -> Result<u32, TermStoreError> {
        let value = match self.term_type() {
            TermType::List => self.value().min(portable::MAX_VALUE),
            _ if self.value() > portable::MAX_VALUE => {
                return Err(TermStoreError::PortableOverflow { value: self.value() });
            }
            _ => self.value(),
        };

        let mut word = (self.term_type() as u32) << TYPE_SHIFT;
        word |= (self.arity().min(portable::MAX_ARITY) as u32) << ARITY_SHIFT;
        word |= (value as u32) << portable::VALUE_SHIFT;
        if self.is_quoted() {
            word |= QUOTED_BIT as u32;
        }
        if self.is_annotated() {
            word |= ANNOTATED_BIT as u32;
        }

        Ok(word)
    }

    /// Reads a header in the 32-bit interchange layout. Arities of seven and
    /// above come back as seven, the symbol determines the actual arity.
    pub fn from_portable(word: u32) -> Header {
        let word = word as usize;
        Header::encode(HeaderFields {
            term_type: TermType::from_bits((word & TYPE_MASK) >> TYPE_SHIFT),
            arity: (word >> ARITY_SHIFT) & portable::MAX_ARITY,
            value: word >> portable::VALUE_SHIFT,
            quoted: word & QUOTED_BIT != 0,
            annotated: word & ANNOTATED_BIT != 0,
        })
    }
}

/// The 32-bit layout only differs in the width of the arity field.
mod portable {
    pub const ARITY_BITS: u32 = 3;
    pub const MAX_ARITY: usize = (1 << ARITY_BITS) - 1;
    pub const VALUE_SHIFT: u32 = super::ARITY_SHIFT + ARITY_BITS;
    pub const MAX_VALUE: usize = (u32::MAX >> VALUE_SHIFT) as usize;
}

/// The largest symbol id that can be written in the 32-bit layout.
pub const MAX_PORTABLE_VALUE: usize = portable::MAX_VALUE;

/// Returns true iff both headers are equal when the age and mark bits are ignored.
pub fn equal_header(left: Header, right: Header) -> bool {
    left.hide_age_mark() == right.hide_age_mark()
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("type", &self.term_type())
            .field("arity", &self.arity())
            .field("value", &self.value())
            .field("quoted", &self.is_quoted())
            .field("annotated", &self.is_annotated())
            .field("mark", &self.is_marked())
            .field("age", &self.age())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use test_case::test_case;

    use crate::random_test;

    use super::*;

    #[test_case(TermType::Appl, 2, 17, false, false ; "application")]
    #[test_case(TermType::Appl, MAX_INLINE_ARITY, MAX_HEADER_VALUE, true, true ; "quoted maximal annotated application")]
    #[test_case(TermType::Int, 0, 0, false, false ; "integer")]
    #[test_case(TermType::Int, 0, 0, false, true ; "annotated integer")]
    #[test_case(TermType::List, 0, 1000, false, false ; "list")]
    #[test_case(TermType::Symbol, 3, 5, true, false ; "symbol")]
    #[test_case(TermType::Free, 0, 0, false, false ; "free")]
    fn test_header_round_trip(term_type: TermType, arity: usize, value: usize, quoted: bool, annotated: bool) {
        let fields = HeaderFields {
            term_type,
            arity,
            value,
            quoted,
            annotated,
        };

        assert_eq!(Header::encode(fields).decode(), fields);
    }

    #[test]
    fn test_random_header_round_trip() {
        random_test(1000, |rng| {
            let fields = HeaderFields {
                term_type: TermType::from_bits(rng.random_range(0..5)),
                arity: rng.random_range(0..=MAX_INLINE_ARITY),
                value: rng.random_range(0..=MAX_HEADER_VALUE),
                quoted: rng.random_bool(0.5),
                annotated: rng.random_bool(0.5),
            };

            let header = Header::encode(fields);
            assert_eq!(header.decode(), fields);

            // Marks and ages are invisible to the comparison.
            let touched = header.marked().aged().aged();
            assert!(equal_header(header, touched));
            assert_eq!(touched.decode(), fields);
        });
    }

    #[test]
    fn test_equal_header_sensitive() {
        let header = Header::appl(4, 2, false);

        assert!(!equal_header(header, Header::appl(5, 2, false)));
        assert!(!equal_header(header, Header::appl(4, 3, false)));
        assert!(!equal_header(header, Header::appl(4, 2, true)));
        assert!(!equal_header(header, Header::symbol(4, 2, false)));
        assert!(!equal_header(header, header.with_annotations(true)));
        assert!(equal_header(header, header.marked()));
        assert!(equal_header(header, header.with_annotations(true).with_annotations(false)));
        assert_eq!(header.marked().aged().with_annotations(true).age(), 0);
    }

    #[test]
    fn test_age_saturates() {
        let mut header = Header::int();
        for _ in 0..100 {
            header = header.aged();
            assert!(header.age() <= MAX_AGE);
        }

        assert_eq!(header.age(), MAX_AGE);
        assert_eq!(header.with_age_reset().age(), 0);
        assert_eq!(header.with_age_reset().term_type(), TermType::Int);
    }

    #[test]
    fn test_saturating_fields() {
        assert_eq!(Header::appl(1, MAX_INLINE_ARITY + 10, false).arity(), MAX_INLINE_ARITY);
        assert_eq!(Header::list(usize::MAX).value(), MAX_HEADER_VALUE);
    }

    #[test]
    fn test_portable_header() {
        let header = Header::appl(1234, 2, true).with_annotations(true).marked().aged();
        let portable = header.to_portable().unwrap();

        assert!(equal_header(Header::from_portable(portable), header));
        assert_eq!(Header::from_portable(portable).age(), 0);
        assert!(!Header::from_portable(portable).is_marked());

        // Arities saturate, the symbol is authoritative.
        let wide = Header::appl(3, 12, false).to_portable().unwrap();
        assert_eq!(Header::from_portable(wide).arity(), 7);

        if MAX_HEADER_VALUE > MAX_PORTABLE_VALUE {
            assert!(matches!(
                Header::appl(MAX_PORTABLE_VALUE + 1, 0, false).to_portable(),
                Err(TermStoreError::PortableOverflow { .. })
            ));

            let long = Header::list(MAX_PORTABLE_VALUE + 10).to_portable().unwrap();
            assert_eq!(Header::from_portable(long).value(), MAX_PORTABLE_VALUE);
        }
    }
}
