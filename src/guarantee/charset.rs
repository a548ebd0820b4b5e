//! Character classes.
//!
//! A [`CharClass`] over-approximates the set of characters a string may
//! contain: one bit per ASCII code point plus a three-level summary of the
//! non-ASCII range (none, some, all). Sink predicates are evaluated by
//! intersecting the class a guarantee permits with the characters a sink
//! forbids.
//!
//! "Some" non-ASCII characters is a may-contain approximation: removing one
//! partial non-ASCII set from another cannot prove anything absent, so only
//! removing the full range clears it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How much of the non-ASCII range a class may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonAscii {
    #[default]
    None,
    Some,
    All,
}

/// Scalar values above ASCII (surrogates are not characters).
const NON_ASCII_SCALARS: u32 = 0x10FFFF - 0x7F - 0x800;

/// Set of characters: 128 ASCII bits and a non-ASCII summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CharClass {
    /// Bits 0..64 in `bits[0]`, 64..128 in `bits[1]`.
    bits: [u64; 2],
    non_ascii: NonAscii,
}

impl CharClass {
    /// The empty class.
    pub const EMPTY: CharClass = CharClass {
        bits: [0, 0],
        non_ascii: NonAscii::None,
    };

    /// Every character.
    pub const ANY: CharClass = CharClass {
        bits: [u64::MAX, u64::MAX],
        non_ascii: NonAscii::All,
    };

    /// Class containing exactly the characters of `s`.
    #[must_use]
    pub fn from_chars(s: &str) -> Self {
        let mut class = Self::EMPTY;
        for c in s.chars() {
            class.insert(c);
        }
        class
    }

    /// Inclusive character range.
    #[must_use]
    pub fn from_range(lo: char, hi: char) -> Self {
        Self::from_ranges([(lo, hi)])
    }

    /// Union of disjoint inclusive ranges, as produced by a regex class.
    #[must_use]
    pub fn from_ranges<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = (char, char)>,
    {
        let mut class = Self::EMPTY;
        let mut wide = 0u32;
        for (lo, hi) in ranges {
            if lo > hi {
                continue;
            }
            let (lo, hi) = (lo as u32, hi as u32);
            for cp in lo..=hi.min(127) {
                class.set_bit(cp);
            }
            if hi > 127 {
                wide = wide.saturating_add(scalar_count(lo.max(128), hi));
            }
        }
        class.non_ascii = match wide {
            0 => NonAscii::None,
            n if n >= NON_ASCII_SCALARS => NonAscii::All,
            _ => NonAscii::Some,
        };
        class
    }

    #[must_use]
    pub fn digits() -> Self {
        Self::from_range('0', '9')
    }

    #[must_use]
    pub fn hex_digits() -> Self {
        Self::digits()
            .union(&Self::from_range('a', 'f'))
            .union(&Self::from_range('A', 'F'))
    }

    #[must_use]
    pub fn ascii_letters() -> Self {
        Self::from_range('a', 'z').union(&Self::from_range('A', 'Z'))
    }

    #[must_use]
    pub fn alphanumeric() -> Self {
        Self::ascii_letters().union(&Self::digits())
    }

    /// Regex `\w` (ASCII word characters).
    #[must_use]
    pub fn word() -> Self {
        Self::alphanumeric().union(&Self::from_chars("_"))
    }

    /// Regex `\s` (ASCII whitespace).
    #[must_use]
    pub fn whitespace() -> Self {
        Self::from_chars(" \t\n\r\u{0B}\u{0C}")
    }

    /// Standard and URL-safe base64 alphabets plus padding.
    #[must_use]
    pub fn base64() -> Self {
        Self::alphanumeric().union(&Self::from_chars("+/=-_"))
    }

    /// Unreserved URL characters (RFC 3986).
    #[must_use]
    pub fn url_unreserved() -> Self {
        Self::alphanumeric().union(&Self::from_chars("-._~"))
    }

    #[inline]
    fn set_bit(&mut self, cp: u32) {
        self.bits[(cp / 64) as usize] |= 1u64 << (cp % 64);
    }

    /// Add a character to the class.
    pub fn insert(&mut self, c: char) {
        let cp = c as u32;
        if cp < 128 {
            self.set_bit(cp);
        } else if self.non_ascii == NonAscii::None {
            self.non_ascii = NonAscii::Some;
        }
    }

    /// Check whether the class may contain `c`.
    #[must_use]
    pub fn contains(&self, c: char) -> bool {
        let cp = c as u32;
        if cp < 128 {
            self.bits[(cp / 64) as usize] & (1u64 << (cp % 64)) != 0
        } else {
            self.non_ascii != NonAscii::None
        }
    }

    /// Whether the class may contain some non-ASCII character.
    #[must_use]
    pub fn has_non_ascii(&self) -> bool {
        self.non_ascii != NonAscii::None
    }

    #[must_use]
    pub fn union(&self, other: &CharClass) -> CharClass {
        CharClass {
            bits: [self.bits[0] | other.bits[0], self.bits[1] | other.bits[1]],
            non_ascii: self.non_ascii.max(other.non_ascii),
        }
    }

    #[must_use]
    pub fn intersect(&self, other: &CharClass) -> CharClass {
        CharClass {
            bits: [self.bits[0] & other.bits[0], self.bits[1] & other.bits[1]],
            non_ascii: self.non_ascii.min(other.non_ascii),
        }
    }

    /// Characters of `self` that are not in `other`.
    #[must_use]
    pub fn difference(&self, other: &CharClass) -> CharClass {
        CharClass {
            bits: [self.bits[0] & !other.bits[0], self.bits[1] & !other.bits[1]],
            non_ascii: match (self.non_ascii, other.non_ascii) {
                (_, NonAscii::All) | (NonAscii::None, _) => NonAscii::None,
                (NonAscii::All, NonAscii::None) => NonAscii::All,
                _ => NonAscii::Some,
            },
        }
    }

    #[must_use]
    pub fn complement(&self) -> CharClass {
        CharClass::ANY.difference(self)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits == [0, 0] && self.non_ascii == NonAscii::None
    }

    #[must_use]
    pub fn is_subset_of(&self, other: &CharClass) -> bool {
        self.difference(other).is_empty()
    }

    #[must_use]
    pub fn intersects(&self, other: &CharClass) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Characters after a lower-case (`to_lower = true`) or upper-case
    /// mapping. Non-ASCII characters may map to ASCII letters (`İ`, `ß`, the
    /// Kelvin sign), so they bring every letter of the target case with them.
    #[must_use]
    pub fn case_mapped(&self, to_lower: bool) -> CharClass {
        let mut out = CharClass::EMPTY;
        out.non_ascii = self.non_ascii.min(NonAscii::Some);
        for c in self.ascii_members() {
            out.insert(if to_lower {
                c.to_ascii_lowercase()
            } else {
                c.to_ascii_uppercase()
            });
        }
        if self.has_non_ascii() {
            let letters = if to_lower {
                Self::from_range('a', 'z')
            } else {
                Self::from_range('A', 'Z')
            };
            out = out.union(&letters);
        }
        out
    }

    /// ASCII members in code-point order.
    fn ascii_members(&self) -> impl Iterator<Item = char> + '_ {
        (0u8..128).map(char::from).filter(move |c| self.contains(*c))
    }
}

impl fmt::Display for CharClass {
    /// Render as a bracket expression, collapsing runs into ranges.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == CharClass::ANY {
            return write!(f, "[any]");
        }
        let members: Vec<char> = self.ascii_members().collect();
        write!(f, "[")?;
        let mut i = 0;
        while i < members.len() {
            let start = members[i];
            let mut end = start;
            while i + 1 < members.len() && members[i + 1] as u32 == end as u32 + 1 {
                i += 1;
                end = members[i];
            }
            write_char(f, start)?;
            if end as u32 > start as u32 + 1 {
                write!(f, "-")?;
                write_char(f, end)?;
            } else if end != start {
                write_char(f, end)?;
            }
            i += 1;
        }
        match self.non_ascii {
            NonAscii::None => {}
            NonAscii::Some => write!(f, "+some-non-ascii")?,
            NonAscii::All => write!(f, "+non-ascii")?,
        }
        write!(f, "]")
    }
}

/// Number of scalar values in `lo..=hi`, skipping the surrogate block.
fn scalar_count(lo: u32, hi: u32) -> u32 {
    let total = hi - lo + 1;
    let (s_lo, s_hi) = (0xD800u32.max(lo), 0xDFFFu32.min(hi));
    if s_lo <= s_hi {
        total - (s_hi - s_lo + 1)
    } else {
        total
    }
}

fn write_char(f: &mut fmt::Formatter<'_>, c: char) -> fmt::Result {
    if c.is_ascii_graphic() || c == ' ' {
        write!(f, "{}", c)
    } else {
        write!(f, "\\x{:02X}", c as u32)
    }
}
