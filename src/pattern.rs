//! Masked-byte pattern matching.
//!
//! A compiled pattern is a sequence of per-byte `(mask, value)` matches.
//! Pattern strings use the syntax: hex byte (`ab`), wildcard (`?`, `??`,
//! `x`, `xx`), or an 8-character bit pattern in brackets (`[01001...]`,
//! where `.`/`?`/`x` is a per-bit wildcard).

use std::fmt;

/// A single byte match: `value & mask == value` for a matching byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteMatch {
    pub mask: u8,
    pub value: u8,
}

impl ByteMatch {
    pub const fn exact(value: u8) -> Self {
        ByteMatch { mask: 0xFF, value }
    }

    pub const fn wildcard() -> Self {
        ByteMatch { mask: 0, value: 0 }
    }

    pub fn matches(&self, byte: u8) -> bool {
        (byte & self.mask) == self.value
    }
}

/// A compiled sequence of [`ByteMatch`]es.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    entries: Vec<ByteMatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PatternParseError {
    #[error("bit pattern {0:?} must be 8 characters long")]
    BadBitPatternLength([u8; 2]),
    #[error("unexpected character in bit pattern")]
    BadBitPatternChar,
    #[error("invalid hex byte in pattern")]
    BadHexByte,
}

impl Pattern {
    pub fn new(entries: Vec<ByteMatch>) -> Self {
        Pattern { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns every offset in `memory` where this pattern matches.
    pub fn search<'a>(&'a self, memory: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
        let n = self.entries.len();
        (0..memory.len().saturating_sub(n).saturating_add(if n == 0 { 0 } else { 1 }))
            .filter(move |&offset| {
                offset + n <= memory.len()
                    && self
                        .entries
                        .iter()
                        .enumerate()
                        .all(|(i, m)| m.matches(memory[offset + i]))
            })
    }

    /// Parses a pattern string of space-separated tokens (hex bytes,
    /// wildcards, or bracketed bit patterns).
    pub fn compile(pattern: &str) -> Result<Self, PatternParseError> {
        let mut entries = Vec::new();
        for token in pattern.split(' ') {
            if token.is_empty() {
                continue;
            } else if let Some(bits) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
                entries.push(parse_bit_pattern(bits)?);
            } else if matches!(token, "?" | "??" | "x" | "xx") {
                entries.push(ByteMatch::wildcard());
            } else {
                let value = u8::from_str_radix(token, 16).map_err(|_| PatternParseError::BadHexByte)?;
                entries.push(ByteMatch::exact(value));
            }
        }
        Ok(Pattern { entries })
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, m) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            if m.mask == 0xFF {
                write!(f, "{:02x}", m.value)?;
            } else if m.mask == 0 {
                write!(f, "x")?;
            } else {
                write!(f, "[")?;
                for bit in (0..8).rev() {
                    let in_mask = (m.mask >> bit) & 1 == 1;
                    let val = (m.value >> bit) & 1 == 1;
                    write!(f, "{}", if in_mask { if val { '1' } else { '0' } } else { '.' })?;
                }
                write!(f, "]")?;
            }
        }
        Ok(())
    }
}

fn parse_bit_pattern(bits: &str) -> Result<ByteMatch, PatternParseError> {
    if bits.len() != 8 {
        let mut tag = [0u8; 2];
        let b = bits.as_bytes();
        tag[0] = b.first().copied().unwrap_or(0);
        tag[1] = bits.len() as u8;
        return Err(PatternParseError::BadBitPatternLength(tag));
    }
    let mut mask = 0u8;
    let mut value = 0u8;
    for c in bits.chars() {
        mask <<= 1;
        value <<= 1;
        match c {
            '0' => mask |= 1,
            '1' => {
                mask |= 1;
                value |= 1;
            }
            '.' | '?' | 'x' => {}
            _ => return Err(PatternParseError::BadBitPatternChar),
        }
    }
    Ok(ByteMatch { mask, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_byte_match() {
        assert!(ByteMatch::exact(0xad).matches(0xad));
        assert!(!ByteMatch::exact(0xad).matches(0xbe));
    }

    #[test]
    fn bit_pattern_match() {
        let m = ByteMatch { mask: 0b1111_0000, value: 0xa0 };
        assert!(m.matches(0xa3));
        assert!(!m.matches(0x3d));
    }

    #[test]
    fn search_finds_single_and_multiple() {
        let p = Pattern::compile("ad").unwrap();
        assert_eq!(p.search(&[0xde, 0xad, 0xbe, 0xef]).collect::<Vec<_>>(), vec![1]);

        let p = Pattern::compile("ff").unwrap();
        assert_eq!(
            p.search(&[0xff, 0xde, 0xad, 0xbe, 0xef, 0xff]).collect::<Vec<_>>(),
            vec![0, 5]
        );
    }

    #[test]
    fn search_two_byte_pattern() {
        let p = Pattern::compile("ad be").unwrap();
        assert_eq!(p.search(&[0xde, 0xad, 0xbe, 0xef]).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn compile_wildcard() {
        let p = Pattern::compile("01 x 02").unwrap();
        assert_eq!(
            p,
            Pattern::new(vec![ByteMatch::exact(1), ByteMatch::wildcard(), ByteMatch::exact(2)])
        );
    }

    #[test]
    fn compile_bit_pattern() {
        let p = Pattern::compile("[01001...]").unwrap();
        assert_eq!(
            p,
            Pattern::new(vec![ByteMatch { mask: 0b1111_1000, value: 0b0100_1000 }])
        );
    }

    #[test]
    fn compile_round_trip_on_corpus() {
        for text in ["00 01 02 03", "01 x 02", "[01001...]", "de ad be ef"] {
            let p = Pattern::compile(text).unwrap();
            let p2 = Pattern::compile(&p.to_string()).unwrap();
            assert_eq!(p, p2);
        }
    }

    #[test]
    fn bad_bit_pattern_length_errors() {
        assert!(parse_bit_pattern("01001").is_err());
        assert!(parse_bit_pattern("0100100101010").is_err());
    }

    #[test]
    fn bad_bit_pattern_char_errors() {
        assert!(parse_bit_pattern("0101010a").is_err());
    }
}
