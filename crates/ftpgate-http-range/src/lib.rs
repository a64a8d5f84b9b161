//! HTTP `Range` (RFC 9110) parsing for the `bytes` range-unit.
//!
//! The gateway forwards at most one byte range to the upstream transfer, so besides the general
//! parser this crate exposes [`parse_single_range`] and the two ways of turning a parsed spec into
//! a transfer window: [`ByteRangeSpec::resolve`] when the representation length is known and
//! [`ByteRangeSpec::window_without_length`] when it is not.
//!
//! # Invalid input policy
//!
//! - Unknown range units return `Ok(None)` (RFC 9110 says they should be ignored).
//! - Syntactically invalid `bytes` ranges return `Err(RangeParseError::Invalid)`.
//! - More than one range in [`parse_single_range`] returns `Err(RangeParseError::MultipleRanges)`.
//!
//! Callers decide whether an error means "ignore Range" or a client error.

use std::num::ParseIntError;

/// An inclusive byte range (`start..=end`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Length of this range in bytes.
    pub fn len(self) -> u64 {
        // `end` is inclusive.
        debug_assert!(self.start <= self.end);
        self.end - self.start + 1
    }

    pub fn is_empty(self) -> bool {
        self.start > self.end
    }

    /// `Content-Range` value for this range within a representation of `complete_len` bytes.
    pub fn content_range(self, complete_len: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, complete_len)
    }
}

/// A range-specifier from RFC 9110.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRangeSpec {
    /// `first-last` or `first-`.
    FromTo { start: u64, end: Option<u64> },
    /// `-suffix-length`.
    Suffix { suffix_len: u64 },
}

impl ByteRangeSpec {
    /// Resolve against a representation of `len` bytes.
    ///
    /// Returns `None` when the spec is unsatisfiable (a `416` condition).
    pub fn resolve(self, len: u64) -> Option<ByteRange> {
        if len == 0 {
            return None;
        }

        match self {
            ByteRangeSpec::FromTo { start, end } => {
                if start >= len {
                    return None;
                }
                let end = end.unwrap_or(len - 1).min(len - 1);
                if start > end {
                    return None;
                }
                Some(ByteRange { start, end })
            }
            ByteRangeSpec::Suffix { suffix_len } => {
                if suffix_len == 0 {
                    return None;
                }
                Some(ByteRange {
                    start: len.saturating_sub(suffix_len),
                    end: len - 1,
                })
            }
        }
    }

    /// Transfer window usable when the representation length is unknown.
    ///
    /// Returns `(offset, len)` where `len` is `None` for an open-ended `first-` range. Suffix
    /// ranges cannot be placed without a length and yield `None`.
    pub fn window_without_length(self) -> Option<(u64, Option<u64>)> {
        match self {
            ByteRangeSpec::FromTo { start, end: None } => Some((start, None)),
            ByteRangeSpec::FromTo {
                start,
                end: Some(end),
            } => Some((start, Some(end - start + 1))),
            ByteRangeSpec::Suffix { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RangeParseError {
    #[error("invalid Range header")]
    Invalid,
    #[error("multiple ranges are not supported")]
    MultipleRanges,
}

/// Parse an HTTP `Range` header value.
///
/// Returns `Ok(None)` when the range-unit is not `bytes`.
pub fn parse_range_header(value: &str) -> Result<Option<Vec<ByteRangeSpec>>, RangeParseError> {
    let value = value.trim();
    let (unit, rest) = value.split_once('=').ok_or(RangeParseError::Invalid)?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return Ok(None);
    }

    let mut out = Vec::new();
    for part in rest.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(RangeParseError::Invalid);
        }

        if let Some(suffix) = part.strip_prefix('-') {
            let suffix_len = parse_u64(suffix)?;
            out.push(ByteRangeSpec::Suffix { suffix_len });
            continue;
        }

        let (start, end) = part.split_once('-').ok_or(RangeParseError::Invalid)?;
        let start = parse_u64(start)?;
        let end = if end.trim().is_empty() {
            None
        } else {
            Some(parse_u64(end)?)
        };

        if matches!(end, Some(end) if start > end) {
            // First-byte-pos must be <= last-byte-pos when present.
            return Err(RangeParseError::Invalid);
        }

        out.push(ByteRangeSpec::FromTo { start, end });
    }

    if out.is_empty() {
        return Err(RangeParseError::Invalid);
    }

    Ok(Some(out))
}

/// Parse a `Range` header that must name exactly one byte range.
pub fn parse_single_range(value: &str) -> Result<Option<ByteRangeSpec>, RangeParseError> {
    let Some(specs) = parse_range_header(value)? else {
        return Ok(None);
    };
    match specs.as_slice() {
        [spec] => Ok(Some(*spec)),
        _ => Err(RangeParseError::MultipleRanges),
    }
}

fn parse_u64(s: &str) -> Result<u64, RangeParseError> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RangeParseError::Invalid);
    }
    s.parse::<u64>()
        .map_err(|_e: ParseIntError| RangeParseError::Invalid)
}
