//! Small shared helpers used across the grammar, compiler, and matcher.

use ahash::AHasher;
use std::hash::{Hash, Hasher};

/// A stable, process-local fingerprint of a hashable value.
///
/// Used to key the compiler cache by grammar/vocabulary identity without
/// needing a cryptographic hash.
pub fn fingerprint<T: Hash>(value: &T) -> u64 {
    let mut hasher = AHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

/// One contiguous byte-range-per-position encoding of a single UTF-8
/// encoding length, e.g. `[(0xC2, 0xDF), (0x80, 0xBF)]` for a two-byte
/// sequence. Matching a `Utf8Sequence` means byte `i` of the input must
/// fall within `ranges[i]`.
pub type Utf8Sequence = Vec<(u8, u8)>;

/// Decomposes a Unicode scalar value range `[lo, hi]` into the set of
/// `Utf8Sequence`s whose concatenated byte ranges exactly cover the UTF-8
/// encodings of every code point in the range.
///
/// This is the classic range-splitting algorithm used by UTF-8-aware
/// regex engines: ranges are recursively split at the boundaries where the
/// encoded length changes or where the continuation-byte structure would
/// otherwise stop being a simple per-byte range (notably around the
/// UTF-16 surrogate gap `0xD800..=0xDFFF`, which is not valid UTF-8 and is
/// skipped).
pub fn utf8_ranges(lo: u32, hi: u32) -> Vec<Utf8Sequence> {
    let mut out = Vec::new();
    split(lo, hi, &mut out);
    out
}

const SURROGATE_LO: u32 = 0xD800;
const SURROGATE_HI: u32 = 0xDFFF;

fn split(lo: u32, hi: u32, out: &mut Vec<Utf8Sequence>) {
    if lo > hi {
        return;
    }
    if lo <= SURROGATE_HI && hi >= SURROGATE_LO {
        if lo < SURROGATE_LO {
            split(lo, SURROGATE_LO - 1, out);
        }
        if hi > SURROGATE_HI {
            split(SURROGATE_HI + 1, hi, out);
        }
        return;
    }
    for &boundary in &[0x7F, 0x7FF, 0xFFFF] {
        if lo <= boundary && hi > boundary {
            split(lo, boundary, out);
            split(boundary + 1, hi, out);
            return;
        }
    }
    out.extend(split_same_length(lo, hi));
}

/// `lo` and `hi` are known to encode to the same number of UTF-8 bytes.
/// Splits further only where byte boundaries within that length require
/// it (when the leading bytes differ we may need multiple pieces to keep
/// every byte position a single contiguous range).
fn split_same_length(lo: u32, hi: u32) -> Vec<Utf8Sequence> {
    let lo_bytes = encode(lo);
    let hi_bytes = encode(hi);
    debug_assert_eq!(lo_bytes.len(), hi_bytes.len());
    let n = lo_bytes.len();
    if n == 1 {
        return vec![vec![(lo_bytes[0], hi_bytes[0])]];
    }
    if lo_bytes[0] == hi_bytes[0] {
        if is_full_continuation_span(&lo_bytes[1..], &hi_bytes[1..]) || lo_bytes == hi_bytes {
            let mut ranges = vec![(lo_bytes[0], hi_bytes[0])];
            for i in 1..n {
                ranges.push((lo_bytes[i].min(hi_bytes[i]), lo_bytes[i].max(hi_bytes[i])));
            }
            return vec![ranges];
        }
        let mid = code_point_midpoint(lo, hi);
        let mut left = split_same_length(lo, mid);
        left.extend(split_same_length(mid + 1, hi));
        return left;
    }
    let mut out = Vec::new();
    let lo_max_tail = max_continuation_code_point(lo, n);
    if lo_max_tail > lo {
        out.extend(split_same_length(lo, lo_max_tail));
    } else {
        out.push(lo_bytes.iter().map(|&b| (b, b)).collect());
    }
    let hi_min_tail = min_continuation_code_point(hi, n);
    let mid_lo = lo_max_tail + 1;
    let mid_hi = hi_min_tail.saturating_sub(1);
    if mid_lo <= mid_hi {
        let mid_lo_bytes = encode(mid_lo);
        let mid_hi_bytes = encode(mid_hi);
        let mut ranges = vec![(mid_lo_bytes[0], mid_hi_bytes[0])];
        for _ in 1..n {
            ranges.push((0x80, 0xBF));
        }
        out.push(ranges);
    }
    if hi_min_tail <= hi {
        out.extend(split_same_length(hi_min_tail, hi));
    }
    out
}

fn is_full_continuation_span(lo: &[u8], hi: &[u8]) -> bool {
    lo.iter().zip(hi).all(|(&a, &b)| a == 0x80 && b == 0xBF)
}

fn code_point_midpoint(lo: u32, hi: u32) -> u32 {
    lo + (hi - lo) / 2
}

fn max_continuation_code_point(cp: u32, len: usize) -> u32 {
    let mut bytes = encode(cp);
    for b in bytes.iter_mut().skip(1) {
        *b = 0xBF;
    }
    debug_assert_eq!(bytes.len(), len);
    decode(&bytes)
}

fn min_continuation_code_point(cp: u32, len: usize) -> u32 {
    let mut bytes = encode(cp);
    for b in bytes.iter_mut().skip(1) {
        *b = 0x80;
    }
    debug_assert_eq!(bytes.len(), len);
    decode(&bytes)
}

fn encode(cp: u32) -> Vec<u8> {
    let mut buf = [0u8; 4];
    let s = char::from_u32(cp).unwrap_or('\u{FFFD}').encode_utf8(&mut buf);
    s.as_bytes().to_vec()
}

fn decode(bytes: &[u8]) -> u32 {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.chars().next())
        .map(|c| c as u32)
        .unwrap_or(0)
}

/// Result of inspecting a byte slice as the start of a UTF-8 sequence.
pub(crate) enum Utf8Prefix {
    /// A full code point decoded from the first `1` field bytes.
    Complete(u32, usize),
    /// A valid lead byte (and valid continuation bytes so far) but not
    /// enough bytes yet to decode a code point.
    Partial,
    Invalid,
}

/// Classifies `bytes` as the start of a UTF-8 sequence, used both by the
/// compiler's local token classifier and the matcher's byte-level stepper.
pub(crate) fn utf8_prefix(bytes: &[u8]) -> Utf8Prefix {
    if bytes.is_empty() {
        return Utf8Prefix::Partial;
    }
    let b0 = bytes[0];
    let len = if b0 < 0x80 {
        1
    } else if b0 & 0xE0 == 0xC0 {
        2
    } else if b0 & 0xF0 == 0xE0 {
        3
    } else if b0 & 0xF8 == 0xF0 {
        4
    } else {
        return Utf8Prefix::Invalid;
    };
    for &b in bytes.iter().take(len).skip(1) {
        if b & 0xC0 != 0x80 {
            return Utf8Prefix::Invalid;
        }
    }
    if bytes.len() < len {
        return Utf8Prefix::Partial;
    }
    match std::str::from_utf8(&bytes[..len]) {
        Ok(s) => match s.chars().next() {
            Some(c) => Utf8Prefix::Complete(c as u32, len),
            None => Utf8Prefix::Invalid,
        },
        Err(_) => Utf8Prefix::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covers(ranges: &[Utf8Sequence], bytes: &[u8]) -> bool {
        ranges.iter().any(|seq| {
            seq.len() == bytes.len() && seq.iter().zip(bytes).all(|(&(lo, hi), &b)| lo <= b && b <= hi)
        })
    }

    #[test]
    fn ascii_range() {
        let seqs = utf8_ranges(b'a' as u32, b'z' as u32);
        assert!(covers(&seqs, "m".as_bytes()));
        assert!(!covers(&seqs, "A".as_bytes()));
    }

    #[test]
    fn multibyte_single_codepoint() {
        let cp = '€' as u32;
        let seqs = utf8_ranges(cp, cp);
        let mut buf = [0u8; 4];
        let encoded = '€'.encode_utf8(&mut buf).as_bytes();
        assert!(covers(&seqs, encoded));
    }

    #[test]
    fn full_bmp_range_excludes_surrogates() {
        let seqs = utf8_ranges(0x0, 0xFFFF);
        let mut buf = [0u8; 4];
        let surrogate_adjacent = 'あ'.encode_utf8(&mut buf).as_bytes();
        assert!(covers(&seqs, surrogate_adjacent));
    }
}
