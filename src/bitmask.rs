//! Packed bitmask over a token vocabulary (component E).
//!
//! Masks are stored as 32-bit words, little-endian bit order within each
//! word: bit `i` of token `t` lives in `words[t / 32]` at bit position
//! `t % 32`. This matches the layout LLM decoding frameworks expect when
//! they unpack a mask back into a boolean tensor.

/// A single-row packed bitmask over `vocab_size` tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBitmask {
    words: Vec<i32>,
    vocab_size: usize,
}

#[inline]
fn word_count(vocab_size: usize) -> usize {
    (vocab_size + 31) / 32
}

impl TokenBitmask {
    /// Allocates a mask of the given size with every bit cleared (all
    /// tokens masked out).
    pub fn allocate(vocab_size: usize) -> Self {
        TokenBitmask { words: vec![0i32; word_count(vocab_size)], vocab_size }
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    pub fn words(&self) -> &[i32] {
        &self.words
    }

    pub fn words_mut(&mut self) -> &mut [i32] {
        &mut self.words
    }

    /// Sets every bit up to `vocab_size`, equivalent to admitting every
    /// token (no tokens masked).
    pub fn reset(&mut self) {
        for w in self.words.iter_mut() {
            *w = -1i32;
        }
        self.clear_padding_bits();
    }

    /// Clears every bit, equivalent to masking every token out. Used
    /// internally to build up a mask bit-by-bit from nothing, as opposed
    /// to `reset`'s "nothing masked" baseline.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    #[inline]
    pub fn get(&self, token_id: u32) -> bool {
        let idx = token_id as usize;
        debug_assert!(idx < self.vocab_size);
        let word = self.words[idx / 32];
        (word >> (idx % 32)) & 1 == 1
    }

    #[inline]
    pub fn set(&mut self, token_id: u32, value: bool) {
        let idx = token_id as usize;
        debug_assert!(idx < self.vocab_size);
        let bit = 1i32 << (idx % 32);
        if value {
            self.words[idx / 32] |= bit;
        } else {
            self.words[idx / 32] &= !bit;
        }
    }

    /// Clears bits beyond `vocab_size` within the final word, so that
    /// `reset`/bitwise ops never report phantom tokens past the vocab.
    fn clear_padding_bits(&mut self) {
        let valid_bits = self.vocab_size % 32;
        if valid_bits != 0 {
            if let Some(last) = self.words.last_mut() {
                let keep = (1i32 << valid_bits).wrapping_sub(1);
                *last &= keep;
            }
        }
    }

    pub fn apply_inplace(&mut self, other: &TokenBitmask, op: BitmaskOp) {
        assert_eq!(self.vocab_size, other.vocab_size);
        match op {
            BitmaskOp::And => {
                for (a, b) in self.words.iter_mut().zip(&other.words) {
                    *a &= *b;
                }
            }
            BitmaskOp::Or => {
                for (a, b) in self.words.iter_mut().zip(&other.words) {
                    *a |= *b;
                }
            }
            BitmaskOp::AndNot => {
                for (a, b) in self.words.iter_mut().zip(&other.words) {
                    *a &= !*b;
                }
            }
        }
        self.clear_padding_bits();
    }

    pub fn to_bool_vec(&self) -> Vec<bool> {
        (0..self.vocab_size).map(|i| self.get(i as u32)).collect()
    }

    pub fn from_bool_vec(bits: &[bool]) -> Self {
        let mut mask = TokenBitmask::allocate(bits.len());
        for (i, &b) in bits.iter().enumerate() {
            mask.set(i as u32, b);
        }
        mask
    }

    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| (*w as u32).count_ones() as usize).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitmaskOp {
    And,
    Or,
    AndNot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_round_trip() {
        let mut m = TokenBitmask::allocate(70);
        m.set(0, true);
        m.set(31, true);
        m.set(32, true);
        m.set(69, true);
        assert!(m.get(0));
        assert!(m.get(31));
        assert!(m.get(32));
        assert!(m.get(69));
        assert!(!m.get(1));
    }

    #[test]
    fn reset_respects_vocab_size_padding() {
        let mut m = TokenBitmask::allocate(33);
        m.reset();
        assert_eq!(m.count_ones(), 33);
    }

    #[test]
    fn clear_masks_every_token_out() {
        let mut m = TokenBitmask::allocate(33);
        m.reset();
        m.clear();
        assert_eq!(m.count_ones(), 0);
    }

    #[test]
    fn bool_vec_round_trip() {
        let bits = vec![true, false, true, true, false];
        let m = TokenBitmask::from_bool_vec(&bits);
        assert_eq!(m.to_bool_vec(), bits);
    }

    #[test]
    fn and_not_clears_bits() {
        let mut a = TokenBitmask::allocate(40);
        a.reset();
        let mut b = TokenBitmask::allocate(40);
        b.set(5, true);
        a.apply_inplace(&b, BitmaskOp::AndNot);
        assert!(!a.get(5));
        assert!(a.get(6));
    }
}
