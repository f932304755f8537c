//! The adaptive token mask cache (component C): for every reachable
//! [`Position`], partitions the vocabulary into tokens that are always
//! admissible from that position, always rejected, or whose fate depends
//! on the runtime stack.

use ahash::AHashMap;

use crate::bitmask::TokenBitmask;
use crate::grammar::{CharClass, Element, Grammar, Position, QuantPhase};
use crate::tokenizer_info::TokenizerInfo;
use crate::utils::{utf8_prefix, utf8_ranges, Utf8Prefix};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Accept,
    Reject,
    Uncertain,
}

/// Per-position `always_accept`/`always_reject` bitmask fragments.
/// `uncertain(p)` is implicit: every bit not set in either fragment.
pub struct AdaptiveTokenMaskCache {
    index: AHashMap<Position, u32>,
    always_accept: Vec<TokenBitmask>,
    always_reject: Vec<TokenBitmask>,
}

impl AdaptiveTokenMaskCache {
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn always_accept(&self, pos: Position) -> Option<&TokenBitmask> {
        self.index.get(&pos).map(|&i| &self.always_accept[i as usize])
    }

    pub fn always_reject(&self, pos: Position) -> Option<&TokenBitmask> {
        self.index.get(&pos).map(|&i| &self.always_reject[i as usize])
    }

    /// Tokens neither always-accepted nor always-rejected from `pos`,
    /// i.e. requiring runtime stack-aware checking.
    pub fn is_uncertain(&self, pos: Position, token_id: u32) -> bool {
        match self.index.get(&pos) {
            Some(&i) => {
                !self.always_accept[i as usize].get(token_id) && !self.always_reject[i as usize].get(token_id)
            }
            None => true,
        }
    }

    pub(crate) fn build_for_position(
        grammar: &Grammar,
        tokenizer: &TokenizerInfo,
        pos: Position,
    ) -> (TokenBitmask, TokenBitmask) {
        let vocab_size = tokenizer.vocab_size();
        let mut accept = TokenBitmask::allocate(vocab_size);
        let mut reject = TokenBitmask::allocate(vocab_size);
        for (id, token) in tokenizer.tokens().iter().enumerate() {
            match classify_token_at_position(grammar, pos, &token.0) {
                Classification::Accept => accept.set(id as u32, true),
                Classification::Reject => reject.set(id as u32, true),
                Classification::Uncertain => {}
            }
        }
        (accept, reject)
    }

    pub(crate) fn from_parts(
        positions: &[Position],
        fragments: Vec<(TokenBitmask, TokenBitmask)>,
    ) -> Self {
        let mut index = AHashMap::with_capacity(positions.len());
        let mut always_accept = Vec::with_capacity(positions.len());
        let mut always_reject = Vec::with_capacity(positions.len());
        for (i, (pos, (accept, reject))) in positions.iter().zip(fragments).enumerate() {
            index.insert(*pos, i as u32);
            always_accept.push(accept);
            always_reject.push(reject);
        }
        AdaptiveTokenMaskCache { index, always_accept, always_reject }
    }
}

/// Runs the byte-level local automaton from `pos` over `token_bytes`
/// without regard to the runtime stack, stopping as soon as the answer
/// would require it (entering a referenced rule, continuing a quantifier
/// loop, or returning from the end of the current sequence while bytes
/// remain).
pub fn classify_token_at_position(grammar: &Grammar, pos: Position, token_bytes: &[u8]) -> Classification {
    let rule = grammar.rule(pos.rule);
    let seq = &rule.body[pos.alt as usize];
    let mut elem_idx = pos.elem as usize;
    let mut byte_idx = 0usize;
    loop {
        if byte_idx == token_bytes.len() {
            return Classification::Accept;
        }
        if elem_idx == seq.elements.len() {
            return Classification::Uncertain;
        }
        match &seq.elements[elem_idx] {
            Element::Empty => elem_idx += 1,
            Element::Literal(bytes) => {
                for &b in bytes.iter() {
                    if byte_idx == token_bytes.len() {
                        return Classification::Accept;
                    }
                    if token_bytes[byte_idx] != b {
                        return Classification::Reject;
                    }
                    byte_idx += 1;
                }
                elem_idx += 1;
            }
            Element::Class(cid) => {
                let cc = grammar.class(*cid);
                match utf8_prefix(&token_bytes[byte_idx..]) {
                    Utf8Prefix::Complete(cp, len) => {
                        if !cc.contains(cp) {
                            return Classification::Reject;
                        }
                        byte_idx += len;
                        elem_idx += 1;
                    }
                    Utf8Prefix::Partial => {
                        if class_allows_prefix(cc, &token_bytes[byte_idx..]) {
                            return Classification::Accept;
                        }
                        return Classification::Reject;
                    }
                    Utf8Prefix::Invalid => return Classification::Reject,
                }
            }
            Element::Ref(_) => return Classification::Uncertain,
            Element::Quantified(_, lo, _) => {
                let use_phase = if elem_idx == pos.elem as usize {
                    pos.phase
                } else if *lo > 0 {
                    QuantPhase::Under
                } else {
                    QuantPhase::Ready
                };
                match use_phase {
                    QuantPhase::AtMax => elem_idx += 1,
                    _ => return Classification::Uncertain,
                }
            }
        }
    }
}

/// Whether some completion of the partial UTF-8 `prefix` could decode to
/// a code point admitted by `cc`. Negated classes are treated
/// conservatively as always possible, since their complement is finite
/// and a completion outside it almost always exists.
fn class_allows_prefix(cc: &CharClass, prefix: &[u8]) -> bool {
    if cc.negated {
        return true;
    }
    for &(lo, hi) in &cc.ranges {
        for seq in utf8_ranges(lo, hi) {
            if seq.len() > prefix.len() && seq.iter().zip(prefix).all(|(&(l, h), &b)| l <= b && b <= h) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Grammar;

    #[test]
    fn literal_mismatch_is_always_reject() {
        let g = Grammar::parse(r#"root ::= "abc""#).unwrap();
        let pos = Position::start(g.root, 0);
        assert_eq!(classify_token_at_position(&g, pos, b"xbc"), Classification::Reject);
    }

    #[test]
    fn literal_prefix_match_is_always_accept() {
        let g = Grammar::parse(r#"root ::= "abc""#).unwrap();
        let pos = Position::start(g.root, 0);
        assert_eq!(classify_token_at_position(&g, pos, b"ab"), Classification::Accept);
    }

    #[test]
    fn ref_element_is_uncertain() {
        let g = Grammar::parse("root ::= digit\ndigit ::= [0-9]").unwrap();
        let pos = Position::start(g.root, 0);
        assert_eq!(classify_token_at_position(&g, pos, b"5"), Classification::Uncertain);
    }

    #[test]
    fn class_rejects_out_of_range_codepoint() {
        let g = Grammar::parse("root ::= [a-z]").unwrap();
        let pos = Position::start(g.root, 0);
        assert_eq!(classify_token_at_position(&g, pos, b"Z"), Classification::Reject);
    }
}
