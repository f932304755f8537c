//! Tokenizer info: a language model's vocabulary normalized into decoded
//! byte strings, classified by kind, and indexed for the compiler and
//! matcher (component B).
use ahash::AHashMap;
use fixedbitset_stack::FixedBitSet;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A token's decoded byte string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Token(pub Box<[u8]>);

/// How a vocabulary's raw token strings decode into the bytes they
/// actually contribute to the generated text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum VocabType {
    /// Token strings are already the raw bytes.
    Raw,
    /// GPT-2-style byte-level BPE: `Ġ`/`Ċ` stand in for space/newline and
    /// every other byte is mapped through the byte-level alphabet.
    ByteLevel,
    /// SentencePiece-style byte fallback: `▁` stands in for space and
    /// out-of-alphabet bytes are spelled as `<0xXX>` tokens.
    ByteFallback,
}

/// The role a token plays during matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    /// An ordinary token whose decoded bytes extend the generated text.
    Normal,
    /// A token that ends generation; never matched against the grammar.
    Stop,
    /// A model-control token (e.g. BOS/PAD) that never extends the
    /// generated text and is never matched against the grammar.
    Special,
}

#[derive(Debug, thiserror::Error)]
pub enum CreateTokenizerInfoError {
    /// The vocabulary size is {0}, while the maximum supported is {1}.
    #[error("The vocabulary size is {0}, while the maximum supported is {1}.")]
    VocabularyTooLarge(usize, usize),
}

/// A vocabulary normalized for grammar matching: every token's bytes as
/// they will actually be appended to the generated text, partitioned into
/// normal/stop/special, and indexed by leading byte.
#[derive(Clone)]
pub struct TokenizerInfo {
    vocab_type: VocabType,
    prepend_space_in_tokenization: bool,
    tokens: Vec<Token>,
    token_kind: Vec<TokenKind>,
    token_to_id: AHashMap<Token, u32>,
    first_byte_to_token_ids: Vec<FixedBitSet>,
    stop_token_ids: Vec<u32>,
    special_token_ids: Vec<u32>,
}

impl Debug for TokenizerInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenizerInfo")
            .field("vocab_type", &self.vocab_type)
            .field("vocab_size", &self.tokens.len())
            .field("stop_token_ids", &self.stop_token_ids)
            .field("special_token_ids", &self.special_token_ids)
            .finish()
    }
}

impl TokenizerInfo {
    /// Builds a `TokenizerInfo` from raw per-id token strings.
    ///
    /// `raw_tokens[id]` is the token's string exactly as the tokenizer
    /// stores it (pre-decoding); it is postprocessed according to
    /// `vocab_type` into the bytes that would actually be appended to the
    /// output. `stop_token_ids`/`special_token_ids` mark ids that are
    /// never matched against the grammar.
    pub fn new(
        raw_tokens: Vec<Box<[u8]>>,
        vocab_type: VocabType,
        prepend_space_in_tokenization: bool,
        stop_token_ids: Vec<u32>,
        special_token_ids: Vec<u32>,
    ) -> Result<Self, CreateTokenizerInfoError> {
        if raw_tokens.len() >= 0x1000000 {
            return Err(CreateTokenizerInfoError::VocabularyTooLarge(raw_tokens.len(), 0x1000000));
        }
        let special: ahash::AHashSet<u32> = special_token_ids.iter().copied().collect();
        let stop: ahash::AHashSet<u32> = stop_token_ids.iter().copied().collect();

        let mut tokens = Vec::with_capacity(raw_tokens.len());
        let mut token_kind = Vec::with_capacity(raw_tokens.len());
        for (id, raw) in raw_tokens.into_iter().enumerate() {
            let id = id as u32;
            let kind = if special.contains(&id) {
                TokenKind::Special
            } else if stop.contains(&id) {
                TokenKind::Stop
            } else {
                TokenKind::Normal
            };
            let decoded = match kind {
                TokenKind::Normal => postprocess(&raw, vocab_type),
                _ => raw.into_vec(),
            };
            tokens.push(Token(decoded.into_boxed_slice()));
            token_kind.push(kind);
        }

        let mut token_to_id = AHashMap::with_capacity(tokens.len());
        for (id, tok) in tokens.iter().enumerate() {
            token_to_id.entry(tok.clone()).or_insert(id as u32);
        }

        let mut temp: Vec<Vec<u32>> = vec![Vec::new(); 256];
        for (id, (tok, kind)) in tokens.iter().zip(&token_kind).enumerate() {
            if *kind != TokenKind::Normal || tok.0.is_empty() {
                continue;
            }
            temp[tok.0[0] as usize].push(id as u32);
        }
        let vocab_size = tokens.len();
        let mut first_byte_to_token_ids = Vec::with_capacity(256);
        for ids in temp {
            let mut set = FixedBitSet::with_capacity(vocab_size);
            for id in ids {
                set.insert(id as usize);
            }
            first_byte_to_token_ids.push(set);
        }

        check_vocabulary_utf8_support(&tokens, &token_kind);

        Ok(TokenizerInfo {
            vocab_type,
            prepend_space_in_tokenization,
            tokens,
            token_kind,
            token_to_id,
            first_byte_to_token_ids,
            stop_token_ids,
            special_token_ids,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.tokens.len()
    }

    pub fn vocab_type(&self) -> VocabType {
        self.vocab_type
    }

    pub fn prepend_space_in_tokenization(&self) -> bool {
        self.prepend_space_in_tokenization
    }

    pub fn token(&self, id: u32) -> Option<&Token> {
        self.tokens.get(id as usize)
    }

    pub fn token_kind(&self, id: u32) -> TokenKind {
        self.token_kind.get(id as usize).copied().unwrap_or(TokenKind::Special)
    }

    pub fn token_id(&self, token: &Token) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    pub fn stop_token_ids(&self) -> &[u32] {
        &self.stop_token_ids
    }

    pub fn special_token_ids(&self) -> &[u32] {
        &self.special_token_ids
    }

    /// Token ids of normal tokens whose decoded bytes start with `byte`.
    pub fn token_ids_with_first_byte(&self, byte: u8) -> impl Iterator<Item = u32> + '_ {
        self.first_byte_to_token_ids[byte as usize].ones().map(|i| i as u32)
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }
}

/// Decodes a raw tokenizer string into the bytes it contributes to
/// generated text, given the vocabulary's encoding convention.
fn postprocess(raw: &[u8], vocab_type: VocabType) -> Vec<u8> {
    match vocab_type {
        VocabType::Raw => raw.to_vec(),
        VocabType::ByteFallback => postprocess_byte_fallback(raw),
        VocabType::ByteLevel => postprocess_byte_level(raw),
    }
}

fn postprocess_byte_fallback(raw: &[u8]) -> Vec<u8> {
    if raw.len() == 6 && raw.starts_with(b"<0x") && raw.ends_with(b">") {
        if let Ok(hex) = std::str::from_utf8(&raw[3..5]) {
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                return vec![byte];
            }
        }
    }
    let s = String::from_utf8_lossy(raw);
    s.replace('\u{2581}', " ").into_bytes()
}

fn postprocess_byte_level(raw: &[u8]) -> Vec<u8> {
    let s = String::from_utf8_lossy(raw);
    let mut out = Vec::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\u{120}' => out.push(b' '),  // 'Ġ'
            '\u{10a}' => out.push(b'\n'), // 'Ċ'
            '\u{10d}' => out.push(b'\r'), // 'č' is not standard but kept defensively
            c if (c as u32) < 0x100 => out.push(c as u8),
            _ => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out
}

fn check_vocabulary_utf8_support(tokens: &[Token], kinds: &[TokenKind]) {
    let mut seen = [false; 256];
    for (tok, kind) in tokens.iter().zip(kinds) {
        if *kind != TokenKind::Normal {
            continue;
        }
        for &b in tok.0.iter() {
            seen[b as usize] = true;
        }
    }
    let missing: Vec<usize> = seen[..248].iter().enumerate().filter(|(_, &s)| !s).map(|(i, _)| i).collect();
    if !missing.is_empty() {
        log::warn!(
            "the following bytes are not present in any normal token: {missing:?}. this may indicate \
             the vocabulary was loaded with the wrong byte-decoding convention.",
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(s: &str) -> Box<[u8]> {
        s.as_bytes().to_vec().into_boxed_slice()
    }

    #[test]
    fn classifies_stop_and_special_tokens() {
        let info = TokenizerInfo::new(
            vec![raw("a"), raw("</s>"), raw("<pad>")],
            VocabType::Raw,
            false,
            vec![1],
            vec![2],
        )
        .unwrap();
        assert_eq!(info.token_kind(0), TokenKind::Normal);
        assert_eq!(info.token_kind(1), TokenKind::Stop);
        assert_eq!(info.token_kind(2), TokenKind::Special);
    }

    #[test]
    fn byte_level_decodes_space_and_newline_markers() {
        let info = TokenizerInfo::new(vec![raw("\u{120}hi\u{10a}")], VocabType::ByteLevel, false, vec![], vec![])
            .unwrap();
        assert_eq!(info.token(0).unwrap().0.as_ref(), b" hi\n");
    }

    #[test]
    fn byte_fallback_decodes_hex_escape() {
        let info =
            TokenizerInfo::new(vec![raw("<0xFF>")], VocabType::ByteFallback, false, vec![], vec![]).unwrap();
        assert_eq!(info.token(0).unwrap().0.as_ref(), &[0xFFu8]);
    }

    #[test]
    fn first_byte_index_groups_normal_tokens() {
        let info = TokenizerInfo::new(vec![raw("apple"), raw("avocado"), raw("banana")], VocabType::Raw, false, vec![], vec![])
            .unwrap();
        let ids: Vec<u32> = info.token_ids_with_first_byte(b'a').collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
