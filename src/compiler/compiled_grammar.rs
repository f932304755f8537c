//! [`CompiledGrammar`]: the immutable artifact a [`super::GrammarCompiler`]
//! produces, shared by every [`crate::matcher::Matcher`] built from it.

use std::sync::Arc;

use crate::bitmask::TokenBitmask;
use crate::grammar::Grammar;
use crate::tokenizer_info::TokenizerInfo;

use super::mask_cache::AdaptiveTokenMaskCache;

pub(crate) struct CompiledGrammarInner {
    pub grammar: Grammar,
    pub tokenizer: TokenizerInfo,
    pub mask_cache: AdaptiveTokenMaskCache,
    /// Bitmask with every stop token set; OR'd into `fill_next_token_bitmask`
    /// output whenever the matcher's current state accepts termination.
    pub stop_bitmask: TokenBitmask,
    /// Bitmask with every special token set; always OR'd in, since special
    /// tokens never participate in grammar matching.
    pub special_bitmask: TokenBitmask,
}

/// An immutable, `Arc`-shared compiled grammar: a parsed rule graph plus
/// its precomputed adaptive token mask cache for one tokenizer.
///
/// Cheap to clone; every clone shares the same underlying data.
#[derive(Clone)]
pub struct CompiledGrammar(pub(crate) Arc<CompiledGrammarInner>);

impl CompiledGrammar {
    pub fn grammar(&self) -> &Grammar {
        &self.0.grammar
    }

    pub fn tokenizer(&self) -> &TokenizerInfo {
        &self.0.tokenizer
    }

    pub fn vocab_size(&self) -> usize {
        self.0.tokenizer.vocab_size()
    }

    pub(crate) fn mask_cache(&self) -> &AdaptiveTokenMaskCache {
        &self.0.mask_cache
    }

    pub(crate) fn position_count(&self) -> usize {
        self.0.mask_cache.len()
    }

    pub(crate) fn stop_bitmask(&self) -> &TokenBitmask {
        &self.0.stop_bitmask
    }

    pub(crate) fn special_bitmask(&self) -> &TokenBitmask {
        &self.0.special_bitmask
    }
}

impl std::fmt::Debug for CompiledGrammar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGrammar")
            .field("vocab_size", &self.vocab_size())
            .field("positions", &self.position_count())
            .finish()
    }
}
