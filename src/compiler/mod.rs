//! Grammar compilation (component C): turns a parsed [`Grammar`] and a
//! [`TokenizerInfo`] into a [`CompiledGrammar`] ready for matching.

mod compiled_grammar;
mod mask_cache;
mod positions;

pub use compiled_grammar::CompiledGrammar;
pub use mask_cache::Classification;

use std::sync::Arc;

use crate::bitmask::TokenBitmask;
use crate::config::CompilerOptions;
use crate::grammar::Grammar;
use crate::tokenizer_info::{TokenKind, TokenizerInfo};

use compiled_grammar::CompiledGrammarInner;
use mask_cache::AdaptiveTokenMaskCache;

/// Compiles grammars against a fixed tokenizer into [`CompiledGrammar`]s.
///
/// Stateless aside from its options; safe to share across threads and to
/// invoke concurrently (each call computes an independent result).
#[derive(Debug, Clone, Copy, Default)]
pub struct GrammarCompiler {
    options: CompilerOptions,
}

impl GrammarCompiler {
    pub fn new(options: CompilerOptions) -> Self {
        GrammarCompiler { options }
    }

    /// Compiles `grammar` for `tokenizer`, computing the adaptive token
    /// mask cache by sharding the reachable position set across worker
    /// threads.
    pub fn compile(&self, grammar: Grammar, tokenizer: TokenizerInfo) -> CompiledGrammar {
        let all_positions = positions::enumerate_positions(&grammar);
        log::debug!(
            "compiling grammar with {} rules, {} reachable positions, vocab size {}",
            grammar.rules.len(),
            all_positions.len(),
            tokenizer.vocab_size()
        );

        let worker_count = if self.options.max_threads == 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        } else {
            self.options.max_threads
        }
        .max(1)
        .min(all_positions.len().max(1));

        let fragments = compute_fragments(&grammar, &tokenizer, &all_positions, worker_count);
        let mask_cache = AdaptiveTokenMaskCache::from_parts(&all_positions, fragments);

        let mut stop_bitmask = TokenBitmask::allocate(tokenizer.vocab_size());
        let mut special_bitmask = TokenBitmask::allocate(tokenizer.vocab_size());
        for id in 0..tokenizer.vocab_size() as u32 {
            match tokenizer.token_kind(id) {
                TokenKind::Stop => stop_bitmask.set(id, true),
                TokenKind::Special => special_bitmask.set(id, true),
                TokenKind::Normal => {}
            }
        }

        CompiledGrammar(Arc::new(CompiledGrammarInner {
            grammar,
            tokenizer,
            mask_cache,
            stop_bitmask,
            special_bitmask,
        }))
    }
}

fn compute_fragments(
    grammar: &Grammar,
    tokenizer: &TokenizerInfo,
    all_positions: &[crate::grammar::Position],
    worker_count: usize,
) -> Vec<(TokenBitmask, TokenBitmask)> {
    if worker_count <= 1 || all_positions.len() < 2 {
        return all_positions
            .iter()
            .map(|&pos| AdaptiveTokenMaskCache::build_for_position(grammar, tokenizer, pos))
            .collect();
    }

    let chunk_size = all_positions.len().div_ceil(worker_count);
    let mut results: Vec<Option<(TokenBitmask, TokenBitmask)>> = (0..all_positions.len()).map(|_| None).collect();
    let chunks: Vec<&[crate::grammar::Position]> = all_positions.chunks(chunk_size).collect();
    let mut result_chunks: Vec<&mut [Option<(TokenBitmask, TokenBitmask)>]> =
        Vec::with_capacity(chunks.len());
    let mut rest = results.as_mut_slice();
    for chunk in &chunks {
        let (head, tail) = rest.split_at_mut(chunk.len());
        result_chunks.push(head);
        rest = tail;
    }

    std::thread::scope(|scope| {
        for (chunk, out) in chunks.iter().zip(result_chunks) {
            scope.spawn(move || {
                for (pos, slot) in chunk.iter().zip(out.iter_mut()) {
                    *slot = Some(AdaptiveTokenMaskCache::build_for_position(grammar, tokenizer, *pos));
                }
            });
        }
    });

    results.into_iter().map(|r| r.expect("every position computed by some worker")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer_info::VocabType;

    fn tokenizer(tokens: &[&str]) -> TokenizerInfo {
        TokenizerInfo::new(
            tokens.iter().map(|t| t.as_bytes().to_vec().into_boxed_slice()).collect(),
            VocabType::Raw,
            false,
            vec![],
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn compiles_simple_literal_grammar() {
        let g = Grammar::parse(r#"root ::= "ab""#).unwrap();
        let tok = tokenizer(&["a", "ab", "b", "x"]);
        let compiled = GrammarCompiler::default().compile(g, tok);
        assert!(compiled.position_count() > 0);
    }

    #[test]
    fn multi_threaded_and_single_threaded_compile_agree() {
        let g = Grammar::parse("root ::= [a-z]{1,3}").unwrap();
        let tok = tokenizer(&["a", "ab", "abc", "abcd", "z"]);
        let single = GrammarCompiler::new(CompilerOptions { max_threads: 1 }).compile(g.clone(), tok.clone());
        let multi = GrammarCompiler::new(CompilerOptions { max_threads: 4 }).compile(g, tok);
        assert_eq!(single.position_count(), multi.position_count());
    }
}
