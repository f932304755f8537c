//! Compiler cache (component F): deduplicates concurrent compiles of the
//! same `(grammar, vocabulary)` pair so that only one thread actually
//! compiles while the rest wait for its result.

use std::sync::{Arc, Condvar, Mutex};

use ahash::AHashMap;

use crate::compiler::{CompiledGrammar, GrammarCompiler};
use crate::grammar::Grammar;
use crate::tokenizer_info::TokenizerInfo;
use crate::utils::fingerprint;

type CacheKey = (u64, u64);

enum Slot {
    /// Another thread is compiling this entry; waiters block on the
    /// condvar until it transitions to `Ready`.
    InFlight,
    Ready(CompiledGrammar),
}

/// A process-wide (or caller-owned) cache of compiled grammars, keyed by
/// the fingerprints of the grammar and the tokenizer info.
///
/// Concurrent `get_or_compile` calls for the same key collapse into a
/// single compile: the first caller compiles and publishes the result,
/// later callers block until it is ready.
pub struct CompilerCache {
    state: Mutex<AHashMap<CacheKey, Slot>>,
    condvar: Condvar,
    capacity: Option<usize>,
    order: Mutex<Vec<CacheKey>>,
}

impl CompilerCache {
    pub fn new() -> Self {
        CompilerCache {
            state: Mutex::new(AHashMap::default()),
            condvar: Condvar::new(),
            capacity: None,
            order: Mutex::new(Vec::new()),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        CompilerCache {
            state: Mutex::new(AHashMap::default()),
            condvar: Condvar::new(),
            capacity: Some(capacity),
            order: Mutex::new(Vec::new()),
        }
    }

    /// Returns a cached [`CompiledGrammar`] for `(grammar, tokenizer)`,
    /// compiling it with `compiler` if absent. Concurrent calls with the
    /// same key share one compile.
    pub fn get_or_compile(
        &self,
        compiler: &GrammarCompiler,
        grammar: Grammar,
        tokenizer: TokenizerInfo,
    ) -> CompiledGrammar {
        let key = (fingerprint(&grammar.to_source()), fingerprint(&tokenizer_fingerprint_source(&tokenizer)));

        let mut state = self.state.lock().unwrap();
        loop {
            match state.get(&key) {
                Some(Slot::Ready(compiled)) => return compiled.clone(),
                Some(Slot::InFlight) => {
                    state = self.condvar.wait(state).unwrap();
                }
                None => {
                    state.insert(key, Slot::InFlight);
                    break;
                }
            }
        }
        drop(state);

        log::info!("compiling grammar for cache key {key:?} (cache miss)");
        let compiled = compiler.compile(grammar, tokenizer);

        let mut state = self.state.lock().unwrap();
        state.insert(key, Slot::Ready(compiled.clone()));
        drop(state);
        self.condvar.notify_all();

        self.record_insertion(key);
        compiled
    }

    fn record_insertion(&self, key: CacheKey) {
        let Some(capacity) = self.capacity else { return };
        let mut order = self.order.lock().unwrap();
        order.push(key);
        if order.len() > capacity {
            let evict = order.remove(0);
            self.state.lock().unwrap().remove(&evict);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().values().filter(|s| matches!(s, Slot::Ready(_))).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CompilerCache {
    fn default() -> Self {
        Self::new()
    }
}

/// `Grammar` doesn't derive `Hash` (its IR embeds an `AHashMap`), so the
/// cache fingerprints its canonical printed form instead, which is stable
/// under structurally-equal grammars parsed from different source text.
fn tokenizer_fingerprint_source(tokenizer: &TokenizerInfo) -> Vec<u8> {
    let mut bytes = Vec::new();
    for token in tokenizer.tokens() {
        bytes.extend_from_slice(&(token.0.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&token.0);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer_info::VocabType;

    fn tokenizer() -> TokenizerInfo {
        TokenizerInfo::new(vec![b"a".to_vec().into_boxed_slice()], VocabType::Raw, false, vec![], vec![])
            .unwrap()
    }

    #[test]
    fn caches_repeated_compiles() {
        let cache = CompilerCache::new();
        let compiler = GrammarCompiler::default();
        let g = Grammar::parse(r#"root ::= "a""#).unwrap();
        let c1 = cache.get_or_compile(&compiler, g.clone(), tokenizer());
        assert_eq!(cache.len(), 1);
        let c2 = cache.get_or_compile(&compiler, g, tokenizer());
        assert_eq!(cache.len(), 1);
        assert_eq!(c1.position_count(), c2.position_count());
    }

    #[test]
    fn concurrent_compiles_of_same_key_collapse() {
        use std::sync::Arc;
        let cache = Arc::new(CompilerCache::new());
        let compiler = Arc::new(GrammarCompiler::default());
        let g = Grammar::parse("root ::= [a-z]{1,4}").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let compiler = Arc::clone(&compiler);
                let g = g.clone();
                std::thread::spawn(move || cache.get_or_compile(&compiler, g, tokenizer()))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.len(), 1);
    }
}
