/*!
# xgram

This crate compiles a context-free grammar and a token vocabulary into a
[`compiler::CompiledGrammar`], then drives that artifact with a
[`matcher::Matcher`] to constrain an LLM's next-token distribution to only
the tokens consistent with the grammar.

A quick example of the full pipeline, end to end:

```rust
use xgram::compiler::GrammarCompiler;
use xgram::config::MatcherOptions;
use xgram::grammar::Grammar;
use xgram::matcher::Matcher;
use xgram::tokenizer_info::{TokenizerInfo, VocabType};
use xgram::bitmask::TokenBitmask;

let grammar = Grammar::parse(r#"root ::= "yes" | "no""#).unwrap();
let tokenizer = TokenizerInfo::new(
    vec![b"yes".to_vec().into_boxed_slice(), b"no".to_vec().into_boxed_slice()],
    VocabType::Raw,
    false,
    vec![],
    vec![],
)
.unwrap();
let compiled = GrammarCompiler::default().compile(grammar, tokenizer);
let matcher = Matcher::new(compiled.clone(), MatcherOptions::default()).unwrap();

let mut mask = TokenBitmask::allocate(compiled.vocab_size());
let need_apply = matcher.fill_next_token_bitmask(&mut mask).unwrap();
assert!(need_apply);
assert!(mask.get(0) && mask.get(1));
```

# Overview

The crate is organized around the stages a grammar and vocabulary pass
through on the way to a constrained decode:

- [`grammar`]: parses grammar source into an IR ([`grammar::Grammar`]) of
  rules, alternatives, and elements, and prints it back.
- [`tokenizer_info`]: normalizes a raw vocabulary (byte-level or
  byte-fallback) into [`tokenizer_info::TokenizerInfo`].
- [`compiler`]: computes the adaptive token mask cache for every reachable
  grammar position against a tokenizer, producing a
  [`compiler::CompiledGrammar`].
- [`cache`]: deduplicates concurrent compiles of the same
  `(grammar, tokenizer)` pair.
- [`matcher`]: the runtime pushdown matcher — accepts tokens or raw bytes,
  fills next-token bitmasks, and supports rollback and jump-forward.
- [`bitmask`]: the packed bitmask type shared by the mask cache and the
  matcher.
- [`config`]: process-wide and per-matcher configuration.

# Grammar syntax

Grammar source is an EBNF variant. **By default, the engine starts from the
rule named `root`.**

## Rule definition

```ebnf
root ::= "A"; (* root expands to the literal "A" *)
```

A rule may be defined more than once; each definition contributes an
alternative:

```ebnf
root ::= "A";
root ::= "B";
(* root expands to either "A" or "B" *)
```

## Literals

A literal is a sequence of UTF-8 characters in double or single quotes.

## Concatenation and alternation

```ebnf
root ::= "A" "B"; (* equivalent to root ::= "AB" *)
root ::= "A" | "B"; (* either "A" or "B" *)
```

## Grouping

```ebnf
root ::= ("A" | "B") "C"; (* "AC" or "BC" *)
```

## Character classes

```ebnf
root ::= [a-zA-Z0-9]; (* one character from the given ranges *)
root ::= [^a-z]; (* negated: any character NOT in the given ranges *)
```

## Quantifiers

```ebnf
root ::= "A"?; (* zero or one *)
root ::= "A"*; (* zero or more *)
root ::= "A"+; (* one or more *)
root ::= "A"{2,4}; (* between 2 and 4, inclusive *)
```

## Lookahead assertions

A lookahead assertion, written `(=...)`, must be the last element of a
sequence. It asserts that the bytes immediately following the sequence are
consistent with the given sub-grammar, without consuming them.

```ebnf
root ::= "A" (="B"); (* "A" only matches if followed by "B" *)
```

# Non-goals

This crate does not perform tokenization, does not hold model weights or
run inference, does not schedule decoding, and does not repair malformed
output. It does not provide JSON-Schema or structural-tag lowering, nor
Python/WASM/host-language bindings, nor GPU kernels: it is a pure
CPU-side compiler and matcher over an already-tokenized vocabulary.
*/
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod bitmask;
pub mod cache;
pub mod compiler;
pub mod config;
pub mod grammar;
pub mod matcher;
pub mod tokenizer_info;
pub(crate) mod utils;

pub use bitmask::TokenBitmask;
pub use cache::CompilerCache;
pub use compiler::{CompiledGrammar, GrammarCompiler};
pub use config::{CompilerOptions, MatcherOptions};
pub use grammar::Grammar;
pub use matcher::{Matcher, MatcherError};
pub use tokenizer_info::TokenizerInfo;
