//! End-to-end scenarios exercising the full parse -> compile -> match
//! pipeline, independent of any one module's unit tests.

use xgram::bitmask::TokenBitmask;
use xgram::compiler::GrammarCompiler;
use xgram::config::MatcherOptions;
use xgram::grammar::Grammar;
use xgram::matcher::Matcher;
use xgram::tokenizer_info::{TokenizerInfo, VocabType};

fn tokenizer(normal: &[&str], stop: &[&str]) -> TokenizerInfo {
    let mut raw: Vec<Box<[u8]>> = normal.iter().map(|t| t.as_bytes().to_vec().into_boxed_slice()).collect();
    let stop_ids: Vec<u32> = (raw.len() as u32..(raw.len() + stop.len()) as u32).collect();
    raw.extend(stop.iter().map(|t| t.as_bytes().to_vec().into_boxed_slice()));
    TokenizerInfo::new(raw, VocabType::Raw, false, stop_ids, vec![]).unwrap()
}

#[test]
fn s1_empty_json_object() {
    let grammar = Grammar::parse("root ::= \"{\" ws \"}\"\nws ::= [ \\t\\n]*").unwrap();
    let tok = tokenizer(&["{", "}", " ", ","], &[""]);
    let eos = 4u32;
    let compiled = GrammarCompiler::default().compile(grammar, tok);
    let mut matcher = Matcher::new(compiled.clone(), MatcherOptions::default()).unwrap();

    assert!(matcher.accept_string(b"{").unwrap());
    assert!(!matcher.can_terminate());

    let mut mask = TokenBitmask::allocate(compiled.vocab_size());
    matcher.fill_next_token_bitmask(&mut mask).unwrap();
    assert!(mask.get(1), "'}' should be admissible (ws may be empty)");
    assert!(mask.get(2), "' ' should be admissible as part of ws");
    assert!(!mask.get(3), "',' is not part of this grammar");

    assert!(matcher.accept_string(b"}").unwrap());
    assert!(matcher.can_terminate());
    assert!(!matcher.is_terminated());

    assert!(matcher.accept_token(eos).unwrap());
    assert!(matcher.is_terminated());
}

#[test]
fn s2_quantifier_bounds() {
    let grammar = Grammar::parse("root ::= [a-z]{2,3}").unwrap();
    let tok = tokenizer(&["a", "z"], &[""]);
    let eos = 2u32;
    let compiled = GrammarCompiler::default().compile(grammar, tok);
    let mut matcher = Matcher::new(compiled.clone(), MatcherOptions::default()).unwrap();

    let mut mask = TokenBitmask::allocate(compiled.vocab_size());

    assert!(matcher.accept_string(b"a").unwrap());
    assert!(!matcher.can_terminate(), "below the minimum repeat count");

    assert!(matcher.accept_string(b"a").unwrap());
    assert!(matcher.can_terminate(), "at the Ready phase, the quantifier may already exit");
    matcher.fill_next_token_bitmask(&mut mask).unwrap();
    assert!(mask.get(0) && mask.get(1), "both letters still admissible at the Ready phase");
    assert!(mask.get(eos), "Ready phase may also terminate");

    assert!(matcher.accept_string(b"a").unwrap());
    assert!(matcher.can_terminate());
    matcher.fill_next_token_bitmask(&mut mask).unwrap();
    assert!(!mask.get(0) && !mask.get(1), "AtMax must exit, letters no longer admissible");
    assert!(mask.get(eos));

    assert!(!matcher.accept_token(0).unwrap(), "a fourth letter exceeds the {{2,3}} bound");
    assert!(matcher.can_terminate(), "rejected accept must not mutate state");
}

#[test]
fn s3_lookahead_gates_the_following_literal() {
    // Lookahead assertions must be the trailing element of a sequence, so
    // the gated continuation is expressed through a separate rule the
    // caller resumes into once the lookahead is checked.
    let grammar = Grammar::parse("root ::= first \"b\"\nfirst ::= \"a\" (=\"b\")").unwrap();
    let tok = tokenizer(&["a", "b"], &[]);
    let compiled = GrammarCompiler::default().compile(grammar, tok);

    let mut rejecting = Matcher::new(compiled.clone(), MatcherOptions::default()).unwrap();
    assert!(!rejecting.accept_string(b"aa").unwrap());

    let mut accepting = Matcher::new(compiled, MatcherOptions::default()).unwrap();
    assert!(accepting.accept_string(b"ab").unwrap());
    assert!(accepting.can_terminate());
}

#[test]
fn s4_rollback_reaches_an_equivalent_state() {
    let grammar = Grammar::parse("root ::= [a-z]+").unwrap();
    let tok = tokenizer(&["a", "b", "c", "x"], &[]);
    let compiled = GrammarCompiler::default().compile(grammar, tok);
    let options = MatcherOptions { max_rollback_tokens: 3, ..Default::default() };

    let mut matcher = Matcher::new(compiled.clone(), options.clone()).unwrap();
    assert!(matcher.accept_token(0).unwrap()); // "a"
    assert!(matcher.accept_token(1).unwrap()); // "b"
    assert!(matcher.accept_token(2).unwrap()); // "c"
    matcher.rollback(2).unwrap();
    assert!(matcher.accept_token(3).unwrap()); // "x"
    assert_eq!(matcher.accepted_token_ids().collect::<Vec<_>>(), vec![0, 3]);

    let mut reference = Matcher::new(compiled, options).unwrap();
    assert!(reference.accept_token(0).unwrap());
    assert!(reference.accept_token(3).unwrap());

    let mut mask_a = TokenBitmask::allocate(4);
    let mut mask_b = TokenBitmask::allocate(4);
    matcher.fill_next_token_bitmask(&mut mask_a).unwrap();
    reference.fill_next_token_bitmask(&mut mask_b).unwrap();
    assert_eq!(mask_a, mask_b);
}

#[test]
fn s5_inverted_char_class_is_a_parse_error() {
    let err = Grammar::parse("root ::= [Z-A];").unwrap_err();
    assert!(err.reason().contains("lower bound is larger than upper bound"));
    assert_eq!(err.line(), 1);
    assert_eq!(err.column(), 14);
}

#[test]
fn s6_duplicate_rule_definition_is_a_parse_error() {
    let err = Grammar::parse("root ::= \"a\";\nroot ::= \"b\";").unwrap_err();
    assert!(err.reason().contains("defined multiple times"));
    assert_eq!(err.line(), 2);
    assert_eq!(err.column(), 9);
}
