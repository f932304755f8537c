//! The pushdown matcher (component D): consumes bytes against a
//! [`CompiledGrammar`], tracking every simultaneously-valid derivation as a
//! set of stacks, and fills per-step token bitmasks for constrained
//! decoding.
//!
//! A grammar can be ambiguous, so a single input prefix may be consistent
//! with more than one stack of open rule calls at once. The matcher tracks
//! the whole set (an NFA-over-pushdown-configurations simulation) rather
//! than picking one derivation early and risking having to backtrack past
//! already-emitted tokens.

use std::collections::VecDeque;

use ahash::AHashSet;

use crate::bitmask::{BitmaskOp, TokenBitmask};
use crate::compiler::CompiledGrammar;
use crate::config::{self, MatcherOptions};
use crate::grammar::{Element, Grammar, Position, QuantPhase, RuleId, Sequence};
use crate::tokenizer_info::TokenKind;
use crate::utils::{utf8_prefix, Utf8Prefix};

/// One open call frame: the rule and alternative currently being matched,
/// which element of that alternative is active, and (only meaningful when
/// that element is `Quantified`) how many times its callee has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Frame {
    rule: RuleId,
    alt: u16,
    elem: u32,
    quant_count: u32,
}

impl Frame {
    fn start(rule: RuleId, alt: u16) -> Self {
        Frame { rule, alt, elem: 0, quant_count: 0 }
    }
}

/// A call stack from the root down to the frame currently consuming
/// bytes. An empty stack means the root sequence has been fully matched.
type Stack = Vec<Frame>;

/// How far a configuration has progressed into its current leaf element.
/// Tracked separately from `Stack` because a `Literal`/`Class` element can
/// span a token boundary, so this must survive between `accept_token`
/// calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum LeafProgress {
    Literal { consumed: u32 },
    Class { partial: Vec<u8> },
    /// The stack is empty: the root has been fully matched.
    Accepted,
}

type Configuration = (Stack, LeafProgress);
type ConfigSet = AHashSet<Configuration>;

/// Errors a [`Matcher`] can report.
#[derive(Debug, thiserror::Error)]
pub enum MatcherError {
    /// Grammar expansion (epsilon-closure over refs/quantifiers) exceeded
    /// [`config::max_recursion_depth`]; likely an unbounded-empty-match
    /// cycle in the grammar.
    #[error("grammar expansion exceeded the recursion depth limit ({0})")]
    RecursionDepthExceeded(usize),
    /// Asked to roll back more tokens than have been accepted (within
    /// `max_rollback_tokens`).
    #[error("cannot roll back {requested} tokens, only {available} are available")]
    InvalidRollback { requested: usize, available: usize },
    /// `accept_token`/bitmask lookup referenced a token id outside the
    /// compiled vocabulary.
    #[error("token id {0} is not part of the compiled vocabulary")]
    InvalidTokenId(u32),
}

/// A live grammar-matching session over one [`CompiledGrammar`].
///
/// Not `Send`/`Sync`-restricted beyond its fields; build one matcher per
/// concurrent decoding sequence, sharing the same `CompiledGrammar`.
pub struct Matcher {
    compiled: CompiledGrammar,
    options: MatcherOptions,
    frontier: ConfigSet,
    /// Frontier snapshots taken immediately before each accepted step,
    /// newest last, capped at `options.max_rollback_tokens` entries.
    history: Vec<ConfigSet>,
    log: Vec<Option<u32>>,
    terminated: bool,
    stop_token_ids: AHashSet<u32>,
    /// Precomputed bitmask for `options.override_stop_tokens`, if set;
    /// `None` means use the compiled grammar's own stop bitmask.
    stop_bitmask_override: Option<TokenBitmask>,
}

impl Matcher {
    pub fn new(compiled: CompiledGrammar, options: MatcherOptions) -> Result<Self, MatcherError> {
        let frontier = initial_configurations(compiled.grammar())?;
        let stop_token_ids: AHashSet<u32> = match &options.override_stop_tokens {
            Some(ids) => ids.iter().copied().collect(),
            None => compiled.tokenizer().stop_token_ids().iter().copied().collect(),
        };
        let stop_bitmask_override = options.override_stop_tokens.as_ref().map(|ids| {
            let mut bm = TokenBitmask::allocate(compiled.vocab_size());
            for &id in ids {
                bm.set(id, true);
            }
            bm
        });
        Ok(Matcher {
            compiled,
            options,
            frontier,
            history: Vec::new(),
            log: Vec::new(),
            terminated: false,
            stop_token_ids,
            stop_bitmask_override,
        })
    }

    /// Attempts to accept `token_id`. Returns `Ok(false)` without mutating
    /// matcher state if the token is inconsistent with the grammar.
    ///
    /// Special tokens are never consumable. Stop tokens are never matched
    /// against grammar bytes: they're accepted (and terminate the matcher)
    /// only when the current frontier can already terminate, and never at
    /// all when `terminate_without_stop_token` is set, since in that mode
    /// termination happens implicitly and a stop token has nothing left to
    /// signal.
    pub fn accept_token(&mut self, token_id: u32) -> Result<bool, MatcherError> {
        let tokenizer = self.compiled.tokenizer();
        if tokenizer.token(token_id).is_none() {
            return Err(MatcherError::InvalidTokenId(token_id));
        }
        match tokenizer.token_kind(token_id) {
            TokenKind::Special => return Ok(false),
            TokenKind::Stop => {
                if self.options.terminate_without_stop_token || !self.can_terminate() {
                    return Ok(false);
                }
                self.commit(self.frontier.clone(), Some(token_id));
                return Ok(true);
            }
            TokenKind::Normal => {}
        }
        let bytes = tokenizer.token(token_id).expect("checked above").0.clone();
        match self.simulate(&bytes)? {
            Some(next) => {
                self.commit(next, Some(token_id));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Attempts to accept a raw byte string directly, bypassing the
    /// vocabulary (e.g. to apply a jump-forward string).
    pub fn accept_string(&mut self, bytes: &[u8]) -> Result<bool, MatcherError> {
        match self.simulate(bytes)? {
            Some(next) => {
                self.commit(next, None);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Fills `out` with the bitmask of tokens admissible as the next
    /// token from the matcher's current state, OR'ing in stop tokens when
    /// the state admits termination. Special tokens are always left
    /// cleared; they're never proposable. Returns whether the caller needs
    /// to actually apply `out` to logits: `false` iff every token ended up
    /// admitted, in which case masking would be a no-op.
    pub fn fill_next_token_bitmask(&self, out: &mut TokenBitmask) -> Result<bool, MatcherError> {
        out.clear();
        let tokenizer = self.compiled.tokenizer();
        let fast_pos = self.single_fresh_position();
        for id in 0..tokenizer.vocab_size() as u32 {
            if tokenizer.token_kind(id) != TokenKind::Normal {
                continue;
            }
            if let Some(pos) = fast_pos {
                if self.compiled.mask_cache().always_accept(pos).is_some_and(|bm| bm.get(id)) {
                    out.set(id, true);
                    continue;
                }
                if self.compiled.mask_cache().always_reject(pos).is_some_and(|bm| bm.get(id)) {
                    continue;
                }
            }
            let bytes = &tokenizer.token(id).expect("id < vocab_size").0;
            if self.accepts_bytes(bytes)? {
                out.set(id, true);
            }
        }
        if self.can_terminate() {
            match &self.stop_bitmask_override {
                Some(bm) => out.apply_inplace(bm, BitmaskOp::Or),
                None => out.apply_inplace(self.compiled.stop_bitmask(), BitmaskOp::Or),
            }
        }
        Ok(out.count_ones() != out.vocab_size())
    }

    /// Returns the longest byte string the grammar is currently forced to
    /// emit next, or empty if more than one continuation remains possible.
    ///
    /// Only looks as far as the end of the current literal element; it
    /// does not chain across a subsequent forced `Ref`, which would
    /// require re-deriving a fresh forced-literal search after each hop.
    pub fn find_jump_forward_string(&self) -> Vec<u8> {
        if self.frontier.len() != 1 {
            return Vec::new();
        }
        let (stack, progress) = self.frontier.iter().next().expect("len checked above");
        let LeafProgress::Literal { consumed } = progress else { return Vec::new() };
        let Some(top) = stack.last() else { return Vec::new() };
        let rule = self.compiled.grammar().rule(top.rule);
        match &rule.body[top.alt as usize].elements[top.elem as usize] {
            Element::Literal(bytes) => bytes[*consumed as usize..].to_vec(),
            _ => Vec::new(),
        }
    }

    /// Undoes the last `n` accepted steps (tokens or raw strings),
    /// restoring the frontier to what it was before them.
    pub fn rollback(&mut self, n: usize) -> Result<(), MatcherError> {
        if n == 0 {
            return Ok(());
        }
        if n > self.history.len() {
            return Err(MatcherError::InvalidRollback { requested: n, available: self.history.len() });
        }
        let idx = self.history.len() - n;
        self.frontier = self.history[idx].clone();
        self.history.truncate(idx);
        self.log.truncate(idx);
        self.terminated = false;
        Ok(())
    }

    pub fn reset(&mut self) -> Result<(), MatcherError> {
        self.frontier = initial_configurations(self.compiled.grammar())?;
        self.history.clear();
        self.log.clear();
        self.terminated = false;
        Ok(())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Whether the current frontier includes a configuration where the
    /// root sequence has been fully matched.
    pub fn can_terminate(&self) -> bool {
        self.frontier.iter().any(|(stack, _)| stack.is_empty())
    }

    pub fn accepted_token_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.log.iter().filter_map(|t| *t)
    }

    fn commit(&mut self, next: ConfigSet, token_id: Option<u32>) {
        if self.options.max_rollback_tokens > 0 {
            self.history.push(std::mem::replace(&mut self.frontier, next));
            self.log.push(token_id);
            if self.history.len() > self.options.max_rollback_tokens {
                self.history.remove(0);
                self.log.remove(0);
            }
        } else {
            self.frontier = next;
        }
        if let Some(id) = token_id {
            if self.stop_token_ids.contains(&id) {
                self.terminated = true;
            }
        }
        if self.options.terminate_without_stop_token && self.can_terminate() {
            self.terminated = true;
        }
    }

    fn accepts_bytes(&self, bytes: &[u8]) -> Result<bool, MatcherError> {
        Ok(self.simulate(bytes)?.is_some())
    }

    /// Runs `bytes` byte-by-byte against the current frontier, returning
    /// the resulting frontier (without committing it) or `None` if every
    /// configuration is eliminated.
    fn simulate(&self, bytes: &[u8]) -> Result<Option<ConfigSet>, MatcherError> {
        let grammar = self.compiled.grammar();
        let mut in_progress: ConfigSet = self
            .frontier
            .iter()
            .filter(|(_, p)| !matches!(p, LeafProgress::Accepted))
            .cloned()
            .collect();

        for (i, &byte) in bytes.iter().enumerate() {
            if in_progress.is_empty() {
                return Ok(None);
            }
            let mut next: ConfigSet = AHashSet::default();
            let mut completed: Vec<Stack> = Vec::new();
            for (stack, progress) in &in_progress {
                if matches!(progress, LeafProgress::Accepted) {
                    // A derivation that already completed the root sequence
                    // cannot consume further bytes; it simply drops out.
                    continue;
                }
                match step_byte(grammar, stack, progress, byte) {
                    ByteStep::Continue(p) => {
                        next.insert((stack.clone(), p));
                    }
                    ByteStep::Done => completed.push(stack.clone()),
                    ByteStep::Reject => {}
                }
            }
            let lookahead_ctx = &bytes[i + 1..];
            for mut stack in completed {
                {
                    let top = stack.last_mut().expect("completed leaf stacks are never empty");
                    top.elem += 1;
                    top.quant_count = 0;
                }
                for closed in expand_epsilon(stack, grammar, lookahead_ctx)? {
                    let progress = fresh_progress_for(grammar, &closed);
                    next.insert((closed, progress));
                }
            }
            if next.is_empty() {
                return Ok(None);
            }
            in_progress = next;
        }
        Ok(Some(in_progress))
    }

    /// If the frontier is exactly one non-accepted configuration sitting
    /// at the start of its leaf element, its cache-addressable position
    /// (for the adaptive token mask cache fast path).
    fn single_fresh_position(&self) -> Option<Position> {
        if self.frontier.len() != 1 {
            return None;
        }
        let (stack, progress) = self.frontier.iter().next()?;
        if !is_fresh(progress) {
            return None;
        }
        let top = stack.last()?;
        Some(position_of(top, self.compiled.grammar()))
    }
}

fn is_fresh(progress: &LeafProgress) -> bool {
    match progress {
        LeafProgress::Literal { consumed } => *consumed == 0,
        LeafProgress::Class { partial } => partial.is_empty(),
        LeafProgress::Accepted => false,
    }
}

fn position_of(frame: &Frame, grammar: &Grammar) -> Position {
    let rule = grammar.rule(frame.rule);
    let seq = &rule.body[frame.alt as usize];
    let phase = match seq.elements.get(frame.elem as usize) {
        Some(Element::Quantified(_, lo, hi)) => {
            if frame.quant_count < *lo {
                QuantPhase::Under
            } else if hi.is_some_and(|h| frame.quant_count >= h) {
                QuantPhase::AtMax
            } else {
                QuantPhase::Ready
            }
        }
        _ => QuantPhase::NotApplicable,
    };
    Position { rule: frame.rule, alt: frame.alt, elem: frame.elem, phase }
}

fn fresh_progress_for(grammar: &Grammar, stack: &Stack) -> LeafProgress {
    let Some(top) = stack.last() else { return LeafProgress::Accepted };
    let rule = grammar.rule(top.rule);
    match &rule.body[top.alt as usize].elements[top.elem as usize] {
        Element::Literal(_) => LeafProgress::Literal { consumed: 0 },
        Element::Class(_) => LeafProgress::Class { partial: Vec::new() },
        other => unreachable!("epsilon closure only stops at Literal/Class leaves, got {other:?}"),
    }
}

enum ByteStep {
    Continue(LeafProgress),
    Done,
    Reject,
}

fn step_byte(grammar: &Grammar, stack: &Stack, progress: &LeafProgress, byte: u8) -> ByteStep {
    let top = stack.last().expect("byte-stepping never applies to an accepted configuration");
    let rule = grammar.rule(top.rule);
    let elem = &rule.body[top.alt as usize].elements[top.elem as usize];
    match (elem, progress) {
        (Element::Literal(lit), LeafProgress::Literal { consumed }) => {
            let consumed = *consumed as usize;
            if lit[consumed] != byte {
                return ByteStep::Reject;
            }
            if consumed + 1 == lit.len() {
                ByteStep::Done
            } else {
                ByteStep::Continue(LeafProgress::Literal { consumed: consumed as u32 + 1 })
            }
        }
        (Element::Class(cid), LeafProgress::Class { partial }) => {
            let mut buf = partial.clone();
            buf.push(byte);
            match utf8_prefix(&buf) {
                Utf8Prefix::Invalid => ByteStep::Reject,
                Utf8Prefix::Partial => ByteStep::Continue(LeafProgress::Class { partial: buf }),
                Utf8Prefix::Complete(cp, _) => {
                    if grammar.class(*cid).contains(cp) {
                        ByteStep::Done
                    } else {
                        ByteStep::Reject
                    }
                }
            }
        }
        _ => unreachable!("leaf progress kind always matches the element it was derived from"),
    }
}

enum StepResult {
    Leaf(Stack),
    Accepted,
    /// Zero or more continuations; empty means this path is dead (e.g. a
    /// failed lookahead assertion).
    Branch(Vec<Stack>),
}

/// Structural epsilon-closure step: advances past `Empty`/`Ref`/
/// `Quantified` elements without consuming bytes, stopping at the next
/// `Literal`/`Class` leaf, at full completion (`Accepted`), or branching
/// on ambiguity.
fn step(mut stack: Stack, grammar: &Grammar, lookahead_ctx: &[u8]) -> StepResult {
    let top = *stack.last().expect("step is never called on an empty stack");
    let rule = grammar.rule(top.rule);
    let seq = &rule.body[top.alt as usize];

    if top.elem as usize == seq.elements.len() {
        if let Some(la_rule) = seq.lookahead {
            if !lookahead_admits(grammar, la_rule, lookahead_ctx) {
                return StepResult::Branch(Vec::new());
            }
        }
        stack.pop();
        let Some(caller) = stack.last_mut() else { return StepResult::Accepted };
        let caller_rule = grammar.rule(caller.rule);
        match &caller_rule.body[caller.alt as usize].elements[caller.elem as usize] {
            Element::Ref(_) => {
                caller.elem += 1;
                caller.quant_count = 0;
            }
            Element::Quantified(..) => caller.quant_count += 1,
            other => unreachable!("only Ref/Quantified elements push frames, got {other:?}"),
        }
        return StepResult::Branch(vec![stack]);
    }

    match &seq.elements[top.elem as usize] {
        Element::Literal(_) | Element::Class(_) => StepResult::Leaf(stack),
        Element::Empty => {
            stack.last_mut().expect("non-empty stack").elem += 1;
            StepResult::Branch(vec![stack])
        }
        Element::Ref(rule_id) => {
            let callee = grammar.rule(*rule_id);
            let branches = (0..callee.body.len())
                .map(|alt| {
                    let mut s = stack.clone();
                    s.push(Frame::start(*rule_id, alt as u16));
                    s
                })
                .collect();
            StepResult::Branch(branches)
        }
        Element::Quantified(rule_id, lo, hi) => {
            let mut branches = Vec::new();
            if hi.map_or(true, |h| top.quant_count < h) {
                let callee = grammar.rule(*rule_id);
                for alt in 0..callee.body.len() {
                    let mut s = stack.clone();
                    s.push(Frame::start(*rule_id, alt as u16));
                    branches.push(s);
                }
            }
            if top.quant_count >= *lo {
                let mut s = stack.clone();
                let f = s.last_mut().expect("non-empty stack");
                f.elem += 1;
                f.quant_count = 0;
                branches.push(s);
            }
            StepResult::Branch(branches)
        }
    }
}

/// Breadth-first epsilon-closure of `seed`, bounded by
/// [`config::max_recursion_depth`] to guard against grammars that can
/// match the empty string through unbounded recursion.
fn expand_epsilon(seed: Stack, grammar: &Grammar, lookahead_ctx: &[u8]) -> Result<AHashSet<Stack>, MatcherError> {
    let mut result: AHashSet<Stack> = AHashSet::default();
    let mut seen: AHashSet<Stack> = AHashSet::default();
    let mut queue = VecDeque::new();
    queue.push_back(seed);
    let limit = config::max_recursion_depth();
    while let Some(stack) = queue.pop_front() {
        if !seen.insert(stack.clone()) {
            continue;
        }
        if seen.len() > limit {
            return Err(MatcherError::RecursionDepthExceeded(limit));
        }
        match step(stack, grammar, lookahead_ctx) {
            StepResult::Leaf(s) => {
                result.insert(s);
            }
            StepResult::Accepted => {
                result.insert(Vec::new());
            }
            StepResult::Branch(next) => queue.extend(next),
        }
    }
    Ok(result)
}

fn initial_configurations(grammar: &Grammar) -> Result<ConfigSet, MatcherError> {
    let root_rule = grammar.root_rule();
    let mut stacks: AHashSet<Stack> = AHashSet::default();
    for alt in 0..root_rule.body.len() {
        let seed = vec![Frame::start(grammar.root, alt as u16)];
        stacks.extend(expand_epsilon(seed, grammar, &[])?);
    }
    Ok(stacks
        .into_iter()
        .map(|s| {
            let progress = fresh_progress_for(grammar, &s);
            (s, progress)
        })
        .collect())
}

/// Approximates whether `bytes` is a plausible prefix of the language of
/// `rule_id`, used to check a lookahead assertion against the bytes
/// immediately following it within the token currently being matched.
///
/// This is a containment check, not a full parse: it does not thread a
/// continuation past a nested rule reference, so a lookahead alternative
/// combining a `Ref` with trailing elements is checked less precisely
/// than a complete parser would. Running out of bytes, or out of
/// recursion budget, is treated as "plausible" (optimistic), since the
/// matcher cannot see bytes beyond the current token.
fn lookahead_admits(grammar: &Grammar, rule_id: RuleId, bytes: &[u8]) -> bool {
    let mut budget = config::max_recursion_depth();
    grammar.rule(rule_id).body.iter().any(|seq| lookahead_admits_sequence(grammar, seq, 0, bytes, &mut budget))
}

fn lookahead_admits_sequence(
    grammar: &Grammar,
    seq: &Sequence,
    mut elem_idx: usize,
    mut bytes: &[u8],
    budget: &mut usize,
) -> bool {
    loop {
        if *budget == 0 {
            return true;
        }
        *budget -= 1;
        if bytes.is_empty() || elem_idx == seq.elements.len() {
            return true;
        }
        match &seq.elements[elem_idx] {
            Element::Empty => elem_idx += 1,
            Element::Literal(lit) => {
                let n = lit.len().min(bytes.len());
                if lit[..n] != bytes[..n] {
                    return false;
                }
                if n < lit.len() {
                    return true;
                }
                bytes = &bytes[n..];
                elem_idx += 1;
            }
            Element::Class(cid) => match utf8_prefix(bytes) {
                Utf8Prefix::Invalid => return false,
                Utf8Prefix::Partial => return true,
                Utf8Prefix::Complete(cp, len) => {
                    if !grammar.class(*cid).contains(cp) {
                        return false;
                    }
                    bytes = &bytes[len..];
                    elem_idx += 1;
                }
            },
            Element::Ref(r) => {
                return grammar
                    .rule(*r)
                    .body
                    .iter()
                    .any(|sub| lookahead_admits_sequence(grammar, sub, 0, bytes, budget));
            }
            Element::Quantified(r, lo, hi) => {
                if *lo == 0 {
                    elem_idx += 1;
                    continue;
                }
                return hi.map_or(true, |h| h > 0)
                    && grammar
                        .rule(*r)
                        .body
                        .iter()
                        .any(|sub| lookahead_admits_sequence(grammar, sub, 0, bytes, budget));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::GrammarCompiler;
    use crate::tokenizer_info::{TokenizerInfo, VocabType};

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

    fn compiled(source: &str, vocab: &[&str]) -> CompiledGrammar {
        let g = Grammar::parse(source).unwrap();
        GrammarCompiler::default().compile(g, tokenizer(vocab))
    }

    fn compiled_with_stop_and_special(
        source: &str,
        normal: &[&str],
        stop: &[&str],
        special: &[&str],
    ) -> CompiledGrammar {
        let mut raw: Vec<Box<[u8]>> = normal.iter().map(|t| t.as_bytes().to_vec().into_boxed_slice()).collect();
        let stop_ids: Vec<u32> = (raw.len() as u32..(raw.len() + stop.len()) as u32).collect();
        raw.extend(stop.iter().map(|t| t.as_bytes().to_vec().into_boxed_slice()));
        let special_ids: Vec<u32> = (raw.len() as u32..(raw.len() + special.len()) as u32).collect();
        raw.extend(special.iter().map(|t| t.as_bytes().to_vec().into_boxed_slice()));
        let tok = TokenizerInfo::new(raw, VocabType::Raw, false, stop_ids, special_ids).unwrap();
        let g = Grammar::parse(source).unwrap();
        GrammarCompiler::default().compile(g, tok)
    }

    #[test]
    fn accepts_exact_literal_end_to_end() {
        let c = compiled(r#"root ::= "ab""#, &["a", "b", "x"]);
        let mut m = Matcher::new(c, MatcherOptions::default()).unwrap();
        assert!(m.accept_string(b"a").unwrap());
        assert!(!m.can_terminate());
        assert!(m.accept_string(b"b").unwrap());
        assert!(m.can_terminate());
        assert!(!m.accept_string(b"x").unwrap());
    }

    #[test]
    fn quantifier_bounds_are_enforced() {
        let c = compiled("root ::= [a-z]{2,3}", &["a", "z"]);
        let mut m = Matcher::new(c, MatcherOptions::default()).unwrap();
        assert!(m.accept_string(b"a").unwrap());
        assert!(!m.can_terminate());
        assert!(m.accept_string(b"a").unwrap());
        assert!(m.can_terminate());
        assert!(m.accept_string(b"a").unwrap());
        assert!(m.can_terminate());
        assert!(!m.accept_string(b"a").unwrap());
    }

    #[test]
    fn lookahead_assertion_admits_consistent_continuation() {
        let c = compiled("root ::= first \"b\"\nfirst ::= \"a\" (=\"b\")", &["a", "b"]);
        let mut m = Matcher::new(c, MatcherOptions::default()).unwrap();
        // "first" only finishes matching "a" once the byte immediately
        // following it is consistent with the lookahead; here it is ('b',
        // which root then separately consumes as its own next literal).
        assert!(m.accept_string(b"ab").unwrap());
        assert!(m.can_terminate());
    }

    #[test]
    fn lookahead_assertion_rejects_inconsistent_continuation() {
        let c = compiled("root ::= first \"z\"\nfirst ::= \"a\" (=\"b\")", &["a", "z"]);
        let mut m = Matcher::new(c, MatcherOptions::default()).unwrap();
        // The byte actually following "a" is 'z', inconsistent with the
        // lookahead's requirement that it be 'b', so the only alternative
        // is pruned.
        assert!(!m.accept_string(b"az").unwrap());
    }

    #[test]
    fn lookahead_without_following_bytes_is_optimistic() {
        let c = compiled(r#"root ::= "a" (="b")"#, &["a"]);
        let mut m = Matcher::new(c, MatcherOptions::default()).unwrap();
        assert!(m.accept_string(b"a").unwrap());
        assert!(m.can_terminate());
    }

    #[test]
    fn rollback_restores_prior_state() {
        let c = compiled(r#"root ::= "ab""#, &["a", "b"]);
        let mut m = Matcher::new(c, MatcherOptions { max_rollback_tokens: 3, ..Default::default() }).unwrap();
        assert!(m.accept_string(b"a").unwrap());
        assert!(!m.can_terminate());
        m.rollback(1).unwrap();
        assert!(m.accept_string(b"a").unwrap());
        assert!(m.accept_string(b"b").unwrap());
        assert!(m.can_terminate());
    }

    #[test]
    fn rollback_beyond_history_is_an_error() {
        let c = compiled(r#"root ::= "a""#, &["a"]);
        let mut m = Matcher::new(c, MatcherOptions::default()).unwrap();
        assert!(matches!(m.rollback(1), Err(MatcherError::InvalidRollback { .. })));
    }

    #[test]
    fn jump_forward_string_returns_forced_literal_remainder() {
        let c = compiled(r#"root ::= "hello""#, &["h", "e"]);
        let m = Matcher::new(c, MatcherOptions::default()).unwrap();
        assert_eq!(m.find_jump_forward_string(), b"hello".to_vec());
    }

    #[test]
    fn special_tokens_are_never_admissible() {
        let c = compiled_with_stop_and_special(r#"root ::= "a""#, &["a"], &[], &["<sep>"]);
        let m = Matcher::new(c.clone(), MatcherOptions::default()).unwrap();
        let mut mask = TokenBitmask::allocate(c.vocab_size());
        m.fill_next_token_bitmask(&mut mask).unwrap();
        assert!(!mask.get(1), "the special token must stay masked out");
    }

    #[test]
    fn special_tokens_are_never_accepted() {
        let c = compiled_with_stop_and_special(r#"root ::= "a""#, &["a"], &[], &["<sep>"]);
        let mut m = Matcher::new(c, MatcherOptions::default()).unwrap();
        assert!(!m.accept_token(1).unwrap());
        assert!(!m.can_terminate());
    }

    #[test]
    fn stop_token_is_rejected_before_the_grammar_can_terminate() {
        let c = compiled_with_stop_and_special(r#"root ::= "ab""#, &["a", "b"], &[""], &[]);
        let mut m = Matcher::new(c, MatcherOptions::default()).unwrap();
        assert!(!m.accept_token(2).unwrap(), "root hasn't matched yet");
        assert!(!m.is_terminated());
        assert!(m.accept_string(b"ab").unwrap());
        assert!(m.accept_token(2).unwrap());
        assert!(m.is_terminated());
    }

    #[test]
    fn stop_token_is_never_consumable_under_terminate_without_stop_token() {
        let c = compiled_with_stop_and_special(r#"root ::= "a""#, &["a"], &[""], &[]);
        let options = MatcherOptions { terminate_without_stop_token: true, ..Default::default() };
        let mut m = Matcher::new(c, options).unwrap();
        assert!(m.accept_string(b"a").unwrap());
        assert!(m.is_terminated(), "termination happens implicitly once the root can terminate");
        assert!(!m.accept_token(1).unwrap(), "a stop token has nothing left to signal here");
    }

    #[test]
    fn fill_next_token_bitmask_matches_manual_filter() {
        let c = compiled(r#"root ::= "cat" | "car""#, &["c", "ca", "cat", "car", "dog"]);
        let m = Matcher::new(c.clone(), MatcherOptions::default()).unwrap();
        let mut mask = TokenBitmask::allocate(c.vocab_size());
        assert!(m.fill_next_token_bitmask(&mut mask).unwrap());
        let tok = c.tokenizer();
        for id in 0..c.vocab_size() as u32 {
            let expected = matches!(tok.token(id).unwrap().0.as_ref(), b"c" | b"ca" | b"cat" | b"car");
            assert_eq!(mask.get(id), expected, "token {:?}", tok.token(id));
        }
    }
}
