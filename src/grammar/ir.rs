//! Intermediate representation for grammars after parsing and lowering.
//!
//! A [`Grammar`] is a flat table of [`Rule`]s. Parenthesized groups and
//! quantified sub-expressions are lowered into synthetic rules during
//! parsing, so every [`Element`] that appears in a [`Sequence`] is one of a
//! small closed set of shapes that the compiler and matcher can address
//! uniformly as `(rule, alt, element index)`.

use ahash::AHashMap;
use std::fmt;

/// Index of a rule within a [`Grammar`]'s rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct RuleId(pub u32);

/// Index of an interned character class within a [`Grammar`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ClassId(pub u32);

/// A set of Unicode scalar value ranges, optionally negated.
///
/// Ranges are kept sorted and non-overlapping by construction
/// ([`CharClass::normalize`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct CharClass {
    pub ranges: Vec<(u32, u32)>,
    pub negated: bool,
}

impl CharClass {
    pub fn new(mut ranges: Vec<(u32, u32)>, negated: bool) -> Self {
        ranges.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(ranges.len());
        for (lo, hi) in ranges {
            if let Some(last) = merged.last_mut() {
                if lo <= last.1.saturating_add(1) {
                    last.1 = last.1.max(hi);
                    continue;
                }
            }
            merged.push((lo, hi));
        }
        CharClass { ranges: merged, negated }
    }

    /// Whether the class (after accounting for negation) contains `cp`.
    pub fn contains(&self, cp: u32) -> bool {
        let found = self
            .ranges
            .binary_search_by(|(lo, hi)| {
                if cp < *lo {
                    std::cmp::Ordering::Greater
                } else if cp > *hi {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok();
        found != self.negated
    }
}

/// An atomic or composite element inside a [`Sequence`].
///
/// `Literal` and `Class` are inline byte/codepoint matchers. `Ref` calls
/// into another rule. `Quantified` always wraps a [`RuleId`]: both
/// parenthesized groups and the repeated body of a quantifier are lowered
/// into synthetic rules by the parser, so there is never a need to address
/// an arbitrarily nested sub-tree at match time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Element {
    Literal(Box<[u8]>),
    Class(ClassId),
    Ref(RuleId),
    /// `lo` is the minimum repetition count, `hi` the maximum (`None` = unbounded).
    Quantified(RuleId, u32, Option<u32>),
    Empty,
}

/// One alternative of a rule's body: a sequence of elements plus an
/// optional lookahead assertion.
///
/// The lookahead, when present, references a synthetic rule (itself a
/// disjunction of sequences) that must admit the bytes immediately
/// following this sequence without those bytes being consumed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Sequence {
    pub elements: Vec<Element>,
    pub lookahead: Option<RuleId>,
}

impl Sequence {
    pub fn empty() -> Self {
        Sequence { elements: vec![Element::Empty], lookahead: None }
    }
}

/// A named rule: a disjunction of [`Sequence`]s.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rule {
    pub name: Box<str>,
    pub body: Vec<Sequence>,
    /// `true` for rules synthesized while lowering groups/quantifiers; such
    /// rules have no surface-syntax name and are never printed on their own.
    pub synthetic: bool,
}

/// A fully parsed and lowered grammar: a flat rule table plus the id of
/// the root rule.
#[derive(Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Grammar {
    pub rules: Vec<Rule>,
    pub classes: Vec<CharClass>,
    pub root: RuleId,
    #[serde(skip)]
    name_to_id: AHashMap<Box<str>, RuleId>,
}

impl Grammar {
    pub(crate) fn new(rules: Vec<Rule>, classes: Vec<CharClass>, root: RuleId) -> Self {
        let mut name_to_id = AHashMap::default();
        for (i, r) in rules.iter().enumerate() {
            if !r.synthetic {
                name_to_id.insert(r.name.clone(), RuleId(i as u32));
            }
        }
        Grammar { rules, classes, root, name_to_id }
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id.0 as usize]
    }

    pub fn class(&self, id: ClassId) -> &CharClass {
        &self.classes[id.0 as usize]
    }

    pub fn rule_id_by_name(&self, name: &str) -> Option<RuleId> {
        self.name_to_id.get(name).copied()
    }

    pub fn root_rule(&self) -> &Rule {
        self.rule(self.root)
    }
}

impl fmt::Debug for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grammar")
            .field("root", &self.root)
            .field("rules", &self.rules.len())
            .field("classes", &self.classes.len())
            .finish()
    }
}

/// Coarse bucket for a quantifier's repetition counter, used as part of a
/// cache-addressable [`Position`]. The exact integer counter only matters
/// at runtime for deciding whether the loop may continue (tracked by the
/// matcher's stack frame); for mask-cache purposes only the region the
/// counter falls in changes local behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum QuantPhase {
    /// Not applicable: the element at this position isn't `Quantified`.
NotApplicable,
    /// `k < lo`: must continue, may not exit yet.
    Under,
    /// `lo <= k < hi` (or `hi` unbounded): may continue or exit.
    Ready,
    /// `k >= hi`: must exit.
    AtMax,
}

/// A cache-addressable location inside a compiled grammar: a specific
/// element of a specific alternative of a specific rule, plus the
/// quantifier phase when that element is `Quantified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub rule: RuleId,
    pub alt: u16,
    pub elem: u32,
    pub phase: QuantPhase,
}

impl Position {
    pub fn start(rule: RuleId, alt: u16) -> Self {
        Position { rule, alt, elem: 0, phase: QuantPhase::NotApplicable }
    }
}
