//! Parser for the EBNF-like grammar source format.
//!
//! Parsing happens in two passes: [`parse_source`] builds a surface AST
//! with `nom` combinators, then [`lower`] desugars groups and quantified
//! sub-expressions into synthetic rules, producing the flat [`super::ir::Grammar`]
//! that the rest of the crate addresses by `(rule, alt, element)`.

use ahash::AHashMap;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{char as nchar, digit1};
use nom::combinator::{map, opt, value};
use nom::multi::{many0, many1, separated_list1};
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;
use thiserror::Error;

use super::ir::{CharClass, Element, Grammar, Rule, RuleId, Sequence};

/// A parse failure with a 1-indexed line and column and a human-readable reason.
///
/// Field order mirrors how grammar errors are reported: line, column, message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}:{1}: {2}")]
pub struct GrammarParseError(pub usize, pub usize, pub String);

impl GrammarParseError {
    fn new(message: impl Into<String>, line: usize, col: usize) -> Self {
        GrammarParseError(line, col, message.into())
    }

    pub fn line(&self) -> usize {
        self.0
    }

    pub fn column(&self) -> usize {
        self.1
    }

    pub fn reason(&self) -> &str {
        &self.2
    }
}

// ---------------------------------------------------------------------
// Surface AST (pre-lowering)
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
enum AstElement {
    Literal(Vec<u8>),
    /// Raw (lo, hi) ranges plus one end-offset per range (chars consumed
    /// from the rule body's start up to that range, for per-range error
    /// columns) and whether the class is negated. Kept unnormalized here
    /// because [`CharClass::new`] sorts and merges ranges, which would
    /// desync the offsets from their ranges.
    Class(Vec<(u32, u32)>, Vec<usize>, bool),
    /// Rule name plus the offset right after it, for "undefined rule" columns.
    RuleRef(String, usize),
    Group(Vec<AstSequence>),
    /// Offset right after the quantifier suffix, for range-error columns.
    Quantified(Box<AstElement>, u32, Option<u32>, usize),
    Empty,
}

#[derive(Debug, Clone)]
struct AstSequence {
    elements: Vec<AstElement>,
    lookahead: Option<Vec<AstSequence>>,
}

#[derive(Debug, Clone)]
struct AstRule {
    name: String,
    body: Vec<AstSequence>,
    line: usize,
    /// 1-based column right after the rule's `::=`, used for rule-level
    /// errors such as a duplicate definition.
    col: usize,
    /// 0-based column where the (trimmed) body text begins, used as the
    /// base for per-element error columns computed during lowering.
    body_col: usize,
}

/// Parses grammar source text into a lowered [`Grammar`] in one step.
pub fn parse_source(input: &str) -> Result<Grammar, GrammarParseError> {
    let rules = parse_rules(input)?;
    lower(rules)
}

fn parse_rules(input: &str) -> Result<Vec<AstRule>, GrammarParseError> {
    // Join continuation lines: a line is a continuation of the previous
    // logical rule if it does not itself start a new `name ::=` definition.
    let logical_lines = join_continuations(input);
    let mut rules = Vec::new();
    for (line_no, col_offset, text) in logical_lines {
        if text.trim().is_empty() {
            continue;
        }
        let (name, rest) = split_definition(text, line_no, col_offset)?;
        let header_col = col_offset + name_end_col(text);
        let body_col = header_col + (rest.len() - rest.trim_start().len());
        let body =
            parse_body(rest, line_no, header_col).map_err(|e| to_parse_error(e, line_no, header_col))?;
        rules.push(AstRule { name, body, line: line_no, col: header_col + 1, body_col });
    }
    Ok(rules)
}

fn name_end_col(text: &str) -> usize {
    text.find("::=").map(|i| i + 3).unwrap_or(0)
}

/// Groups physical lines into logical (line_number, column_offset, text)
/// triples: a physical line containing `::=` starts a new logical rule; any
/// other non-blank line is appended to the previous one.
fn join_continuations(input: &str) -> Vec<(usize, usize, String)> {
    let mut out: Vec<(usize, usize, String)> = Vec::new();
    for (i, raw) in input.lines().enumerate() {
        let line_no = i + 1;
        if raw.contains("::=") || out.is_empty() {
            out.push((line_no, 0, raw.to_string()));
        } else if raw.trim().is_empty() {
            continue;
        } else {
            if let Some(last) = out.last_mut() {
                last.2.push(' ');
                last.2.push_str(raw.trim());
            }
        }
    }
    out
}

fn split_definition(
    text: &str,
    line: usize,
    col_offset: usize,
) -> Result<(String, &str), GrammarParseError> {
    let idx = text.find("::=").ok_or_else(|| {
        GrammarParseError::new("expected `::=`", line, col_offset + text.len() + 1)
    })?;
    let name = text[..idx].trim().to_string();
    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(GrammarParseError::new("expected `::=`", line, col_offset + 1));
    }
    Ok((name, &text[idx + 3..]))
}

fn to_parse_error(e: nom::Err<nom::error::Error<&str>>, line: usize, col: usize) -> GrammarParseError {
    match e {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            GrammarParseError::new("malformed body", line, col + e.input.len() + 1)
        }
        nom::Err::Incomplete(_) => GrammarParseError::new("incomplete body", line, col + 1),
    }
}

type PResult<'a, O> = IResult<&'a str, O>;

fn parse_body(input: &str, line: usize, col: usize) -> Result<Vec<AstSequence>, GrammarParseError> {
    let trimmed = input.trim();
    let body_len = trimmed.len();
    let (rest, seqs) = disjunction(trimmed, body_len).map_err(|e| to_parse_error(e, line, col))?;
    if !rest.trim().is_empty() {
        return Err(GrammarParseError::new("trailing input after body", line, col + (trimmed.len() - rest.len()) + 1));
    }
    Ok(seqs)
}

fn ws(input: &str) -> PResult<&str> {
    take_while(|c: char| c.is_whitespace())(input)
}

fn disjunction(input: &str, body_len: usize) -> PResult<Vec<AstSequence>> {
    separated_list1(tuple((ws, nchar('|'), ws)), |i| sequence(i, body_len))(input)
}

fn sequence(input: &str, body_len: usize) -> PResult<AstSequence> {
    let (input, _) = ws(input)?;
    let (input, elements) = many1(preceded(ws, |i| quantified_element(i, body_len)))(input)?;
    let (input, lookahead) = opt(preceded(ws, |i| lookahead_assertion(i, body_len)))(input)?;
    Ok((input, AstSequence { elements, lookahead }))
}

fn lookahead_assertion(input: &str, body_len: usize) -> PResult<Vec<AstSequence>> {
    delimited(tag("(="), |i| disjunction(i, body_len), preceded(ws, nchar(')')))(input)
}

fn quantified_element(input: &str, body_len: usize) -> PResult<AstElement> {
    let (input, base) = base_element(input, body_len)?;
    let (input, quant) = opt(quantifier_suffix)(input)?;
    Ok(match quant {
        Some((lo, hi)) => {
            let offset = body_len - input.len();
            (input, AstElement::Quantified(Box::new(base), lo, hi, offset))
        }
        None => (input, base),
    })
}

fn quantifier_suffix(input: &str) -> PResult<(u32, Option<u32>)> {
    alt((
        value((0, None), nchar('*')),
        value((1, None), nchar('+')),
        value((0, Some(1)), nchar('?')),
        bounded_quantifier,
    ))(input)
}

fn bounded_quantifier(input: &str) -> PResult<(u32, Option<u32>)> {
    let (input, _) = nchar('{')(input)?;
    let (input, lo) = digit1(input)?;
    let (input, hi) = opt(preceded(nchar(','), opt(digit1)))(input)?;
    let (input, _) = nchar('}')(input)?;
    let lo: u32 = lo.parse().unwrap_or(0);
    let hi = match hi {
        None => Some(lo),
        Some(None) => None,
        Some(Some(h)) => Some(h.parse().unwrap_or(lo)),
    };
    Ok((input, (lo, hi)))
}

fn base_element(input: &str, body_len: usize) -> PResult<AstElement> {
    alt((
        literal_element,
        |i| class_element(i, body_len),
        |i| group_element(i, body_len),
        |i| rule_ref_element(i, body_len),
    ))(input)
}

fn rule_ref_element(input: &str, body_len: usize) -> PResult<AstElement> {
    let (rest, name) = take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)?;
    let offset = body_len - rest.len();
    Ok((rest, AstElement::RuleRef(name.to_string(), offset)))
}

fn group_element(input: &str, body_len: usize) -> PResult<AstElement> {
    map(
        delimited(pair(nchar('('), ws), |i| disjunction(i, body_len), pair(ws, nchar(')'))),
        AstElement::Group,
    )(input)
}

fn literal_element(input: &str) -> PResult<AstElement> {
    let (input, _) = nchar('"')(input)?;
    let (input, bytes) = escaped_string(input, '"')
        .map_err(|_| nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Escaped)))?;
    let (input, _) = nchar('"')(input)?;
    Ok((input, AstElement::Literal(bytes)))
}

fn escaped_string(input: &str, terminator: char) -> Result<(&str, Vec<u8>), ()> {
    let mut out = Vec::new();
    let mut chars = input.char_indices().peekable();
    let mut consumed = 0usize;
    while let Some(&(i, c)) = chars.peek() {
        if c == terminator {
            break;
        }
        if c == '\\' {
            chars.next();
            let (_, esc) = chars.next().ok_or(())?;
            let (advance, decoded) = decode_escape(esc, &input[i + esc.len_utf8() + 1..])?;
            let mut buf = [0u8; 4];
            out.extend_from_slice(decoded.encode_utf8(&mut buf).as_bytes());
            for _ in 0..advance {
                chars.next();
            }
            consumed = i + 1 + esc.len_utf8() + advance;
        } else {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            chars.next();
            consumed = i + c.len_utf8();
        }
    }
    Ok((&input[consumed..], out))
}

/// Decodes one escape sequence (the char right after `\`) given the text
/// following it. Returns how many extra chars (beyond the escape char
/// itself) were consumed and the resulting code point.
fn decode_escape(esc: char, rest: &str) -> Result<(usize, char), ()> {
    match esc {
        'n' => Ok((0, '\n')),
        't' => Ok((0, '\t')),
        'r' => Ok((0, '\r')),
        '0' => Ok((0, '\0')),
        '\\' => Ok((0, '\\')),
        '"' => Ok((0, '"')),
        '-' => Ok((0, '-')),
        ']' => Ok((0, ']')),
        'x' => parse_hex_escape(rest, 2),
        'u' => parse_hex_escape(rest, 4),
        'U' => parse_hex_escape(rest, 8),
        other => Ok((0, other)),
    }
}

fn parse_hex_escape(rest: &str, digits: usize) -> Result<(usize, char), ()> {
    let hex: String = rest.chars().take(digits).collect();
    if hex.len() != digits {
        return Err(());
    }
    let cp = u32::from_str_radix(&hex, 16).map_err(|_| ())?;
    char::from_u32(cp).map(|c| (digits, c)).ok_or(())
}

fn class_element(input: &str, body_len: usize) -> PResult<AstElement> {
    let (input, _) = nchar('[')(input)?;
    let (mut input, negated) = opt(nchar('^'))(input)?;
    let mut ranges = Vec::new();
    let mut offsets = Vec::new();
    loop {
        if let Ok((rest, _)) = nchar::<_, nom::error::Error<&str>>(']')(input) {
            input = rest;
            break;
        }
        let (rest, lo) = class_char(input)?;
        let (rest, hi) = if let Ok((rest2, _)) = nchar::<_, nom::error::Error<&str>>('-')(rest) {
            if rest2.starts_with(']') {
                (rest, lo)
            } else {
                let (rest3, hi) = class_char(rest2)?;
                (rest3, hi)
            }
        } else {
            (rest, lo)
        };
        ranges.push((lo, hi));
        offsets.push(body_len - rest.len());
        input = rest;
    }
    Ok((input, AstElement::Class(ranges, offsets, negated.is_some())))
}

fn class_char(input: &str) -> PResult<u32> {
    let mut chars = input.chars();
    let c = chars
        .next()
        .ok_or_else(|| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Eof)))?;
    if c == '\\' {
        let esc = chars.next().ok_or_else(|| {
            nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Escaped))
        })?;
        let rest = &input[1 + c.len_utf8()..];
        let (advance, decoded) = decode_escape(esc, rest)
            .map_err(|_| nom::Err::Failure(nom::error::Error::new(input, nom::error::ErrorKind::Escaped)))?;
        let total =
            1 + esc.len_utf8() + rest.char_indices().nth(advance).map(|(i, _)| i).unwrap_or(rest.len());
        Ok((&input[total..], decoded as u32))
    } else {
        Ok((&input[c.len_utf8()..], c as u32))
    }
}

// ---------------------------------------------------------------------
// Lowering: surface AST -> flat ir::Grammar
// ---------------------------------------------------------------------

struct Lowering {
    rules: Vec<Rule>,
    name_to_id: AHashMap<String, RuleId>,
}

/// Desugars the surface AST into the flat representation used by the
/// compiler and matcher, validating the invariants listed in the grammar
/// format documentation (resolved references, non-empty/well-formed
/// classes, single lookahead per sequence, `lo <= hi`, no duplicate names,
/// root present).
fn lower(ast_rules: Vec<AstRule>) -> Result<Grammar, GrammarParseError> {
    let mut name_to_id = AHashMap::default();
    let mut rules = Vec::with_capacity(ast_rules.len());
    for r in &ast_rules {
        if name_to_id.contains_key(&r.name) {
            return Err(GrammarParseError::new("defined multiple times", r.line, r.col));
        }
        let id = RuleId(rules.len() as u32);
        name_to_id.insert(r.name.clone(), id);
        rules.push(Rule { name: r.name.clone().into_boxed_str(), body: Vec::new(), synthetic: false });
    }
    let mut classes = Vec::new();
    let mut class_ids: AHashMap<CharClass, usize> = AHashMap::default();
    let mut lowering = Lowering { rules, name_to_id };

    for r in &ast_rules {
        let id = *lowering.name_to_id.get(&r.name).unwrap();
        let body = lower_disjunction(&r.body, &mut lowering, &mut classes, &mut class_ids, r.line, r.body_col)?;
        lowering.rules[id.0 as usize].body = body;
    }

    let root = lowering
        .name_to_id
        .get("root")
        .copied()
        .ok_or_else(|| GrammarParseError::new("missing root", 0, 0))?;

    Ok(Grammar::new(lowering.rules, classes, root))
}

/// `base_col` is the 0-based column where the enclosing rule's body starts;
/// each element's own offset (chars consumed from that point) is added to
/// it to recover the column of the actual offending token.
fn lower_disjunction(
    seqs: &[AstSequence],
    lowering: &mut Lowering,
    classes: &mut Vec<CharClass>,
    class_ids: &mut AHashMap<CharClass, usize>,
    line: usize,
    base_col: usize,
) -> Result<Vec<Sequence>, GrammarParseError> {
    seqs.iter()
        .map(|s| lower_sequence(s, lowering, classes, class_ids, line, base_col))
        .collect()
}

fn lower_sequence(
    seq: &AstSequence,
    lowering: &mut Lowering,
    classes: &mut Vec<CharClass>,
    class_ids: &mut AHashMap<CharClass, usize>,
    line: usize,
    base_col: usize,
) -> Result<Sequence, GrammarParseError> {
    let mut elements = Vec::with_capacity(seq.elements.len());
    for e in &seq.elements {
        elements.push(lower_element(e, lowering, classes, class_ids, line, base_col)?);
    }
    if elements.is_empty() {
        elements.push(Element::Empty);
    }
    let lookahead = match &seq.lookahead {
        Some(l) => {
            let body = lower_disjunction(l, lowering, classes, class_ids, line, base_col)?;
            Some(new_synthetic_rule(lowering, body))
        }
        None => None,
    };
    Ok(Sequence { elements, lookahead })
}

fn lower_element(
    e: &AstElement,
    lowering: &mut Lowering,
    classes: &mut Vec<CharClass>,
    class_ids: &mut AHashMap<CharClass, usize>,
    line: usize,
    base_col: usize,
) -> Result<Element, GrammarParseError> {
    match e {
        AstElement::Literal(bytes) => Ok(Element::Literal(bytes.clone().into_boxed_slice())),
        AstElement::Empty => Ok(Element::Empty),
        AstElement::Class(ranges, offsets, negated) => {
            if ranges.is_empty() {
                return Err(GrammarParseError::new("invalid character class", line, base_col + 1));
            }
            for (&(lo, hi), &offset) in ranges.iter().zip(offsets) {
                if lo > hi {
                    return Err(GrammarParseError::new(
                        "lower bound is larger than upper bound",
                        line,
                        base_col + offset + 1,
                    ));
                }
            }
            let cc = CharClass::new(ranges.clone(), *negated);
            let id = *class_ids.entry(cc.clone()).or_insert_with(|| {
                classes.push(cc.clone());
                classes.len() - 1
            });
            Ok(Element::Class(super::ir::ClassId(id as u32)))
        }
        AstElement::RuleRef(name, offset) => {
            let id = lowering.name_to_id.get(name).copied().ok_or_else(|| {
                GrammarParseError::new(format!("undefined rule `{name}`"), line, base_col + offset + 1)
            })?;
            Ok(Element::Ref(id))
        }
        AstElement::Group(seqs) => {
            let body = lower_disjunction(seqs, lowering, classes, class_ids, line, base_col)?;
            Ok(Element::Ref(new_synthetic_rule(lowering, body)))
        }
        AstElement::Quantified(inner, lo, hi, offset) => {
            if let Some(h) = hi {
                if lo > h {
                    return Err(GrammarParseError::new(
                        "invalid quantifier range",
                        line,
                        base_col + offset + 1,
                    ));
                }
            }
            let wrapped = lower_element(inner, lowering, classes, class_ids, line, base_col)?;
            let callee = match wrapped {
                Element::Ref(r) => r,
                other => {
                    let body = vec![Sequence { elements: vec![other], lookahead: None }];
                    new_synthetic_rule(lowering, body)
                }
            };
            Ok(Element::Quantified(callee, *lo, *hi))
        }
    }
}

fn new_synthetic_rule(lowering: &mut Lowering, body: Vec<Sequence>) -> RuleId {
    let id = RuleId(lowering.rules.len() as u32);
    lowering.rules.push(Rule {
        name: format!("__g{}", id.0).into_boxed_str(),
        body,
        synthetic: true,
    });
    id
}
