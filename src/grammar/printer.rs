//! Canonical pretty-printer for [`Grammar`].
//!
//! Printing always normalizes grouping (every synthesized group/quantifier
//! rule is inlined back into `(...)` syntax at its use site), quantifier
//! spacing, and character-class escaping, so that `parse(print(g)) == g`
//! for any grammar `g` produced by [`super::parser::parse_source`].

use std::fmt::Write as _;

use super::ir::{CharClass, Element, Grammar, RuleId, Sequence};

pub fn print_grammar(g: &Grammar) -> String {
    let mut out = String::new();
    for (i, rule) in g.rules.iter().enumerate() {
        if rule.synthetic {
            continue;
        }
        let _ = write!(out, "{} ::= ", rule.name);
        print_disjunction(g, &rule.body, &mut out);
        out.push('\n');
        let _ = i;
    }
    out
}

fn print_disjunction(g: &Grammar, seqs: &[Sequence], out: &mut String) {
    for (i, seq) in seqs.iter().enumerate() {
        if i > 0 {
            out.push_str(" | ");
        }
        print_sequence(g, seq, out);
    }
}

fn print_sequence(g: &Grammar, seq: &Sequence, out: &mut String) {
    for (i, e) in seq.elements.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        print_element(g, e, out);
    }
    if let Some(la) = seq.lookahead {
        out.push_str(" (=");
        print_rule_inline(g, la, out);
        out.push(')');
    }
}

fn print_rule_inline(g: &Grammar, id: RuleId, out: &mut String) {
    let rule = g.rule(id);
    if rule.synthetic {
        print_disjunction(g, &rule.body, out);
    } else {
        out.push_str(&rule.name);
    }
}

fn print_element(g: &Grammar, e: &Element, out: &mut String) {
    match e {
        Element::Empty => out.push_str("\"\""),
        Element::Literal(bytes) => print_literal(bytes, out),
        Element::Class(id) => print_class(g.class(*id), out),
        Element::Ref(id) => {
            let rule = g.rule(*id);
            if rule.synthetic {
                out.push('(');
                print_disjunction(g, &rule.body, out);
                out.push(')');
            } else {
                out.push_str(&rule.name);
            }
        }
        Element::Quantified(id, lo, hi) => {
            print_quantified_callee(g, *id, out);
            print_quantifier_suffix(*lo, *hi, out);
        }
    }
}

/// Prints the body a `Quantified` element repeats, parenthesizing unless
/// it is a single atomic (non-group) element.
fn print_quantified_callee(g: &Grammar, id: RuleId, out: &mut String) {
    let rule = g.rule(id);
    if !rule.synthetic {
        out.push_str(&rule.name);
        return;
    }
    if rule.body.len() == 1 && rule.body[0].lookahead.is_none() && rule.body[0].elements.len() == 1 {
        match &rule.body[0].elements[0] {
            Element::Literal(bytes) => return print_literal(bytes, out),
            Element::Class(cid) => return print_class(g.class(*cid), out),
            Element::Ref(r) if !g.rule(*r).synthetic => {
                out.push_str(&g.rule(*r).name);
                return;
            }
            _ => {}
        }
    }
    out.push('(');
    print_disjunction(g, &rule.body, out);
    out.push(')');
}

fn print_quantifier_suffix(lo: u32, hi: Option<u32>, out: &mut String) {
    match (lo, hi) {
        (0, None) => out.push('*'),
        (1, None) => out.push('+'),
        (0, Some(1)) => out.push('?'),
        (lo, Some(hi)) if lo == hi => {
            let _ = write!(out, "{{{lo}}}");
        }
        (lo, Some(hi)) => {
            let _ = write!(out, "{{{lo},{hi}}}");
        }
        (lo, None) => {
            let _ = write!(out, "{{{lo},}}");
        }
    }
}

fn print_literal(bytes: &[u8], out: &mut String) {
    out.push('"');
    for &b in bytes {
        push_escaped_byte(b, out, '"');
    }
    out.push('"');
}

fn push_escaped_byte(b: u8, out: &mut String, terminator: char) {
    match b {
        b'\n' => out.push_str("\\n"),
        b'\t' => out.push_str("\\t"),
        b'\r' => out.push_str("\\r"),
        b'\\' => out.push_str("\\\\"),
        b if b as char == terminator => {
            out.push('\\');
            out.push(terminator);
        }
        0x20..=0x7e => out.push(b as char),
        _ => {
            let _ = write!(out, "\\x{b:02X}");
        }
    }
}

fn print_class(cc: &CharClass, out: &mut String) {
    out.push('[');
    if cc.negated {
        out.push('^');
    }
    for &(lo, hi) in &cc.ranges {
        push_escaped_codepoint(lo, out);
        if hi != lo {
            out.push('-');
            push_escaped_codepoint(hi, out);
        }
    }
    out.push(']');
}

fn push_escaped_codepoint(cp: u32, out: &mut String) {
    match char::from_u32(cp) {
        Some('-') => out.push_str("\\-"),
        Some(']') => out.push_str("\\]"),
        Some('\\') => out.push_str("\\\\"),
        Some('\n') => out.push_str("\\n"),
        Some('\t') => out.push_str("\\t"),
        Some('\r') => out.push_str("\\r"),
        Some(c) if (0x20..=0x7e).contains(&cp) => out.push(c),
        _ if cp <= 0xff => {
            let _ = write!(out, "\\x{cp:02X}");
        }
        _ if cp <= 0xffff => {
            let _ = write!(out, "\\u{cp:04X}");
        }
        _ => {
            let _ = write!(out, "\\U{cp:08X}");
        }
    }
}
