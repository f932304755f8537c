//! Enumeration of reachable [`Position`]s in a compiled grammar.

use ahash::AHashSet;

use crate::grammar::{Element, Grammar, Position, QuantPhase, RuleId};

/// Returns every reachable rule (via `Ref`, `Quantified`, and lookahead
/// edges, starting at the grammar's root) together with every position
/// inside it that the mask cache needs to address.
pub fn enumerate_positions(grammar: &Grammar) -> Vec<Position> {
    let reachable = reachable_rules(grammar);
    let mut positions = Vec::new();
    for rule_id in reachable {
        let rule = grammar.rule(rule_id);
        for (alt_idx, seq) in rule.body.iter().enumerate() {
            let alt = alt_idx as u16;
            for elem_idx in 0..=seq.elements.len() {
                let elem = elem_idx as u32;
                if elem_idx < seq.elements.len() {
                    if let Element::Quantified(_, lo, hi) = &seq.elements[elem_idx] {
                        for phase in quant_phases(*lo, *hi) {
                            positions.push(Position { rule: rule_id, alt, elem, phase });
                        }
                        continue;
                    }
                }
                positions.push(Position { rule: rule_id, alt, elem, phase: QuantPhase::NotApplicable });
            }
        }
    }
    positions
}

fn quant_phases(lo: u32, hi: Option<u32>) -> Vec<QuantPhase> {
    let mut phases = Vec::with_capacity(3);
    if lo > 0 {
        phases.push(QuantPhase::Under);
    }
    phases.push(QuantPhase::Ready);
    if hi.is_some() {
        phases.push(QuantPhase::AtMax);
    }
    phases
}

fn reachable_rules(grammar: &Grammar) -> Vec<RuleId> {
    let mut seen = AHashSet::default();
    let mut order = Vec::new();
    let mut stack = vec![grammar.root];
    seen.insert(grammar.root);
    while let Some(id) = stack.pop() {
        order.push(id);
        let rule = grammar.rule(id);
        for seq in &rule.body {
            for elem in &seq.elements {
                let callee = match elem {
                    Element::Ref(r) => Some(*r),
                    Element::Quantified(r, _, _) => Some(*r),
                    _ => None,
                };
                if let Some(r) = callee {
                    if seen.insert(r) {
                        stack.push(r);
                    }
                }
            }
            if let Some(la) = seq.lookahead {
                if seen.insert(la) {
                    stack.push(la);
                }
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Grammar;

    #[test]
    fn enumerates_positions_for_simple_rule() {
        let g = Grammar::parse(r#"root ::= "ab""#).unwrap();
        let positions = enumerate_positions(&g);
        // one element + one end-of-sequence position
        assert_eq!(positions.len(), 2);
    }

    #[test]
    fn quantified_positions_include_ready_and_bounds() {
        let g = Grammar::parse("root ::= [a-z]{2,3}").unwrap();
        let positions = enumerate_positions(&g);
        let phases: Vec<_> = positions.iter().map(|p| p.phase).collect();
        assert!(phases.contains(&QuantPhase::Under));
        assert!(phases.contains(&QuantPhase::Ready));
        assert!(phases.contains(&QuantPhase::AtMax));
    }

    #[test]
    fn unbounded_quantifier_has_no_at_max_phase() {
        let g = Grammar::parse("root ::= [a-z]*").unwrap();
        let positions = enumerate_positions(&g);
        assert!(positions.iter().all(|p| p.phase != QuantPhase::AtMax));
    }
}
