//! Grammar IR, parser, and canonical printer (component A).

pub mod ir;
pub mod parser;
pub mod printer;

pub use ir::{CharClass, ClassId, Element, Grammar, Position, QuantPhase, Rule, RuleId, Sequence};
pub use parser::{parse_source, GrammarParseError};
pub use printer::print_grammar;

impl Grammar {
    /// Parses grammar source text, returning the lowered IR.
    pub fn parse(source: &str) -> Result<Grammar, GrammarParseError> {
        parse_source(source)
    }

    /// Renders this grammar back to its canonical source form.
    pub fn to_source(&self) -> String {
        print_grammar(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_literal_rule() {
        let g = Grammar::parse(r#"root ::= "ab""#).unwrap();
        assert_eq!(g.rules.len(), 1);
        assert!(!g.rule(g.root).synthetic);
    }

    #[test]
    fn round_trip_literal() {
        let g = Grammar::parse(r#"root ::= "ab""#).unwrap();
        let printed = g.to_source();
        let g2 = Grammar::parse(&printed).unwrap();
        assert_eq!(g, g2);
    }

    #[test]
    fn round_trip_quantifier_and_class() {
        let g = Grammar::parse("root ::= [a-z]{2,3}").unwrap();
        let printed = g.to_source();
        let g2 = Grammar::parse(&printed).unwrap();
        assert_eq!(g, g2);
    }

    #[test]
    fn round_trip_group_and_lookahead() {
        let g = Grammar::parse(r#"root ::= "a" ("c"|"d")+ (="b")"#).unwrap();
        let printed = g.to_source();
        let g2 = Grammar::parse(&printed).unwrap();
        assert_eq!(g, g2);
    }

    #[test]
    fn undefined_rule_reference_is_an_error() {
        let err = Grammar::parse("root ::= missing").unwrap_err();
        assert!(err.reason().contains("undefined"));
    }

    #[test]
    fn duplicate_rule_definition_is_an_error() {
        let err = Grammar::parse("root ::= \"a\"\nroot ::= \"b\"").unwrap_err();
        assert!(err.reason().contains("defined multiple times"));
        assert_eq!(err.line(), 2);
    }

    #[test]
    fn inverted_char_class_range_is_an_error() {
        let err = Grammar::parse("root ::= [Z-A]").unwrap_err();
        assert!(err.reason().contains("lower bound"));
    }

    #[test]
    fn missing_root_is_an_error() {
        let err = Grammar::parse(r#"start ::= "a""#).unwrap_err();
        assert!(err.reason().contains("missing root"));
    }
}
