//! Shared LaTeX-to-engine-native conversion table support (§4.6).
//!
//! Each external-binary engine declares its own ordered `(pattern,
//! replacement)` table; this module compiles such a table once into a
//! `Vec<ConversionRule>` and applies it as a single ordered pass — no
//! pattern is applied more than once, matching the fixed conversion
//! tables in `maxima_engine.py`/`matlab_engine.py`.

use once_cell::sync::Lazy;
use regex::Regex;

pub struct ConversionRule {
    pattern: Regex,
    replacement: &'static str,
}

/// Compile a `(regex, replacement)` table into ordered rules.
pub fn build_rules(table: &[(&'static str, &'static str)]) -> Vec<ConversionRule> {
    table
        .iter()
        .map(|(pattern, replacement)| ConversionRule {
            pattern: Regex::new(pattern).expect("static conversion pattern"),
            replacement,
        })
        .collect()
}

/// Apply `rules` to `input` in order, one pass, trimming the result.
pub fn apply(rules: &[ConversionRule], input: &str) -> String {
    let mut result = input.to_string();
    for rule in rules {
        result = rule.pattern.replace_all(&result, rule.replacement).into_owned();
    }
    result.trim().to_string()
}

/// Implicit-multiplication table, applied after an engine's main
/// conversion table (§4.6): digit-letter, letter-digit, close-open-paren
/// adjacency all get an explicit `*` inserted.
pub static IMPLICIT_MULT: &[(&str, &str)] = &[
    (r"(\d)([a-zA-Z])", "$1*$2"),
    (r"([a-zA-Z])(\d)", "$1*$2"),
    (r"\)([a-zA-Z])", ")*$1"),
    (r"([a-zA-Z])\(", "$1*("),
    (r"\)\(", ")*("),
];

pub static IMPLICIT_MULT_RULES: Lazy<Vec<ConversionRule>> = Lazy::new(|| build_rules(IMPLICIT_MULT));

/// Locate a standalone `=` (not part of `==`, `<=`, `>=`, `!=`, `:=`) —
/// the equation-mode trigger of §4.4.2. The `regex` crate has no
/// lookaround support, so this scans bytes directly; every engine-native
/// string produced by these conversion tables is ASCII.
pub fn find_standalone_equals(expr: &str) -> Option<usize> {
    let bytes = expr.as_bytes();
    for (i, &byte) in bytes.iter().enumerate() {
        if byte != b'=' {
            continue;
        }
        let prev_ok = i == 0 || !matches!(bytes[i - 1], b'<' | b'>' | b'!' | b':' | b'=');
        let next_ok = i + 1 >= bytes.len() || bytes[i + 1] != b'=';
        if prev_ok && next_ok {
            return Some(i);
        }
    }
    None
}

/// Split `expr` at the first standalone `=` into `(lhs, rhs)`, trimmed.
pub fn split_equation(expr: &str) -> Option<(String, String)> {
    let at = find_standalone_equals(expr)?;
    let (lhs, rest) = expr.split_at(at);
    let rhs = &rest[1..];
    Some((lhs.trim().to_string(), rhs.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_standalone_equals_only() {
        assert_eq!(find_standalone_equals("x = 1"), Some(2));
        assert!(find_standalone_equals("x == 1").is_none());
        assert!(find_standalone_equals("x <= 1").is_none());
        assert!(find_standalone_equals("x >= 1").is_none());
        assert!(find_standalone_equals("x != 1").is_none());
        assert!(find_standalone_equals("x + 1").is_none());
    }

    #[test]
    fn splits_on_standalone_equals() {
        let (lhs, rhs) = split_equation("x + 1 = y - 2").unwrap();
        assert_eq!(lhs, "x + 1");
        assert_eq!(rhs, "y - 2");
    }

    #[test]
    fn applies_table_in_order_single_pass() {
        let rules = build_rules(&[(r"\\pi", "%pi"), (r"\\sin", "sin")]);
        assert_eq!(apply(&rules, r"\sin(\pi)"), "sin(%pi)");
    }

    #[test]
    fn implicit_multiplication_inserts_operator() {
        assert_eq!(apply(&IMPLICIT_MULT_RULES, "2x"), "2*x");
        assert_eq!(apply(&IMPLICIT_MULT_RULES, "x2"), "x*2");
        assert_eq!(apply(&IMPLICIT_MULT_RULES, ")x"), ")*x");
        assert_eq!(apply(&IMPLICIT_MULT_RULES, "x("), "x*(");
    }
}
