//! LaTeX preprocessing pipeline.
//!
//! Pure transformation `preprocess(raw) -> canonical`, composed of four
//! ordered phases. Order is load-bearing (§4.1): strip environments, strip
//! typographical commands, normalize synonyms, clean whitespace.
//!
//! The preprocessor never fails — every input produces some output — and is
//! idempotent on its own output within one whitespace-collapse.

use once_cell::sync::Lazy;
use regex::Regex;

/// Phase 1: math-environment wrappers and inline-math delimiters, stripped
/// unopened and unclosed, starred and unstarred.
static ENV_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\\begin\{equation\*?\}",
        r"\\end\{equation\*?\}",
        r"\\begin\{align\*?\}",
        r"\\end\{align\*?\}",
        r"\\begin\{gather\*?\}",
        r"\\end\{gather\*?\}",
        r"\\begin\{multline\*?\}",
        r"\\end\{multline\*?\}",
        r"\\begin\{eqnarray\*?\}",
        r"\\end\{eqnarray\*?\}",
        r"\\\[",
        r"\\\]",
        r"\$\$",
        r"\$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static environment pattern"))
    .collect()
});

/// Phase 2: typographical/spacing/sizing commands that carry no semantics.
static STRIP_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\\left",
        r"\\right",
        r"\\displaystyle",
        r"\\textstyle",
        r"\\scriptstyle",
        r"\\Bigg",
        r"\\bigg",
        r"\\Big",
        r"\\big",
        r"\\,",
        r"\\;",
        r"\\:",
        r"\\!",
        r"\\quad",
        r"\\qquad",
        r"&",
        r"\\\\",
        r"\\nonumber",
        r"\\label\{[^}]*\}",
        r"\\tag\{[^}]*\}",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static strip pattern"))
    .collect()
});

/// Font/container commands: extract the single braced argument, drop the shell.
static FONT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\\mathrm\{([^}]*)\}",
        r"\\mathbf\{([^}]*)\}",
        r"\\mathit\{([^}]*)\}",
        r"\\text\{([^}]*)\}",
        r"\\textit\{([^}]*)\}",
        r"\\boldsymbol\{([^}]*)\}",
        r"\\operatorname\{([^}]*)\}",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static font pattern"))
    .collect()
});

/// Phase 3: alternative-to-canonical command spelling map, applied in order.
/// Each source command is matched with a trailing word boundary so a command
/// that is itself a prefix of its canonical form (`\ge` vs `\geq`) or of an
/// unrelated command (`\ne` vs `\neg`) is not matched inside it.
static SYNONYMS: &[(&str, &str)] = &[
    (r"dfrac", r"\frac"),
    (r"tfrac", r"\frac"),
    (r"ge", r"\geq"),
    (r"le", r"\leq"),
    (r"ne", r"\neq"),
    (r"to", r"\rightarrow"),
    (r"gets", r"\leftarrow"),
    (r"land", r"\wedge"),
    (r"lor", r"\vee"),
    (r"lnot", r"\neg"),
    (r"cdot", "*"),
    (r"times", "*"),
];

static SYNONYM_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    SYNONYMS
        .iter()
        .map(|(name, _)| Regex::new(&format!(r"\\{}\b", name)).expect("static synonym pattern"))
        .collect()
});

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Phase 1: remove math environment wrappers.
fn strip_environments(latex: &str) -> String {
    let mut result = latex.to_string();
    for pattern in ENV_PATTERNS.iter() {
        result = pattern.replace_all(&result, "").into_owned();
    }
    result
}

/// Phase 2: strip typographical commands, extract font command contents.
fn remove_typographical(latex: &str) -> String {
    let mut result = latex.to_string();
    for pattern in STRIP_PATTERNS.iter() {
        result = pattern.replace_all(&result, "").into_owned();
    }
    for pattern in FONT_PATTERNS.iter() {
        result = pattern.replace_all(&result, "$1").into_owned();
    }
    result
}

/// Phase 3: map alternative LaTeX commands to canonical forms.
fn normalize_synonyms(latex: &str) -> String {
    let mut result = latex.to_string();
    for (pattern, (_, new)) in SYNONYM_PATTERNS.iter().zip(SYNONYMS) {
        result = pattern.replace_all(&result, *new).into_owned();
    }
    result
}

/// Phase 4: collapse whitespace, strip redundant balanced outer braces.
fn clean_whitespace(latex: &str) -> String {
    let collapsed = WHITESPACE_RUN.replace_all(latex, " ");
    let trimmed = collapsed.trim();
    if let Some(inner) = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
    {
        let opens = inner.matches('{').count();
        let closes = inner.matches('}').count();
        if opens == closes {
            return inner.to_string();
        }
    }
    trimmed.to_string()
}

/// Full 4-phase preprocessing pipeline. Never fails.
pub fn preprocess(raw: &str) -> String {
    let result = strip_environments(raw);
    let result = remove_typographical(&result);
    let result = normalize_synonyms(&result);
    clean_whitespace(&result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_environment_and_font_and_spacing() {
        // S1 from the spec's end-to-end scenarios.
        let input = r"\begin{equation} \mathbf{x} + \left( y \right) \ge 0 \end{equation}";
        assert_eq!(preprocess(input), r"x + ( y ) \geq 0");
    }

    #[test]
    fn is_idempotent() {
        let input = r"\begin{align*} \dfrac{a}{b} \,\, \ge \ne \end{align*}";
        let once = preprocess(input);
        let twice = preprocess(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn never_fails_on_arbitrary_input() {
        for input in ["", "   ", "}}}{{{", "\\", "\0\0\0", "plain text no math"] {
            let _ = preprocess(input);
        }
    }

    #[test]
    fn strips_inline_and_display_delimiters() {
        assert_eq!(preprocess(r"$$x + 1$$"), "x + 1");
        assert_eq!(preprocess(r"\[x + 1\]"), "x + 1");
        assert_eq!(preprocess(r"$x + 1$"), "x + 1");
    }

    #[test]
    fn collapses_whitespace_runs() {
        assert_eq!(preprocess("x   +    y"), "x + y");
    }

    #[test]
    fn strips_redundant_outer_braces_only_when_balanced() {
        assert_eq!(preprocess("{x + y}"), "x + y");
        // unbalanced inner braces: outer pair is not stripped
        assert_eq!(preprocess("{x + }y}"), "{x + }y}");
    }

    #[test]
    fn normalizes_synonyms_in_order() {
        assert_eq!(preprocess(r"\dfrac{a}{b}"), r"\frac{a}{b}");
        assert_eq!(preprocess(r"a \ge b \le c \ne d"), r"a \geq b \leq c \neq d");
        assert_eq!(preprocess(r"a \cdot b \times c"), "a * b * c");
    }

    #[test]
    fn extracts_font_command_contents() {
        assert_eq!(preprocess(r"\operatorname{sin}(x)"), "sin(x)");
        assert_eq!(preprocess(r"\text{hello}"), "hello");
    }
}
