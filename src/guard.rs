//! Input guard: per-leaf-value safety predicate applied to template inputs
//! before any code generation (§4.2).
//!
//! The guard is intentionally conservative — false rejections of legitimate
//! expressions are acceptable; false acceptances are bugs.

use once_cell::sync::Lazy;
use regex::Regex;

/// Per-engine guard configuration: byte limit and whether embedded
/// newlines/semicolons are rejected (script-generating engines reject
/// both; engines that splice a single expression string do not need the
/// semicolon rule but still reject newlines).
#[derive(Debug, Clone, Copy)]
pub struct GuardLimits {
    pub max_len: usize,
    pub reject_semicolon: bool,
}

impl GuardLimits {
    pub const fn new(max_len: usize, reject_semicolon: bool) -> Self {
        Self {
            max_len,
            reject_semicolon,
        }
    }
}

/// Deny-list regex encoding the "dangerous construct" vocabulary common to
/// the engines' host languages: command execution, process spawning, file
/// I/O, environment access, dynamic eval/compile, reflective attribute
/// access, import machinery, and URL fetch primitives.
static BLOCKED_TERMS: &[&str] = &[
    r"__import__", r"exec\s*\(", r"eval\s*\(", r"compile\s*\(", r"open\s*\(",
    r"os\.", r"sys\.", r"subprocess", r"import\s", r"from\s.*import",
    r"globals", r"locals", r"getattr", r"setattr", r"delattr",
    r"__builtins__", r"__class__", r"__subclasses__",
    r"Popen", r"system\s*\(", r"popen",
    r"Exec", r"IO_", r"Process", r"Runtime", r"System", r"InputTextFile", r"OutputTextFile",
    r"ReadAll", r"PrintTo", r"AppendTo", r"QUIT", r"Filename",
    r"DirectoryCurrent", r"DirectoryContents",
    r"file_get_contents", r"fopen", r"unlink", r"url_fetch", r"urlopen", r"curl_exec",
];

static BLOCKED_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let joined = format!("(?i)({})", BLOCKED_TERMS.join("|"));
    Regex::new(&joined).expect("static guard deny-list regex")
});

/// Evaluate `is_safe(value)` for one leaf input value under the given limits.
pub fn is_safe(value: &str, limits: GuardLimits) -> bool {
    if value.is_empty() || value.len() > limits.max_len {
        return false;
    }
    if value.contains('\0') {
        return false;
    }
    if limits.reject_semicolon && (value.contains('\n') || value.contains(';')) {
        return false;
    }
    if BLOCKED_PATTERN.is_match(value) {
        return false;
    }
    true
}

/// Apply the guard to every value in an inputs map, returning the first
/// offending key (if any), in insertion order.
pub fn first_unsafe_key<'a>(
    inputs: &'a std::collections::HashMap<String, String>,
    limits: GuardLimits,
) -> Option<&'a str> {
    inputs
        .iter()
        .find(|(_, v)| !is_safe(v, limits))
        .map(|(k, _)| k.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT_ENGINE: GuardLimits = GuardLimits::new(500, true);
    const GROUP_ENGINE: GuardLimits = GuardLimits::new(200, true);

    #[test]
    fn rejects_empty_and_oversized() {
        assert!(!is_safe("", SCRIPT_ENGINE));
        let oversized = "x".repeat(501);
        assert!(!is_safe(&oversized, SCRIPT_ENGINE));
    }

    #[test]
    fn rejects_null_byte() {
        assert!(!is_safe("x\01", SCRIPT_ENGINE));
    }

    #[test]
    fn rejects_embedded_newline_and_semicolon_for_script_engines() {
        assert!(!is_safe("x\ny", SCRIPT_ENGINE));
        assert!(!is_safe("x; y", SCRIPT_ENGINE));
    }

    #[test]
    fn rejects_dangerous_constructs() {
        // S7 from the spec's end-to-end scenarios.
        assert!(!is_safe(
            "__import__('os').system('ls')",
            SCRIPT_ENGINE
        ));
        assert!(!is_safe("open('/etc/passwd').read()", SCRIPT_ENGINE));
        assert!(!is_safe("os.system('rm -rf /')", SCRIPT_ENGINE));
        assert!(!is_safe("Exec(DirectoryCurrent())", GROUP_ENGINE));
    }

    #[test]
    fn accepts_legitimate_expressions() {
        assert!(is_safe("x^2 + 3*x - 5", SCRIPT_ENGINE));
        assert!(is_safe("SymmetricGroup(4)", GROUP_ENGINE));
    }

    #[test]
    fn first_unsafe_key_reports_offending_key() {
        let mut inputs = std::collections::HashMap::new();
        inputs.insert("expression".to_string(), "x + 1".to_string());
        inputs.insert("variable".to_string(), "os.system('x')".to_string());
        assert_eq!(first_unsafe_key(&inputs, SCRIPT_ENGINE), Some("variable"));
    }
}
