//! Octave CAS engine (§4.4.2): a second external-binary engine, whose
//! equation detector runs on the *original preprocessed* markup rather
//! than the converted string — the Open-Question policy this
//! implementation picks for this engine (§9 of the expanded spec).
//!
//! Grounded in `matlab_engine.py`'s conversion table and symbolic-toolbox
//! script shape, retargeted at Octave's `--eval` invocation (no temp
//! script file needed, unlike MATLAB's `-batch run(...)`).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

use super::conversion::{self, ConversionRule, IMPLICIT_MULT_RULES};
use super::{binary_available, Capability, ComputeResult, Engine, EngineResult, TemplateDescriptor};
use crate::executor::SubprocessExecutor;
use crate::guard::GuardLimits;

static LATEX_TO_OCTAVE: &[(&str, &str)] = &[
    (
        r"\\frac\{([^{}]*(?:\{[^{}]*\}[^{}]*)*)\}\{([^{}]*(?:\{[^{}]*\}[^{}]*)*)\}",
        "($1)/($2)",
    ),
    (r"\\sqrt\{([^{}]*)\}", "sqrt($1)"),
    (r"\\sqrt\[([^]]*)\]\{([^{}]*)\}", "($2)^(1/($1))"),
    (r"\\sin", "sin"),
    (r"\\cos", "cos"),
    (r"\\tan", "tan"),
    (r"\\arcsin", "asin"),
    (r"\\arccos", "acos"),
    (r"\\arctan", "atan"),
    (r"\\sinh", "sinh"),
    (r"\\cosh", "cosh"),
    (r"\\tanh", "tanh"),
    (r"\\ln", "log"),
    (r"\\log", "log10"),
    (r"\\exp", "exp"),
    (r"\\pi", "pi"),
    (r"\\e([^a-zA-Z]|$)", "exp(1)$1"),
    (r"\\alpha", "alpha"),
    (r"\\beta", "beta"),
    (r"\\gamma", "gamma"),
    (r"\\delta", "delta"),
    (r"\\epsilon", "epsilon"),
    (r"\\theta", "theta"),
    (r"\\lambda", "lambda"),
    (r"\\mu", "mu"),
    (r"\\sigma", "sigma"),
    (r"\\omega", "omega"),
    (r"\\phi", "phi"),
    (r"\\cdot", "*"),
    (r"\\times", "*"),
    (r"\\div", "/"),
    (r"\^\{([^{}]*)\}", "^($1)"),
    (r"_\{([^{}]*)\}", "_$1"),
    (r"\{", "("),
    (r"\}", ")"),
    (r"\\", ""),
];

static OCTAVE_RULES: Lazy<Vec<ConversionRule>> = Lazy::new(|| conversion::build_rules(LATEX_TO_OCTAVE));

static TEMPLATES: &[(&str, TemplateDescriptor)] = &[
    (
        "evaluate",
        TemplateDescriptor {
            required_inputs: &["expression"],
            optional_inputs: &[],
            description: "Evaluate a numeric expression",
        },
    ),
    (
        "simplify",
        TemplateDescriptor {
            required_inputs: &["expression"],
            optional_inputs: &[],
            description: "Simplify a symbolic expression using the symbolic package",
        },
    ),
];

fn to_octave(latex: &str) -> String {
    let converted = conversion::apply(&OCTAVE_RULES, latex);
    conversion::apply(&IMPLICIT_MULT_RULES, &converted)
}

fn parse_tags(stdout: &str) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("OCTAVE_") {
            if let Some(colon) = rest.find(':') {
                tags.insert(rest[..colon].to_string(), rest[colon + 1..].trim().to_string());
            }
        }
    }
    tags
}

pub struct OctaveEngine {
    path: String,
    timeout: Duration,
    executor: SubprocessExecutor,
}

impl OctaveEngine {
    pub fn new(path: String, timeout: Duration) -> Self {
        Self {
            executor: SubprocessExecutor::new(timeout, 64 * 1024),
            path,
            timeout,
        }
    }

    fn run_eval(&self, code: String, timeout: Duration) -> crate::executor::Outcome {
        self.executor.run(
            &[self.path.clone(), "--no-gui".to_string(), "--quiet".to_string(), "--eval".to_string(), code],
            None,
            Some(timeout),
            Some(64 * 1024),
        )
    }
}

impl Engine for OctaveEngine {
    fn name(&self) -> &str {
        "octave"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Validate, Capability::Compute]
    }

    fn is_available(&self) -> bool {
        binary_available(&self.path)
    }

    fn version(&self) -> String {
        let outcome = self.run_eval("disp(OCTAVE_VERSION)".to_string(), Duration::from_secs(5));
        let version = outcome.stdout.trim();
        if version.is_empty() {
            "unknown".to_string()
        } else {
            format!("Octave {version}")
        }
    }

    fn guard_limits(&self) -> GuardLimits {
        GuardLimits::new(500, true)
    }

    fn description(&self) -> &'static str {
        "Validate and evaluate via the Octave CLI, equation detection on the original markup"
    }

    fn max_timeout(&self) -> Duration {
        self.timeout
    }

    fn templates(&self) -> &'static [(&'static str, TemplateDescriptor)] {
        TEMPLATES
    }

    fn validate(&self, expression: &str) -> EngineResult {
        let start = Instant::now();

        // Octave's equation detector runs on the pre-conversion markup.
        let is_equation = conversion::find_standalone_equals(expression).is_some();

        let (code, original_parsed) = if is_equation {
            let (lhs_raw, rhs_raw) = conversion::split_equation(expression)
                .expect("find_standalone_equals confirmed a split point");
            let lhs = to_octave(&lhs_raw);
            let rhs = to_octave(&rhs_raw);
            let code = format!(
                "pkg load symbolic; syms x y z t real; lhs = {lhs}; rhs = {rhs}; \
                 diff_expr = simplify(lhs - rhs); printf('OCTAVE_SIMPLIFIED:%s\\n', char(diff_expr)); \
                 printf('OCTAVE_IS_IDENTITY:%d\\n', isequal(diff_expr, sym(0)));"
            );
            (code, format!("{lhs} = {rhs}"))
        } else {
            let expr = to_octave(expression);
            if expr.is_empty() {
                return EngineResult::failed(self.name(), "empty expression after conversion", elapsed_ms(start));
            }
            let code = format!(
                "pkg load symbolic; syms x y z t real; expr = {expr}; \
                 printf('OCTAVE_SIMPLIFIED:%s\\n', char(simplify(expr)));"
            );
            (code, expr)
        };

        let outcome = self.run_eval(code, self.timeout);
        if outcome.timed_out {
            return EngineResult::failed(self.name(), format!("timeout ({}s)", self.timeout.as_secs()), elapsed_ms(start));
        }

        let tags = parse_tags(&outcome.stdout);
        let simplified = tags.get("SIMPLIFIED").cloned();
        let mut is_valid = tags.get("IS_IDENTITY").map(|v| v == "1");

        if is_equation {
            if is_valid.is_none() {
                is_valid = simplified.as_deref().map(|s| s == "0");
            }
        } else if simplified.is_some() {
            is_valid = Some(true);
        }

        let success = simplified.is_some();
        EngineResult {
            engine: self.name().to_string(),
            success,
            is_valid,
            simplified,
            original_parsed: Some(original_parsed),
            error: if success { None } else { Some("no output from octave".to_string()) },
            time_ms: elapsed_ms(start),
        }
    }

    fn execute_template(
        &self,
        template: &str,
        inputs: &HashMap<String, String>,
        timeout: Duration,
    ) -> ComputeResult {
        let code = match template {
            "evaluate" => {
                let expr = to_octave(&inputs["expression"]);
                format!("printf('OCTAVE_RESULT:%.10g\\n', {expr});")
            }
            "simplify" => {
                let expr = to_octave(&inputs["expression"]);
                format!(
                    "pkg load symbolic; syms x y z t real; expr = {expr}; \
                     printf('OCTAVE_RESULT:%s\\n', char(simplify(expr)));"
                )
            }
            _ => unreachable!("template existence is checked by the shared pre-amble"),
        };

        let outcome = self.run_eval(code, timeout);
        if outcome.timed_out {
            return ComputeResult::error(self.name(), "TIMEOUT", format!("octave timed out after {}s", timeout.as_secs()), 0);
        }

        let tags = parse_tags(&outcome.stdout);
        let Some(value) = tags.get("RESULT").cloned() else {
            return ComputeResult {
                engine: self.name().to_string(),
                success: false,
                time_ms: 0,
                result: None,
                stdout: Some(outcome.stdout),
                stderr: Some(outcome.stderr),
                error: Some("no output from octave".to_string()),
                error_code: Some("ENGINE_ERROR".to_string()),
            };
        };

        let mut result = HashMap::new();
        result.insert("value".to_string(), value);
        ComputeResult::ok(self.name(), result, outcome.stdout, outcome.stderr, 0)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_fractions_and_constants() {
        assert_eq!(to_octave(r"\frac{a}{b}"), "(a)/(b)");
        assert_eq!(to_octave(r"\ln(x)"), "log(x)");
        assert_eq!(to_octave(r"\log(x)"), "log10(x)");
    }

    #[test]
    fn equation_detection_uses_original_markup() {
        // The conversion table turns `\log` into `log10`, which contains no
        // `=`; this asserts the detector runs on pre-conversion text either way.
        assert!(conversion::find_standalone_equals("x = 1").is_some());
        assert!(conversion::find_standalone_equals(r"\log(x) = 1").is_some());
    }

    #[test]
    fn unavailable_without_binary() {
        let engine = OctaveEngine::new("/no/such/octave-binary".to_string(), Duration::from_secs(5));
        assert!(!engine.is_available());
    }
}
