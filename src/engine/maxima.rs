//! Maxima CAS engine (§4.4.2): an external-binary engine whose equation
//! detector runs on the *converted* (engine-native) string.
//!
//! Grounded in `maxima_engine.py`: LaTeX is rewritten to Maxima syntax by
//! a fixed ordered table, then `ratsimp` is invoked via `--batch-string`
//! and the `(%oN) ...` output label is stripped to recover the result.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;

use super::conversion::{self, ConversionRule, IMPLICIT_MULT_RULES};
use super::{binary_available, Capability, ComputeResult, Engine, EngineResult, TemplateDescriptor};
use crate::executor::SubprocessExecutor;
use crate::guard::GuardLimits;

static LATEX_TO_MAXIMA: &[(&str, &str)] = &[
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
    (r"\\log", "log"),
    (r"\\exp", "exp"),
    (r"\\alpha", "%alpha"),
    (r"\\beta", "%beta"),
    (r"\\gamma", "%gamma"),
    (r"\\delta", "%delta"),
    (r"\\epsilon", "%epsilon"),
    (r"\\theta", "%theta"),
    (r"\\lambda", "%lambda"),
    (r"\\mu", "%mu"),
    (r"\\nu", "%nu"),
    (r"\\pi", "%pi"),
    (r"\\sigma", "%sigma"),
    (r"\\tau", "%tau"),
    (r"\\omega", "%omega"),
    (r"\\phi", "%phi"),
    (r"\\psi", "%psi"),
    (r"\\rho", "%rho"),
    (r"\\xi", "%xi"),
    (r"\\zeta", "%zeta"),
    (r"\\infty", "inf"),
    (r"\\cdot", "*"),
    (r"\\times", "*"),
    (r"\\div", "/"),
    (r"\^\{([^{}]*)\}", "^($1)"),
    (r"_\{([^{}]*)\}", "_$1"),
    (r"\{", "("),
    (r"\}", ")"),
    (r"\\", ""),
];

static MAXIMA_RULES: Lazy<Vec<ConversionRule>> = Lazy::new(|| conversion::build_rules(LATEX_TO_MAXIMA));

static OUTPUT_LABEL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\(%o\d+\)\s*(.*)$").expect("maxima output label regex"));

static TEMPLATES: &[(&str, TemplateDescriptor)] = &[
    (
        "simplify",
        TemplateDescriptor {
            required_inputs: &["expression"],
            optional_inputs: &[],
            description: "Simplify a mathematical expression with ratsimp",
        },
    ),
    (
        "solve",
        TemplateDescriptor {
            required_inputs: &["equation"],
            optional_inputs: &["variable"],
            description: "Solve an equation for a variable (default: x)",
        },
    ),
];

fn to_maxima(latex: &str) -> String {
    let converted = conversion::apply(&MAXIMA_RULES, latex);
    conversion::apply(&IMPLICIT_MULT_RULES, &converted)
}

/// Extract the last Maxima output value, stripping the `(%oN)` label and
/// skipping input-echo lines.
fn parse_maxima_output(stdout: &str) -> Option<String> {
    for line in stdout.lines().rev() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("(%i") {
            continue;
        }
        if let Some(captures) = OUTPUT_LABEL.captures(line) {
            return Some(captures[1].trim().to_string());
        }
        return Some(line.to_string());
    }
    None
}

pub struct MaximaEngine {
    path: String,
    timeout: Duration,
    executor: SubprocessExecutor,
}

impl MaximaEngine {
    pub fn new(path: String, timeout: Duration) -> Self {
        Self {
            executor: SubprocessExecutor::new(timeout, 64 * 1024),
            path,
            timeout,
        }
    }

    fn run_batch(&self, command: String, timeout: Duration) -> crate::executor::Outcome {
        self.executor.run(
            &[self.path.clone(), "--very-quiet".to_string(), "--batch-string".to_string(), command],
            None,
            Some(timeout),
            Some(64 * 1024),
        )
    }
}

impl Engine for MaximaEngine {
    fn name(&self) -> &str {
        "maxima"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Validate, Capability::Compute]
    }

    fn is_available(&self) -> bool {
        binary_available(&self.path)
    }

    fn version(&self) -> String {
        let outcome = self.executor.run(
            &[self.path.clone(), "--version".to_string()],
            None,
            Some(Duration::from_secs(5)),
            Some(4096),
        );
        outcome
            .stdout
            .lines()
            .next()
            .map(str::to_string)
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn guard_limits(&self) -> GuardLimits {
        GuardLimits::new(500, true)
    }

    fn description(&self) -> &'static str {
        "Validate and simplify via the Maxima CLI, equation detection on the converted string"
    }

    fn max_timeout(&self) -> Duration {
        self.timeout
    }

    fn templates(&self) -> &'static [(&'static str, TemplateDescriptor)] {
        TEMPLATES
    }

    fn validate(&self, expression: &str) -> EngineResult {
        let start = Instant::now();
        let maxima_expr = to_maxima(expression);
        if maxima_expr.is_empty() {
            return EngineResult::failed(self.name(), "empty expression after conversion", elapsed_ms(start));
        }

        // Maxima's equation detector runs on the converted (native) string.
        let command = match conversion::split_equation(&maxima_expr) {
            Some((lhs, rhs)) => format!("ratsimp({lhs} - ({rhs}));"),
            None => format!("ratsimp({maxima_expr});"),
        };
        let is_equation = conversion::find_standalone_equals(&maxima_expr).is_some();

        let outcome = self.run_batch(command, self.timeout);
        if outcome.timed_out {
            return EngineResult::failed(self.name(), "timeout", elapsed_ms(start));
        }
        if outcome.returncode != 0 {
            return EngineResult::failed(
                self.name(),
                format!("non-zero exit ({}): {}", outcome.returncode, outcome.stderr.trim()),
                elapsed_ms(start),
            );
        }

        let Some(output) = parse_maxima_output(&outcome.stdout) else {
            return EngineResult::failed(self.name(), "no parseable output", elapsed_ms(start));
        };

        let is_valid = if is_equation { output == "0" } else { true };
        EngineResult {
            engine: self.name().to_string(),
            success: true,
            is_valid: Some(is_valid),
            simplified: Some(output),
            original_parsed: Some(maxima_expr),
            error: None,
            time_ms: elapsed_ms(start),
        }
    }

    fn execute_template(
        &self,
        template: &str,
        inputs: &HashMap<String, String>,
        timeout: Duration,
    ) -> ComputeResult {
        let command = match template {
            "simplify" => {
                let expr = to_maxima(&inputs["expression"]);
                format!("ratsimp({expr});")
            }
            "solve" => {
                let eq = to_maxima(&inputs["equation"]);
                let variable = inputs.get("variable").map(String::as_str).unwrap_or("x");
                format!("solve({eq}, {variable});")
            }
            _ => unreachable!("template existence is checked by the shared pre-amble"),
        };

        let outcome = self.run_batch(command, timeout);
        if outcome.timed_out {
            return ComputeResult::error(self.name(), "TIMEOUT", format!("maxima timed out after {}s", timeout.as_secs()), 0);
        }
        if outcome.returncode != 0 {
            return ComputeResult {
                engine: self.name().to_string(),
                success: false,
                time_ms: 0,
                result: None,
                stdout: Some(outcome.stdout),
                stderr: Some(outcome.stderr.clone()),
                error: Some(format!("maxima exited with code {}", outcome.returncode)),
                error_code: Some("ENGINE_ERROR".to_string()),
            };
        }

        let Some(value) = parse_maxima_output(&outcome.stdout) else {
            return ComputeResult::error(self.name(), "ENGINE_ERROR", "no output from maxima", 0);
        };

        let mut result = HashMap::new();
        result.insert("value".to_string(), value);
        ComputeResult::ok(self.name(), result, outcome.stdout, outcome.stderr, 0)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
