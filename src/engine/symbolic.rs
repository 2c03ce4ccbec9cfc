//! In-process symbolic engine (§4.4.1): delegates to a co-interpreted
//! helper script run as a subprocess. The helper reads a base64-wrapped
//! JSON payload on stdin and emits `SYMBOLIC_*:` tagged lines on stdout.
//!
//! Grounded in `sympy_engine.py`: the helper is SymPy driven through
//! `python3 -c <script>`, subprocessed rather than imported in-process
//! because SymPy's timeout mechanism relies on `signal.SIGALRM`, which is
//! unsafe to install from a worker thread. Subprocessing the interpreter
//! restores re-entrancy and gives every call its own resource bound,
//! exactly like the external-binary engines.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::Engine as _;
use once_cell::sync::OnceCell;

use super::{binary_available, Capability, ComputeResult, Engine, EngineResult, TemplateDescriptor};
use crate::executor::SubprocessExecutor;
use crate::guard::GuardLimits;

const VALIDATE_SCRIPT: &str = r#"
import json, sys, base64
data = json.loads(base64.b64decode(sys.stdin.read().strip()).decode())
latex_str = data['latex']
try:
    from sympy.parsing.latex import parse_latex
    try:
        expr = parse_latex(latex_str)
    except Exception:
        expr = parse_latex(latex_str, backend="lark")
    import sympy
    if isinstance(expr, sympy.Eq):
        diff = sympy.simplify(expr.lhs - expr.rhs)
        is_valid = bool(diff == 0)
        simplified = str(sympy.simplify(expr.lhs)) + ' = ' + str(sympy.simplify(expr.rhs))
        parsed = str(expr.lhs) + ' = ' + str(expr.rhs)
    else:
        simplified = str(sympy.simplify(expr))
        parsed = str(expr)
        is_valid = True
    print('SYMBOLIC_VALID:' + ('1' if is_valid else '0'))
    print('SYMBOLIC_SIMPLIFIED:' + simplified)
    print('SYMBOLIC_PARSED:' + parsed)
except Exception as e:
    print('SYMBOLIC_ERROR:' + str(e))
"#;

const COMPUTE_SCRIPT: &str = r#"
import json, sys, base64
from sympy import *
x, y, z, t, a, b, c, n, k, m = symbols('x y z t a b c n k m')
_lcl = {'x': x, 'y': y, 'z': z, 't': t, 'a': a, 'b': b, 'c': c, 'n': n, 'k': k, 'm': m}
data = json.loads(base64.b64decode(sys.stdin.read().strip()).decode())
task = data['task']
inputs = data['inputs']
def _out(val):
    print('SYMBOLIC_RESULT:' + str(val).replace('\n', ' '))
try:
    if task == 'evaluate':
        expr = sympify(inputs['expression'], locals=_lcl)
        _out(N(expr))
    elif task == 'simplify':
        expr = sympify(inputs['expression'], locals=_lcl)
        _out(simplify(expr))
    elif task == 'solve':
        expr = sympify(inputs['equation'], locals=_lcl)
        v = _lcl.get(inputs.get('variable', 'x'), x)
        _out(solve(expr, v))
    elif task == 'factor':
        expr = sympify(inputs['expression'], locals=_lcl)
        _out(factor(expr))
    elif task == 'integrate':
        expr = sympify(inputs['expression'], locals=_lcl)
        v = _lcl.get(inputs.get('variable', 'x'), x)
        _out(integrate(expr, v))
    elif task == 'differentiate':
        expr = sympify(inputs['expression'], locals=_lcl)
        v = _lcl.get(inputs.get('variable', 'x'), x)
        _out(diff(expr, v))
    else:
        print('SYMBOLIC_ERROR:Unknown task: ' + task)
except Exception as e:
    print('SYMBOLIC_ERROR:' + str(e))
"#;

static TEMPLATES: &[(&str, TemplateDescriptor)] = &[
    (
        "evaluate",
        TemplateDescriptor {
            required_inputs: &["expression"],
            optional_inputs: &[],
            description: "Evaluate a mathematical expression numerically",
        },
    ),
    (
        "simplify",
        TemplateDescriptor {
            required_inputs: &["expression"],
            optional_inputs: &[],
            description: "Simplify a mathematical expression",
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
    (
        "factor",
        TemplateDescriptor {
            required_inputs: &["expression"],
            optional_inputs: &[],
            description: "Factor a polynomial expression",
        },
    ),
    (
        "integrate",
        TemplateDescriptor {
            required_inputs: &["expression"],
            optional_inputs: &["variable"],
            description: "Symbolic integration (default variable: x)",
        },
    ),
    (
        "differentiate",
        TemplateDescriptor {
            required_inputs: &["expression"],
            optional_inputs: &["variable"],
            description: "Symbolic differentiation (default variable: x)",
        },
    ),
];

fn b64_payload(value: &serde_json::Value) -> String {
    base64::engine::general_purpose::STANDARD.encode(value.to_string())
}

fn parse_tags(stdout: &str) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("SYMBOLIC_") {
            if let Some(colon) = rest.find(':') {
                tags.insert(rest[..colon].to_string(), rest[colon + 1..].to_string());
            }
        }
    }
    tags
}

pub struct SymbolicEngine {
    interpreter: String,
    timeout: Duration,
    executor: SubprocessExecutor,
    available: OnceCell<bool>,
}

impl SymbolicEngine {
    pub fn new(interpreter: String, timeout: Duration) -> Self {
        Self {
            executor: SubprocessExecutor::new(timeout, 64 * 1024),
            interpreter,
            timeout,
            available: OnceCell::new(),
        }
    }
}

impl Engine for SymbolicEngine {
    fn name(&self) -> &str {
        "symbolic"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Validate, Capability::Compute]
    }

    fn is_available(&self) -> bool {
        *self.available.get_or_init(|| binary_available(&self.interpreter))
    }

    fn description(&self) -> &'static str {
        "Validate and compute using a SymPy subprocess isolated from the dispatcher's threads"
    }

    fn version(&self) -> String {
        let outcome = self.executor.run(
            &[
                self.interpreter.clone(),
                "-c".to_string(),
                "import sympy; print(sympy.__version__)".to_string(),
            ],
            None,
            Some(Duration::from_secs(5)),
            Some(4096),
        );
        let version = outcome.stdout.trim();
        if outcome.returncode == 0 && !version.is_empty() {
            version.to_string()
        } else {
            "not installed".to_string()
        }
    }

    fn guard_limits(&self) -> GuardLimits {
        GuardLimits::new(500, true)
    }

    fn max_timeout(&self) -> Duration {
        self.timeout
    }

    fn templates(&self) -> &'static [(&'static str, TemplateDescriptor)] {
        TEMPLATES
    }

    fn validate(&self, expression: &str) -> EngineResult {
        let start = Instant::now();
        let payload = b64_payload(&serde_json::json!({ "latex": expression }));

        let outcome = self.executor.run(
            &[self.interpreter.clone(), "-c".to_string(), VALIDATE_SCRIPT.to_string()],
            Some(&payload),
            Some(self.timeout),
            Some(64 * 1024),
        );

        if outcome.timed_out {
            return EngineResult::failed(
                self.name(),
                format!("symbolic engine timed out after {}s", self.timeout.as_secs()),
                elapsed_ms(start),
            );
        }
        if outcome.returncode != 0 {
            return EngineResult::failed(
                self.name(),
                format!("symbolic engine exited with code {}", outcome.returncode),
                elapsed_ms(start),
            );
        }

        let tags = parse_tags(&outcome.stdout);
        if let Some(error) = tags.get("ERROR") {
            return EngineResult::failed(self.name(), error.clone(), elapsed_ms(start));
        }

        EngineResult {
            engine: self.name().to_string(),
            success: true,
            is_valid: tags.get("VALID").map(|v| v == "1"),
            simplified: tags.get("SIMPLIFIED").cloned(),
            original_parsed: tags.get("PARSED").cloned(),
            error: None,
            time_ms: elapsed_ms(start),
        }
    }

    fn execute_template(
        &self,
        _template: &str,
        inputs: &HashMap<String, String>,
        timeout: Duration,
    ) -> ComputeResult {
        let payload = b64_payload(&serde_json::json!({
            "task": _template,
            "inputs": inputs,
        }));

        let outcome = self.executor.run(
            &[self.interpreter.clone(), "-c".to_string(), COMPUTE_SCRIPT.to_string()],
            Some(&payload),
            Some(timeout),
            Some(64 * 1024),
        );

        if outcome.timed_out {
            return ComputeResult::error(
                self.name(),
                "TIMEOUT",
                format!("symbolic engine timed out after {}s", timeout.as_secs()),
                0,
            );
        }
        if outcome.returncode != 0 {
            return ComputeResult {
                engine: self.name().to_string(),
                success: false,
                time_ms: 0,
                result: None,
                stdout: Some(outcome.stdout),
                stderr: Some(outcome.stderr),
                error: Some(format!("symbolic engine exited with code {}", outcome.returncode)),
                error_code: Some("ENGINE_ERROR".to_string()),
            };
        }

        let tags = parse_tags(&outcome.stdout);
        if let Some(error) = tags.get("ERROR") {
            return ComputeResult {
                engine: self.name().to_string(),
                success: false,
                time_ms: 0,
                result: None,
                stdout: Some(outcome.stdout),
                stderr: Some(outcome.stderr),
                error: Some(error.clone()),
                error_code: Some("ENGINE_ERROR".to_string()),
            };
        }

        let value = tags.get("RESULT").cloned().unwrap_or_default();
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
    fn unavailable_without_interpreter() {
        let engine = SymbolicEngine::new("/no/such/python3".to_string(), Duration::from_secs(5));
        assert!(!engine.is_available());
        assert_eq!(engine.version(), "not installed");
    }

    #[test]
    fn parses_tagged_lines() {
        let tags = parse_tags("SYMBOLIC_VALID:1\nSYMBOLIC_SIMPLIFIED:x + 1\n");
        assert_eq!(tags.get("VALID").map(String::as_str), Some("1"));
        assert_eq!(tags.get("SIMPLIFIED").map(String::as_str), Some("x + 1"));
    }

    #[test]
    fn b64_payload_roundtrips_through_standard_base64() {
        let encoded = b64_payload(&serde_json::json!({"latex": "x+1"}));
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .expect("valid base64");
        let value: serde_json::Value = serde_json::from_slice(&decoded).expect("valid json");
        assert_eq!(value["latex"], "x+1");
    }
}
