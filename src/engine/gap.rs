//! GAP computational-group-theory engine (§4.4.2): compute-only,
//! template-only. Grounded verbatim in `gap_engine.py` — three fixed
//! templates that splice a group-theoretic expression directly into a
//! `Print(...)` statement, relying on the guard as the sole defense since
//! GAP inputs are raw syntax rather than quoted literals.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;

use super::{binary_available, Capability, ComputeResult, Engine, TemplateDescriptor};
use crate::executor::SubprocessExecutor;
use crate::guard::GuardLimits;

static TEMPLATES: &[(&str, TemplateDescriptor)] = &[
    (
        "group_order",
        TemplateDescriptor {
            required_inputs: &["group_expr"],
            optional_inputs: &[],
            description: "Compute the order (size) of a group",
        },
    ),
    (
        "is_abelian",
        TemplateDescriptor {
            required_inputs: &["group_expr"],
            optional_inputs: &[],
            description: "Check if a group is abelian",
        },
    ),
    (
        "center_size",
        TemplateDescriptor {
            required_inputs: &["group_expr"],
            optional_inputs: &[],
            description: "Compute the size of the center of a group",
        },
    ),
];

pub struct GapEngine {
    path: String,
    timeout: Duration,
    executor: SubprocessExecutor,
    probe: OnceCell<(bool, String)>,
}

impl GapEngine {
    pub fn new(path: String, timeout: Duration) -> Self {
        Self {
            executor: SubprocessExecutor::new(timeout, 64 * 1024),
            path,
            timeout,
            probe: OnceCell::new(),
        }
    }

    /// Resolve the binary once and cache the result with a version probe,
    /// mirroring `GapEngine.is_available`'s cached `_available` field.
    fn probe(&self) -> &(bool, String) {
        self.probe.get_or_init(|| {
            if !binary_available(&self.path) {
                return (false, "unknown".to_string());
            }
            let outcome = self.executor.run(
                &[self.path.clone(), "-q".to_string(), "-b".to_string()],
                Some("Print(GAPInfo.Version);;\n"),
                Some(Duration::from_secs(5)),
                Some(4096),
            );
            let version = if outcome.returncode == 0 && !outcome.stdout.trim().is_empty() {
                outcome.stdout.trim().to_string()
            } else {
                "unknown".to_string()
            };
            (true, version)
        })
    }
}

impl Engine for GapEngine {
    fn name(&self) -> &str {
        "gap"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Compute]
    }

    fn is_available(&self) -> bool {
        self.probe().0
    }

    fn version(&self) -> String {
        self.probe().1.clone()
    }

    fn guard_limits(&self) -> GuardLimits {
        GuardLimits::new(200, true)
    }

    fn description(&self) -> &'static str {
        "Group-theoretic queries (order, abelian check, center size) via the GAP CLI"
    }

    fn max_timeout(&self) -> Duration {
        self.timeout
    }

    fn templates(&self) -> &'static [(&'static str, TemplateDescriptor)] {
        TEMPLATES
    }

    // validate is intentionally left at the default NOT_IMPLEMENTED-shaped
    // result: GAP does not validate LaTeX formulas (§4.4, per-engine note).

    fn execute_template(
        &self,
        template: &str,
        inputs: &HashMap<String, String>,
        timeout: Duration,
    ) -> ComputeResult {
        let start = Instant::now();
        let group_expr = &inputs["group_expr"];
        let code = match template {
            "group_order" => format!("Print(Size({group_expr}));;\n"),
            "is_abelian" => format!("Print(IsAbelian({group_expr}));;\n"),
            "center_size" => format!("Print(Size(Center({group_expr})));;\n"),
            _ => unreachable!("template existence is checked by the shared pre-amble"),
        };

        let outcome = self.executor.run(
            &[self.path.clone(), "-q".to_string(), "-b".to_string()],
            Some(code.as_str()),
            Some(timeout),
            Some(64 * 1024),
        );

        if outcome.timed_out {
            return ComputeResult::error(
                self.name(),
                "TIMEOUT",
                format!("GAP timed out after {}s", timeout.as_secs()),
                elapsed_ms(start),
            );
        }
        if outcome.returncode != 0 {
            return ComputeResult {
                engine: self.name().to_string(),
                success: false,
                time_ms: elapsed_ms(start),
                result: None,
                stdout: Some(outcome.stdout),
                stderr: Some(outcome.stderr),
                error: Some(format!("GAP exited with code {}", outcome.returncode)),
                error_code: Some("ENGINE_ERROR".to_string()),
            };
        }

        let mut result = HashMap::new();
        result.insert("value".to_string(), outcome.stdout.trim().to_string());
        ComputeResult::ok(self.name(), result, outcome.stdout, outcome.stderr, elapsed_ms(start))
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_returns_not_implemented_by_default() {
        let engine = GapEngine::new("/no/such/gap-binary".to_string(), Duration::from_secs(5));
        let result = engine.validate("x");
        assert!(!result.success);
    }

    #[test]
    fn unavailable_binary_reports_unavailable() {
        let engine = GapEngine::new("/no/such/gap-binary".to_string(), Duration::from_secs(5));
        assert!(!engine.is_available());
        assert_eq!(engine.version(), "unknown");
    }

    #[test]
    fn missing_group_expr_is_caught_by_shared_preamble() {
        let engine = GapEngine::new("/no/such/gap-binary".to_string(), Duration::from_secs(5));
        let request = crate::engine::ComputeRequest {
            engine: "gap".to_string(),
            template: "group_order".to_string(),
            inputs: HashMap::new(),
            timeout_s: 5.0,
        };
        let result = engine.compute(&request);
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("ENGINE_UNAVAILABLE"));
    }
}
