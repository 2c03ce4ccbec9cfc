//! The engine abstraction (§4.4): the uniform contract every back-end CAS
//! engine satisfies, plus the shared template-dispatch pre-amble (§4.4.4)
//! that lets each concrete engine supply only a template table and a set
//! of generators.

pub mod conversion;
pub mod gap;
pub mod maxima;
pub mod octave;
pub mod symbolic;
pub mod wolfram;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::guard::{self, GuardLimits};

/// A capability an engine may declare (§3 "Engine descriptor").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Validate,
    Compute,
    Remote,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Validate => "validate",
            Capability::Compute => "compute",
            Capability::Remote => "remote",
        }
    }
}

/// Result of a `/validate` call against one engine (§3 "Engine result").
#[derive(Debug, Clone)]
pub struct EngineResult {
    pub engine: String,
    pub success: bool,
    pub is_valid: Option<bool>,
    pub simplified: Option<String>,
    pub original_parsed: Option<String>,
    pub error: Option<String>,
    pub time_ms: u64,
}

impl EngineResult {
    pub fn ok(engine: &str, is_valid: Option<bool>, simplified: Option<String>, time_ms: u64) -> Self {
        Self {
            engine: engine.to_string(),
            success: true,
            is_valid,
            simplified,
            original_parsed: None,
            error: None,
            time_ms,
        }
    }

    pub fn failed(engine: &str, error: impl Into<String>, time_ms: u64) -> Self {
        Self {
            engine: engine.to_string(),
            success: false,
            is_valid: None,
            simplified: None,
            original_parsed: None,
            error: Some(error.into()),
            time_ms,
        }
    }

    pub fn not_implemented(engine: &str) -> Self {
        Self::failed(engine, "engine does not support validate", 0)
    }
}

/// A `/compute` request routed to exactly one engine (§3 "Compute request").
#[derive(Debug, Clone)]
pub struct ComputeRequest {
    pub engine: String,
    pub template: String,
    pub inputs: HashMap<String, String>,
    pub timeout_s: f64,
}

/// Result of a `/compute` call (§3 "Compute result").
#[derive(Debug, Clone, Default)]
pub struct ComputeResult {
    pub engine: String,
    pub success: bool,
    pub time_ms: u64,
    pub result: Option<HashMap<String, String>>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<String>,
}

impl ComputeResult {
    pub fn ok(engine: &str, value: HashMap<String, String>, stdout: String, stderr: String, time_ms: u64) -> Self {
        Self {
            engine: engine.to_string(),
            success: true,
            time_ms,
            result: Some(value),
            stdout: Some(stdout),
            stderr: Some(stderr),
            error: None,
            error_code: None,
        }
    }

    pub fn error(engine: &str, error_code: &'static str, error: impl Into<String>, time_ms: u64) -> Self {
        Self {
            engine: engine.to_string(),
            success: false,
            time_ms,
            result: None,
            stdout: None,
            stderr: None,
            error: Some(error.into()),
            error_code: Some(error_code.to_string()),
        }
    }
}

/// Per-template contract: required/optional input keys and a description.
/// The generator itself lives in the concrete engine's `execute_template`.
#[derive(Debug, Clone)]
pub struct TemplateDescriptor {
    pub required_inputs: &'static [&'static str],
    pub optional_inputs: &'static [&'static str],
    pub description: &'static str,
}

/// The uniform contract every back-end satisfies (§4.4).
///
/// `compute` has a default implementation that runs the shared pre-amble
/// of §4.4.4 (capability → availability → template lookup → required-input
/// check → guard check → timeout clamp) and delegates generation/execution/
/// parsing to `execute_template`. Concrete engines override `validate`
/// directly, since validate's equation-mode logic is engine-specific
/// rather than template-shaped.
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;
    fn capabilities(&self) -> &'static [Capability];
    fn is_available(&self) -> bool;
    fn version(&self) -> String;

    fn availability_reason(&self) -> Option<String> {
        None
    }

    /// One-line human description for `/engines` (§6), mirroring the
    /// source's use of each engine class's docstring.
    fn description(&self) -> &'static str {
        ""
    }

    fn templates(&self) -> &'static [(&'static str, TemplateDescriptor)] {
        &[]
    }

    fn guard_limits(&self) -> GuardLimits {
        GuardLimits::new(500, true)
    }

    fn max_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    fn validate(&self, _expression: &str) -> EngineResult {
        EngineResult::not_implemented(self.name())
    }

    fn compute(&self, request: &ComputeRequest) -> ComputeResult {
        let start = Instant::now();

        if !self.capabilities().contains(&Capability::Compute) {
            return ComputeResult::error(
                self.name(),
                "NOT_IMPLEMENTED",
                "engine does not support compute",
                0,
            );
        }
        if !self.is_available() {
            return ComputeResult::error(
                self.name(),
                "ENGINE_UNAVAILABLE",
                format!("engine '{}' is not available", self.name()),
                0,
            );
        }

        let Some((_, descriptor)) = self
            .templates()
            .iter()
            .find(|(name, _)| *name == request.template)
        else {
            return ComputeResult::error(
                self.name(),
                "UNKNOWN_TEMPLATE",
                format!("unknown template '{}'", request.template),
                0,
            );
        };

        for key in descriptor.required_inputs {
            if !request.inputs.contains_key(*key) {
                return ComputeResult::error(
                    self.name(),
                    "MISSING_INPUT",
                    format!("missing required input '{key}'"),
                    0,
                );
            }
        }

        if let Some(bad_key) = guard::first_unsafe_key(&request.inputs, self.guard_limits()) {
            return ComputeResult::error(
                self.name(),
                "INVALID_INPUT",
                format!("input '{bad_key}' failed the safety guard"),
                0,
            );
        }

        let clamped = request.timeout_s.min(self.max_timeout().as_secs_f64()).max(0.001);
        let timeout = Duration::from_secs_f64(clamped);
        let mut result = self.execute_template(&request.template, &request.inputs, timeout);
        result.time_ms = start.elapsed().as_millis() as u64;
        result
    }

    /// Generate, execute, and parse one template invocation. Only reached
    /// once the shared pre-amble has passed: `template` is guaranteed to
    /// be present in `self.templates()` and every required input present
    /// and guard-clean.
    fn execute_template(
        &self,
        _template: &str,
        _inputs: &HashMap<String, String>,
        _timeout: Duration,
    ) -> ComputeResult {
        ComputeResult::error(self.name(), "NOT_IMPLEMENTED", "template execution not implemented", 0)
    }
}

/// Cheap availability probe for a binary-backed engine: resolves `path`
/// directly if it contains a path separator, otherwise searches `PATH` —
/// the Rust equivalent of `shutil.which` used by the Python originals.
pub fn binary_available(path: &str) -> bool {
    if path.contains('/') {
        return std::path::Path::new(path).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(path).is_file()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubEngine;

    impl Engine for StubEngine {
        fn name(&self) -> &str {
            "stub"
        }
        fn capabilities(&self) -> &'static [Capability] {
            &[Capability::Validate]
        }
        fn is_available(&self) -> bool {
            true
        }
        fn version(&self) -> String {
            "0".to_string()
        }
    }

    #[test]
    fn default_compute_is_not_implemented_without_capability() {
        let engine = StubEngine;
        let request = ComputeRequest {
            engine: "stub".to_string(),
            template: "anything".to_string(),
            inputs: HashMap::new(),
            timeout_s: 5.0,
        };
        let result = engine.compute(&request);
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("NOT_IMPLEMENTED"));
    }

    #[test]
    fn default_validate_is_not_implemented() {
        let engine = StubEngine;
        let result = engine.validate("x");
        assert!(!result.success);
    }
}
