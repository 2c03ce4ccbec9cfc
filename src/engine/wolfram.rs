//! WolframAlpha remote HTTP oracle engine (§4.4.3): compute-only, `remote`
//! capability, available iff an API key was configured.
//!
//! Grounded in `wolframalpha_engine.py`, retargeted at `reqwest::blocking`
//! (the same blocking HTTP client style `neo-plugins`' Salesforce connector
//! uses for its synchronous outbound calls) since every engine call in this
//! dispatcher is a blocking operation handed to `spawn_blocking` by the
//! wire adapter.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::{Capability, ComputeResult, Engine, EngineResult, TemplateDescriptor};
use crate::guard::GuardLimits;

const API_URL: &str = "https://api.wolframalpha.com/v2/query";

static TEMPLATES: &[(&str, TemplateDescriptor)] = &[
    (
        "evaluate",
        TemplateDescriptor {
            required_inputs: &["expression"],
            optional_inputs: &[],
            description: "Evaluate a mathematical expression",
        },
    ),
    (
        "solve",
        TemplateDescriptor {
            required_inputs: &["equation"],
            optional_inputs: &[],
            description: "Solve an equation",
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
];

fn build_query(template: &str, inputs: &HashMap<String, String>) -> String {
    match template {
        "evaluate" => inputs["expression"].clone(),
        "solve" => format!("solve {}", inputs["equation"]),
        "simplify" => format!("simplify {}", inputs["expression"]),
        _ => unreachable!("template existence is checked by the shared pre-amble"),
    }
}

pub struct WolframEngine {
    app_id: String,
    timeout: Duration,
    client: reqwest::blocking::Client,
}

impl WolframEngine {
    pub fn new(app_id: String, timeout: Duration) -> Self {
        Self {
            app_id,
            timeout,
            client: reqwest::blocking::Client::new(),
        }
    }

    fn call_api(&self, query: &str, timeout: Duration, start: Instant) -> ComputeResult {
        let response = match self
            .client
            .get(API_URL)
            .query(&[
                ("input", query),
                ("appid", self.app_id.as_str()),
                ("format", "plaintext"),
                ("output", "json"),
            ])
            .timeout(timeout)
            .send()
        {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return ComputeResult::error(
                    self.name(),
                    "TIMEOUT",
                    format!("WolframAlpha timed out after {}s", timeout.as_secs()),
                    elapsed_ms(start),
                );
            }
            Err(err) => {
                return ComputeResult::error(
                    self.name(),
                    "NETWORK_ERROR",
                    format!("network error: {err}"),
                    elapsed_ms(start),
                );
            }
        };

        let status = response.status();
        if status.as_u16() == 403 {
            return ComputeResult::error(
                self.name(),
                "AUTH_ERROR",
                "WolframAlpha API: invalid or expired AppID",
                elapsed_ms(start),
            );
        }
        if !status.is_success() {
            return ComputeResult::error(
                self.name(),
                "REMOTE_ERROR",
                format!("WolframAlpha API HTTP {}", status.as_u16()),
                elapsed_ms(start),
            );
        }

        let body: serde_json::Value = match response.json() {
            Ok(body) => body,
            Err(err) => {
                return ComputeResult::error(
                    self.name(),
                    "REMOTE_ERROR",
                    format!("invalid response body: {err}"),
                    elapsed_ms(start),
                );
            }
        };

        self.parse_response(&body, elapsed_ms(start))
    }

    fn parse_response(&self, body: &serde_json::Value, time_ms: u64) -> ComputeResult {
        let query_result = &body["queryresult"];
        if !query_result["success"].as_bool().unwrap_or(false) {
            return ComputeResult {
                engine: self.name().to_string(),
                success: false,
                time_ms,
                result: None,
                stdout: Some(query_result["tips"].to_string()),
                stderr: None,
                error: Some("WolframAlpha could not interpret the query".to_string()),
                error_code: Some("QUERY_FAILED".to_string()),
            };
        }

        let pods = query_result["pods"].as_array().cloned().unwrap_or_default();

        let preferred = ["Result", "DecimalApproximation", "Solution"];
        let mut result_text: Option<String> = None;
        for wanted in preferred {
            if let Some(text) = pods
                .iter()
                .find(|pod| pod["id"].as_str() == Some(wanted))
                .and_then(|pod| pod["subpods"][0]["plaintext"].as_str())
            {
                result_text = Some(text.to_string());
                break;
            }
        }

        if result_text.is_none() {
            result_text = pods
                .iter()
                .find(|pod| pod["id"].as_str() != Some("Input"))
                .and_then(|pod| pod["subpods"][0]["plaintext"].as_str())
                .filter(|text| !text.is_empty())
                .map(str::to_string);
        }

        let Some(result_text) = result_text else {
            return ComputeResult::error(
                self.name(),
                "NO_RESULT",
                "No result found in WolframAlpha response",
                time_ms,
            );
        };

        let mut result = HashMap::new();
        result.insert("value".to_string(), result_text.clone());
        ComputeResult {
            engine: self.name().to_string(),
            success: true,
            time_ms,
            result: Some(result),
            stdout: Some(result_text),
            stderr: None,
            error: None,
            error_code: None,
        }
    }
}

impl Engine for WolframEngine {
    fn name(&self) -> &str {
        "wolfram"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[Capability::Compute, Capability::Remote]
    }

    fn is_available(&self) -> bool {
        !self.app_id.is_empty()
    }

    fn availability_reason(&self) -> Option<String> {
        if self.app_id.is_empty() {
            Some("missing CAS_WOLFRAMALPHA_APPID".to_string())
        } else {
            None
        }
    }

    fn version(&self) -> String {
        "v2-api".to_string()
    }

    fn guard_limits(&self) -> GuardLimits {
        GuardLimits::new(500, true)
    }

    fn description(&self) -> &'static str {
        "Remote compute oracle backed by the WolframAlpha Full Results API"
    }

    fn max_timeout(&self) -> Duration {
        self.timeout
    }

    fn templates(&self) -> &'static [(&'static str, TemplateDescriptor)] {
        TEMPLATES
    }

    // WolframAlpha is not part of the validation consensus; the default
    // NOT_IMPLEMENTED-shaped `validate` result applies (§4.4.3).
    fn validate(&self, _expression: &str) -> EngineResult {
        EngineResult::failed(self.name(), "WolframAlpha is not part of the validation consensus", 0)
    }

    fn execute_template(
        &self,
        template: &str,
        inputs: &HashMap<String, String>,
        timeout: Duration,
    ) -> ComputeResult {
        let start = Instant::now();
        let query = build_query(template, inputs);
        self.call_api(&query, timeout, start)
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_without_app_id() {
        let engine = WolframEngine::new(String::new(), Duration::from_secs(10));
        assert!(!engine.is_available());
        assert_eq!(
            engine.availability_reason().as_deref(),
            Some("missing CAS_WOLFRAMALPHA_APPID")
        );
    }

    #[test]
    fn available_with_app_id() {
        let engine = WolframEngine::new("test-key".to_string(), Duration::from_secs(10));
        assert!(engine.is_available());
        assert!(engine.availability_reason().is_none());
    }

    #[test]
    fn build_query_formats_templates() {
        let mut inputs = HashMap::new();
        inputs.insert("expression".to_string(), "2+2".to_string());
        assert_eq!(build_query("evaluate", &inputs), "2+2");
        assert_eq!(build_query("simplify", &inputs), "simplify 2+2");

        let mut eq_inputs = HashMap::new();
        eq_inputs.insert("equation".to_string(), "x^2=4".to_string());
        assert_eq!(build_query("solve", &eq_inputs), "solve x^2=4");
    }

    #[test]
    fn parse_response_prefers_result_pod() {
        let engine = WolframEngine::new("key".to_string(), Duration::from_secs(10));
        let body = serde_json::json!({
            "queryresult": {
                "success": true,
                "pods": [
                    {"id": "Input", "subpods": [{"plaintext": "2 + 2"}]},
                    {"id": "Result", "subpods": [{"plaintext": "4"}]},
                ]
            }
        });
        let result = engine.parse_response(&body, 12);
        assert!(result.success);
        assert_eq!(result.result.unwrap().get("value"), Some(&"4".to_string()));
    }

    #[test]
    fn parse_response_falls_back_to_first_non_input_pod() {
        let engine = WolframEngine::new("key".to_string(), Duration::from_secs(10));
        let body = serde_json::json!({
            "queryresult": {
                "success": true,
                "pods": [
                    {"id": "Input", "subpods": [{"plaintext": "2 + 2"}]},
                    {"id": "SomeOtherPod", "subpods": [{"plaintext": "four"}]},
                ]
            }
        });
        let result = engine.parse_response(&body, 12);
        assert!(result.success);
        assert_eq!(result.result.unwrap().get("value"), Some(&"four".to_string()));
    }

    #[test]
    fn parse_response_reports_query_failed() {
        let engine = WolframEngine::new("key".to_string(), Duration::from_secs(10));
        let body = serde_json::json!({"queryresult": {"success": false, "tips": {}}});
        let result = engine.parse_response(&body, 5);
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("QUERY_FAILED"));
    }

    #[test]
    fn parse_response_reports_no_result() {
        let engine = WolframEngine::new("key".to_string(), Duration::from_secs(10));
        let body = serde_json::json!({"queryresult": {"success": true, "pods": []}});
        let result = engine.parse_response(&body, 5);
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("NO_RESULT"));
    }
}
