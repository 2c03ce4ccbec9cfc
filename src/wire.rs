//! Wire adapter (§6): translates the four public endpoints to dispatcher
//! calls, enforces the request-shape contract, and emits one structured
//! log line per request.
//!
//! Built on `axum`; every dispatcher call is blocking (a subprocess wait or
//! a blocking HTTP GET), so handlers hand it to `tokio::task::spawn_blocking`
//! rather than holding the async reactor thread (§2 ambient stack).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::dispatcher::{log_prefix, DispatchError, Dispatcher};
use crate::engine::ComputeRequest;
use crate::error::WireError;
use crate::preprocess::preprocess;

/// Maximum accepted expression length (§3 "Expression"): ~64 KB.
const MAX_EXPRESSION_LEN: usize = 64 * 1024;
const LOG_PREFIX_LEN: usize = 50;

pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub service_name: &'static str,
    pub version: &'static str,
    pub started_at: Instant,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/validate", post(handle_validate))
        .route("/compute", post(handle_compute))
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/engines", get(handle_engines))
        .fallback(handle_not_found)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_not_found() -> Response {
    WireError::NotFound.into_response()
}

// --- /validate --------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ValidateRequestWire {
    latex: Option<String>,
    engines: Option<Vec<String>>,
    consensus: Option<bool>,
}

#[derive(Debug, Serialize)]
struct EngineResultWire {
    engine: String,
    success: bool,
    is_valid: Option<bool>,
    simplified: Option<String>,
    original_parsed: Option<String>,
    error: Option<String>,
    time_ms: u64,
}

impl From<crate::engine::EngineResult> for EngineResultWire {
    fn from(r: crate::engine::EngineResult) -> Self {
        Self {
            engine: r.engine,
            success: r.success,
            is_valid: r.is_valid,
            simplified: r.simplified,
            original_parsed: r.original_parsed,
            error: r.error,
            time_ms: r.time_ms,
        }
    }
}

async fn handle_validate(State(state): State<Arc<AppState>>, body: axum::body::Bytes) -> Response {
    let request: ValidateRequestWire = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => return WireError::InvalidJson(err.to_string()).into_response(),
    };

    let Some(latex) = request.latex.filter(|s| !s.is_empty()) else {
        return WireError::InvalidRequest("latex field is required".to_string()).into_response();
    };
    if latex.len() > MAX_EXPRESSION_LEN {
        return WireError::InvalidRequest("latex exceeds maximum expression length".to_string()).into_response();
    }

    let consensus = request.consensus.unwrap_or(false);
    let selection = state.dispatcher.select_validate_engines(request.engines.as_deref(), consensus);
    let (selected, mode) = match selection {
        Ok(pair) => pair,
        Err(DispatchError::UnknownEngine(unknown)) => {
            return WireError::UnknownEngine {
                requested: unknown,
                available: state.dispatcher.available_names(),
            }
            .into_response();
        }
        Err(_) => unreachable!("select_validate_engines only returns UnknownEngine as an error"),
    };

    if selected.is_empty() {
        return WireError::NoEngines.into_response();
    }

    let start = Instant::now();
    let dispatcher = Arc::clone(&state.dispatcher);
    let preprocessed = preprocess(&latex);
    let preprocessed_for_task = preprocessed.clone();
    let results = tokio::task::spawn_blocking(move || dispatcher.validate(&selected, &preprocessed_for_task))
        .await
        .expect("validate worker task panicked");

    let elapsed_ms = start.elapsed().as_millis() as u64;
    let success_count = results.iter().filter(|r| r.success).count();

    tracing::info!(
        endpoint = "validate",
        latex_prefix = log_prefix(&latex, LOG_PREFIX_LEN),
        engines = results.len(),
        success = success_count,
        time_ms = elapsed_ms,
        consensus,
        selection = ?mode,
        "request completed"
    );

    let response = json!({
        "results": results.into_iter().map(EngineResultWire::from).collect::<Vec<_>>(),
        "consensus": consensus,
        "latex_preprocessed": preprocessed,
        "time_ms": elapsed_ms,
    });
    (StatusCode::OK, Json(response)).into_response()
}

// --- /compute -----------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ComputeRequestWire {
    engine: Option<String>,
    task_type: Option<String>,
    template: Option<String>,
    inputs: Option<HashMap<String, String>>,
    timeout_s: Option<f64>,
}

async fn handle_compute(State(state): State<Arc<AppState>>, body: axum::body::Bytes) -> Response {
    let wire: ComputeRequestWire = match serde_json::from_slice(&body) {
        Ok(wire) => wire,
        Err(err) => return WireError::InvalidJson(err.to_string()).into_response(),
    };

    let Some(engine) = wire.engine.filter(|s| !s.is_empty()) else {
        return WireError::InvalidRequest("engine field is required".to_string()).into_response();
    };
    if wire.task_type.as_deref() != Some("template") {
        return WireError::InvalidRequest("task_type must be 'template'".to_string()).into_response();
    }
    let Some(template) = wire.template.filter(|s| !s.is_empty()) else {
        return WireError::InvalidRequest("template field is required".to_string()).into_response();
    };
    let timeout_s = wire.timeout_s.unwrap_or(5.0);
    if !(timeout_s > 0.0) {
        return WireError::InvalidRequest("timeout_s must be a positive number".to_string()).into_response();
    }

    let request = ComputeRequest {
        engine: engine.clone(),
        template: template.clone(),
        inputs: wire.inputs.unwrap_or_default(),
        timeout_s,
    };

    let start = Instant::now();
    let dispatcher = Arc::clone(&state.dispatcher);
    let request_for_task = request.clone();
    let outcome = tokio::task::spawn_blocking(move || dispatcher.compute(&request_for_task))
        .await
        .expect("compute worker task panicked");

    let elapsed_ms = start.elapsed().as_millis() as u64;

    let result = match outcome {
        Ok(result) => result,
        Err(DispatchError::UnknownEngine(_)) => {
            return WireError::UnknownEngine {
                requested: vec![engine],
                available: state.dispatcher.available_names(),
            }
            .into_response();
        }
        Err(DispatchError::NotImplemented(name, what)) => {
            return WireError::NotImplemented(name, what).into_response();
        }
        Err(DispatchError::EngineUnavailable(name)) => {
            return WireError::EngineUnavailable(name).into_response();
        }
        Err(DispatchError::NoEngines) => {
            return WireError::NoEngines.into_response();
        }
    };

    tracing::info!(
        endpoint = "compute",
        engine = %engine,
        template = %template,
        success = result.success,
        time_ms = elapsed_ms,
        "request completed"
    );

    let response = json!({
        "engine": result.engine,
        "success": result.success,
        "time_ms": result.time_ms,
        "result": result.result,
        "stdout": result.stdout,
        "stderr": result.stderr,
        "error": result.error,
        "error_code": result.error_code,
    });
    (StatusCode::OK, Json(response)).into_response()
}

// --- /health, /status, /engines ------------------------------------------

async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    let entries = state.dispatcher.entries();
    let available = entries.iter().filter(|e| e.engine.is_available()).count();
    let body = json!({
        "status": "ok",
        "service": state.service_name,
        "uptime_seconds": state.started_at.elapsed().as_secs_f64(),
        "engines_total": entries.len(),
        "engines_available": available,
    });
    (StatusCode::OK, Json(body)).into_response()
}

async fn handle_status(State(state): State<Arc<AppState>>) -> Response {
    let entries = state.dispatcher.entries();
    let mut engines = serde_json::Map::new();
    for entry in entries {
        engines.insert(
            entry.name.clone(),
            json!({
                "available": entry.engine.is_available(),
                "version": entry.engine.version(),
            }),
        );
    }
    let body = json!({
        "service": state.service_name,
        "version": state.version,
        "uptime_seconds": state.started_at.elapsed().as_secs_f64(),
        "default_engine": state.dispatcher.default_engine(),
        "engines": engines,
    });
    (StatusCode::OK, Json(body)).into_response()
}

async fn handle_engines(State(state): State<Arc<AppState>>) -> Response {
    let entries = state.dispatcher.entries();
    let engines: Vec<Value> = entries
        .iter()
        .map(|entry| {
            let mut value = json!({
                "name": entry.name,
                "available": entry.engine.is_available(),
                "version": entry.engine.version(),
                "capabilities": entry.engine.capabilities().iter().map(|c| c.as_str()).collect::<Vec<_>>(),
                "description": entry.engine.description(),
            });
            if let Some(reason) = entry.engine.availability_reason() {
                value.as_object_mut().unwrap().insert("availability_reason".to_string(), json!(reason));
            }
            value
        })
        .collect();
    (StatusCode::OK, Json(json!({ "engines": engines }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Capability, ComputeResult, Engine, EngineResult};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct StubEngine {
        name: &'static str,
        caps: &'static [Capability],
    }

    impl Engine for StubEngine {
        fn name(&self) -> &str {
            self.name
        }
        fn capabilities(&self) -> &'static [Capability] {
            self.caps
        }
        fn is_available(&self) -> bool {
            true
        }
        fn version(&self) -> String {
            "1.0".to_string()
        }
        fn validate(&self, _expression: &str) -> EngineResult {
            EngineResult::ok(self.name, Some(true), Some("ok".to_string()), 1)
        }
        fn execute_template(
            &self,
            _template: &str,
            _inputs: &HashMap<String, String>,
            _timeout: std::time::Duration,
        ) -> ComputeResult {
            let mut result = HashMap::new();
            result.insert("value".to_string(), "42".to_string());
            ComputeResult::ok(self.name, result, String::new(), String::new(), 0)
        }
        fn templates(&self) -> &'static [(&'static str, crate::engine::TemplateDescriptor)] {
            &[(
                "echo",
                crate::engine::TemplateDescriptor {
                    required_inputs: &[],
                    optional_inputs: &[],
                    description: "echo",
                },
            )]
        }
    }

    fn test_state() -> Arc<AppState> {
        let engines: Vec<(String, Arc<dyn Engine>)> = vec![(
            "stub".to_string(),
            Arc::new(StubEngine { name: "stub", caps: &[Capability::Validate, Capability::Compute] }) as Arc<dyn Engine>,
        )];
        let dispatcher = Arc::new(Dispatcher::new(engines, None));
        Arc::new(AppState {
            dispatcher,
            service_name: "cas-dispatcher",
            version: "test",
            started_at: Instant::now(),
        })
    }

    async fn post(state: Arc<AppState>, path: &str, body: Value) -> Response {
        router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn validate_unknown_engine_returns_422_s2() {
        let response = post(test_state(), "/validate", json!({"latex": "x^2", "engines": ["nosuch"]})).await;
        assert_eq!(response.status(), 422);
    }

    #[tokio::test]
    async fn validate_no_engines_available_returns_503_s3() {
        let dispatcher = Arc::new(Dispatcher::new(vec![], None));
        let state = Arc::new(AppState {
            dispatcher,
            service_name: "cas-dispatcher",
            version: "test",
            started_at: Instant::now(),
        });
        let response = post(state, "/validate", json!({"latex": "x^2"})).await;
        assert_eq!(response.status(), 503);
    }

    #[tokio::test]
    async fn compute_missing_engine_returns_400_s4() {
        let response = post(test_state(), "/compute", json!({"task_type": "template", "template": "echo"})).await;
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn compute_engine_lacks_capability_returns_400_s5() {
        let engines: Vec<(String, Arc<dyn Engine>)> =
            vec![("validate_only".to_string(), Arc::new(StubEngine { name: "validate_only", caps: &[Capability::Validate] }) as Arc<dyn Engine>)];
        let dispatcher = Arc::new(Dispatcher::new(engines, None));
        let state = Arc::new(AppState { dispatcher, service_name: "cas-dispatcher", version: "test", started_at: Instant::now() });
        let response = post(
            state,
            "/compute",
            json!({"engine": "validate_only", "task_type": "template", "template": "echo"}),
        )
        .await;
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn compute_unknown_template_returns_200_with_error_code_s6() {
        let response = post(
            test_state(),
            "/compute",
            json!({"engine": "stub", "task_type": "template", "template": "nonexistent"}),
        )
        .await;
        assert_eq!(response.status(), 200);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error_code"], "UNKNOWN_TEMPLATE");
    }

    #[tokio::test]
    async fn health_reports_engine_tally() {
        let response = router(test_state())
            .oneshot(Request::builder().method("GET").uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["engines_total"], 1);
        assert_eq!(body["engines_available"], 1);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let response = router(test_state())
            .oneshot(Request::builder().method("GET").uri("/nosuchroute").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }
}
