//! Typed error enums for the dispatcher and wire adapter.
//!
//! Engine-plane failures (§7) are never `Err` values — they are carried as
//! `success=false` fields on `EngineResult`/`ComputeResult`. The types here
//! cover transport-shape errors only: malformed requests, unknown engines,
//! and conditions the wire adapter must turn into a non-200 response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Value};
use thiserror::Error;

/// Transport-shape errors, returned with a 4xx/5xx status and a `code`.
///
/// These never surface inside a per-engine result object (§7).
#[derive(Debug, Clone, Error)]
pub enum WireError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("unknown engine(s): {requested:?}")]
    UnknownEngine {
        requested: Vec<String>,
        available: Vec<String>,
    },

    #[error("no route for this path/method")]
    NotFound,

    #[error("no engines available for this request")]
    NoEngines,

    #[error("engine '{0}' is not available")]
    EngineUnavailable(String),

    #[error("engine '{0}' does not support {1}")]
    NotImplemented(String, &'static str),
}

impl WireError {
    /// The `code` field returned in the error body (§6, §7).
    pub fn code(&self) -> &'static str {
        match self {
            WireError::InvalidJson(_) => "INVALID_JSON",
            WireError::InvalidRequest(_) => "INVALID_REQUEST",
            WireError::UnknownEngine { .. } => "UNKNOWN_ENGINE",
            WireError::NotFound => "NOT_FOUND",
            WireError::NoEngines => "NO_ENGINES",
            WireError::EngineUnavailable(_) => "ENGINE_UNAVAILABLE",
            WireError::NotImplemented(_, _) => "NOT_IMPLEMENTED",
        }
    }

    /// HTTP status code this error maps to.
    pub fn status(&self) -> u16 {
        match self {
            WireError::InvalidJson(_) | WireError::InvalidRequest(_) => 400,
            WireError::NotImplemented(_, _) => 400,
            WireError::UnknownEngine { .. } => 422,
            WireError::NotFound => 404,
            WireError::NoEngines => 503,
            WireError::EngineUnavailable(_) => 503,
        }
    }

    /// Extra `details` payload for the error body, if any (e.g. the list of
    /// available engines alongside `UNKNOWN_ENGINE`).
    fn details(&self) -> Option<Value> {
        match self {
            WireError::UnknownEngine { available, .. } => Some(json!({ "available": available })),
            _ => None,
        }
    }
}

impl IntoResponse for WireError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = json!({ "error": self.to_string(), "code": self.code() });
        if let Some(details) = self.details() {
            body.as_object_mut().unwrap().insert("details".to_string(), details);
        }
        (status, Json(body)).into_response()
    }
}

/// Errors internal to the subprocess executor's job bookkeeping.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    #[error("job '{0}' not found")]
    UnknownJob(String),
}
