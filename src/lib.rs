//! cas-dispatcher — multi-engine computer algebra orchestration service.
//!
//! The dispatcher maintains an engine registry and capability model,
//! parallelizes validation across available engines with per-engine
//! isolation, executes template-driven compute requests in sandboxed
//! subprocesses with strict timeouts and output caps, and sanitizes and
//! normalizes expression input before any engine sees it.
//!
//! # Architecture
//!
//! - **Preprocessor**: pure LaTeX-to-canonical-form normalization.
//! - **Input guard**: per-value safety predicate for template inputs.
//! - **Subprocess executor**: timeout- and output-capped command runner
//!   with a tracked async job table.
//! - **Engine abstraction**: the uniform contract every back-end CAS
//!   engine satisfies, plus concrete engines (`symbolic`, `maxima`,
//!   `octave`, `gap`, `wolfram`).
//! - **Dispatcher**: registry, engine selection, bounded-concurrency
//!   parallel validate, single-engine compute routing.
//! - **Wire adapter**: the `axum` router translating the public HTTP
//!   endpoints to dispatcher calls.

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod executor;
pub mod guard;
pub mod preprocess;
pub mod wire;

pub use config::Cli;
pub use dispatcher::Dispatcher;
pub use engine::Engine;

/// Result type used throughout cas-dispatcher.
pub type Result<T> = anyhow::Result<T>;
