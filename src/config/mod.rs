//! Configuration: CLI argument parsing plus environment variables (§6).
//!
//! This is deliberately thin — the dispatcher's configuration surface is a
//! handful of per-engine paths/timeouts, a port, a log level, and an
//! optional default-engine override, all handled by [`cli::Cli`].

pub mod cli;

pub use cli::Cli;
