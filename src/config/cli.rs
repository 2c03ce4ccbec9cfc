//! CLI argument parsing via `clap`. Every flag mirrors an environment
//! variable from §6's Configuration list (`CAS_PORT`, per-engine
//! `*_PATH`/`*_TIMEOUT`, `CAS_WOLFRAMALPHA_APPID`, `CAS_LOG_LEVEL`,
//! `CAS_DEFAULT_ENGINE`), so every setting is discoverable via `--help`
//! and settable either way.

use clap::Parser;

fn default_symbolic_timeout() -> u64 {
    15
}

fn default_maxima_timeout() -> u64 {
    15
}

fn default_octave_timeout() -> u64 {
    15
}

fn default_gap_timeout() -> u64 {
    30
}

fn default_wolframalpha_timeout() -> u64 {
    10
}

/// cas-dispatcher — multi-engine computer algebra orchestration service.
#[derive(Parser, Debug, Clone)]
#[command(name = "cas-dispatcher")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Port the wire adapter listens on.
    #[arg(long, env = "CAS_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Python interpreter used by the in-process symbolic engine.
    #[arg(long, env = "CAS_SYMBOLIC_INTERPRETER", default_value = "python3")]
    pub symbolic_interpreter: String,

    /// Wall-clock timeout (seconds) for the symbolic engine.
    #[arg(long, env = "CAS_SYMBOLIC_TIMEOUT", default_value_t = default_symbolic_timeout())]
    pub symbolic_timeout: u64,

    /// Path to the Maxima binary (resolved on PATH if no `/`).
    #[arg(long, env = "CAS_MAXIMA_PATH", default_value = "maxima")]
    pub maxima_path: String,

    /// Wall-clock timeout (seconds) for the Maxima engine.
    #[arg(long, env = "CAS_MAXIMA_TIMEOUT", default_value_t = default_maxima_timeout())]
    pub maxima_timeout: u64,

    /// Path to the Octave binary.
    #[arg(long, env = "CAS_OCTAVE_PATH", default_value = "octave")]
    pub octave_path: String,

    /// Wall-clock timeout (seconds) for the Octave engine.
    #[arg(long, env = "CAS_OCTAVE_TIMEOUT", default_value_t = default_octave_timeout())]
    pub octave_timeout: u64,

    /// Path to the GAP binary.
    #[arg(long, env = "CAS_GAP_PATH", default_value = "gap")]
    pub gap_path: String,

    /// Wall-clock timeout (seconds) for the GAP engine.
    #[arg(long, env = "CAS_GAP_TIMEOUT", default_value_t = default_gap_timeout())]
    pub gap_timeout: u64,

    /// WolframAlpha Full Results API AppID. Empty disables the engine.
    #[arg(long, env = "CAS_WOLFRAMALPHA_APPID", default_value = "")]
    pub wolframalpha_appid: String,

    /// Wall-clock timeout (seconds) for WolframAlpha HTTP calls.
    #[arg(long, env = "CAS_WOLFRAMALPHA_TIMEOUT", default_value_t = default_wolframalpha_timeout())]
    pub wolframalpha_timeout: u64,

    /// `tracing` log level filter (e.g. `info`, `debug`, `cas_dispatcher=trace`).
    #[arg(long, env = "CAS_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Explicit default-engine override for bare `/validate` calls.
    #[arg(long, env = "CAS_DEFAULT_ENGINE")]
    pub default_engine: Option<String>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_apply_without_any_flags() {
        let cli = Cli::parse_from(["cas-dispatcher"]);
        assert_eq!(cli.port, 8080);
        assert_eq!(cli.symbolic_interpreter, "python3");
        assert_eq!(cli.maxima_timeout, 15);
        assert_eq!(cli.gap_timeout, 30);
        assert!(cli.wolframalpha_appid.is_empty());
        assert_eq!(cli.log_level, "info");
        assert!(cli.default_engine.is_none());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from(["cas-dispatcher", "--port", "9090", "--default-engine", "maxima"]);
        assert_eq!(cli.port, 9090);
        assert_eq!(cli.default_engine.as_deref(), Some("maxima"));
    }
}
