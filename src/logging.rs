//! Logging bootstrap for the two ways this crate runs.
//!
//! The core is a library embedded in a host service, so it never owns log
//! files — the host's collector does. [`init_cli`] serves the one-shot
//! subcommands with human-readable output on stderr; [`init_json`] serves
//! service embedding with one JSON object per line on stdout, which is the
//! format the invoker's per-call telemetry lines are emitted for.
//!
//! `RUST_LOG` always wins. Without it, [`DEFAULT_DIRECTIVES`] keeps the
//! tool pipeline visible and the transport crates quiet.

use tracing_subscriber::EnvFilter;

/// Filter directives applied when `RUST_LOG` is unset.
///
/// Dataset lifecycle (`armitage::store`) runs at debug because expiry and
/// fallback decisions are what turn-level incidents get debugged with;
/// sqlx and the HTTP stack only surface warnings.
pub const DEFAULT_DIRECTIVES: &str =
    "info,armitage::store=debug,sqlx=warn,hyper=warn,reqwest=warn";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_DIRECTIVES))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialise human-readable logging for one-shot subcommands.
///
/// Writes to stderr so a piped chat answer stays clean.
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

/// Initialise JSON logging for service embedding.
///
/// One JSON object per line on stdout; shipping and rotation belong to the
/// host's collector.
///
/// # Errors
///
/// Returns an error when a global subscriber is already installed.
pub fn init_json() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter())
        .try_init()
        .map_err(|e| anyhow::anyhow!("logging already initialised: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directives_parse() {
        assert!(EnvFilter::try_new(DEFAULT_DIRECTIVES).is_ok());
    }
}
