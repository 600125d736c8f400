//! Diagnostic logging for the binary.
//!
//! Output goes to stderr so answers printed on stdout can be piped. The level
//! comes from `MOSP_LOG`, then `RUST_LOG`, then the `-v` count.

use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "MOSP_LOG";

/// Filter directive for a `-v` count: warnings by default, `-v` for debug
/// output from this crate, `-vv` for everything.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "warn,mosp_chat=debug",
        _ => "debug",
    }
}

fn build_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)))
}

/// Install the global subscriber. Calling it twice is harmless.
pub fn init_tracing(verbosity: u8) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(verbosity))
        .with_writer(std::io::stderr)
        .with_target(verbosity > 0)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_raises_the_default_level() {
        assert_eq!(default_directive(0), "warn");
        assert!(default_directive(1).contains("mosp_chat=debug"));
        assert_eq!(default_directive(5), "debug");
    }

    #[test]
    fn repeated_initialisation_does_not_panic() {
        init_tracing(0);
        init_tracing(2);
    }
}
