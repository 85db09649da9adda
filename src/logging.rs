//! Process-wide log output.
//!
//! - Writes to stderr
//! - `RUST_LOG` overrides everything chosen here
//! - The request log stage logs under `natours::http`, the error sink under
//!   `natours::diagnostics`
//!
//! The level comes from the deployment mode unless the command line asks for
//! more (`-v`, `-vv`) or less (`-q`).

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::DeploymentMode;

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Subscriber settings for one server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub mode: DeploymentMode,
}

impl LoggingConfig {
    /// `debug` in development, `info` in production.
    pub fn for_mode(mode: DeploymentMode) -> Self {
        let level = match mode {
            DeploymentMode::Development => LogLevel::Debug,
            DeploymentMode::Production => LogLevel::Info,
        };
        Self { level, mode }
    }

    /// Combine the mode default with the command-line flags. `quiet` wins, then
    /// one `-v` means debug and two or more mean trace.
    pub fn resolve(mode: DeploymentMode, verbose: u8, quiet: bool) -> Self {
        let level = match (quiet, verbose) {
            (true, _) => LogLevel::Error,
            (false, 0) => return Self::for_mode(mode),
            (false, 1) => LogLevel::Debug,
            (false, _) => LogLevel::Trace,
        };
        Self { level, mode }
    }

    /// Filter directive used when `RUST_LOG` is unset.
    ///
    /// The request log stage already writes one line per request, so the
    /// `tower_http` trace spans only show at `trace`.
    pub fn directive(&self) -> String {
        let tower_http = match self.level {
            LogLevel::Trace => "trace",
            LogLevel::Error => "error",
            _ => "warn",
        };
        format!("{},tower_http={}", self.level.as_str(), tower_http)
    }
}

/// Install the global subscriber. Call once, before serving.
///
/// Development output is colored and carries source locations; production
/// output is plain.
///
/// ```no_run
/// use natours::config::DeploymentMode;
/// use natours::logging::{init_logging, LoggingConfig};
///
/// init_logging(&LoggingConfig::resolve(DeploymentMode::Development, 1, false));
/// ```
pub fn init_logging(config: &LoggingConfig) {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.directive())
    };
    let development = config.mode == DeploymentMode::Development;

    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(development)
        .with_file(development)
        .with_line_number(development)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_mode() {
        assert_eq!(
            LoggingConfig::for_mode(DeploymentMode::Development).level,
            LogLevel::Debug
        );
        assert_eq!(
            LoggingConfig::for_mode(DeploymentMode::Production).level,
            LogLevel::Info
        );
    }

    #[test]
    fn test_resolve_without_flags_uses_mode() {
        assert_eq!(
            LoggingConfig::resolve(DeploymentMode::Production, 0, false),
            LoggingConfig::for_mode(DeploymentMode::Production)
        );
    }

    #[test]
    fn test_resolve_verbosity() {
        let mode = DeploymentMode::Production;
        assert_eq!(LoggingConfig::resolve(mode, 1, false).level, LogLevel::Debug);
        assert_eq!(LoggingConfig::resolve(mode, 2, false).level, LogLevel::Trace);
        assert_eq!(LoggingConfig::resolve(mode, 10, false).level, LogLevel::Trace);
    }

    #[test]
    fn test_quiet_wins() {
        let config = LoggingConfig::resolve(DeploymentMode::Development, 2, true);
        assert_eq!(config.level, LogLevel::Error);
        assert_eq!(config.mode, DeploymentMode::Development);
    }

    #[test]
    fn test_directive() {
        let directive = |level| LoggingConfig {
            level,
            mode: DeploymentMode::Production,
        }
        .directive();
        assert_eq!(directive(LogLevel::Info), "info,tower_http=warn");
        assert_eq!(directive(LogLevel::Debug), "debug,tower_http=warn");
        assert_eq!(directive(LogLevel::Trace), "trace,tower_http=trace");
        assert_eq!(directive(LogLevel::Error), "error,tower_http=error");
    }
}
