//! Process-wide configuration.
//!
//! Configuration is resolved once at startup from (in increasing precedence)
//! built-in defaults, an optional TOML file, `NATOURS__*` environment variables
//! and finally command-line flags. The resolved [`AppConfig`] is immutable and
//! shared as `Arc<AppConfig>`; nothing reads the environment after startup.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

/// Deployment mode, selecting error verbosity and development-only stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Verbose errors, request logging enabled.
    Development,
    /// Classified, client-safe errors.
    #[default]
    Production,
}

impl DeploymentMode {
    pub fn is_development(self) -> bool {
        self == DeploymentMode::Development
    }

    pub fn is_production(self) -> bool {
        self == DeploymentMode::Production
    }
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentMode::Development => write!(f, "development"),
            DeploymentMode::Production => write!(f, "production"),
        }
    }
}

impl std::str::FromStr for DeploymentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(DeploymentMode::Development),
            "production" | "prod" => Ok(DeploymentMode::Production),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

/// Errors that can occur while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// The configuration sources could not be merged or deserialized.
    #[error("failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// The configuration file path is not valid UTF-8.
    #[error("invalid configuration path: {0}")]
    InvalidPath(String),

    /// Unknown deployment mode name.
    #[error("unknown deployment mode: {0} (expected development or production)")]
    InvalidMode(String),

    /// A value is out of its allowed range.
    #[error("invalid configuration value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub bind_address: String,
    /// Port to listen on
    pub port: u16,
    /// Trust the first `X-Forwarded-For` entry as the client identity.
    pub trust_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 3000,
            trust_proxy: false,
        }
    }
}

impl ServerConfig {
    /// Get the full bind address (ip:port)
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Paths under this prefix answer with JSON; everything else is a page.
    pub prefix: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            prefix: "/api".to_string(),
        }
    }
}

/// Rate limiter tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per client per window.
    pub max: u32,
    /// Window length in seconds.
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max: 100,
            window_secs: 60 * 60,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BodyConfig {
    /// Ceiling for buffered JSON and form bodies.
    pub limit_bytes: usize,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            limit_bytes: 10 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 signing secret.
    pub jwt_secret: String,
    /// Lifetime of issued tokens.
    pub jwt_expires_in_secs: u64,
    /// Cookie carrying the session token for page requests.
    pub cookie_name: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me-in-production".to_string(),
            jwt_expires_in_secs: 90 * 24 * 60 * 60,
            cookie_name: "jwt".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Query parameters allowed to repeat (kept as arrays).
    pub whitelist: Vec<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            whitelist: [
                "duration",
                "ratingsAverage",
                "ratingsQuantity",
                "maxGroupSize",
                "difficulty",
                "price",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: DeploymentMode,
    pub server: ServerConfig,
    pub api: ApiConfig,
    pub rate_limit: RateLimitConfig,
    pub body: BodyConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file with `NATOURS__` environment overrides.
    ///
    /// Environment variables use a double underscore between nested keys,
    /// e.g. `NATOURS__RATE_LIMIT__MAX=50` or `NATOURS__MODE=development`.
    ///
    /// ```no_run
    /// use natours::config::AppConfig;
    ///
    /// let config = AppConfig::load("natours.toml")?;
    /// # Ok::<(), natours::config::ConfigError>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let path_str = path
            .to_str()
            .ok_or_else(|| ConfigError::InvalidPath(format!("{:?}", path)))?;

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path_str.to_string()));
        }

        let config = Config::builder()
            .add_source(File::with_name(path_str))
            .add_source(Self::environment())
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Defaults plus `NATOURS__` environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder().add_source(Self::environment()).build()?;
        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn environment() -> Environment {
        Environment::with_prefix("NATOURS")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    /// Set the deployment mode.
    pub fn with_mode(mut self, mode: DeploymentMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the listening port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.server.port = port;
        self
    }

    /// Set the bind address.
    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.server.bind_address = address.into();
        self
    }

    /// Set the rate limit cap and window.
    pub fn with_rate_limit(mut self, max: u32, window: Duration) -> Self {
        self.rate_limit = RateLimitConfig {
            max,
            window_secs: window.as_secs(),
        };
        self
    }

    /// Set the body size ceiling.
    pub fn with_body_limit(mut self, limit_bytes: usize) -> Self {
        self.body.limit_bytes = limit_bytes;
        self
    }

    /// Set the JWT signing secret.
    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.auth.jwt_secret = secret.into();
        self
    }

    /// Trust `X-Forwarded-For` for client identity.
    pub fn with_trust_proxy(mut self, trust: bool) -> Self {
        self.server.trust_proxy = trust;
        self
    }

    /// Reject values the pipeline cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.api.prefix.starts_with('/') {
            return Err(ConfigError::InvalidValue {
                key: "api.prefix",
                reason: format!("must start with '/', got {:?}", self.api.prefix),
            });
        }
        if self.rate_limit.max == 0 {
            return Err(ConfigError::InvalidValue {
                key: "rate_limit.max",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "rate_limit.window_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.auth.jwt_secret.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "auth.jwt_secret",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_limits() {
        let config = AppConfig::default();
        assert_eq!(config.mode, DeploymentMode::Production);
        assert_eq!(config.rate_limit.max, 100);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(3600));
        assert_eq!(config.body.limit_bytes, 10 * 1024);
        assert_eq!(config.api.prefix, "/api");
        assert_eq!(config.security.whitelist.len(), 6);
        assert!(config.security.whitelist.contains(&"price".to_string()));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!(
            "development".parse::<DeploymentMode>().unwrap(),
            DeploymentMode::Development
        );
        assert_eq!(
            "PROD".parse::<DeploymentMode>().unwrap(),
            DeploymentMode::Production
        );
        assert!(matches!(
            "staging".parse::<DeploymentMode>(),
            Err(ConfigError::InvalidMode(_))
        ));
    }

    #[test]
    fn test_builder_overrides() {
        let config = AppConfig::default()
            .with_mode(DeploymentMode::Development)
            .with_port(8080)
            .with_bind_address("0.0.0.0")
            .with_rate_limit(5, Duration::from_secs(60))
            .with_body_limit(512);

        assert!(config.mode.is_development());
        assert_eq!(config.server.socket_addr(), "0.0.0.0:8080");
        assert_eq!(config.rate_limit.max, 5);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.body.limit_bytes, 512);
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = AppConfig::default();
        config.rate_limit.window_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                key: "rate_limit.window_secs",
                ..
            })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = AppConfig::load("/definitely/not/here/natours.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("natours.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
mode = "development"

[server]
port = 4000

[rate_limit]
max = 3
window_secs = 10
"#
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.mode, DeploymentMode::Development);
        assert_eq!(config.server.port, 4000);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.rate_limit.max, 3);
        assert_eq!(config.rate_limit.window_secs, 10);
        assert_eq!(config.body.limit_bytes, 10 * 1024);
    }
}
