//! Engine configuration
//!
//! Configuration is applied once per engine and treated as immutable
//! afterwards. It can be built in code, read from `PAYTRACE_*` environment
//! variables, or loaded from a TOML file:
//!
//! ```toml
//! endpoint = "https://ingest.example.com/api/v2/events/ingest"
//! auth_scheme = "api-token"
//! token = "dt0c01.abc"
//! source = "payment-library"
//! max_attempts = 3
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, TelemetryError};
use paytrace_span::CLOUDEVENTS_CONTENT_TYPE;

/// Scheme used in the `Authorization` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthScheme {
    /// `Authorization: Api-Token <token>`
    #[default]
    ApiToken,
    /// `Authorization: Bearer <token>`
    Bearer,
}

impl AuthScheme {
    pub fn header_prefix(&self) -> &'static str {
        match self {
            AuthScheme::ApiToken => "Api-Token",
            AuthScheme::Bearer => "Bearer",
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthScheme::ApiToken => f.write_str("api-token"),
            AuthScheme::Bearer => f.write_str("bearer"),
        }
    }
}

impl FromStr for AuthScheme {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "api-token" | "apitoken" | "api_token" => Ok(AuthScheme::ApiToken),
            "bearer" => Ok(AuthScheme::Bearer),
            other => Err(TelemetryError::Config(format!(
                "unknown auth scheme '{}'",
                other
            ))),
        }
    }
}

/// Telemetry engine configuration
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Ingestion endpoint URL
    pub endpoint: String,

    /// Authorization header scheme
    pub auth_scheme: AuthScheme,

    /// Ingestion token
    pub token: String,

    /// CloudEvents `source` (provider string)
    pub source: String,

    /// CloudEvents `type` used for every event
    pub event_type: String,

    /// `Content-Type` of delivered bodies
    pub content_type: String,

    /// Status code the endpoint answers on acceptance
    pub accepted_status: u16,

    /// Maximum delivery attempts per event (including the first)
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds
    pub backoff_base_ms: u64,

    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,

    /// Budget after which an open action is finalized as TIMEOUT
    pub action_timeout_ms: u64,

    /// Wall-clock budget for the blocking crash delivery
    pub crash_send_timeout_ms: u64,

    /// Location of the crash backlog file
    pub backlog_path: PathBuf,

    /// Name of the session root action
    pub session_action_name: String,

    /// Replay a persisted crash payload when the engine is configured
    pub replay_backlog_on_configure: bool,

    /// Opaque version identifier attached to crash events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// Opaque build identifier attached to crash events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/api/v2/events/ingest".to_string(),
            auth_scheme: AuthScheme::ApiToken,
            token: String::new(),
            source: "payment-library".to_string(),
            event_type: "com.paytrace.action".to_string(),
            content_type: CLOUDEVENTS_CONTENT_TYPE.to_string(),
            accepted_status: 202,
            max_attempts: 3,
            backoff_base_ms: 1000,
            request_timeout_ms: 10_000,
            action_timeout_ms: 10_000,
            crash_send_timeout_ms: 3000,
            backlog_path: PathBuf::from("paytrace-crash-backlog.json"),
            session_action_name: "session_started".to_string(),
            replay_backlog_on_configure: true,
            app_version: None,
            build_id: None,
        }
    }
}

// Token is redacted.
impl fmt::Debug for TelemetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryConfig")
            .field("endpoint", &self.endpoint)
            .field("auth_scheme", &self.auth_scheme)
            .field("token", &"<redacted>")
            .field("source", &self.source)
            .field("event_type", &self.event_type)
            .field("accepted_status", &self.accepted_status)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base_ms", &self.backoff_base_ms)
            .field("action_timeout_ms", &self.action_timeout_ms)
            .field("crash_send_timeout_ms", &self.crash_send_timeout_ms)
            .field("backlog_path", &self.backlog_path)
            .finish_non_exhaustive()
    }
}

impl TelemetryConfig {
    /// Create a new config builder
    pub fn builder() -> TelemetryConfigBuilder {
        TelemetryConfigBuilder::new()
    }

    /// Create config from `PAYTRACE_*` environment variables
    ///
    /// Unset or unparseable variables fall back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            endpoint: std::env::var("PAYTRACE_ENDPOINT").unwrap_or(defaults.endpoint),
            auth_scheme: std::env::var("PAYTRACE_AUTH_SCHEME")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.auth_scheme),
            token: std::env::var("PAYTRACE_TOKEN").unwrap_or(defaults.token),
            source: std::env::var("PAYTRACE_SOURCE").unwrap_or(defaults.source),
            event_type: std::env::var("PAYTRACE_EVENT_TYPE").unwrap_or(defaults.event_type),
            content_type: defaults.content_type,
            accepted_status: env_parse("PAYTRACE_ACCEPTED_STATUS", defaults.accepted_status),
            max_attempts: env_parse("PAYTRACE_MAX_ATTEMPTS", defaults.max_attempts),
            backoff_base_ms: env_parse("PAYTRACE_BACKOFF_BASE_MS", defaults.backoff_base_ms),
            request_timeout_ms: env_parse("PAYTRACE_REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            action_timeout_ms: env_parse("PAYTRACE_ACTION_TIMEOUT_MS", defaults.action_timeout_ms),
            crash_send_timeout_ms: env_parse(
                "PAYTRACE_CRASH_SEND_TIMEOUT_MS",
                defaults.crash_send_timeout_ms,
            ),
            backlog_path: std::env::var("PAYTRACE_BACKLOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.backlog_path),
            session_action_name: defaults.session_action_name,
            replay_backlog_on_configure: env_parse(
                "PAYTRACE_REPLAY_BACKLOG",
                defaults.replay_backlog_on_configure,
            ),
            app_version: std::env::var("PAYTRACE_APP_VERSION").ok(),
            build_id: std::env::var("PAYTRACE_BUILD_ID").ok(),
        }
    }

    /// Load config from a TOML file
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TelemetryError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| TelemetryError::Config(e.to_string()))
    }

    /// Check the configuration is usable for delivery
    pub fn validate(&self) -> Result<()> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(TelemetryError::Config(format!(
                "endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }
        if self.token.trim().is_empty() {
            return Err(TelemetryError::Config("token must not be empty".to_string()));
        }
        if self.source.is_empty() || self.event_type.is_empty() {
            return Err(TelemetryError::Config(
                "source and event_type must not be empty".to_string(),
            ));
        }
        if !(200..=299).contains(&self.accepted_status) {
            return Err(TelemetryError::Config(format!(
                "accepted_status must be a 2xx code, got {}",
                self.accepted_status
            )));
        }
        if self.max_attempts == 0 {
            return Err(TelemetryError::Config("max_attempts must be at least 1".to_string()));
        }
        if self.action_timeout_ms == 0 || self.crash_send_timeout_ms == 0 {
            return Err(TelemetryError::Config(
                "action_timeout_ms and crash_send_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Full `Authorization` header value
    pub fn authorization(&self) -> String {
        format!("{} {}", self.auth_scheme.header_prefix(), self.token)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn crash_send_timeout(&self) -> Duration {
        Duration::from_millis(self.crash_send_timeout_ms)
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Builder for TelemetryConfig
pub struct TelemetryConfigBuilder {
    config: TelemetryConfig,
}

impl TelemetryConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self {
            config: TelemetryConfig::default(),
        }
    }

    /// Set the ingestion endpoint
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    /// Set the auth scheme and token
    pub fn auth(mut self, scheme: AuthScheme, token: impl Into<String>) -> Self {
        self.config.auth_scheme = scheme;
        self.config.token = token.into();
        self
    }

    /// Set the CloudEvents source
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.config.source = source.into();
        self
    }

    /// Set the CloudEvents type
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.config.event_type = event_type.into();
        self
    }

    /// Set the accepted status code
    pub fn accepted_status(mut self, status: u16) -> Self {
        self.config.accepted_status = status;
        self
    }

    /// Set retry configuration
    pub fn retry(mut self, max_attempts: u32, backoff_base_ms: u64) -> Self {
        self.config.max_attempts = max_attempts;
        self.config.backoff_base_ms = backoff_base_ms;
        self
    }

    /// Set the per-request timeout in milliseconds
    pub fn request_timeout_ms(mut self, timeout: u64) -> Self {
        self.config.request_timeout_ms = timeout;
        self
    }

    /// Set the action timeout in milliseconds
    pub fn action_timeout_ms(mut self, timeout: u64) -> Self {
        self.config.action_timeout_ms = timeout;
        self
    }

    /// Set the crash delivery budget in milliseconds
    pub fn crash_send_timeout_ms(mut self, timeout: u64) -> Self {
        self.config.crash_send_timeout_ms = timeout;
        self
    }

    /// Set the crash backlog path
    pub fn backlog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.backlog_path = path.into();
        self
    }

    /// Enable or disable backlog replay on configure
    pub fn replay_backlog_on_configure(mut self, enabled: bool) -> Self {
        self.config.replay_backlog_on_configure = enabled;
        self
    }

    /// Set crash identifiers
    pub fn build_info(mut self, app_version: impl Into<String>, build_id: impl Into<String>) -> Self {
        self.config.app_version = Some(app_version.into());
        self.config.build_id = Some(build_id.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> TelemetryConfig {
        self.config
    }
}

impl Default for TelemetryConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> TelemetryConfig {
        TelemetryConfig::builder().auth(AuthScheme::ApiToken, "secret").build()
    }

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_base_ms, 1000);
        assert_eq!(config.accepted_status, 202);
        assert_eq!(config.session_action_name, "session_started");
        assert!(config.replay_backlog_on_configure);
        assert!(config.validate().is_err(), "empty token must be rejected");
    }

    #[test]
    fn test_config_builder() {
        let config = TelemetryConfig::builder()
            .endpoint("https://ingest.example.com/events")
            .auth(AuthScheme::Bearer, "tok")
            .source("checkout-sdk")
            .event_type("com.example.action")
            .retry(5, 250)
            .action_timeout_ms(2000)
            .crash_send_timeout_ms(500)
            .backlog_path("/tmp/backlog.json")
            .replay_backlog_on_configure(false)
            .build_info("4.2.0", "abc123")
            .build();

        assert_eq!(config.endpoint, "https://ingest.example.com/events");
        assert_eq!(config.authorization(), "Bearer tok");
        assert_eq!(config.source, "checkout-sdk");
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_base(), Duration::from_millis(250));
        assert_eq!(config.action_timeout(), Duration::from_secs(2));
        assert_eq!(config.crash_send_timeout(), Duration::from_millis(500));
        assert_eq!(config.backlog_path, PathBuf::from("/tmp/backlog.json"));
        assert!(!config.replay_backlog_on_configure);
        assert_eq!(config.app_version.as_deref(), Some("4.2.0"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_authorization_header() {
        assert_eq!(valid().authorization(), "Api-Token secret");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = valid();
        config.endpoint = "ftp://nope".to_string();
        assert!(matches!(config.validate(), Err(TelemetryError::Config(_))));

        let mut config = valid();
        config.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.accepted_status = 404;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.action_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_str() {
        let config = TelemetryConfig::from_toml_str(
            r#"
            endpoint = "https://ingest.example.com/api"
            auth_scheme = "bearer"
            token = "t0k"
            max_attempts = 4
            app_version = "1.2.3"
            "#,
        )
        .unwrap();

        assert_eq!(config.auth_scheme, AuthScheme::Bearer);
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.backoff_base_ms, 1000);
        assert_eq!(config.app_version.as_deref(), Some("1.2.3"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_rejects_unknown_scheme() {
        let result = TelemetryConfig::from_toml_str(r#"auth_scheme = "basic""#);
        assert!(matches!(result, Err(TelemetryError::Config(_))));
    }

    #[test]
    fn test_auth_scheme_parse() {
        assert_eq!("Api-Token".parse::<AuthScheme>().unwrap(), AuthScheme::ApiToken);
        assert_eq!("BEARER".parse::<AuthScheme>().unwrap(), AuthScheme::Bearer);
        assert!("basic".parse::<AuthScheme>().is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
