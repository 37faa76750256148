//! Room session configuration.
//!
//! Connection inputs are owned by the embedding application; they can be
//! built directly or loaded from environment variables. The access token is
//! redacted in Debug output.

use crate::e2ee::E2eeOptions;

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default number of attempts to attach a track whose metadata is late.
pub const DEFAULT_TRACK_RETRY_ATTEMPTS: u32 = 20;

/// Default delay between track attach attempts in milliseconds.
pub const DEFAULT_TRACK_RETRY_INTERVAL_MS: u64 = 150;

/// Per-`connect` options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Subscribe to every remote track automatically.
    pub auto_subscribe: bool,
    /// Publish a microphone track once joined.
    pub publish_audio: bool,
    /// Publish a camera track once joined.
    pub publish_video: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            auto_subscribe: true,
            publish_audio: false,
            publish_video: false,
        }
    }
}

/// Options fixed for the lifetime of a `Room`.
#[derive(Debug, Clone)]
pub struct RoomOptions {
    /// Let the engine pause video layers nobody renders.
    pub adaptive_stream: bool,
    /// Let the server pause unused simulcast layers of local video.
    pub dynacast: bool,
    /// End-to-end encryption, when configured.
    pub e2ee: Option<E2eeOptions>,
    /// Attempts to attach a track whose publication metadata is late.
    pub track_retry_attempts: u32,
    /// Delay between attach attempts.
    pub track_retry_interval: Duration,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            adaptive_stream: false,
            dynacast: false,
            e2ee: None,
            track_retry_attempts: DEFAULT_TRACK_RETRY_ATTEMPTS,
            track_retry_interval: Duration::from_millis(DEFAULT_TRACK_RETRY_INTERVAL_MS),
        }
    }
}

/// Connection configuration loaded from the environment.
#[derive(Clone)]
pub struct RoomConfig {
    /// Signaling server URL.
    pub url: String,

    /// Access token for the join handshake.
    /// Protected by `SecretString` to prevent accidental logging.
    pub token: SecretString,

    pub connect: ConnectOptions,

    pub adaptive_stream: bool,

    pub dynacast: bool,

    pub track_retry_attempts: u32,

    pub track_retry_interval_ms: u64,
}

/// Custom Debug implementation that redacts the token.
impl fmt::Debug for RoomConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomConfig")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .field("connect", &self.connect)
            .field("adaptive_stream", &self.adaptive_stream)
            .field("dynacast", &self.dynacast)
            .field("track_retry_attempts", &self.track_retry_attempts)
            .field("track_retry_interval_ms", &self.track_retry_interval_ms)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl ConfigError {
    /// Configuration errors need a fix, not a retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }
}

impl RoomConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let url = vars
            .get("ROOM_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("ROOM_URL".to_string()))?
            .clone();

        let token = SecretString::from(
            vars.get("ROOM_TOKEN")
                .ok_or_else(|| ConfigError::MissingEnvVar("ROOM_TOKEN".to_string()))?
                .clone(),
        );

        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(format!(
                "ROOM_URL must use ws:// or wss://, got {url}"
            )));
        }

        let connect = ConnectOptions {
            auto_subscribe: parse_bool(vars, "ROOM_AUTO_SUBSCRIBE", true)?,
            publish_audio: parse_bool(vars, "ROOM_PUBLISH_AUDIO", false)?,
            publish_video: parse_bool(vars, "ROOM_PUBLISH_VIDEO", false)?,
        };

        let adaptive_stream = parse_bool(vars, "ROOM_ADAPTIVE_STREAM", false)?;
        let dynacast = parse_bool(vars, "ROOM_DYNACAST", false)?;

        let track_retry_attempts = vars
            .get("ROOM_TRACK_RETRY_ATTEMPTS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TRACK_RETRY_ATTEMPTS);

        let track_retry_interval_ms = vars
            .get("ROOM_TRACK_RETRY_INTERVAL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TRACK_RETRY_INTERVAL_MS);

        Ok(Self {
            url,
            token,
            connect,
            adaptive_stream,
            dynacast,
            track_retry_attempts,
            track_retry_interval_ms,
        })
    }

    /// Room-lifetime options derived from this configuration.
    ///
    /// Encryption is never configured from the environment; attach it with
    /// `RoomOptions::e2ee` when needed.
    #[must_use]
    pub fn room_options(&self) -> RoomOptions {
        RoomOptions {
            adaptive_stream: self.adaptive_stream,
            dynacast: self.dynacast,
            e2ee: None,
            track_retry_attempts: self.track_retry_attempts,
            track_retry_interval: Duration::from_millis(self.track_retry_interval_ms),
        }
    }
}

fn parse_bool(
    vars: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(key).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(value) => match value.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::InvalidValue(format!(
                "{key} must be a boolean, got {value}"
            ))),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("ROOM_URL".to_string(), "wss://rtc.example.com".to_string()),
            ("ROOM_TOKEN".to_string(), "secret-join-token".to_string()),
        ])
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = RoomConfig::from_vars(&base_vars()).unwrap();

        assert_eq!(config.url, "wss://rtc.example.com");
        assert_eq!(config.token.expose_secret(), "secret-join-token");
        assert_eq!(config.connect, ConnectOptions::default());
        assert!(config.connect.auto_subscribe);
        assert!(!config.adaptive_stream);
        assert_eq!(config.track_retry_attempts, DEFAULT_TRACK_RETRY_ATTEMPTS);
        assert_eq!(
            config.room_options().track_retry_interval,
            Duration::from_millis(DEFAULT_TRACK_RETRY_INTERVAL_MS)
        );
    }

    #[test]
    fn test_from_vars_overrides() {
        let mut vars = base_vars();
        vars.insert("ROOM_AUTO_SUBSCRIBE".to_string(), "false".to_string());
        vars.insert("ROOM_ADAPTIVE_STREAM".to_string(), "1".to_string());
        vars.insert("ROOM_PUBLISH_AUDIO".to_string(), "yes".to_string());
        vars.insert("ROOM_TRACK_RETRY_ATTEMPTS".to_string(), "3".to_string());

        let config = RoomConfig::from_vars(&vars).unwrap();
        assert!(!config.connect.auto_subscribe);
        assert!(config.connect.publish_audio);
        assert!(config.adaptive_stream);
        assert_eq!(config.room_options().track_retry_attempts, 3);
    }

    #[test]
    fn test_missing_token() {
        let mut vars = base_vars();
        vars.remove("ROOM_TOKEN");
        let result = RoomConfig::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "ROOM_TOKEN"));
    }

    #[test]
    fn test_invalid_bool_rejected() {
        let mut vars = base_vars();
        vars.insert("ROOM_DYNACAST".to_string(), "maybe".to_string());
        assert!(matches!(
            RoomConfig::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_invalid_url_scheme_rejected() {
        let mut vars = base_vars();
        vars.insert("ROOM_URL".to_string(), "http://rtc.example.com".to_string());
        assert!(matches!(
            RoomConfig::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = RoomConfig::from_vars(&base_vars()).unwrap();
        let debug_output = format!("{config:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("secret-join-token"));
    }
}
