//! Gateway Configuration Settings
//!
//! Configuration types for the quote gateway, loaded from environment variables.

use std::time::Duration;

use crate::infrastructure::kis::AppCredentials;
use crate::infrastructure::kis::auth::{DEFAULT_APPROVAL_PATH, DEFAULT_REST_URL};
use crate::infrastructure::kis::codec::DEFAULT_WS_URL as DEFAULT_KIS_WS_URL;

/// Default Finnhub WebSocket URL.
pub const DEFAULT_FINNHUB_WS_URL: &str = "wss://ws.finnhub.io";

/// Default per-session registration cap for KIS.
pub const DEFAULT_KIS_MAX_SYMBOLS: usize = 41;

/// KIS realtime feed settings.
#[derive(Debug, Clone)]
pub struct KisSettings {
    /// `KIS_WS_ENABLED`; credentials are still required.
    pub enabled: bool,
    /// Application credentials.
    pub credentials: AppCredentials,
    /// Primary WebSocket URL.
    pub ws_url: String,
    /// REST base URL for approval keys.
    pub rest_url: String,
    /// Approval key path under `rest_url`.
    pub approval_path: String,
    /// Registrations allowed per provider session.
    pub max_symbols: usize,
}

impl Default for KisSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            credentials: AppCredentials::new("", ""),
            ws_url: DEFAULT_KIS_WS_URL.to_string(),
            rest_url: DEFAULT_REST_URL.to_string(),
            approval_path: DEFAULT_APPROVAL_PATH.to_string(),
            max_symbols: DEFAULT_KIS_MAX_SYMBOLS,
        }
    }
}

impl KisSettings {
    /// Whether the KIS connector should be built.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.enabled && self.credentials.is_configured()
    }
}

/// Finnhub trade feed settings.
#[derive(Clone)]
pub struct FinnhubSettings {
    /// API token.
    pub api_key: String,
    /// WebSocket URL.
    pub ws_url: String,
}

impl Default for FinnhubSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            ws_url: DEFAULT_FINNHUB_WS_URL.to_string(),
        }
    }
}

impl FinnhubSettings {
    /// Whether the Finnhub connector should be built.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

impl std::fmt::Debug for FinnhubSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FinnhubSettings")
            .field("api_key", &"[REDACTED]")
            .field("ws_url", &self.ws_url)
            .finish()
    }
}

/// Client-facing server settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// WebSocket gateway port.
    pub port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
    /// Default client heartbeat interval.
    pub heartbeat_interval: Duration,
    /// Bound on one ticker resolution.
    pub resolve_timeout: Duration,
    /// Bound on resolving a whole ticker list.
    pub resolve_batch_timeout: Duration,
    /// Per-symbol broadcast channel capacity.
    pub channel_capacity: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            port: 8080,
            health_port: 8082,
            heartbeat_interval: Duration::from_secs(15),
            resolve_timeout: Duration::from_secs(5),
            resolve_batch_timeout: Duration::from_secs(10),
            channel_capacity: 1024,
        }
    }
}

/// Upstream connection settings shared by every provider.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Wait after an approval key conflict.
    pub conflict_cooldown: Duration,
    /// Conflicts tolerated before the provider is marked unavailable.
    pub conflict_max_retries: u32,
    /// How long an unavailable provider is parked.
    pub unavailable_recovery: Duration,
    /// Bound on one approval key request.
    pub auth_timeout: Duration,
    /// Keepalive interval.
    pub heartbeat_interval: Duration,
    /// Idle time before the connection is considered dead.
    pub heartbeat_timeout: Duration,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            conflict_cooldown: Duration::from_secs(60),
            conflict_max_retries: 3,
            unavailable_recovery: Duration::from_secs(300),
            auth_timeout: Duration::from_secs(8),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// KIS feed.
    pub kis: KisSettings,
    /// Finnhub feed.
    pub finnhub: FinnhubSettings,
    /// Client-facing servers.
    pub gateway: GatewaySettings,
    /// Upstream connection behavior.
    pub upstream: UpstreamSettings,
}

impl GatewayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an enabled provider is only partially configured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if an enabled provider is only partially configured.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let kis_defaults = KisSettings::default();
        let app_key = env.string("KIS_APP_KEY").unwrap_or_default();
        let app_secret = env.string("KIS_APP_SECRET").unwrap_or_default();
        let kis_enabled = env.parse_bool("KIS_WS_ENABLED", kis_defaults.enabled);

        // One half of the credential pair without the other is a misconfiguration,
        // both missing just means the provider is off.
        if kis_enabled {
            match (app_key.trim().is_empty(), app_secret.trim().is_empty()) {
                (false, true) => return Err(ConfigError::MissingEnvVar("KIS_APP_SECRET".into())),
                (true, false) => return Err(ConfigError::MissingEnvVar("KIS_APP_KEY".into())),
                _ => {}
            }
        }

        let max_symbols = env.parse("KIS_MAX_SYMBOLS", kis_defaults.max_symbols);
        if max_symbols == 0 {
            return Err(ConfigError::InvalidValue {
                key: "KIS_MAX_SYMBOLS".into(),
                reason: "must be at least 1".into(),
            });
        }

        let kis = KisSettings {
            enabled: kis_enabled,
            credentials: AppCredentials::new(app_key.trim(), app_secret.trim()),
            ws_url: env.string("KIS_WS_URL").unwrap_or(kis_defaults.ws_url),
            rest_url: env.string("KIS_REST_URL").unwrap_or(kis_defaults.rest_url),
            approval_path: env
                .string("KIS_APPROVAL_PATH")
                .unwrap_or(kis_defaults.approval_path),
            max_symbols,
        };

        let finnhub_defaults = FinnhubSettings::default();
        let finnhub = FinnhubSettings {
            api_key: env
                .string("FINNHUB_API_KEY")
                .map(|k| k.trim().to_string())
                .unwrap_or_default(),
            ws_url: env.string("FINNHUB_WS_URL").unwrap_or(finnhub_defaults.ws_url),
        };

        let gw = GatewaySettings::default();
        let gateway = GatewaySettings {
            port: env.parse("GATEWAY_PORT", gw.port),
            health_port: env.parse("GATEWAY_HEALTH_PORT", gw.health_port),
            heartbeat_interval: env.secs("GATEWAY_HEARTBEAT_SECS", gw.heartbeat_interval),
            resolve_timeout: env.secs("GATEWAY_RESOLVE_TIMEOUT_SECS", gw.resolve_timeout),
            resolve_batch_timeout: env.secs(
                "GATEWAY_RESOLVE_BATCH_TIMEOUT_SECS",
                gw.resolve_batch_timeout,
            ),
            channel_capacity: env.parse("GATEWAY_CHANNEL_CAPACITY", gw.channel_capacity).max(1),
        };

        let up = UpstreamSettings::default();
        let upstream = UpstreamSettings {
            reconnect_delay_initial: env.millis(
                "UPSTREAM_RECONNECT_DELAY_INITIAL_MS",
                up.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs("UPSTREAM_RECONNECT_DELAY_MAX_SECS", up.reconnect_delay_max),
            reconnect_delay_multiplier: env.parse(
                "UPSTREAM_RECONNECT_DELAY_MULTIPLIER",
                up.reconnect_delay_multiplier,
            ),
            conflict_cooldown: env.secs("UPSTREAM_CONFLICT_COOLDOWN_SECS", up.conflict_cooldown),
            conflict_max_retries: env.parse("UPSTREAM_CONFLICT_MAX_RETRIES", up.conflict_max_retries),
            unavailable_recovery: env.secs(
                "UPSTREAM_UNAVAILABLE_RECOVERY_SECS",
                up.unavailable_recovery,
            ),
            auth_timeout: env.secs("UPSTREAM_AUTH_TIMEOUT_SECS", up.auth_timeout),
            heartbeat_interval: env.secs("UPSTREAM_HEARTBEAT_INTERVAL_SECS", up.heartbeat_interval),
            heartbeat_timeout: env.secs("UPSTREAM_HEARTBEAT_TIMEOUT_SECS", up.heartbeat_timeout),
        };

        Ok(Self {
            kis,
            finnhub,
            gateway,
            upstream,
        })
    }

    /// Names of the providers that will be started.
    #[must_use]
    pub fn active_providers(&self) -> Vec<&'static str> {
        let mut active = Vec::new();
        if self.kis.is_active() {
            active.push("kis");
        }
        if self.finnhub.is_active() {
            active.push("finnhub");
        }
        active
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has an unusable value.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.string(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn parse_bool(&self, key: &str, default: bool) -> bool {
        self.string(key)
            .map_or(default, |v| match v.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => default,
            })
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<GatewayConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = config_from(&[]).unwrap();
        assert!(!config.kis.is_active());
        assert!(!config.finnhub.is_active());
        assert!(config.active_providers().is_empty());
        assert_eq!(config.kis.ws_url, "ws://ops.koreainvestment.com:21000");
        assert_eq!(config.kis.max_symbols, 41);
        assert_eq!(config.finnhub.ws_url, "wss://ws.finnhub.io");
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.health_port, 8082);
        assert_eq!(config.gateway.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.gateway.channel_capacity, 1024);
    }

    #[test]
    fn upstream_settings_defaults() {
        let settings = UpstreamSettings::default();
        assert_eq!(settings.reconnect_delay_initial, Duration::from_secs(1));
        assert_eq!(settings.reconnect_delay_max, Duration::from_secs(30));
        assert!((settings.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(settings.conflict_cooldown, Duration::from_secs(60));
        assert_eq!(settings.conflict_max_retries, 3);
        assert_eq!(settings.unavailable_recovery, Duration::from_secs(300));
        assert_eq!(settings.auth_timeout, Duration::from_secs(8));
    }

    #[test]
    fn both_providers_enabled() {
        let config = config_from(&[
            ("KIS_APP_KEY", "key"),
            ("KIS_APP_SECRET", "secret"),
            ("FINNHUB_API_KEY", " token "),
        ])
        .unwrap();
        assert_eq!(config.active_providers(), vec!["kis", "finnhub"]);
        assert_eq!(config.finnhub.api_key, "token");
    }

    #[test]
    fn kis_disabled_by_flag() {
        let config = config_from(&[
            ("KIS_APP_KEY", "key"),
            ("KIS_APP_SECRET", "secret"),
            ("KIS_WS_ENABLED", "false"),
        ])
        .unwrap();
        assert!(!config.kis.is_active());
    }

    #[test]
    fn half_configured_kis_is_an_error() {
        let err = config_from(&[("KIS_APP_KEY", "key")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "KIS_APP_SECRET"));

        let err = config_from(&[("KIS_APP_SECRET", "secret")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "KIS_APP_KEY"));
    }

    #[test]
    fn half_configured_kis_is_fine_when_disabled() {
        let config = config_from(&[("KIS_APP_KEY", "key"), ("KIS_WS_ENABLED", "0")]).unwrap();
        assert!(!config.kis.is_active());
    }

    #[test]
    fn zero_symbol_cap_is_rejected() {
        let err = config_from(&[("KIS_MAX_SYMBOLS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn unparsable_values_fall_back() {
        let config = config_from(&[
            ("GATEWAY_PORT", "not-a-port"),
            ("UPSTREAM_RECONNECT_DELAY_MULTIPLIER", "fast"),
            ("GATEWAY_HEARTBEAT_SECS", "-3"),
        ])
        .unwrap();
        assert_eq!(config.gateway.port, 8080);
        assert!((config.upstream.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.gateway.heartbeat_interval, Duration::from_secs(15));
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("GATEWAY_PORT", "9000"),
            ("UPSTREAM_RECONNECT_DELAY_INITIAL_MS", "250"),
            ("UPSTREAM_CONFLICT_MAX_RETRIES", "5"),
            ("KIS_MAX_SYMBOLS", "20"),
            ("KIS_APPROVAL_PATH", "/custom/approval"),
        ])
        .unwrap();
        assert_eq!(config.gateway.port, 9000);
        assert_eq!(
            config.upstream.reconnect_delay_initial,
            Duration::from_millis(250)
        );
        assert_eq!(config.upstream.conflict_max_retries, 5);
        assert_eq!(config.kis.max_symbols, 20);
        assert_eq!(config.kis.approval_path, "/custom/approval");
    }

    #[test]
    fn finnhub_settings_redacted_debug() {
        let settings = FinnhubSettings {
            api_key: "secret-token".into(),
            ..FinnhubSettings::default()
        };
        let debug = format!("{settings:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));
    }
}
