//! Configuration management for Turnstile.

use axum::http::header::HeaderName;
use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::gate::{ClientKeyResolver, PathExemptions, DEFAULT_FORWARDED_HEADER};
use crate::ratelimit::{RejectedCalls, WindowPolicy};

/// Prefix for environment overrides, e.g. `TURNSTILE__RATE_LIMITING__LIMIT=100`.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Forwarded header trust
    #[serde(default)]
    pub trust: TrustConfig,

    /// Path patterns that bypass the gate
    #[serde(default)]
    pub exempt_paths: Vec<String>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Sliding window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Calls allowed per client within one window
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Whether rejected attempts occupy the window
    #[serde(default = "default_count_rejected")]
    pub count_rejected: bool,

    /// Interval between background eviction sweeps in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Fraction of requests that also run an eviction sweep
    #[serde(default)]
    pub sweep_sample_rate: f64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            limit: default_limit(),
            count_rejected: default_count_rejected(),
            sweep_interval_secs: default_sweep_interval(),
            sweep_sample_rate: 0.0,
        }
    }
}

fn default_window_secs() -> u64 {
    60
}

fn default_limit() -> u32 {
    60
}

fn default_count_rejected() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    60
}

/// Which peers may name the client through a forwarded header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Whether forwarded headers are honoured at all
    #[serde(default)]
    pub enabled: bool,

    /// Header carrying the forwarding chain
    #[serde(default = "default_trusted_header")]
    pub header: String,

    /// Direct peers allowed to set the header
    #[serde(default)]
    pub trusted_peers: Vec<IpAddr>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            header: default_trusted_header(),
            trusted_peers: Vec::new(),
        }
    }
}

fn default_trusted_header() -> String {
    DEFAULT_FORWARDED_HEADER.to_string()
}

impl GateConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GateConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an optional YAML file overlaid with
    /// `TURNSTILE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_prefix(path, ENV_PREFIX)
    }

    fn load_with_prefix(path: Option<&Path>, prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        let config: GateConfig = builder
            .add_source(
                Environment::with_prefix(prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("trust.trusted_peers")
                    .with_list_parse_key("exempt_paths")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Check the values that would leave the gate in an inconsistent state.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;

        if rl.window_secs == 0 {
            return Err(TurnstileError::Config(
                "rate_limiting.window_secs must be greater than zero".to_string(),
            ));
        }

        if rl.sweep_interval_secs == 0 {
            return Err(TurnstileError::Config(
                "rate_limiting.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&rl.sweep_sample_rate) {
            return Err(TurnstileError::Config(format!(
                "rate_limiting.sweep_sample_rate must be within [0, 1], got {}",
                rl.sweep_sample_rate
            )));
        }

        self.policy()?;
        self.trusted_header()?;
        Ok(())
    }

    /// The window policy described by this configuration.
    pub fn policy(&self) -> Result<WindowPolicy> {
        let rejected = if self.rate_limiting.count_rejected {
            RejectedCalls::Count
        } else {
            RejectedCalls::Discard
        };

        Ok(WindowPolicy::new(self.window(), self.rate_limiting.limit)?.with_rejected(rejected))
    }

    /// The key resolver described by this configuration.
    pub fn resolver(&self) -> Result<ClientKeyResolver> {
        if !self.trust.enabled {
            return Ok(ClientKeyResolver::untrusted());
        }

        Ok(ClientKeyResolver::trusting(
            self.trusted_header()?,
            self.trust.trusted_peers.iter().copied(),
        ))
    }

    /// The path exemptions described by this configuration.
    pub fn exemptions(&self) -> PathExemptions {
        PathExemptions::new(&self.exempt_paths)
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.rate_limiting.window_secs)
    }

    /// Interval between background sweeps.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.rate_limiting.sweep_interval_secs)
    }

    fn trusted_header(&self) -> Result<HeaderName> {
        HeaderName::from_bytes(self.trust.header.as_bytes()).map_err(|_| {
            TurnstileError::Config(format!("invalid trusted header name: {:?}", self.trust.header))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::ClientKey;
    use axum::http::{HeaderMap, HeaderValue};
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();
        assert_eq!(config.server.listen_addr, default_listen_addr());
        assert_eq!(config.window(), Duration::from_secs(60));
        assert_eq!(config.rate_limiting.limit, 60);
        assert!(config.rate_limiting.count_rejected);
        assert!(!config.trust.enabled);
        assert!(config.trust.trusted_peers.is_empty());
        assert!(config.exempt_paths.is_empty());
        assert_ok!(config.validate());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
server:
  listen_addr: 0.0.0.0:9000
rate_limiting:
  window_secs: 2
  limit: 3
  count_rejected: false
  sweep_interval_secs: 5
  sweep_sample_rate: 0.01
trust:
  enabled: true
  header: X-Real-IP
  trusted_peers:
    - 10.0.0.1
    - "::1"
exempt_paths:
  - /health
  - /metrics*
"#;
        let config = assert_ok!(GateConfig::from_yaml(yaml));

        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.window(), Duration::from_secs(2));
        assert_eq!(config.sweep_interval(), Duration::from_secs(5));

        let policy = config.policy().unwrap();
        assert_eq!(policy.limit(), 3);
        assert_eq!(policy.rejected(), RejectedCalls::Discard);

        let exemptions = config.exemptions();
        assert!(exemptions.is_exempt("/health"));
        assert!(exemptions.is_exempt("/metrics/raw"));

        let resolver = config.resolver().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.4"));
        let key = resolver.resolve(Some("10.0.0.1".parse().unwrap()), &headers);
        assert_eq!(key, ClientKey::new("203.0.113.4"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = assert_ok!(GateConfig::from_yaml("rate_limiting:\n  limit: 5\n"));
        assert_eq!(config.rate_limiting.limit, 5);
        assert_eq!(config.rate_limiting.window_secs, 60);
        assert!(!config.resolver().unwrap().trust_enabled());
    }

    #[test]
    fn test_zero_window_is_config_error() {
        let result = GateConfig::from_yaml("rate_limiting:\n  window_secs: 0\n");
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_huge_window_is_config_error() {
        let result = GateConfig::from_yaml("rate_limiting:\n  window_secs: 18446744073709551615\n  limit: 1\n");
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_zero_limit_is_valid() {
        let config = assert_ok!(GateConfig::from_yaml("rate_limiting:\n  limit: 0\n"));
        assert_eq!(config.policy().unwrap().limit(), 0);
    }

    #[test]
    fn test_invalid_sample_rate() {
        assert_err!(GateConfig::from_yaml("rate_limiting:\n  sweep_sample_rate: 1.5\n"));
    }

    #[test]
    fn test_zero_sweep_interval() {
        assert_err!(GateConfig::from_yaml("rate_limiting:\n  sweep_interval_secs: 0\n"));
    }

    #[test]
    fn test_invalid_header_name() {
        assert_err!(GateConfig::from_yaml("trust:\n  enabled: true\n  header: \"bad header\"\n"));
    }

    #[test]
    fn test_invalid_yaml() {
        let result = GateConfig::from_yaml("rate_limiting: [");
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("turnstile-config-{}.yaml", std::process::id()));
        std::fs::write(&path, "rate_limiting:\n  limit: 7\nexempt_paths:\n  - /health\n").unwrap();

        let result = GateConfig::load(Some(&path));
        std::fs::remove_file(&path).unwrap();

        let config = assert_ok!(result);
        assert_eq!(config.rate_limiting.limit, 7);
        assert_eq!(config.exempt_paths, vec!["/health".to_string()]);
    }

    #[test]
    fn test_load_env_overlay() {
        // Own prefix so no other test sees these variables.
        let prefix = "TURNSTILE_ENV_OVERLAY";
        let vars = [
            ("TURNSTILE_ENV_OVERLAY__RATE_LIMITING__LIMIT", "5"),
            ("TURNSTILE_ENV_OVERLAY__SERVER__LISTEN_ADDR", "127.0.0.1:9999"),
            ("TURNSTILE_ENV_OVERLAY__TRUST__ENABLED", "true"),
            ("TURNSTILE_ENV_OVERLAY__TRUST__TRUSTED_PEERS", "10.0.0.1,10.0.0.2"),
            ("TURNSTILE_ENV_OVERLAY__EXEMPT_PATHS", "/health,/metrics*"),
        ];
        for (name, value) in vars {
            std::env::set_var(name, value);
        }

        let result = GateConfig::load_with_prefix(None, prefix);
        for (name, _) in vars {
            std::env::remove_var(name);
        }

        let config = assert_ok!(result);
        assert_eq!(config.rate_limiting.limit, 5);
        assert_eq!(config.rate_limiting.window_secs, 60);
        assert_eq!(config.server.listen_addr.port(), 9999);
        assert!(config.trust.enabled);
        assert_eq!(
            config.trust.trusted_peers,
            vec!["10.0.0.1".parse::<IpAddr>().unwrap(), "10.0.0.2".parse().unwrap()]
        );
        assert_eq!(config.exempt_paths, vec!["/health".to_string(), "/metrics*".to_string()]);

        let exemptions = config.exemptions();
        assert!(exemptions.is_exempt("/metrics/raw"));
    }

    #[test]
    fn test_load_missing_file() {
        let path = std::env::temp_dir().join("turnstile-does-not-exist.yaml");
        assert_err!(GateConfig::load(Some(&path)));
    }
}
