//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via DRONELINK_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Signing secret used when none is configured. Fine for local testing only.
pub const DEFAULT_JWT_SECRET: &str = "my_secret_key";

/// Default credential lifetime (30 minutes).
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 30 * 60;

/// Longest credential lifetime accepted (one year).
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Handshake and credential configuration.
    pub auth: AuthConfig,
    /// Session lifetime configuration.
    pub session: SessionConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("DRONELINK_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from a key lookup (the process environment in production).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        self.network.apply_overrides(&lookup);
        self.auth.apply_overrides(&lookup);
        self.session.apply_overrides(&lookup);
        self.metrics.apply_overrides(&lookup);
    }

    /// Loads drone secrets from an external file if configured.
    pub fn load_secrets(&mut self) -> Result<(), ConfigError> {
        self.auth.load_secrets()
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.auth.validate()
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind the WebSocket listener to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections (0 = unlimited).
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], dronelink_protocol::DEFAULT_PORT)),
            max_connections: 0,
        }
    }
}

impl NetworkConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("DRONELINK_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Some(max) = lookup("DRONELINK_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }
}

/// A fixed identity and the SHA-256 hash of its secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroneCredential {
    pub identity: String,
    /// Lowercase hex SHA-256 of the secret.
    /// Generate with: `dronelink-cli hash-secret <secret>`
    pub secret_hash: String,
}

/// Handshake and credential configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC key used to sign credentials.
    pub jwt_secret: String,
    /// Credential lifetime in seconds.
    pub token_ttl_secs: u64,
    /// Whether LOGIN secrets are checked against `drones`.
    /// When false, any secret is accepted as presented.
    pub required: bool,
    /// Known drones.
    pub drones: Vec<DroneCredential>,
    /// Optional path to a secrets file with `identity:sha256hex` lines.
    pub secrets_file: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            required: false,
            drones: Vec::new(),
            secrets_file: None,
        }
    }
}

impl AuthConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup("DRONELINK_JWT_SECRET") {
            if !secret.is_empty() {
                self.jwt_secret = secret;
            }
        }

        if let Some(ttl) = lookup("DRONELINK_TOKEN_TTL_SECS") {
            if let Ok(secs) = ttl.parse() {
                self.token_ttl_secs = secs;
            }
        }

        if let Some(required) = lookup("DRONELINK_AUTH_REQUIRED") {
            self.required = parse_bool(&required);
        }

        if let Some(path) = lookup("DRONELINK_AUTH_SECRETS_FILE") {
            self.secrets_file = Some(PathBuf::from(path));
        }
    }

    /// Loads drone credentials from the secrets file if configured.
    pub fn load_secrets(&mut self) -> Result<(), ConfigError> {
        if let Some(ref path) = self.secrets_file {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(path.clone(), e))?;
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let (identity, hash) = line.rsplit_once(':').ok_or_else(|| {
                    ConfigError::ParseError(
                        path.clone(),
                        format!("expected 'identity:sha256hex', got '{}'", line),
                    )
                })?;
                self.drones.push(DroneCredential {
                    identity: identity.trim().to_string(),
                    secret_hash: hash.trim().to_lowercase(),
                });
            }
        }
        Ok(())
    }

    /// Returns the credential lifetime as Duration.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }

    /// Returns whether the signing secret is still the built-in default.
    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.jwt_secret must not be empty".to_string(),
            ));
        }
        if self.token_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "auth.token_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(ConfigError::ValidationError(format!(
                "auth.token_ttl_secs must be at most {} (got {})",
                MAX_TOKEN_TTL_SECS, self.token_ttl_secs
            )));
        }
        if self.required && self.drones.is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.required=true but no drone credentials configured".to_string(),
            ));
        }
        Ok(())
    }
}

/// Session lifetime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Close sessions whose credential has expired.
    pub enforce_expiry: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enforce_expiry: true,
        }
    }
}

impl SessionConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(enforce) = lookup("DRONELINK_ENFORCE_EXPIRY") {
            self.enforce_expiry = parse_bool(&enforce);
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics HTTP server.
    pub enabled: bool,
    /// Address to bind the metrics server to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

impl MetricsConfig {
    fn apply_overrides(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        if let Some(enabled) = lookup("DRONELINK_METRICS_ENABLED") {
            self.enabled = parse_bool(&enabled);
        }
        if let Some(addr) = lookup("DRONELINK_METRICS_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
    }
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), 8765);
        assert_eq!(config.auth.token_ttl(), Duration::from_secs(1800));
        assert!(!config.auth.required);
        assert!(config.auth.uses_default_secret());
        assert!(config.session.enforce_expiry);
        assert!(!config.metrics.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
network:
  bind_addr: "0.0.0.0:9000"
auth:
  jwt_secret: "s3cret"
  token_ttl_secs: 60
  required: true
  drones:
    - identity: drone1
      secret_hash: "abc123"
session:
  enforce_expiry: false
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.network.bind_addr.port(), 9000);
        assert_eq!(config.auth.jwt_secret, "s3cret");
        assert_eq!(config.auth.token_ttl_secs, 60);
        assert!(config.auth.required);
        assert_eq!(config.auth.drones[0].identity, "drone1");
        assert!(!config.session.enforce_expiry);
        // Unspecified sections fall back to defaults
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/dronelink.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_, _)));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("DRONELINK_BIND", "127.0.0.1:4000"),
            ("DRONELINK_MAX_CONNECTIONS", "8"),
            ("DRONELINK_JWT_SECRET", "from-env"),
            ("DRONELINK_TOKEN_TTL_SECS", "90"),
            ("DRONELINK_AUTH_REQUIRED", "TRUE"),
            ("DRONELINK_ENFORCE_EXPIRY", "0"),
            ("DRONELINK_METRICS_ENABLED", "1"),
            ("DRONELINK_METRICS_BIND", "127.0.0.1:9999"),
        ]);

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.network.bind_addr.port(), 4000);
        assert_eq!(config.network.max_connections, 8);
        assert_eq!(config.auth.jwt_secret, "from-env");
        assert_eq!(config.auth.token_ttl_secs, 90);
        assert!(config.auth.required);
        assert!(!config.session.enforce_expiry);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.bind_addr.port(), 9999);
    }

    #[test]
    fn test_invalid_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "DRONELINK_BIND" => Some("not-an-address".to_string()),
            "DRONELINK_TOKEN_TTL_SECS" => Some("soon".to_string()),
            _ => None,
        });
        assert_eq!(config.network.bind_addr.port(), 8765);
        assert_eq!(config.auth.token_ttl_secs, DEFAULT_TOKEN_TTL_SECS);
    }

    #[test]
    fn test_load_secrets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# fleet secrets").unwrap();
        writeln!(file, "drone1:ABCDEF").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "drone2 : 123456").unwrap();

        let mut auth = AuthConfig {
            secrets_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        auth.load_secrets().unwrap();

        assert_eq!(
            auth.drones,
            vec![
                DroneCredential {
                    identity: "drone1".to_string(),
                    secret_hash: "abcdef".to_string(),
                },
                DroneCredential {
                    identity: "drone2".to_string(),
                    secret_hash: "123456".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_load_secrets_rejects_bad_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "no-separator-here").unwrap();

        let mut auth = AuthConfig {
            secrets_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(
            auth.load_secrets(),
            Err(ConfigError::ParseError(_, _))
        ));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.auth.required = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        let mut config = Config::default();
        config.auth.token_ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.auth.jwt_secret.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.auth.token_ttl_secs = MAX_TOKEN_TTL_SECS;
        assert!(config.validate().is_ok());
        config.auth.token_ttl_secs = u64::MAX;
        match config.validate() {
            Err(ConfigError::ValidationError(msg)) => assert!(msg.contains("token_ttl_secs")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_yaml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dronelink.yaml");

        let config = Config::default();
        config.save(&path).unwrap();
        let parsed = Config::from_file(&path).unwrap();
        assert_eq!(parsed.network.bind_addr, config.network.bind_addr);
        assert_eq!(parsed.auth.token_ttl_secs, config.auth.token_ttl_secs);
    }
}
