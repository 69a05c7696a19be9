//! Configuration loading and types for s3gate.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Every field has a default so an empty file (or no
//! file at all) yields a runnable development setup.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Credentials and their scopes.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Region reported for buckets created without a location constraint.
    #[serde(default = "default_region")]
    pub region: String,

    /// Set when TLS is terminated in front of the gateway; every request
    /// is then treated as having arrived over an encrypted transport.
    #[serde(default)]
    pub tls_terminated: bool,

    /// Largest request body buffered in memory (ACL and bucket bodies).
    #[serde(default = "default_max_buffered_body")]
    pub max_buffered_body: usize,

    /// Graceful shutdown timeout in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            region: default_region(),
            tls_terminated: false,
            max_buffered_body: default_max_buffered_body(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics collection and the `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Known credentials.
    #[serde(default = "default_credentials")]
    pub credentials: Vec<CredentialConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            credentials: default_credentials(),
        }
    }
}

/// A single access key entry.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    /// Access key (also accepts `access_key_id`).
    #[serde(alias = "access_key_id")]
    pub access_key: String,

    /// Secret access key (also accepts `secret_access_key`).
    #[serde(alias = "secret_access_key")]
    pub secret_key: String,

    /// Canonical owner id; defaults to the access key.
    #[serde(default)]
    pub owner_id: Option<String>,

    /// Owner display name; defaults to the access key.
    #[serde(default)]
    pub display_name: Option<String>,

    /// Bucket patterns this key may touch (`*`, `prefix-*`, or exact names).
    #[serde(default = "default_bucket_scope")]
    pub buckets: Vec<String>,

    /// Restrict the key to read operations.
    #[serde(default)]
    pub read_only: bool,
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9012
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_buffered_body() -> usize {
    1024 * 1024
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_bucket_scope() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_credentials() -> Vec<CredentialConfig> {
    vec![CredentialConfig {
        access_key: "s3gate".to_string(),
        secret_key: "s3gate-secret".to_string(),
        owner_id: None,
        display_name: None,
        buckets: default_bucket_scope(),
        read_only: false,
    }]
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 9012);
        assert_eq!(config.server.region, "us-east-1");
        assert!(!config.server.tls_terminated);
        assert_eq!(config.auth.credentials.len(), 1);
        assert_eq!(config.auth.credentials[0].buckets, vec!["*"]);
        assert!(config.observability.metrics);
    }

    #[test]
    fn test_load_config_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  port: 9100
  tls_terminated: true
auth:
  credentials:
    - access_key_id: reader
      secret_access_key: reader-secret
      read_only: true
      buckets: ["logs-*"]
logging:
  format: json
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.server.tls_terminated);
        let cred = &config.auth.credentials[0];
        assert_eq!(cred.access_key, "reader");
        assert_eq!(cred.secret_key, "reader-secret");
        assert!(cred.read_only);
        assert_eq!(cred.buckets, vec!["logs-*"]);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config("/nonexistent/s3gate.yaml").is_err());
    }
}
