//! Configuration system for the w3t NAT CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use w3t_nat::TransactionIdPolicy;

/// Longest accepted round-trip timeout
const MAX_TIMEOUT_MS: u64 = 60_000;

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// STUN server supporting RFC 5780 (host:port)
    #[serde(default = "default_server")]
    pub server: String,
    /// Local bind address for probe sockets
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Round-trip timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Discard responses whose transaction ID does not match the request
    #[serde(default = "default_true")]
    pub strict_transaction_ids: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_server() -> String {
    w3t_nat::DEFAULT_STUN_SERVER.to_string()
}

fn default_bind() -> String {
    "0.0.0.0:0".to_string()
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            bind: default_bind(),
            timeout_ms: default_timeout_ms(),
            strict_transaction_ids: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        Ok(())
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("w3t/config.toml")
    }

    /// Load config from default path, or create default if it doesn't exist
    ///
    /// # Errors
    ///
    /// Returns an error if reading or creating the config fails.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();

        if path.exists() {
            Self::load(&path)
        } else {
            let config = Self::default();
            config.save(&path)?;
            Ok(config)
        }
    }

    /// Parse bind address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.discovery
            .bind
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid bind address '{}': {e}", self.discovery.bind))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_host_port(&self.discovery.server, "STUN server")?;
        self.parse_bind_addr()?;

        if self.discovery.timeout_ms == 0 || self.discovery.timeout_ms > MAX_TIMEOUT_MS {
            anyhow::bail!("Timeout must be between 1 and {MAX_TIMEOUT_MS} ms");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }

    /// Engine configuration described by this file
    ///
    /// # Errors
    ///
    /// Returns an error if the bind address cannot be parsed.
    pub fn to_discovery_config(&self) -> anyhow::Result<w3t_nat::DiscoveryConfig> {
        let transaction_ids = if self.discovery.strict_transaction_ids {
            TransactionIdPolicy::Strict
        } else {
            TransactionIdPolicy::Lenient
        };

        Ok(w3t_nat::DiscoveryConfig {
            server: self.discovery.server.clone(),
            bind: self.parse_bind_addr()?,
            timeout: Duration::from_millis(self.discovery.timeout_ms),
            transaction_ids,
        })
    }
}

/// Validate host:port format
fn validate_host_port(addr: &str, name: &str) -> anyhow::Result<()> {
    let Some((host, port_str)) = addr.rsplit_once(':') else {
        anyhow::bail!("{name} '{addr}' missing port (expected format: host:port)");
    };

    let port: u16 = port_str
        .parse()
        .map_err(|_| anyhow::anyhow!("{name} '{addr}' has invalid port: {port_str}"))?;

    if port == 0 {
        anyhow::bail!("{name} '{addr}' has invalid port: 0");
    }

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        anyhow::bail!("{name} '{addr}' has empty hostname");
    }

    if host.contains('/') || host.contains('\\') || host.contains(char::is_whitespace) {
        anyhow::bail!("{name} '{addr}' contains invalid characters");
    }

    Ok(())
}
