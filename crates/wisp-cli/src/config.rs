//! Configuration system for the Wisp server.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use wisp_core::{Method, ServiceConfig};
use wisp_crypto::PSK_SIZE;
use zeroize::Zeroizing;

/// Wisp configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, shared by the TCP and UDP listeners
    #[serde(default = "default_listen_addr")]
    pub listen: String,
    /// Cipher method name
    #[serde(default = "default_method")]
    pub method: String,
    /// Base64-encoded 32-byte pre-shared key
    #[serde(default)]
    pub psk: String,
    /// Idle timeout for datagram sessions, in seconds
    #[serde(default = "default_udp_timeout")]
    pub udp_timeout_secs: u64,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen", &self.listen)
            .field("method", &self.method)
            .field("psk", &"<redacted>")
            .field("udp_timeout_secs", &self.udp_timeout_secs)
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_listen_addr() -> String {
    "0.0.0.0:8388".to_string()
}

fn default_method() -> String {
    Method::Aes256Gcm.name().to_string()
}

fn default_udp_timeout() -> u64 {
    wisp_core::DEFAULT_UDP_TIMEOUT.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
            method: default_method(),
            psk: String::new(),
            udp_timeout_secs: default_udp_timeout(),
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
            .join("wisp/config.toml")
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

    /// Parse listen address as `SocketAddr`
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn parse_listen_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.server.listen.parse()?)
    }

    /// Parse the cipher method
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown method name.
    pub fn parse_method(&self) -> anyhow::Result<Method> {
        Ok(self.server.method.parse()?)
    }

    /// Decode the pre-shared key
    ///
    /// # Errors
    ///
    /// Returns an error if the key is missing, not base64, or not 32 bytes.
    pub fn decode_psk(&self) -> anyhow::Result<Zeroizing<Vec<u8>>> {
        if self.server.psk.is_empty() {
            anyhow::bail!("No pre-shared key configured (generate one with `wisp genkey`)");
        }
        let psk = Zeroizing::new(
            STANDARD
                .decode(self.server.psk.trim())
                .map_err(|e| anyhow::anyhow!("Pre-shared key is not valid base64: {e}"))?,
        );
        if psk.len() != PSK_SIZE {
            anyhow::bail!(
                "Pre-shared key must be {} bytes, got {}",
                PSK_SIZE,
                psk.len()
            );
        }
        Ok(psk)
    }

    /// Build the protocol engine configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the method or key is invalid.
    pub fn service_config(&self) -> anyhow::Result<ServiceConfig> {
        let psk = self.decode_psk()?;
        Ok(ServiceConfig::new(self.parse_method()?, psk.to_vec())
            .with_udp_timeout(Duration::from_secs(self.server.udp_timeout_secs)))
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parse_listen_addr()?;
        self.parse_method()?;

        if self.server.udp_timeout_secs == 0 || self.server.udp_timeout_secs > 86_400 {
            anyhow::bail!("UDP timeout must be between 1 second and 1 day");
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
}

/// Fresh random pre-shared key, base64-encoded
///
/// # Errors
///
/// Returns an error if the system random source fails.
pub fn generate_psk() -> anyhow::Result<String> {
    let key = Zeroizing::new(wisp_crypto::random::random_32()?);
    Ok(STANDARD.encode(key.as_slice()))
}
