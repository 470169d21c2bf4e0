//! Service configuration.

use std::time::Duration;
use wisp_crypto::Method;
use zeroize::Zeroizing;

/// Default idle timeout for datagram sessions.
pub const DEFAULT_UDP_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings fixed for the lifetime of a [`Service`](crate::Service).
#[derive(Clone)]
pub struct ServiceConfig {
    /// Cipher family
    pub method: Method,
    /// Pre-shared key, wiped on drop
    pub psk: Zeroizing<Vec<u8>>,
    /// Idle time after which a datagram session is evicted
    pub udp_timeout: Duration,
}

impl ServiceConfig {
    /// Configuration with the default UDP timeout.
    pub fn new(method: Method, psk: impl Into<Vec<u8>>) -> Self {
        Self {
            method,
            psk: Zeroizing::new(psk.into()),
            udp_timeout: DEFAULT_UDP_TIMEOUT,
        }
    }

    /// Override the datagram session idle timeout.
    #[must_use]
    pub fn with_udp_timeout(mut self, timeout: Duration) -> Self {
        self.udp_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("method", &self.method)
            .field("psk", &"<redacted>")
            .field("udp_timeout", &self.udp_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_key() {
        let config = ServiceConfig::new(Method::Aes256Gcm, vec![0xAB; 32])
            .with_udp_timeout(Duration::from_secs(5));
        let shown = format!("{config:?}");
        assert!(shown.contains("redacted"));
        assert!(!shown.contains("171"));
        assert_eq!(config.udp_timeout, Duration::from_secs(5));
    }
}
