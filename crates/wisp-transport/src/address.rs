//! SOCKS-style destination address codec.
//!
//! Wire format: `ATYP(1) | address | port(2, big-endian)` where the address
//! is 4 bytes for IPv4 (`0x01`), a length-prefixed name for domains (`0x03`)
//! and 16 bytes for IPv6 (`0x04`).

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// IPv4 address type
pub const ATYP_IPV4: u8 = 0x01;
/// Domain name address type
pub const ATYP_DOMAIN: u8 = 0x03;
/// IPv6 address type
pub const ATYP_IPV6: u8 = 0x04;

/// Largest possible encoded destination (domain of 255 bytes).
pub const MAX_ENCODED_LEN: usize = 1 + 1 + 255 + 2;

/// Address decoding errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Input ended before the address was complete
    #[error("address truncated: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes present
        available: usize,
    },

    /// Unknown address type byte
    #[error("unknown address type: {0:#04x}")]
    UnknownType(u8),

    /// Domain is empty, too long, or not UTF-8
    #[error("invalid domain name")]
    InvalidDomain,

    /// Text form could not be parsed as `host:port`
    #[error("invalid destination: {0}")]
    Invalid(String),
}

impl From<AddressError> for io::Error {
    fn from(err: AddressError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

/// Where a relayed connection or packet is headed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Literal socket address
    Ip(SocketAddr),
    /// Domain name and port, resolved at dial time
    Domain(String, u16),
}

impl Destination {
    /// Build a domain destination.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::InvalidDomain`] for empty names or names longer
    /// than 255 bytes.
    pub fn domain(name: impl Into<String>, port: u16) -> Result<Self, AddressError> {
        let name = name.into();
        if name.is_empty() || name.len() > 255 {
            return Err(AddressError::InvalidDomain);
        }
        Ok(Self::Domain(name, port))
    }

    /// Destination port.
    #[must_use]
    pub fn port(&self) -> u16 {
        match self {
            Self::Ip(addr) => addr.port(),
            Self::Domain(_, port) => *port,
        }
    }

    /// Bytes needed by [`encode`](Self::encode).
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Ip(SocketAddr::V4(_)) => 1 + 4 + 2,
            Self::Ip(SocketAddr::V6(_)) => 1 + 16 + 2,
            Self::Domain(name, _) => 1 + 1 + name.len() + 2,
        }
    }

    /// Append the wire form to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + self.encoded_len(), 0);
        self.write_into(&mut out[start..]);
    }

    /// Write the wire form into the front of `out`, returning its length.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::Truncated`] if `out` is too small.
    pub fn encode_into(&self, out: &mut [u8]) -> Result<usize, AddressError> {
        let len = self.encoded_len();
        let available = out.len();
        let slot = out.get_mut(..len).ok_or(AddressError::Truncated {
            needed: len,
            available,
        })?;
        self.write_into(slot);
        Ok(len)
    }

    fn write_into(&self, out: &mut [u8]) {
        let port_at = out.len() - 2;
        match self {
            Self::Ip(SocketAddr::V4(addr)) => {
                out[0] = ATYP_IPV4;
                out[1..5].copy_from_slice(&addr.ip().octets());
            }
            Self::Ip(SocketAddr::V6(addr)) => {
                out[0] = ATYP_IPV6;
                out[1..17].copy_from_slice(&addr.ip().octets());
            }
            Self::Domain(name, _) => {
                out[0] = ATYP_DOMAIN;
                out[1] = name.len() as u8;
                out[2..2 + name.len()].copy_from_slice(name.as_bytes());
            }
        }
        out[port_at..].copy_from_slice(&self.port().to_be_bytes());
    }

    /// Total encoded length implied by the first two bytes of a wire address.
    ///
    /// For domains the second byte (name length) is required; other types
    /// only need the type byte.
    ///
    /// # Errors
    ///
    /// Returns [`AddressError::UnknownType`] or [`AddressError::Truncated`].
    pub fn wire_len(prefix: &[u8]) -> Result<usize, AddressError> {
        let atyp = *prefix.first().ok_or(AddressError::Truncated {
            needed: 1,
            available: 0,
        })?;
        match atyp {
            ATYP_IPV4 => Ok(1 + 4 + 2),
            ATYP_IPV6 => Ok(1 + 16 + 2),
            ATYP_DOMAIN => {
                let len = *prefix.get(1).ok_or(AddressError::Truncated {
                    needed: 2,
                    available: prefix.len(),
                })?;
                Ok(1 + 1 + len as usize + 2)
            }
            other => Err(AddressError::UnknownType(other)),
        }
    }

    /// Decode a destination from the front of `bytes`, returning it together
    /// with the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Fails on truncated input, unknown types and invalid domain names.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), AddressError> {
        let len = Self::wire_len(bytes)?;
        if bytes.len() < len {
            return Err(AddressError::Truncated {
                needed: len,
                available: bytes.len(),
            });
        }
        let port = u16::from_be_bytes([bytes[len - 2], bytes[len - 1]]);

        let destination = match bytes[0] {
            ATYP_IPV4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&bytes[1..5]);
                Self::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port))
            }
            ATYP_IPV6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&bytes[1..17]);
                Self::Ip(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port))
            }
            _ => {
                let name = std::str::from_utf8(&bytes[2..len - 2])
                    .map_err(|_| AddressError::InvalidDomain)?;
                Self::domain(name, port)?
            }
        };
        Ok((destination, len))
    }

    /// Read one wire-form destination from `reader`.
    ///
    /// # Errors
    ///
    /// Returns read failures, and `InvalidData` for malformed addresses.
    pub async fn read_from<R>(reader: &mut R) -> io::Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut wire = [0u8; MAX_ENCODED_LEN];
        reader.read_exact(&mut wire[..2]).await?;
        let len = Self::wire_len(&wire[..2])?;
        reader.read_exact(&mut wire[2..len]).await?;
        Ok(Self::decode(&wire[..len])?.0)
    }

    /// Resolve to a socket address, looking up domain names.
    ///
    /// # Errors
    ///
    /// Returns the resolver error, or `NotFound` if the name has no address.
    pub async fn resolve(&self) -> io::Result<SocketAddr> {
        match self {
            Self::Ip(addr) => Ok(*addr),
            Self::Domain(name, port) => tokio::net::lookup_host((name.as_str(), *port))
                .await?
                .next()
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("no address for {name}"))
                }),
        }
    }
}

impl From<SocketAddr> for Destination {
    fn from(addr: SocketAddr) -> Self {
        Self::Ip(addr)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
            Self::Domain(name, port) => write!(f, "{name}:{port}"),
        }
    }
}

impl FromStr for Destination {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Self::Ip(addr));
        }
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressError::Invalid(s.to_string()))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| AddressError::Invalid(s.to_string()))?;
        if host.contains(':') {
            return Err(AddressError::Invalid(s.to_string()));
        }
        Self::domain(host, port)
    }
}
