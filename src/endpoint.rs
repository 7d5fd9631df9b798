//! Network endpoints shared out of band by both sides of an exchange.

use serde::Deserialize;
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;
use thiserror::Error;

/// A (host, port) pair the listener binds and the connector targets.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

/// Rejected endpoint text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointParseError {
    #[error("endpoint '{0}' is missing a port (expected host:port)")]
    MissingPort(String),
    #[error("endpoint '{0}' has an empty host")]
    EmptyHost(String),
    #[error("endpoint '{0}' has an invalid port")]
    InvalidPort(String),
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve to every socket address the host maps to, in resolver order.
    pub fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port).to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {self}"),
            ));
        }
        Ok(addrs)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| EndpointParseError::MissingPort(s.to_string()))?;

        // Bracketed IPv6 literal: [::1]:8080
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        if host.is_empty() {
            return Err(EndpointParseError::EmptyHost(s.to_string()));
        }
        if port.is_empty() {
            return Err(EndpointParseError::MissingPort(s.to_string()));
        }

        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointParseError::InvalidPort(s.to_string()))?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let endpoint: Endpoint = "127.0.0.1:8080".parse().unwrap();
        assert_eq!(endpoint.host(), "127.0.0.1");
        assert_eq!(endpoint.port(), 8080);

        let endpoint: Endpoint = "localhost:80".parse().unwrap();
        assert_eq!(endpoint.host(), "localhost");
        assert_eq!(endpoint.port(), 80);
    }

    #[test]
    fn test_parse_ipv6() {
        let endpoint: Endpoint = "[::1]:9000".parse().unwrap();
        assert_eq!(endpoint.host(), "::1");
        assert_eq!(endpoint.port(), 9000);
        assert_eq!(endpoint.to_string(), "[::1]:9000");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "localhost".parse::<Endpoint>(),
            Err(EndpointParseError::MissingPort("localhost".to_string()))
        );
        assert_eq!(
            "localhost:".parse::<Endpoint>(),
            Err(EndpointParseError::MissingPort("localhost:".to_string()))
        );
        assert_eq!(
            ":8080".parse::<Endpoint>(),
            Err(EndpointParseError::EmptyHost(":8080".to_string()))
        );
        assert_eq!(
            "localhost:http".parse::<Endpoint>(),
            Err(EndpointParseError::InvalidPort("localhost:http".to_string()))
        );
        assert_eq!(
            "localhost:70000".parse::<Endpoint>(),
            Err(EndpointParseError::InvalidPort("localhost:70000".to_string()))
        );
    }

    #[test]
    fn test_display_roundtrip() {
        let endpoint = Endpoint::new("127.0.0.1", 11211);
        assert_eq!(endpoint.to_string(), "127.0.0.1:11211");
        assert_eq!(endpoint.to_string().parse::<Endpoint>().unwrap(), endpoint);
    }

    #[test]
    fn test_resolve_loopback() {
        let endpoint = Endpoint::new("127.0.0.1", 8080);
        let addrs = endpoint.resolve().unwrap();
        assert_eq!(addrs, vec!["127.0.0.1:8080".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_from_socket_addr() {
        let addr: SocketAddr = "[::1]:4000".parse().unwrap();
        let endpoint = Endpoint::from(addr);
        assert_eq!(endpoint.host(), "::1");
        assert_eq!(endpoint.port(), 4000);
    }
}
