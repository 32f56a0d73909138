//! Destination resource parser

use crate::{Error, Result};
use std::fmt;

/// A parsed `proto:host:port` destination resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Protocol tag (ssl, tcp, ...)
    pub proto: String,
    /// Hostname or address literal, without brackets
    pub host: String,
    /// Remote port
    pub port: u16,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}:[{}]:{}", self.proto, self.host, self.port)
        } else {
            write!(f, "{}:{}:{}", self.proto, self.host, self.port)
        }
    }
}

/// Parse a resource string.
///
/// Accepted forms:
/// - `ssl:redirector.example.com:443`
/// - `tcp:10.0.0.1:6640`
/// - `ssl:[2001:db8::1]:6640`
pub fn parse_resource(resource: &str) -> Result<Resource> {
    let resource = resource.trim();

    let (proto, rest) = resource
        .split_once(':')
        .ok_or_else(|| Error::parse(format!("Missing protocol in resource: {}", resource)))?;

    if proto.is_empty() {
        return Err(Error::parse(format!("Empty protocol in resource: {}", resource)));
    }

    let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| Error::parse(format!("Unterminated '[' in resource: {}", resource)))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| Error::parse(format!("Missing port in resource: {}", resource)))?;
        (host, port)
    } else {
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| Error::parse(format!("Missing port in resource: {}", resource)))?;
        // IPv6 literals must be bracketed
        if host.contains(':') {
            return Err(Error::parse(format!("Unbracketed IPv6 host in resource: {}", resource)));
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(Error::parse(format!("Empty host in resource: {}", resource)));
    }

    let port: u16 = port
        .parse()
        .map_err(|e| Error::parse(format!("Invalid port '{}': {}", port, e)))?;
    if port == 0 {
        return Err(Error::parse(format!("Port cannot be 0 in resource: {}", resource)));
    }

    Ok(Resource {
        proto: proto.to_string(),
        host: host.to_string(),
        port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hostname() {
        let r = parse_resource("ssl:redirector.example.com:443").unwrap();
        assert_eq!(r.proto, "ssl");
        assert_eq!(r.host, "redirector.example.com");
        assert_eq!(r.port, 443);
    }

    #[test]
    fn test_parse_ipv6_literal() {
        let r = parse_resource("ssl:[2001:db8::1]:6640").unwrap();
        assert_eq!(r.host, "2001:db8::1");
        assert_eq!(r.port, 6640);
        assert_eq!(r.to_string(), "ssl:[2001:db8::1]:6640");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_resource("").is_err());
        assert!(parse_resource("ssl").is_err());
        assert!(parse_resource(":host:443").is_err());
        assert!(parse_resource("ssl:host").is_err());
        assert!(parse_resource("ssl::443").is_err());
        assert!(parse_resource("ssl:host:https").is_err());
        assert!(parse_resource("ssl:host:0").is_err());
        assert!(parse_resource("ssl:2001:db8::1:443").is_err());
        assert!(parse_resource("ssl:[2001:db8::1:443").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let r = parse_resource(" tcp:10.0.0.1:6640 ").unwrap();
        assert_eq!(r.to_string(), "tcp:10.0.0.1:6640");
    }
}
