use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    str::FromStr,
};

use thiserror::Error;

/// Maximum length of a local (Unix) socket path, matching `sun_path`.
const LOCAL_PATH_MAX: usize = 108;

/// The peer a sender connects to.
///
/// Two families are supported: an IP endpoint (`host:port`, with optional
/// `[..]` brackets around an IPv6 literal) and a local filesystem endpoint
/// (a Unix socket path). Host names are not resolved; the host part must be
/// an address literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A TCP endpoint given as an IPv4 or IPv6 literal plus port.
    Ip(SocketAddr),
    /// A Unix socket path.
    Local(PathBuf),
}

/// Error returned when an endpoint string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointParseError {
    /// The port suffix is not a decimal number in `1..=65535`.
    #[error("invalid port in address")]
    InvalidPort,
    /// The host part is not a valid IPv4 or IPv6 literal.
    #[error("invalid host address literal")]
    InvalidHost,
    /// The string is not an address and does not fit a local socket path.
    #[error("local socket path must be between 1 and 108 bytes")]
    InvalidLocalPath,
}

impl Endpoint {
    /// Builds an IP endpoint from a host literal and a port, mirroring the
    /// two-argument form of the address string syntax.
    pub fn with_port(host: &str, port: u16) -> Result<Self, EndpointParseError> {
        if port == 0 {
            return Err(EndpointParseError::InvalidPort);
        }
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let ip: IpAddr = host.parse().map_err(|_| EndpointParseError::InvalidHost)?;
        Ok(Endpoint::Ip(SocketAddr::new(ip, port)))
    }
}

fn parse_port(s: &str) -> Option<u16> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match s.parse::<u32>() {
        Ok(n) if (1..=65535).contains(&n) => Some(n as u16),
        _ => None,
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    /// Parses the accepted address syntax.
    ///
    /// The suffix after the last `:` decides the family: if it is a decimal
    /// string the input is treated as `host:port` and must parse fully (an
    /// out-of-range port or a non-literal host is an error, not a path).
    /// Anything else falls back to a local socket path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((host, port)) = s.rsplit_once(':') {
            if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
                let port = parse_port(port).ok_or(EndpointParseError::InvalidPort)?;
                return Endpoint::with_port(host, port);
            }
        }

        if s.is_empty() || s.len() > LOCAL_PATH_MAX {
            return Err(EndpointParseError::InvalidLocalPath);
        }
        Ok(Endpoint::Local(PathBuf::from(s)))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // SocketAddr renders IPv6 bracketed, matching the input syntax.
            Endpoint::Ip(addr) => write!(f, "{addr}"),
            Endpoint::Local(path) => write!(f, "{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_with_port() {
        let ep: Endpoint = "127.0.0.1:80".parse().unwrap();
        assert_eq!(ep, Endpoint::Ip("127.0.0.1:80".parse().unwrap()));
    }

    #[test]
    fn test_bracketed_ipv6_with_port() {
        let ep: Endpoint = "[::1]:443".parse().unwrap();
        let Endpoint::Ip(addr) = ep else {
            panic!("expected an IP endpoint");
        };
        assert_eq!(addr.ip(), "::1".parse::<IpAddr>().unwrap());
        assert_eq!(addr.port(), 443);
    }

    #[test]
    fn test_unbracketed_ipv6_with_port() {
        // The last colon separates the port; the prefix is still a valid
        // IPv6 literal.
        let ep: Endpoint = "2001:db8::1:80".parse().unwrap();
        let Endpoint::Ip(addr) = ep else {
            panic!("expected an IP endpoint");
        };
        assert_eq!(addr.ip(), "2001:db8::1".parse::<IpAddr>().unwrap());
        assert_eq!(addr.port(), 80);
    }

    #[test]
    fn test_local_path() {
        let ep: Endpoint = "/var/run/x.sock".parse().unwrap();
        assert_eq!(ep, Endpoint::Local(PathBuf::from("/var/run/x.sock")));
    }

    #[test]
    fn test_port_out_of_range_rejected() {
        assert_eq!(
            "[::1]:99999".parse::<Endpoint>(),
            Err(EndpointParseError::InvalidPort)
        );
    }

    #[test]
    fn test_port_zero_rejected() {
        assert_eq!(
            "host:0".parse::<Endpoint>(),
            Err(EndpointParseError::InvalidPort)
        );
    }

    #[test]
    fn test_non_literal_host_rejected() {
        assert_eq!(
            "example.com:80".parse::<Endpoint>(),
            Err(EndpointParseError::InvalidHost)
        );
    }

    #[test]
    fn test_empty_string_rejected() {
        assert_eq!(
            "".parse::<Endpoint>(),
            Err(EndpointParseError::InvalidLocalPath)
        );
    }

    #[test]
    fn test_oversized_local_path_rejected() {
        let long = "/".repeat(LOCAL_PATH_MAX + 1);
        assert_eq!(
            long.parse::<Endpoint>(),
            Err(EndpointParseError::InvalidLocalPath)
        );
    }

    #[test]
    fn test_path_with_non_numeric_suffix_is_local() {
        let ep: Endpoint = "./spool/file:name".parse().unwrap();
        assert_eq!(ep, Endpoint::Local(PathBuf::from("./spool/file:name")));
    }

    #[test]
    fn test_with_port() {
        let ep = Endpoint::with_port("::1", 443).unwrap();
        assert_eq!(ep, "[::1]:443".parse().unwrap());

        assert_eq!(
            Endpoint::with_port("::1", 0),
            Err(EndpointParseError::InvalidPort)
        );
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["127.0.0.1:80", "[::1]:443", "/var/run/x.sock"] {
            let ep: Endpoint = s.parse().unwrap();
            assert_eq!(ep.to_string(), s);
            assert_eq!(ep.to_string().parse::<Endpoint>().unwrap(), ep);
        }
    }
}
