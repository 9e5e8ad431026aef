//! 端点地址解析
//!
//! 支持 `tcp://host:port` 和 `udp://host:port`。`host` 可以是 IP、主机名、
//! `[IPv6]`，或 `*`（等价于 `0.0.0.0`，监听所有网卡）。

use crate::LinkError;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

/// 传输协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Tcp,
    Udp,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Tcp => "tcp",
            Scheme::Udp => "udp",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 端点地址
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Endpoint {
    /// 解析端点字符串
    ///
    /// # Example
    ///
    /// ```
    /// use iiwa_link::{Endpoint, Scheme};
    ///
    /// let ep = Endpoint::parse("tcp://172.31.1.147:30010").unwrap();
    /// assert_eq!(ep.scheme(), Scheme::Tcp);
    /// assert_eq!(ep.host(), "172.31.1.147");
    /// assert_eq!(ep.port(), 30010);
    /// ```
    pub fn parse(s: &str) -> Result<Self, LinkError> {
        let invalid = |reason: &str| LinkError::InvalidEndpoint {
            endpoint: s.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = s.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let scheme = match scheme.to_ascii_lowercase().as_str() {
            "tcp" => Scheme::Tcp,
            "udp" => Scheme::Udp,
            _ => return Err(invalid("unsupported scheme (expected tcp or udp)")),
        };

        let (host, port) = rest.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port = port.parse::<u16>().map_err(|_| invalid("invalid port"))?;

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 解析为 socket 地址（主机名取第一个解析结果）
    pub fn resolve(&self) -> Result<SocketAddr, LinkError> {
        let host = if self.host == "*" {
            "0.0.0.0"
        } else {
            self.host.as_str()
        };

        let mut addrs = (host, self.port).to_socket_addrs().map_err(|e| {
            LinkError::InvalidEndpoint {
                endpoint: self.to_string(),
                reason: e.to_string(),
            }
        })?;
        addrs.next().ok_or_else(|| LinkError::InvalidEndpoint {
            endpoint: self.to_string(),
            reason: "host resolved to no address".to_string(),
        })
    }
}

impl FromStr for Endpoint {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme, self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_addresses() {
        let local = Endpoint::parse("tcp://0.0.0.0:30010").unwrap();
        assert_eq!(local.scheme(), Scheme::Tcp);
        assert_eq!(local.host(), "0.0.0.0");
        assert_eq!(local.port(), 30010);

        let remote: Endpoint = "tcp://172.31.1.147:30010".parse().unwrap();
        assert_eq!(remote.resolve().unwrap(), "172.31.1.147:30010".parse().unwrap());
    }

    #[test]
    fn test_parse_udp_and_uppercase_scheme() {
        let ep = Endpoint::parse("UDP://192.170.10.2:30200").unwrap();
        assert_eq!(ep.scheme(), Scheme::Udp);
        assert_eq!(ep.to_string(), "udp://192.170.10.2:30200");
    }

    #[test]
    fn test_parse_wildcard_host() {
        let ep = Endpoint::parse("tcp://*:30010").unwrap();
        assert_eq!(ep.resolve().unwrap(), "0.0.0.0:30010".parse().unwrap());
    }

    #[test]
    fn test_parse_ipv6() {
        let ep = Endpoint::parse("tcp://[::1]:30010").unwrap();
        assert_eq!(ep.host(), "::1");
        assert_eq!(ep.to_string(), "tcp://[::1]:30010");
        assert_eq!(ep.resolve().unwrap(), "[::1]:30010".parse().unwrap());
    }

    #[test]
    fn test_parse_errors() {
        for bad in [
            "172.31.1.147:30010",
            "ipc:///tmp/iiwa",
            "tcp://172.31.1.147",
            "tcp://:30010",
            "tcp://172.31.1.147:70000",
            "tcp://172.31.1.147:port",
        ] {
            assert!(
                matches!(Endpoint::parse(bad), Err(LinkError::InvalidEndpoint { .. })),
                "expected parse failure for {bad:?}"
            );
        }
    }
}
