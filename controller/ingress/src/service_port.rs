use std::{fmt, net::Ipv4Addr};

/// Names one port of a service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServicePortName {
    pub namespace: String,
    pub name: String,
    pub port: String,
    pub protocol: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ServiceType {
    ClusterIp,
    ExternalName,
    /// Exported by a peer cluster.
    Imported,
}

/// The projection of one service port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInfo {
    pub address: String,
    pub port: u16,
    pub port_name: String,
    pub protocol: String,
    pub type_: ServiceType,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Endpoint {
    Ip {
        ip: Ipv4Addr,
        port: u16,
        node_name: String,
        host_name: String,
    },
    /// The target of an `ExternalName` service.
    External { host: String, port: u16 },
    CrossCluster {
        host: String,
        port: u16,
        path: String,
        cluster: String,
    },
}

pub(crate) const DEFAULT_PROTOCOL: &str = "TCP";

// === impl ServicePortName ===

impl ServicePortName {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        port: impl Into<String>,
        protocol: Option<&str>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            port: port.into(),
            protocol: protocol.unwrap_or(DEFAULT_PROTOCOL).to_string(),
        }
    }
}

impl fmt::Display for ServicePortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)?;
        if !self.port.is_empty() {
            write!(f, ":{}", self.port)?;
        }
        Ok(())
    }
}

// === impl Endpoint ===

impl Endpoint {
    pub fn address(&self) -> String {
        match self {
            Self::Ip { ip, port, .. } => format!("{ip}:{port}"),
            Self::External { host, port } => format!("{host}:{port}"),
            Self::CrossCluster {
                host, port, path, ..
            } => format!("{host}:{port}{path}"),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// Validates a DNS-1123 subdomain, e.g. `api.example.com`.
pub(crate) fn is_dns1123_subdomain(name: &str) -> bool {
    !name.is_empty() && name.len() <= 253 && name.split('.').all(is_dns1123_label)
}

/// Validates a wildcard subdomain, e.g. `*.example.com`.
pub(crate) fn is_wildcard_subdomain(name: &str) -> bool {
    name.strip_prefix("*.")
        .is_some_and(|rest| name.len() <= 253 && is_dns1123_subdomain(rest))
}

fn is_dns1123_label(label: &str) -> bool {
    let bytes = label.as_bytes();
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            label.len() <= 63
                && alnum(first)
                && alnum(last)
                && bytes.iter().all(|b| alnum(b) || *b == b'-')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_port_names_display() {
        let named = ServicePortName::new("ns", "web", "http", None);
        assert_eq!(named.to_string(), "ns/web:http");
        assert_eq!(named.protocol, "TCP");
        assert_eq!(ServicePortName::new("ns", "web", "", None).to_string(), "ns/web");
    }

    #[test]
    fn endpoint_addresses() {
        let ip = Endpoint::Ip {
            ip: Ipv4Addr::new(10, 0, 0, 1),
            port: 8080,
            node_name: "node-a".to_string(),
            host_name: String::new(),
        };
        assert_eq!(ip.address(), "10.0.0.1:8080");

        let remote = Endpoint::CrossCluster {
            host: "gw.peer".to_string(),
            port: 80,
            path: "/c2/ns/web".to_string(),
            cluster: "c2".to_string(),
        };
        assert_eq!(remote.address(), "gw.peer:80/c2/ns/web");
    }

    #[test]
    fn subdomains() {
        assert!(is_dns1123_subdomain("example.com"));
        assert!(is_dns1123_subdomain("a-1.b"));
        assert!(!is_dns1123_subdomain("Example.com"));
        assert!(!is_dns1123_subdomain("-a.com"));
        assert!(!is_dns1123_subdomain("a..com"));
        assert!(!is_dns1123_subdomain(""));

        assert!(is_wildcard_subdomain("*.example.com"));
        assert!(!is_wildcard_subdomain("example.com"));
        assert!(!is_wildcard_subdomain("*example.com"));
        assert!(!is_wildcard_subdomain("a.*.com"));
    }
}
