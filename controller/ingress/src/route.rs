//! Route artifacts as they are uploaded to the configuration store.

use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Certificate {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cert: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub key: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub ca: String,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub enum LoadBalancer {
    #[default]
    RoundRobinLoadBalancer,
    LeastWorkLoadBalancer,
    HashingLoadBalancer,
}

/// Where a `host+path` is routed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RouterSpec {
    #[serde(skip)]
    pub host: String,

    #[serde(skip)]
    pub path: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub service: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rewrite: Vec<String>,
}

/// How requests to a backend are balanced.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BalancerSpec {
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub sticky: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub balancer: Option<LoadBalancer>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamSpec {
    #[serde(rename = "proto", skip_serializing_if = "String::is_empty")]
    pub protocol: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub ssl_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_cert: Option<Certificate>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ssl_verify: bool,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<UpstreamEndpoint>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct UpstreamEndpoint {
    pub ip: String,
    pub port: u16,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    #[serde(rename = "isTLS", skip_serializing_if = "std::ops::Not::not")]
    pub is_tls: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_wildcard_host: bool,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub verify_client: bool,

    #[serde(skip_serializing_if = "is_zero")]
    pub verify_depth: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Certificate>,

    #[serde(rename = "trustedCA", skip_serializing_if = "Option::is_none")]
    pub trusted_ca: Option<Certificate>,
}

/// One ingress route with its backend endpoints.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct IngressRouteSpec {
    #[serde(flatten)]
    pub router: RouterSpec,

    #[serde(flatten)]
    pub balancer: BalancerSpec,

    #[serde(flatten)]
    pub tls: TlsSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IngressRoutes {
    pub hash: String,
    pub routes: Vec<IngressRouteSpec>,
}

/// The `ingress.json` artifact.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    #[serde(rename = "trustedCAs")]
    pub trusted_cas: Vec<String>,
    pub certificates: BTreeMap<String, TlsSpec>,
    pub routes: BTreeMap<String, RouterSpec>,
    pub services: BTreeMap<String, BalancerSpec>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ServiceRoutes {
    #[serde(skip)]
    pub hash: String,
    pub routes: Vec<ServiceRouteEntry>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRouteEntry {
    pub name: String,
    pub namespace: String,
    pub targets: Vec<Target>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub port_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Target {
    pub address: String,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// The `registry.json` artifact: service addresses by `ns/name[:port]`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ServiceRegistry {
    pub services: BTreeMap<String, Vec<String>>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

// === impl RouterSpec ===

impl RouterSpec {
    /// The key of this route in the `routes` table.
    pub fn key(&self) -> String {
        format!("{}{}", self.host, self.path)
    }
}

// === impl IngressRoutes ===

impl IngressRoutes {
    /// Splits the routes into the tables of an `ingress.json` artifact.
    ///
    /// A host is bound to the TLS settings of the first TLS route that
    /// names it.
    pub fn to_config(&self) -> IngressConfig {
        let mut config = IngressConfig::default();
        let mut trusted_cas = std::collections::BTreeSet::new();

        for route in &self.routes {
            config
                .routes
                .insert(route.router.key(), route.router.clone());
            config
                .services
                .insert(route.router.service.clone(), route.balancer.clone());

            if !route.router.host.is_empty() && route.tls.is_tls {
                if config.certificates.contains_key(&route.router.host) {
                    continue;
                }
                config
                    .certificates
                    .insert(route.router.host.clone(), route.tls.clone());
            }

            let cas = [&route.tls.trusted_ca, &route.tls.certificate];
            for ca in cas.into_iter().flatten() {
                if !ca.ca.is_empty() {
                    trusted_cas.insert(ca.ca.clone());
                }
            }
        }

        config.trusted_cas = trusted_cas.into_iter().collect();
        config
    }
}

// === impl ServiceRoutes ===

impl ServiceRoutes {
    pub fn to_registry(&self) -> ServiceRegistry {
        let mut registry = ServiceRegistry::default();
        for route in &self.routes {
            if route.targets.is_empty() {
                continue;
            }
            let mut name = format!("{}/{}", route.namespace, route.name);
            if !route.port_name.is_empty() {
                name.push(':');
                name.push_str(&route.port_name);
            }
            registry
                .services
                .entry(name)
                .or_default()
                .extend(route.targets.iter().map(|t| t.address.clone()));
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn route(host: &str, path: &str, service: &str, tls: TlsSpec) -> IngressRouteSpec {
        IngressRouteSpec {
            router: RouterSpec {
                host: host.to_string(),
                path: path.to_string(),
                service: service.to_string(),
                rewrite: vec![],
            },
            balancer: BalancerSpec {
                balancer: Some(LoadBalancer::RoundRobinLoadBalancer),
                upstream: Some(UpstreamSpec {
                    endpoints: vec![UpstreamEndpoint {
                        ip: "10.0.0.1".to_string(),
                        port: 8080,
                        protocol: String::new(),
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            },
            tls,
        }
    }

    #[test]
    fn ingress_config_tables() {
        let ca = |ca: &str| Certificate {
            ca: ca.to_string(),
            ..Default::default()
        };
        let first = TlsSpec {
            is_tls: true,
            verify_depth: 1,
            certificate: Some(Certificate {
                cert: "c".to_string(),
                key: "k".to_string(),
                ca: "ca-1".to_string(),
            }),
            ..Default::default()
        };
        let second = TlsSpec {
            is_tls: true,
            verify_depth: 2,
            trusted_ca: Some(ca("ca-2")),
            ..Default::default()
        };
        let routes = IngressRoutes {
            hash: String::new(),
            routes: vec![
                route("a.example.com", "/*", "ns/web:http", first.clone()),
                route("a.example.com", "/api/*", "ns/api", second),
            ],
        };

        let config = routes.to_config();
        assert_eq!(config.certificates, btreemap! { "a.example.com".to_string() => first });
        assert_eq!(config.trusted_cas, vec!["ca-1".to_string()]);
        assert_eq!(
            config.routes.keys().collect::<Vec<_>>(),
            vec!["a.example.com/*", "a.example.com/api/*"]
        );

        assert_eq!(
            serde_json::to_value(&config.services["ns/web:http"]).unwrap(),
            json!({
                "balancer": "RoundRobinLoadBalancer",
                "upstream": { "endpoints": [{ "ip": "10.0.0.1", "port": 8080 }] },
            })
        );
        assert_eq!(
            serde_json::to_value(&config.routes["a.example.com/*"]).unwrap(),
            json!({ "service": "ns/web:http" })
        );
    }

    #[test]
    fn registry_omits_services_without_addresses() {
        let routes = ServiceRoutes {
            hash: String::new(),
            routes: vec![
                ServiceRouteEntry {
                    name: "web".to_string(),
                    namespace: "ns".to_string(),
                    targets: vec![Target {
                        address: "10.0.0.1:8080".to_string(),
                        tags: btreemap! { "Node".to_string() => "n".to_string() },
                    }],
                    port_name: "http".to_string(),
                },
                ServiceRouteEntry {
                    name: "idle".to_string(),
                    namespace: "ns".to_string(),
                    targets: vec![],
                    port_name: String::new(),
                },
            ],
        };
        assert_eq!(
            serde_json::to_value(routes.to_registry()).unwrap(),
            json!({ "services": { "ns/web:http": ["10.0.0.1:8080"] } })
        );
    }
}
