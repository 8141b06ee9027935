use crate::{
    route::{BalancerSpec, Certificate, LoadBalancer, RouterSpec, TlsSpec, UpstreamSpec},
    service_port::{is_wildcard_subdomain, ServicePortName},
    tracker::{ApplyOrder, CanonicalMap, Projection},
};
use mesh_controller_core::{InformerCache, InformerKey, Object};
use mesh_controller_k8s_api::{self as k8s, labels, ResourceExt};
use std::{collections::BTreeMap, fmt, sync::Arc};
use tracing::{debug, warn};

pub type IngressMap = CanonicalMap<RouteKey, Route>;

pub mod annotations {
    pub const REWRITE_FROM: &str = "pipy.ingress.kubernetes.io/rewrite-target-from";
    pub const REWRITE_TO: &str = "pipy.ingress.kubernetes.io/rewrite-target-to";
    pub const SESSION_STICKY: &str = "pipy.ingress.kubernetes.io/session-sticky";
    pub const LB_TYPE: &str = "pipy.ingress.kubernetes.io/lb-type";
    pub const UPSTREAM_SSL_NAME: &str = "pipy.ingress.kubernetes.io/upstream-ssl-name";
    pub const UPSTREAM_SSL_SECRET: &str = "pipy.ingress.kubernetes.io/upstream-ssl-secret";
    pub const UPSTREAM_SSL_VERIFY: &str = "pipy.ingress.kubernetes.io/upstream-ssl-verify";
    pub const TLS_VERIFY_CLIENT: &str = "pipy.ingress.kubernetes.io/tls-verify-client";
    pub const TLS_VERIFY_DEPTH: &str = "pipy.ingress.kubernetes.io/tls-verify-depth";
    pub const TLS_TRUSTED_CA_SECRET: &str = "pipy.ingress.kubernetes.io/tls-trusted-ca-secret";
    pub const BACKEND_PROTOCOL: &str = "pipy.ingress.kubernetes.io/backend-protocol";
}

/// Identifies the ingresses this controller serves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressClassConfig {
    /// The class name ingresses may reference directly.
    pub class: String,
    /// The `spec.controller` of the IngressClasses that are ours.
    pub controller: String,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct RouteKey {
    pub service_port: ServicePortName,
    pub host: String,
    pub path: String,
}

/// A route derived from one ingress path, before endpoints are joined in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    pub backend: ServicePortName,
    pub router: RouterSpec,
    pub balancer: BalancerSpec,
    pub tls: TlsSpec,
}

/// Projects the ingresses of our class into routes.
pub struct Ingresses {
    informers: Arc<dyn InformerCache>,
    classes: IngressClassConfig,
}

// === impl IngressClassConfig ===

impl Default for IngressClassConfig {
    fn default() -> Self {
        Self {
            class: "pipy".to_string(),
            controller: "flomesh.io/ingress-pipy".to_string(),
        }
    }
}

// === impl RouteKey ===

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}{}", self.service_port, self.host, self.path)
    }
}

// === impl Ingresses ===

impl Ingresses {
    pub fn new(informers: Arc<dyn InformerCache>, classes: IngressClassConfig) -> Self {
        Self { informers, classes }
    }

    /// Returns true if the ingress belongs to this controller.
    pub fn accepts(&self, ing: &k8s::Ingress) -> bool {
        let class = labels::get(ing.metadata.annotations.as_ref(), labels::INGRESS_CLASS)
            .or_else(|| ing.spec.as_ref()?.ingress_class_name.as_deref())
            .unwrap_or_default();

        if class.is_empty() {
            return match self.default_class() {
                Some(default) => self.is_ours(&default),
                None => true,
            };
        }
        if class == self.classes.class {
            return true;
        }
        self.informers
            .get_by_key(InformerKey::IngressClass, "", class)
            .and_then(|obj| obj.as_ingress_class().cloned())
            .is_some_and(|ic| self.is_ours(&ic))
    }

    fn default_class(&self) -> Option<Arc<k8s::IngressClass>> {
        self.informers
            .list(InformerKey::IngressClass)
            .into_iter()
            .filter_map(|obj| obj.as_ingress_class().cloned())
            .find(|ic| {
                labels::get(ic.metadata.annotations.as_ref(), labels::DEFAULT_INGRESS_CLASS)
                    == Some("true")
            })
    }

    fn is_ours(&self, ic: &k8s::IngressClass) -> bool {
        ic.spec
            .as_ref()
            .and_then(|s| s.controller.as_deref())
            .is_some_and(|c| c == self.classes.controller)
    }

    fn service_port_name(
        &self,
        namespace: &str,
        backend: &k8s::IngressServiceBackend,
    ) -> Option<ServicePortName> {
        let port = backend.port.as_ref()?;
        if let Some(name) = port.name.as_deref().filter(|n| !n.is_empty()) {
            return Some(ServicePortName::new(namespace, &backend.name, name, None));
        }

        let number = port.number.filter(|n| *n > 0)?;
        let svc = self
            .informers
            .get_by_key(InformerKey::Service, namespace, &backend.name)?;
        let svc = svc.as_service()?;
        svc.spec
            .as_ref()?
            .ports
            .iter()
            .flatten()
            .find(|p| p.port == number)
            .map(|p| {
                ServicePortName::new(
                    namespace,
                    &backend.name,
                    p.name.as_deref().unwrap_or_default(),
                    None,
                )
            })
    }

    fn fetch_certificate(&self, namespace: &str, name: &str) -> Option<Certificate> {
        let Some(obj) = self
            .informers
            .get_by_key(InformerKey::Secret, namespace, name)
        else {
            warn!(%namespace, %name, "Secret not found");
            return None;
        };
        let secret = obj.as_secret()?;
        let field = |key: &str| {
            secret
                .data
                .as_ref()
                .and_then(|d| d.get(key))
                .map(|v| String::from_utf8_lossy(&v.0).into_owned())
                .unwrap_or_default()
        };
        Some(Certificate {
            cert: field("tls.crt"),
            key: field("tls.key"),
            ca: field("ca.crt"),
        })
    }

    fn fetch_key_pair(&self, namespace: &str, name: &str) -> Option<Certificate> {
        self.fetch_certificate(namespace, name)
            .filter(|c| !c.cert.is_empty() && !c.key.is_empty())
    }

    /// Picks the TLS secret serving `host`: the first entry naming the host,
    /// or else the first entry without hosts that holds a key pair.
    fn tls_secret(&self, ing: &k8s::Ingress, host: &str) -> Option<String> {
        let namespace = ing.namespace().unwrap_or_default();
        let tls = ing.spec.as_ref()?.tls.as_deref()?;

        let named = tls.iter().find(|t| {
            t.hosts
                .iter()
                .flatten()
                .any(|h| h.eq_ignore_ascii_case(host))
        });
        if let Some(entry) = named {
            return entry.secret_name.clone();
        }

        tls.iter()
            .filter(|t| t.hosts.as_ref().map_or(true, Vec::is_empty))
            .filter_map(|t| t.secret_name.as_deref())
            .find(|name| self.fetch_key_pair(&namespace, name).is_some())
            .map(str::to_string)
    }

    fn enrich(&self, ing: &k8s::Ingress, route: &mut Route) {
        let namespace = ing.namespace().unwrap_or_default();
        let name = ing.name_any();

        if ing
            .spec
            .as_ref()
            .and_then(|s| s.tls.as_ref())
            .is_some_and(|tls| !tls.is_empty())
        {
            route.tls.is_tls = true;
            if let Some(secret) = self.tls_secret(ing, &route.router.host) {
                route.tls.certificate = self.fetch_key_pair(&namespace, &secret);
            }
        }

        let Some(annotations) = ing.metadata.annotations.as_ref() else {
            debug!(%namespace, %name, "Ingress has no annotations");
            return;
        };
        let get = |key: &str| {
            annotations
                .get(key)
                .map(String::as_str)
                .filter(|v| !v.is_empty())
        };

        if let (Some(from), Some(to)) = (
            get(annotations::REWRITE_FROM),
            get(annotations::REWRITE_TO),
        ) {
            route.router.rewrite = vec![from.to_string(), to.to_string()];
        }

        route.balancer.sticky = get(annotations::SESSION_STICKY).is_some_and(parse_enabled);
        route.balancer.balancer = Some(match get(annotations::LB_TYPE) {
            None | Some("RoundRobinLoadBalancer") => LoadBalancer::RoundRobinLoadBalancer,
            Some("LeastWorkLoadBalancer") => LoadBalancer::LeastWorkLoadBalancer,
            Some("HashingLoadBalancer") => LoadBalancer::HashingLoadBalancer,
            Some(other) => {
                warn!(
                    %namespace,
                    %name,
                    lb_type = other,
                    "Unsupported load balancer; using RoundRobinLoadBalancer"
                );
                LoadBalancer::RoundRobinLoadBalancer
            }
        });

        let mut upstream = UpstreamSpec::default();
        if let Some(sni) = get(annotations::UPSTREAM_SSL_NAME) {
            upstream.ssl_name = sni.to_string();
        }
        if let Some(secret) = get(annotations::UPSTREAM_SSL_SECRET) {
            match parse_secret_ref(secret, &namespace) {
                Some((ns, n)) => upstream.ssl_cert = self.fetch_certificate(ns, n),
                None => warn!(%namespace, %name, %secret, "Invalid upstream-ssl-secret"),
            }
        }
        upstream.ssl_verify = get(annotations::UPSTREAM_SSL_VERIFY).is_some_and(parse_enabled);

        route.tls.verify_client = get(annotations::TLS_VERIFY_CLIENT).is_some_and(parse_enabled);
        route.tls.verify_depth = match get(annotations::TLS_VERIFY_DEPTH) {
            None => 1,
            Some(depth) => depth.parse().unwrap_or_else(|_| {
                warn!(%namespace, %name, %depth, "Invalid tls-verify-depth; using 1");
                1
            }),
        };

        if route.tls.certificate.as_ref().is_some_and(|c| !c.ca.is_empty()) {
            route.tls.trusted_ca = route.tls.certificate.clone();
        }
        if let Some(secret) = get(annotations::TLS_TRUSTED_CA_SECRET) {
            match parse_secret_ref(secret, &namespace) {
                Some((ns, n)) => route.tls.trusted_ca = self.fetch_certificate(ns, n),
                None => warn!(%namespace, %name, %secret, "Invalid tls-trusted-ca-secret"),
            }
        }

        if get(annotations::BACKEND_PROTOCOL).is_some_and(|p| p.eq_ignore_ascii_case("GRPC")) {
            upstream.protocol = "GRPC".to_string();
        }
        route.balancer.upstream = Some(upstream);
    }
}

impl Projection for Ingresses {
    type Resource = k8s::Ingress;
    type Key = RouteKey;
    type Value = Route;

    const ORDER: ApplyOrder = ApplyOrder::UnmergeThenMerge;

    fn project(&self, ing: &k8s::Ingress) -> BTreeMap<RouteKey, Route> {
        let mut routes = BTreeMap::new();
        if !self.accepts(ing) {
            return routes;
        }
        let namespace = ing.namespace().unwrap_or_default();
        let name = ing.name_any();

        let rules = ing.spec.as_ref().and_then(|s| s.rules.as_ref());
        for rule in rules.into_iter().flatten() {
            let Some(http) = rule.http.as_ref() else {
                continue;
            };
            let host = rule.host.clone().unwrap_or_default();

            for path in &http.paths {
                let Some(backend) = path.backend.service.as_ref() else {
                    debug!(%namespace, %name, path = ?path.path, "Path has no service backend");
                    continue;
                };
                let Some(service_port) = self.service_port_name(&namespace, backend) else {
                    warn!(%namespace, %name, service = %backend.name, "Cannot resolve backend port");
                    continue;
                };
                let Some(route_path) = normalize_path(&path.path_type, path.path.as_deref()) else {
                    continue;
                };

                let key = RouteKey {
                    service_port: service_port.clone(),
                    host: host.clone(),
                    path: route_path.clone(),
                };
                if routes.contains_key(&key) {
                    warn!(%namespace, %name, route = %key, "Duplicate route");
                    continue;
                }

                let mut route = Route {
                    router: RouterSpec {
                        host: host.clone(),
                        path: route_path,
                        service: service_port.to_string(),
                        rewrite: vec![],
                    },
                    backend: service_port,
                    balancer: BalancerSpec::default(),
                    tls: TlsSpec {
                        is_wildcard_host: is_wildcard_subdomain(&host),
                        ..Default::default()
                    },
                };
                self.enrich(ing, &mut route);
                routes.insert(key, route);
            }
        }
        routes
    }

    fn cast(obj: &Object) -> Option<&k8s::Ingress> {
        obj.as_ingress().map(|ing| &**ing)
    }
}

impl fmt::Debug for Ingresses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ingresses")
            .field("classes", &self.classes)
            .finish_non_exhaustive()
    }
}

/// `Exact` paths are kept; `Prefix` paths match everything below them.
fn normalize_path(path_type: &str, path: Option<&str>) -> Option<String> {
    let path = path.unwrap_or_default();
    match path_type {
        "Exact" => Some(path.to_string()),
        "Prefix" if path.ends_with("/*") => Some(path.to_string()),
        "Prefix" if path.ends_with('/') => Some(format!("{path}*")),
        "Prefix" => Some(format!("{path}/*")),
        _ => None,
    }
}

pub(crate) fn parse_enabled(value: &str) -> bool {
    ["true", "yes", "on", "1", "y", "t"]
        .iter()
        .any(|v| value.eq_ignore_ascii_case(v))
}

/// Parses `ns/name` or `name`; a bare name is in `namespace`.
fn parse_secret_ref<'a>(value: &'a str, namespace: &'a str) -> Option<(&'a str, &'a str)> {
    match value.split_once('/') {
        None => Some((namespace, value)),
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Some((ns, name))
        }
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_util::{ingress, ingress_class, secret, FakeInformers},
        tracker::ChangeTracker,
    };
    use maplit::btreemap;
    use pretty_assertions::assert_eq;

    fn projection(informers: &Arc<FakeInformers>) -> Ingresses {
        Ingresses::new(informers.clone(), IngressClassConfig::default())
    }

    fn web(path: &str) -> RouteKey {
        RouteKey {
            service_port: ServicePortName::new("ns", "web", "http", None),
            host: "a.example.com".to_string(),
            path: path.to_string(),
        }
    }

    #[test]
    fn class_filter() {
        let informers = FakeInformers::new();
        informers.insert(ingress_class("nginx", "k8s.io/ingress-nginx", false));
        informers.insert(ingress_class("mesh", "flomesh.io/ingress-pipy", true));
        let ingresses = projection(&informers);
        let class = |c: &str| {
            let mut ing = ingress("ing", &[("Prefix", "/")]);
            ing.metadata.annotations = Some(btreemap! {
                labels::INGRESS_CLASS.to_string() => c.to_string(),
            });
            ing
        };

        assert!(!ingresses.accepts(&class("nginx")));
        assert!(ingresses.accepts(&class("mesh")));
        assert!(ingresses.accepts(&class("pipy")));
        assert!(!ingresses.accepts(&class("unknown")));
        // Unclassed ingresses follow the installed default.
        assert!(ingresses.accepts(&ingress("ing", &[("Prefix", "/")])));

        let informers = FakeInformers::new();
        informers.insert(ingress_class("nginx", "k8s.io/ingress-nginx", true));
        assert!(!projection(&informers).accepts(&ingress("ing", &[("Prefix", "/")])));
    }

    #[test]
    fn only_default_class_ingresses_reach_the_map() {
        let informers = FakeInformers::new();
        informers.insert(ingress_class("mesh", "flomesh.io/ingress-pipy", true));
        let tracker = ChangeTracker::new(projection(&informers));
        let mut map = IngressMap::default();

        let mut nginx = ingress("nginx", &[("Prefix", "/nginx")]);
        nginx.metadata.annotations = Some(btreemap! {
            labels::INGRESS_CLASS.to_string() => "nginx".to_string(),
        });
        let mut ours = ingress("ours", &[("Prefix", "/ours")]);
        ours.metadata.annotations = Some(btreemap! {
            labels::INGRESS_CLASS.to_string() => "mesh".to_string(),
        });

        assert!(!tracker.update(None, Some(&nginx)));
        assert!(tracker.update(None, Some(&ours)));
        map.apply(&tracker);
        assert_eq!(map.keys().cloned().collect::<Vec<_>>(), vec![web("/ours/*")]);
    }

    #[test]
    fn deleting_after_class_handover_removes_routes() {
        let informers = FakeInformers::new();
        informers.insert(ingress_class("mesh", "flomesh.io/ingress-pipy", true));
        let tracker = ChangeTracker::new(projection(&informers));
        let mut map = IngressMap::default();
        let ing = ingress("ing", &[("Exact", "/api")]);

        assert!(tracker.update(None, Some(&ing)));
        map.apply(&tracker);
        assert!(map.contains_key(&web("/api")));

        informers.insert(ingress_class("mesh", "k8s.io/ingress-nginx", true));
        assert!(!tracker.projection().accepts(&ing));
        assert!(tracker.update(Some(&ing), None));
        map.apply(&tracker);
        assert!(map.is_empty());
    }

    #[test]
    fn prefix_paths_are_normalized() {
        let informers = FakeInformers::new();
        let routes = projection(&informers).project(&ingress(
            "ing",
            &[
                ("Prefix", "/a"),
                ("Prefix", "/b/"),
                ("Prefix", "/c/*"),
                ("Exact", "/d"),
                ("ImplementationSpecific", "/e"),
            ],
        ));
        assert_eq!(
            routes.keys().map(|k| k.path.as_str()).collect::<Vec<_>>(),
            vec!["/a/*", "/b/*", "/c/*", "/d"]
        );
    }

    #[test]
    fn duplicate_routes_keep_the_first() {
        let informers = FakeInformers::new();
        let routes = projection(&informers).project(&ingress(
            "ing",
            &[("Prefix", "/a"), ("Prefix", "/a/")],
        ));
        assert_eq!(routes.len(), 1);
    }

    #[test]
    fn numeric_ports_resolve_through_the_service() {
        use k8s::{ServiceBackendPort, ServicePort, ServiceSpec};

        let informers = FakeInformers::new();
        informers.insert(k8s::Service {
            metadata: k8s::ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some("web".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port: 80,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        });

        let numbered = |port: i32| {
            let mut ing = ingress("ing", &[("Prefix", "/")]);
            let rules = ing.spec.as_mut().unwrap().rules.as_mut().unwrap();
            let backend = rules[0].http.as_mut().unwrap().paths[0]
                .backend
                .service
                .as_mut()
                .unwrap();
            backend.port = Some(ServiceBackendPort {
                name: None,
                number: Some(port),
            });
            ing
        };

        let routes = projection(&informers).project(&numbered(80));
        assert_eq!(routes.keys().cloned().collect::<Vec<_>>(), vec![web("/*")]);
        assert!(projection(&informers).project(&numbered(81)).is_empty());
    }

    #[test]
    fn annotations_enrich_routes() {
        let informers = FakeInformers::new();
        informers.insert(secret("ns", "upstream", "cert", "key", ""));
        informers.insert(secret("ca-ns", "ca", "", "", "root-ca"));

        let mut ing = ingress("ing", &[("Prefix", "/")]);
        ing.metadata.annotations = Some(btreemap! {
            annotations::REWRITE_FROM.to_string() => "^/".to_string(),
            annotations::REWRITE_TO.to_string() => "/v1/".to_string(),
            annotations::SESSION_STICKY.to_string() => "Yes".to_string(),
            annotations::LB_TYPE.to_string() => "Randomized".to_string(),
            annotations::UPSTREAM_SSL_NAME.to_string() => "web.internal".to_string(),
            annotations::UPSTREAM_SSL_SECRET.to_string() => "upstream".to_string(),
            annotations::UPSTREAM_SSL_VERIFY.to_string() => "on".to_string(),
            annotations::TLS_VERIFY_DEPTH.to_string() => "deep".to_string(),
            annotations::TLS_TRUSTED_CA_SECRET.to_string() => "ca-ns/ca".to_string(),
            annotations::BACKEND_PROTOCOL.to_string() => "grpc".to_string(),
        });

        let routes = projection(&informers).project(&ing);
        let route = &routes[&web("/*")];
        assert_eq!(route.router.rewrite, vec!["^/", "/v1/"]);
        assert!(route.balancer.sticky);
        assert_eq!(
            route.balancer.balancer,
            Some(LoadBalancer::RoundRobinLoadBalancer)
        );
        assert_eq!(
            route.balancer.upstream,
            Some(UpstreamSpec {
                protocol: "GRPC".to_string(),
                ssl_name: "web.internal".to_string(),
                ssl_cert: Some(Certificate {
                    cert: "cert".to_string(),
                    key: "key".to_string(),
                    ca: String::new(),
                }),
                ssl_verify: true,
                endpoints: vec![],
            })
        );
        assert_eq!(route.tls.verify_depth, 1);
        assert!(!route.tls.verify_client);
        assert_eq!(
            route.tls.trusted_ca.as_ref().map(|c| c.ca.as_str()),
            Some("root-ca")
        );
    }

    #[test]
    fn tls_secrets_match_hosts_first() {
        let informers = FakeInformers::new();
        informers.insert(secret("ns", "host-cert", "host", "host-key", "host-ca"));
        informers.insert(secret("ns", "fallback", "fb", "fb-key", ""));

        let with_tls = |entries: Vec<k8s::IngressTLS>| {
            let mut ing = ingress("ing", &[("Prefix", "/")]);
            ing.metadata.annotations = Some(Default::default());
            ing.spec.as_mut().unwrap().tls = Some(entries);
            ing
        };
        let entry = |hosts: Option<Vec<&str>>, secret: &str| k8s::IngressTLS {
            hosts: hosts.map(|h| h.into_iter().map(str::to_string).collect()),
            secret_name: Some(secret.to_string()),
        };

        let routes = projection(&informers).project(&with_tls(vec![
            entry(None, "fallback"),
            entry(Some(vec!["A.example.com"]), "host-cert"),
        ]));
        let tls = &routes[&web("/*")].tls;
        assert!(tls.is_tls);
        assert_eq!(tls.certificate.as_ref().map(|c| c.cert.as_str()), Some("host"));
        assert_eq!(tls.trusted_ca, tls.certificate);

        let routes = projection(&informers).project(&with_tls(vec![
            entry(Some(vec!["b.example.com"]), "host-cert"),
            entry(None, "missing"),
            entry(None, "fallback"),
        ]));
        let tls = &routes[&web("/*")].tls;
        assert_eq!(tls.certificate.as_ref().map(|c| c.cert.as_str()), Some("fb"));
        assert_eq!(tls.trusted_ca, None);
    }

    #[test]
    fn wildcard_hosts_are_flagged() {
        let informers = FakeInformers::new();
        let mut ing = ingress("ing", &[("Exact", "/")]);
        ing.spec.as_mut().unwrap().rules.as_mut().unwrap()[0].host =
            Some("*.example.com".to_string());
        let routes = projection(&informers).project(&ing);
        let route = routes.values().next().expect("route must be projected");
        assert!(route.tls.is_wildcard_host);
        assert_eq!(route.balancer.upstream, None);
    }

    #[test]
    fn secret_refs() {
        assert_eq!(parse_secret_ref("name", "ns"), Some(("ns", "name")));
        assert_eq!(parse_secret_ref("other/name", "ns"), Some(("other", "name")));
        assert_eq!(parse_secret_ref("/name", "ns"), None);
        assert_eq!(parse_secret_ref("a/b/c", "ns"), None);
    }

    #[test]
    fn enabled_values() {
        for v in ["true", "YES", "on", "1", "y", "T"] {
            assert!(parse_enabled(v), "{v}");
        }
        for v in ["false", "no", "0", "enabled", ""] {
            assert!(!parse_enabled(v), "{v}");
        }
    }
}
