//! Well-known labels and annotations.

/// Marks a namespace as monitored by the named mesh.
pub const MONITORED_BY: &str = "flomesh.io/monitored-by";

/// Comma-separated global services that proxies in a namespace ignore.
pub const SERVICE_EXCLUSION_LIST: &str = "flomesh.io/service-exclusion-list";

/// Identifies the sidecar injected into a pod.
pub const SIDECAR_UNIQUE_ID: &str = "flomesh.io/sidecar-uid";

/// Marks endpoints synchronized from an external service catalog.
pub const CLOUD_SOURCED: &str = "flomesh.io/cloud-service";

pub const PROMETHEUS_SCRAPE: &str = "prometheus.io/scrape";

pub const INGRESS_CLASS: &str = "kubernetes.io/ingress.class";

pub const DEFAULT_INGRESS_CLASS: &str = "ingressclass.kubernetes.io/is-default-class";

pub fn get<'m>(
    map: Option<&'m std::collections::BTreeMap<String, String>>,
    key: &str,
) -> Option<&'m str> {
    map?.get(key).map(String::as_str)
}
