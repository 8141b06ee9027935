use crate::{kind::EventKinds, Kind, Object};
use std::{fmt, sync::Arc};

/// Identifies one informer-backed resource type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InformerKey {
    Namespace,
    Pod,
    Service,
    Endpoints,
    Ingress,
    IngressClass,
    Secret,
    MeshConfig,
    AccessCert,
    ServiceImport,
}

/// Decides which observations of a resource type are forwarded to the broker.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObservePolicy {
    /// Only objects in namespaces monitored by the mesh.
    MonitoredNamespace,
    /// Namespaces, judged by their own monitored label.
    Namespace,
    /// Everything.
    All,
}

/// Callbacks invoked by the informer cache for every observed change.
pub trait EventHandler: Send + Sync {
    fn on_add(&self, obj: &Object);
    fn on_update(&self, old: &Object, new: &Object);
    fn on_delete(&self, obj: &Object);
}

/// A read-only snapshot of observed cluster state with change callbacks.
pub trait InformerCache: Send + Sync {
    fn list(&self, key: InformerKey) -> Vec<Object>;

    fn get_by_key(&self, key: InformerKey, namespace: &str, name: &str) -> Option<Object>;

    fn add_event_handler(&self, key: InformerKey, handler: Arc<dyn EventHandler>);

    fn is_monitored_namespace(&self, namespace: &str) -> bool;
}

// === impl InformerKey ===

impl InformerKey {
    pub const ALL: &'static [InformerKey] = &[
        InformerKey::Namespace,
        InformerKey::Pod,
        InformerKey::Service,
        InformerKey::Endpoints,
        InformerKey::Ingress,
        InformerKey::IngressClass,
        InformerKey::Secret,
        InformerKey::MeshConfig,
        InformerKey::AccessCert,
        InformerKey::ServiceImport,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "namespaces",
            Self::Pod => "pods",
            Self::Service => "services",
            Self::Endpoints => "endpoints",
            Self::Ingress => "ingresses",
            Self::IngressClass => "ingressclasses",
            Self::Secret => "secrets",
            Self::MeshConfig => "meshconfigs",
            Self::AccessCert => "accesscerts",
            Self::ServiceImport => "serviceimports",
        }
    }

    pub fn event_kinds(&self) -> EventKinds {
        let (added, updated, deleted) = match self {
            Self::Namespace => (
                Kind::NamespaceAdded,
                Kind::NamespaceUpdated,
                Kind::NamespaceDeleted,
            ),
            Self::Pod => (Kind::PodAdded, Kind::PodUpdated, Kind::PodDeleted),
            Self::Service => (
                Kind::ServiceAdded,
                Kind::ServiceUpdated,
                Kind::ServiceDeleted,
            ),
            Self::Endpoints => (
                Kind::EndpointAdded,
                Kind::EndpointUpdated,
                Kind::EndpointDeleted,
            ),
            Self::Ingress => (
                Kind::IngressAdded,
                Kind::IngressUpdated,
                Kind::IngressDeleted,
            ),
            Self::IngressClass => (
                Kind::IngressClassAdded,
                Kind::IngressClassUpdated,
                Kind::IngressClassDeleted,
            ),
            Self::Secret => (Kind::SecretAdded, Kind::SecretUpdated, Kind::SecretDeleted),
            Self::MeshConfig => (
                Kind::MeshConfigAdded,
                Kind::MeshConfigUpdated,
                Kind::MeshConfigDeleted,
            ),
            Self::AccessCert => (
                Kind::AccessCertAdded,
                Kind::AccessCertUpdated,
                Kind::AccessCertDeleted,
            ),
            Self::ServiceImport => (
                Kind::ServiceImportAdded,
                Kind::ServiceImportUpdated,
                Kind::ServiceImportDeleted,
            ),
        };
        EventKinds {
            added,
            updated,
            deleted,
        }
    }

    pub fn observe_policy(&self) -> ObservePolicy {
        match self {
            Self::Namespace => ObservePolicy::Namespace,
            Self::MeshConfig | Self::IngressClass | Self::Secret => ObservePolicy::All,
            Self::Pod
            | Self::Service
            | Self::Endpoints
            | Self::Ingress
            | Self::AccessCert
            | Self::ServiceImport => ObservePolicy::MonitoredNamespace,
        }
    }
}

impl fmt::Display for InformerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
