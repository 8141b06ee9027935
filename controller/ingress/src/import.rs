use crate::{
    service_port::{Endpoint, ServiceInfo, ServicePortName, ServiceType},
    tracker::{ApplyOrder, CanonicalMap, ChangeTracker, Projection},
};
use mesh_controller_core::{EventHandler, InformerCache, InformerKey, Object};
use mesh_controller_k8s_api::{self as k8s, ResourceExt};
use std::{collections::BTreeMap, sync::Arc};

pub type ImportMap = CanonicalMap<ServicePortName, ServiceInfo>;
pub type MultiClusterEndpointsMap = CanonicalMap<ServicePortName, Vec<Endpoint>>;

/// Projects the ports of a `ServiceImport`, addressed by the cluster IP of
/// the local service of the same name.
pub struct ImportedServices {
    informers: Arc<dyn InformerCache>,
}

/// Projects the peer-cluster endpoints of a `ServiceImport`.
#[derive(Copy, Clone, Debug, Default)]
pub struct ImportedEndpoints;

/// Tracks service imports as two change sets: their ports and their
/// cross-cluster endpoints.
#[derive(Debug)]
pub struct ImportTracker {
    pub(crate) services: ChangeTracker<ImportedServices>,
    pub(crate) endpoints: ChangeTracker<ImportedEndpoints>,
}

// === impl ImportedServices ===

impl Projection for ImportedServices {
    type Resource = k8s::ServiceImport;
    type Key = ServicePortName;
    type Value = ServiceInfo;

    const ORDER: ApplyOrder = ApplyOrder::MergeThenFilter;

    fn project(&self, import: &k8s::ServiceImport) -> BTreeMap<ServicePortName, ServiceInfo> {
        let namespace = import.namespace().unwrap_or_default();
        let name = import.name_any();
        let address = self
            .informers
            .get_by_key(InformerKey::Service, &namespace, &name)
            .and_then(|obj| obj.as_service()?.spec.as_ref()?.cluster_ip.clone())
            .unwrap_or_default();

        import
            .spec
            .ports
            .iter()
            .filter_map(|port| {
                let number = u16::try_from(port.port).ok()?;
                let key = ServicePortName::new(
                    &namespace,
                    &name,
                    &port.name,
                    port.protocol.as_deref(),
                );
                let info = ServiceInfo {
                    address: address.clone(),
                    port: number,
                    port_name: port.name.clone(),
                    protocol: key.protocol.clone(),
                    type_: ServiceType::Imported,
                };
                Some((key, info))
            })
            .collect()
    }

    fn cast(obj: &Object) -> Option<&k8s::ServiceImport> {
        obj.as_service_import().map(|si| &**si)
    }
}

impl std::fmt::Debug for ImportedServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportedServices").finish_non_exhaustive()
    }
}

// === impl ImportedEndpoints ===

impl Projection for ImportedEndpoints {
    type Resource = k8s::ServiceImport;
    type Key = ServicePortName;
    type Value = Vec<Endpoint>;

    const ORDER: ApplyOrder = ApplyOrder::UnmergeThenMerge;

    fn project(&self, import: &k8s::ServiceImport) -> BTreeMap<ServicePortName, Vec<Endpoint>> {
        let namespace = import.namespace().unwrap_or_default();
        let name = import.name_any();

        let mut map = BTreeMap::new();
        for port in &import.spec.ports {
            let endpoints = port
                .endpoints
                .iter()
                .filter_map(|ep| {
                    Some(Endpoint::CrossCluster {
                        host: ep.target.host.clone(),
                        port: u16::try_from(ep.target.port).ok()?,
                        path: ep.target.path.clone(),
                        cluster: ep.cluster_key.clone(),
                    })
                })
                .collect::<Vec<_>>();
            if endpoints.is_empty() {
                continue;
            }
            let key = ServicePortName::new(&namespace, &name, &port.name, port.protocol.as_deref());
            map.insert(key, endpoints);
        }
        map
    }

    fn cast(obj: &Object) -> Option<&k8s::ServiceImport> {
        obj.as_service_import().map(|si| &**si)
    }
}

// === impl ImportTracker ===

impl ImportTracker {
    pub fn new(informers: Arc<dyn InformerCache>) -> Self {
        Self {
            services: ChangeTracker::new(ImportedServices { informers }),
            endpoints: ChangeTracker::new(ImportedEndpoints),
        }
    }

    /// Returns true if either change set has pending changes.
    pub fn update(
        &self,
        previous: Option<&k8s::ServiceImport>,
        current: Option<&k8s::ServiceImport>,
    ) -> bool {
        let services = self.services.update(previous, current);
        let endpoints = self.endpoints.update(previous, current);
        services || endpoints
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.endpoints.is_empty()
    }
}

impl EventHandler for ImportTracker {
    fn on_add(&self, obj: &Object) {
        self.services.on_add(obj);
        self.endpoints.on_add(obj);
    }

    fn on_update(&self, old: &Object, new: &Object) {
        self.services.on_update(old, new);
        self.endpoints.on_update(old, new);
    }

    fn on_delete(&self, obj: &Object) {
        self.services.on_delete(obj);
        self.endpoints.on_delete(obj);
    }
}
