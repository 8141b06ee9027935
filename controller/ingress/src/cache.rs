use crate::{
    endpoints::{EndpointsMap, EndpointsProjection},
    import::{ImportMap, ImportTracker, MultiClusterEndpointsMap},
    ingress::{IngressClassConfig, IngressMap, Ingresses},
    route::{
        BalancerSpec, IngressRouteSpec, IngressRoutes, ServiceRouteEntry, ServiceRoutes, Target,
        UpstreamEndpoint,
    },
    service::{ServiceMap, Services},
    service_port::{Endpoint, ServiceType},
    tracker::ChangeTracker,
};
use mesh_controller_core::{Batch, BatchItem, ConfigStore, InformerCache, InformerKey};
use mesh_controller_workerpool::Job;
use parking_lot::Mutex;
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, error, info, info_span, Instrument};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub services_path: String,
    pub ingress_path: String,
    pub classes: IngressClassConfig,
}

/// Owns the change trackers and the canonical maps they feed, and uploads
/// the route artifacts built from those maps.
pub struct Cache {
    informers: Arc<dyn InformerCache>,
    store: Arc<dyn ConfigStore>,
    config: CacheConfig,

    services: Arc<ChangeTracker<Services>>,
    endpoints: Arc<ChangeTracker<EndpointsProjection>>,
    ingresses: Arc<ChangeTracker<Ingresses>>,
    imports: Arc<ImportTracker>,

    maps: tokio::sync::Mutex<Maps>,
    versions: Arc<Mutex<Versions>>,
}

/// Rebuilds and uploads the route artifacts.
#[derive(Clone, Debug)]
pub struct SyncRoutes(pub Arc<Cache>);

#[derive(Debug, Default)]
struct Maps {
    services: ServiceMap,
    endpoints: EndpointsMap,
    ingresses: IngressMap,
    imports: ImportMap,
    mc_endpoints: MultiClusterEndpointsMap,
}

/// The version last uploaded per artifact.
#[derive(Debug, Default)]
struct Versions {
    services: String,
    ingress: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Artifact {
    Services,
    Ingress,
}

// === impl CacheConfig ===

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            services_path: "/base/services".to_string(),
            ingress_path: "/base/ingress".to_string(),
            classes: IngressClassConfig::default(),
        }
    }
}

// === impl Cache ===

impl Cache {
    /// Creates a cache whose trackers observe `informers`.
    pub fn new(
        informers: Arc<dyn InformerCache>,
        store: Arc<dyn ConfigStore>,
        config: CacheConfig,
    ) -> Arc<Self> {
        let services = Arc::new(ChangeTracker::new(Services));
        let endpoints = Arc::new(ChangeTracker::new(EndpointsProjection));
        let ingresses = Arc::new(ChangeTracker::new(Ingresses::new(
            informers.clone(),
            config.classes.clone(),
        )));
        let imports = Arc::new(ImportTracker::new(informers.clone()));

        informers.add_event_handler(InformerKey::Service, services.clone());
        informers.add_event_handler(InformerKey::Endpoints, endpoints.clone());
        informers.add_event_handler(InformerKey::Ingress, ingresses.clone());
        informers.add_event_handler(InformerKey::ServiceImport, imports.clone());

        Arc::new(Self {
            informers,
            store,
            config,
            services,
            endpoints,
            ingresses,
            imports,
            maps: Default::default(),
            versions: Default::default(),
        })
    }

    /// Folds pending changes into the canonical maps and uploads each route
    /// artifact whose hash differs from the last uploaded version.
    pub async fn sync_routes(&self) {
        let mut maps = self.maps.lock().await;
        maps.services.apply(&self.services);
        maps.imports.apply(&self.imports.services);
        maps.mc_endpoints.apply(&self.imports.endpoints);
        maps.endpoints.apply(&self.endpoints);
        maps.ingresses.apply(&self.ingresses);
        debug!(
            services = maps.services.len(),
            endpoints = maps.endpoints.len(),
            routes = maps.ingresses.len(),
            imports = maps.imports.len(),
            "Applied changes"
        );

        let mut services = maps.service_routes();
        match services.seal() {
            Ok(()) => {
                let changed = self
                    .upload(Artifact::Services, &services.hash, || {
                        BatchItem::json("/config", "registry.json", &services.to_registry())
                    })
                    .await;
                if changed {
                    self.refresh_ingresses(&mut maps);
                }
            }
            Err(error) => error!(%error, "Failed to hash service routes"),
        }

        let mut ingress = maps.ingress_routes();
        match ingress.seal() {
            Ok(()) => {
                self.upload(Artifact::Ingress, &ingress.hash, || {
                    BatchItem::json("/config", "ingress.json", &ingress.to_config())
                })
                .await;
            }
            Err(error) => error!(%error, "Failed to hash ingress routes"),
        }
    }

    /// Re-projects every ingress, since backend ports may now resolve
    /// differently.
    fn refresh_ingresses(&self, maps: &mut Maps) {
        debug!("Refreshing ingress routes");
        for obj in self.informers.list(InformerKey::Ingress) {
            if let Some(ing) = obj.as_ingress() {
                self.ingresses.update(None, Some(&**ing));
            }
        }
        maps.ingresses.apply(&self.ingresses);
    }

    /// Spawns an upload of the artifact if its hash changed. Returns true if
    /// an upload was attempted.
    async fn upload(
        &self,
        artifact: Artifact,
        hash: &str,
        item: impl FnOnce() -> serde_json::Result<BatchItem>,
    ) -> bool {
        let path = self.config.path(artifact);
        if !self.store.codebase_exists(path).await {
            let nonce = chrono::Utc::now().timestamp_millis().to_string();
            debug!(%path, "Codebase does not exist; skipping upload");
            *self.versions.lock().get_mut(artifact) = nonce;
            return false;
        }

        let previous = self.versions.lock().get_mut(artifact).clone();
        if previous == hash {
            return false;
        }
        info!(%path, %previous, %hash, "Routes changed");

        let batch = match item() {
            Ok(item) => Batch {
                base_path: path.to_string(),
                items: vec![item],
            },
            Err(error) => {
                error!(%path, %error, "Failed to encode routes");
                return true;
            }
        };

        let store = self.store.clone();
        let versions = self.versions.clone();
        let hash = hash.to_string();
        tokio::spawn(
            async move {
                if let Err(error) = store.batch(vec![batch]).await {
                    error!(%error, "Failed to upload routes");
                    return;
                }
                debug!(version = %hash, "Uploaded routes");
                *versions.lock().get_mut(artifact) = hash;
            }
            .instrument(info_span!("upload", path = %path)),
        );
        true
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// === impl Maps ===

impl Maps {
    fn service_routes(&self) -> ServiceRoutes {
        let names = self
            .services
            .keys()
            .chain(self.imports.keys())
            .collect::<BTreeSet<_>>();

        let mut routes = Vec::new();
        for name in names {
            if let Some(svc) = self.services.get(name) {
                let targets = match svc.type_ {
                    ServiceType::ClusterIp => self
                        .endpoints
                        .get(name)
                        .into_iter()
                        .flatten()
                        .map(target)
                        .collect(),
                    ServiceType::ExternalName => vec![Target {
                        address: svc.address.clone(),
                        tags: Default::default(),
                    }],
                    ServiceType::Imported => continue,
                };
                routes.push(ServiceRouteEntry {
                    name: name.name.clone(),
                    namespace: name.namespace.clone(),
                    targets,
                    port_name: svc.port_name.clone(),
                });
            }

            if let Some(import) = self.imports.get(name) {
                routes.push(ServiceRouteEntry {
                    name: name.name.clone(),
                    namespace: name.namespace.clone(),
                    targets: self
                        .mc_endpoints
                        .get(name)
                        .into_iter()
                        .flatten()
                        .map(target)
                        .collect(),
                    port_name: import.port_name.clone(),
                });
            }
        }

        ServiceRoutes {
            hash: String::new(),
            routes,
        }
    }

    /// Joins each ingress route with its backend's endpoints. Routes without
    /// endpoints are omitted.
    fn ingress_routes(&self) -> IngressRoutes {
        let mut routes = Vec::new();
        for route in self.ingresses.iter().map(|(_, r)| r) {
            let endpoints = self
                .endpoints
                .get(&route.backend)
                .into_iter()
                .flatten()
                .filter_map(|ep| match ep {
                    Endpoint::Ip { ip, port, .. } => Some(UpstreamEndpoint {
                        ip: ip.to_string(),
                        port: *port,
                        protocol: String::new(),
                    }),
                    _ => None,
                })
                .collect::<Vec<_>>();
            if endpoints.is_empty() {
                continue;
            }

            let mut upstream = route.balancer.upstream.clone().unwrap_or_default();
            upstream.protocol = upstream.protocol.to_uppercase();
            upstream.endpoints = endpoints;
            routes.push(IngressRouteSpec {
                router: route.router.clone(),
                balancer: BalancerSpec {
                    upstream: Some(upstream),
                    ..route.balancer.clone()
                },
                tls: route.tls.clone(),
            });
        }

        IngressRoutes {
            hash: String::new(),
            routes,
        }
    }
}

fn target(ep: &Endpoint) -> Target {
    let tags = match ep {
        Endpoint::Ip {
            node_name,
            host_name,
            ..
        } => [("Node", node_name), ("Host", host_name)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
        Endpoint::CrossCluster { cluster, .. } => {
            [("Cluster".to_string(), cluster.clone())].into()
        }
        Endpoint::External { .. } => Default::default(),
    };
    Target {
        address: ep.address(),
        tags,
    }
}

// === impl Versions ===

impl Versions {
    fn get_mut(&mut self, artifact: Artifact) -> &mut String {
        match artifact {
            Artifact::Services => &mut self.services,
            Artifact::Ingress => &mut self.ingress,
        }
    }
}

// === impl CacheConfig ===

impl CacheConfig {
    fn path(&self, artifact: Artifact) -> &str {
        match artifact {
            Artifact::Services => &self.services_path,
            Artifact::Ingress => &self.ingress_path,
        }
    }
}

// === impl SyncRoutes ===

#[async_trait::async_trait]
impl Job for SyncRoutes {
    async fn run(&mut self) {
        self.0.sync_routes().await;
    }

    fn job_name(&self) -> String {
        "sync-routes".to_string()
    }
}
