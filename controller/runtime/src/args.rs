use crate::{
    certificate::Reconciler,
    core::{Issuer, Kind},
    index::{Informers, IntakeHandler, ResourceIndex},
    ingress::{BroadcastListener, Cache, CacheConfig, IngressClassConfig, SyncRoutes},
    k8s::{self, Client, Resource},
    logging::{self, LogFormat, LogLevelWatcher},
    messaging::{Broker, BrokerMetrics, Bus},
    status::{KubeAccessCertStatus, KubeSecretStore},
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use mesh_controller_repo::RepoClient;
use mesh_controller_workerpool::WorkerPool;
use prometheus_client::registry::Registry;
use std::{sync::Arc, time::Duration};
use tracing::{info, info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "mesh-controller", about = "A service mesh configuration controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "mesh_controller=info,warn",
        env = "MESH_CONTROLLER_LOG"
    )]
    log_level: String,

    #[clap(long, value_enum, default_value = "plain")]
    log_format: LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Namespaces labeled `flomesh.io/monitored-by=<mesh-name>` are watched.
    #[clap(long, default_value = "fsm", env = "MESH_NAME")]
    mesh_name: String,

    #[clap(long, default_value = "fsm-system", env = "MESH_NAMESPACE")]
    control_plane_namespace: String,

    #[clap(long, default_value = "fsm-mesh-config")]
    mesh_config_name: String,

    /// The address of the configuration repository.
    #[clap(long, default_value = "http://127.0.0.1:6060", env = "MESH_REPO_ADDR")]
    repo_addr: String,

    #[clap(long, default_value = "/base/services")]
    services_base_path: String,

    #[clap(long, default_value = "/base/ingress")]
    ingress_base_path: String,

    #[clap(long, default_value = "pipy")]
    ingress_class: String,

    #[clap(long, default_value = "flomesh.io/ingress-pipy")]
    ingress_controller: String,

    /// The number of route generation workers. Zero uses one per CPU.
    #[clap(long, default_value = "0")]
    workers: usize,

    /// How long announcements are coalesced before routes are regenerated.
    #[clap(long, default_value = "5s")]
    listener_sliding_window: k8s::GoDuration,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        self.run_with_issuer(None).await
    }

    /// Runs the controller. Certificate reconciliation is enabled only when
    /// an issuer is provided.
    pub async fn run_with_issuer(self, issuer: Option<Arc<dyn Issuer>>) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            mesh_name,
            control_plane_namespace,
            mesh_config_name,
            repo_addr,
            services_base_path,
            ingress_base_path,
            ingress_class,
            ingress_controller,
            workers,
            listener_sliding_window,
        } = self;

        if listener_sliding_window.is_non_positive() {
            bail!("--listener-sliding-window must be positive");
        }
        let sliding = Duration::from(listener_sliding_window);

        let log_handle = logging::init(&log_level, log_format)?;

        let mut prom = <Registry>::default();
        let broker_metrics = BrokerMetrics::register(prom.sub_registry_with_prefix("broker"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;
        let shutdown = runtime.shutdown_handle();

        let broker = Broker::spawn(broker_metrics, shutdown.clone());
        let informers = Informers::new(mesh_name.as_str());
        IntakeHandler::register_all(&informers, &broker);

        // The route cache registers its trackers before any watch starts.
        let store = Arc::new(RepoClient::new(repo_addr));
        let cache = Cache::new(
            informers.clone(),
            store,
            CacheConfig {
                services_path: services_base_path,
                ingress_path: ingress_base_path,
                classes: IngressClassConfig {
                    class: ingress_class,
                    controller: ingress_controller,
                },
            },
        );

        // Spawn resource watches.

        let namespaces = runtime.watch_all::<k8s::Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(ResourceIndex::shared(&informers), namespaces)
                .instrument(info_span!("namespaces")),
        );

        let pods = runtime.watch_all::<k8s::Pod>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(ResourceIndex::shared(&informers), pods)
                .instrument(info_span!("pods")),
        );

        let services = runtime.watch_all::<k8s::Service>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(ResourceIndex::shared(&informers), services)
                .instrument(info_span!("services")),
        );

        let endpoints = runtime.watch_all::<k8s::Endpoints>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(ResourceIndex::shared(&informers), endpoints)
                .instrument(info_span!("endpoints")),
        );

        let ingresses = runtime.watch_all::<k8s::Ingress>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(ResourceIndex::shared(&informers), ingresses)
                .instrument(info_span!("ingresses")),
        );

        let classes = runtime.watch_all::<k8s::IngressClass>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(ResourceIndex::shared(&informers), classes)
                .instrument(info_span!("ingressclasses")),
        );

        let secrets = runtime.watch_all::<k8s::Secret>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(ResourceIndex::shared(&informers), secrets)
                .instrument(info_span!("secrets")),
        );

        let mesh_configs = runtime.watch_namespaced::<k8s::MeshConfig>(
            control_plane_namespace.clone(),
            watcher::Config::default().fields(&format!("metadata.name={mesh_config_name}")),
        );
        tokio::spawn(
            kubert::index::namespaced(ResourceIndex::shared(&informers), mesh_configs)
                .instrument(info_span!("meshconfigs")),
        );

        if api_resource_exists::<k8s::AccessCert>(&runtime.client()).await {
            let access_certs = runtime.watch_all::<k8s::AccessCert>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(ResourceIndex::shared(&informers), access_certs)
                    .instrument(info_span!("accesscerts")),
            );
        } else {
            warn!("accesscerts.flomesh.io resource kind not found, skipping watches");
        }

        if api_resource_exists::<k8s::ServiceImport>(&runtime.client()).await {
            let imports = runtime.watch_all::<k8s::ServiceImport>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(ResourceIndex::shared(&informers), imports)
                    .instrument(info_span!("serviceimports")),
            );
        } else {
            warn!("serviceimports.flomesh.io resource kind not found, skipping watches");
        }

        let mesh_config = initial_mesh_config(
            runtime.client(),
            &control_plane_namespace,
            &mesh_config_name,
        )
        .await?;

        // Regenerate ingress routes on each settled burst of announcements.
        let pool = Arc::new(WorkerPool::spawn(workers, shutdown.clone()));
        let listener = BroadcastListener::new(
            broker.bus(Bus::Ingress),
            Kind::IngressUpdate,
            pool,
            move || SyncRoutes(cache.clone()),
        )
        .with_sliding(sliding);
        tokio::spawn(
            listener
                .run(shutdown.clone())
                .instrument(info_span!("ingress")),
        );

        let watcher = LogLevelWatcher::new(log_handle, &mesh_config);
        tokio::spawn(
            watcher
                .run(broker.bus(Bus::Kube), shutdown.clone())
                .instrument(info_span!("loglevel")),
        );

        match issuer {
            Some(issuer) => {
                let client = runtime.client();
                let mut reconciler = Reconciler::new(
                    issuer,
                    Arc::new(KubeSecretStore::new(client.clone())),
                    Arc::new(KubeAccessCertStatus::new(client)),
                    &mesh_config,
                );
                let kube = broker.bus(Bus::Kube);
                let cert = broker.bus(Bus::Cert);
                tokio::spawn(
                    async move {
                        reconciler.provision(&mesh_config).await;
                        reconciler.run(kube, cert, shutdown).await
                    }
                    .instrument(info_span!("certificates")),
                );
            }
            None => info!("No certificate issuer configured, skipping certificate reconciliation"),
        }

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks
        // to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

async fn initial_mesh_config(
    client: Client,
    namespace: &str,
    name: &str,
) -> Result<k8s::MeshConfigSpec> {
    let api = k8s::Api::<k8s::MeshConfig>::namespaced(client, namespace);
    match api.get_opt(name).await? {
        Some(mc) => Ok(mc.spec),
        None => {
            warn!(%namespace, %name, "MeshConfig not found, using defaults");
            Ok(k8s::MeshConfigSpec::default())
        }
    }
}

async fn api_resource_exists<T>(client: &Client) -> bool
where
    T: Resource,
    T::DynamicType: Default,
{
    let dt = Default::default();
    client
        .list_api_group_resources(&T::api_version(&dt))
        .await
        .ok()
        .iter()
        .flat_map(|r| r.resources.iter())
        .any(|r| r.kind == T::kind(&dt))
}
