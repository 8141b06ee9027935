use crate::{
    coalescer::{self, Domain, Window},
    dispatch::{self, ProxyTopic},
    metrics::BrokerMetrics,
    pubsub::{self, PubSub, Subscription},
    queue::WorkQueue,
};
use mesh_controller_core::{Kind, PubSubMessage};
use prometheus_client::metrics::counter::Counter;
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{self, Duration},
};
use tracing::{debug, info_span, trace, Instrument};

const DISPATCH_CAPACITY: usize = 128;
const SAMPLE_INTERVAL: Duration = Duration::from_secs(5);

/// The buses on which the broker publishes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Bus {
    /// Proxy refreshes: `proxy-update` and `proxy:<uuid>`.
    Proxy,
    /// Ingress refreshes: `ingress-update`.
    Ingress,
    /// Gateway refreshes: `gateway-update`.
    Gateway,
    /// Every intake event, under its kind.
    Kube,
    /// `certificate-rotated`.
    Cert,
    /// Multi-cluster service-export lifecycle events, under their kind.
    Mcs,
}

/// Accepts observation events, routes them to refresh domains and fans them
/// out to subscribers.
#[derive(Clone, Debug)]
pub struct Broker {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    queue: Arc<WorkQueue<PubSubMessage>>,
    proxy: Lane,
    ingress: Lane,
    gateway: Lane,
    kube: Arc<PubSub>,
    cert: Arc<PubSub>,
    mcs: Arc<PubSub>,
    monitored_namespaces: prometheus_client::metrics::gauge::Gauge,
}

/// A refresh domain: the bus its announcements are published on and the
/// channel into its dispatcher.
#[derive(Debug)]
struct Lane {
    bus: Arc<PubSub>,
    tx: mpsc::Sender<PubSubMessage>,
    routed: Counter,
    dispatched: Counter,
}

// === impl Bus ===

impl Bus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Proxy => "proxy",
            Self::Ingress => "ingress",
            Self::Gateway => "gateway",
            Self::Kube => "kube",
            Self::Cert => "cert",
            Self::Mcs => "mcs",
        }
    }
}

// === impl Broker ===

impl Broker {
    /// Spawns the intake loop, the domain dispatchers and the queue sampler.
    /// All of them stop when `shutdown` is signaled.
    pub fn spawn(metrics: BrokerMetrics, shutdown: drain::Watch) -> Self {
        Self::spawn_with_window(Window::default(), metrics, shutdown)
    }

    pub fn spawn_with_window(
        window: Window,
        metrics: BrokerMetrics,
        shutdown: drain::Watch,
    ) -> Self {
        let queue = WorkQueue::new();
        let bus = |name| {
            Arc::new(PubSub::new(
                name,
                pubsub::DEFAULT_CAPACITY,
                metrics.subscriber_dropped.clone(),
            ))
        };

        let lane = |domain: Domain| {
            let bus = bus(domain.as_str());
            let (tx, rx) = mpsc::channel(DISPATCH_CAPACITY);
            let domain_metrics = metrics.domain(domain);
            let routed = domain_metrics.routed.clone();
            let dispatched = domain_metrics.dispatched.clone();
            tokio::spawn(
                coalescer::dispatch(
                    domain,
                    window,
                    rx,
                    bus.clone(),
                    domain_metrics,
                    shutdown.clone(),
                )
                .instrument(info_span!("dispatch", %domain)),
            );
            Lane {
                bus,
                tx,
                routed,
                dispatched,
            }
        };

        let inner = Arc::new(Inner {
            proxy: lane(Domain::Proxy),
            ingress: lane(Domain::Ingress),
            gateway: lane(Domain::Gateway),
            kube: bus(Bus::Kube.as_str()),
            cert: bus(Bus::Cert.as_str()),
            mcs: bus(Bus::Mcs.as_str()),
            monitored_namespaces: metrics.monitored_namespaces.clone(),
            queue,
        });

        tokio::spawn(intake(inner.clone()).instrument(info_span!("intake")));

        tokio::spawn(
            sample(
                inner.queue.clone(),
                metrics.events_queued.clone(),
                shutdown.clone(),
            )
            .instrument(info_span!("sampler")),
        );

        let queue = inner.queue.clone();
        tokio::spawn(async move {
            let release = shutdown.signaled().await;
            debug!("Shutting down intake queue");
            queue.shut_down();
            drop(release);
        });

        Self { inner }
    }

    /// Enqueues an observation event for routing.
    pub fn publish(&self, msg: PubSubMessage) {
        trace!(kind = %msg.kind, "Enqueuing");
        self.inner.queue.add_rate_limited(msg);
    }

    pub fn subscribe<S: AsRef<str>>(&self, bus: Bus, topics: &[S]) -> Subscription {
        self.inner.bus(bus).subscribe(topics)
    }

    pub fn unsubscribe(&self, bus: Bus, sub: Subscription) {
        self.inner.bus(bus).unsubscribe(sub)
    }

    /// A handle to one of the broker's buses.
    pub fn bus(&self, bus: Bus) -> Arc<PubSub> {
        self.inner.bus(bus).clone()
    }

    /// The number of events waiting to be routed.
    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }
}

// === impl Inner ===

impl Inner {
    fn bus(&self, bus: Bus) -> &Arc<PubSub> {
        match bus {
            Bus::Proxy => &self.proxy.bus,
            Bus::Ingress => &self.ingress.bus,
            Bus::Gateway => &self.gateway.bus,
            Bus::Kube => &self.kube,
            Bus::Cert => &self.cert,
            Bus::Mcs => &self.mcs,
        }
    }

    async fn process(&self, msg: &PubSubMessage) {
        match msg.kind {
            Kind::NamespaceAdded => {
                self.monitored_namespaces.inc();
            }
            Kind::NamespaceDeleted => {
                self.monitored_namespaces.dec();
            }
            _ => {}
        }

        let topic = msg.kind.as_str();
        self.kube.publish(topic, msg);

        let routing = dispatch::routing(msg.kind);
        match dispatch::proxy_topic(routing.proxy, msg) {
            Some(ProxyTopic::Broadcast) => self.proxy.route(msg).await,
            Some(ProxyTopic::Targeted(target)) => {
                debug!(kind = %topic, %target, "Targeted proxy update");
                self.proxy.publish_direct(&target, msg);
            }
            None => {}
        }
        if routing.ingress {
            self.ingress.route(msg).await;
        }
        if dispatch::gateway_refresh(routing.gateway, msg) {
            self.gateway.route(msg).await;
        }
        if routing.mcs {
            self.mcs.publish(topic, msg);
        }
        if routing.cert {
            self.cert.publish(topic, msg);
        }
    }
}

// === impl Lane ===

impl Lane {
    /// Publishes on the lane's bus without coalescing.
    fn publish_direct(&self, topic: &str, msg: &PubSubMessage) {
        self.routed.inc();
        self.dispatched.inc();
        self.bus.publish(topic, msg);
    }

    async fn route(&self, msg: &PubSubMessage) {
        if self.tx.send(msg.clone()).await.is_err() {
            debug!(bus = self.bus.name(), "Dispatcher has stopped");
            return;
        }
        self.routed.inc();
    }
}

async fn intake(inner: Arc<Inner>) {
    while let Some(msg) = inner.queue.get().await {
        inner.process(&msg).await;
        inner.queue.done(&msg);
    }
    debug!("Intake queue shut down");
}

async fn sample(
    queue: Arc<WorkQueue<PubSubMessage>>,
    gauge: prometheus_client::metrics::gauge::Gauge,
    shutdown: drain::Watch,
) {
    let signaled = shutdown.signaled();
    tokio::pin!(signaled);
    let mut interval = time::interval(SAMPLE_INTERVAL);
    loop {
        tokio::select! {
            release = &mut signaled => {
                drop(release);
                return;
            }
            _ = interval.tick() => {
                gauge.set(queue.len() as i64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use mesh_controller_core::Object;
    use mesh_controller_k8s_api::{self as k8s, labels, MeshConfig, MeshConfigSpec, ObjectMeta};

    fn broker() -> (Broker, BrokerMetrics, drain::Signal) {
        let (signal, watch) = drain::channel();
        let metrics = BrokerMetrics::default();
        (Broker::spawn(metrics.clone(), watch), metrics, signal)
    }

    fn pod(scrape: &str) -> Object {
        Object::from(k8s::Pod {
            metadata: ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some("pod".to_string()),
                labels: Some(btreemap! {
                    labels::SIDECAR_UNIQUE_ID.to_string() => "UUID-A".to_string(),
                }),
                annotations: Some(btreemap! {
                    labels::PROMETHEUS_SCRAPE.to_string() => scrape.to_string(),
                }),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn mesh_config(level: &str) -> Object {
        let mut spec = MeshConfigSpec::default();
        spec.observability.log_level = level.to_string();
        Object::from(MeshConfig::new("fsm-mesh-config", spec))
    }

    #[tokio::test(start_paused = true)]
    async fn log_level_change_reaches_kube_bus_only() {
        let (broker, metrics, _signal) = broker();
        let mut kube = broker.subscribe(Bus::Kube, &["meshconfig-updated"]);
        let mut proxy = broker.subscribe(Bus::Proxy, &["proxy-update"]);
        let mut gateway = broker.subscribe(Bus::Gateway, &["gateway-update"]);

        broker.publish(PubSubMessage::new(
            Kind::MeshConfigUpdated,
            Some(mesh_config("info")),
            Some(mesh_config("debug")),
        ));

        let msg = kube.recv().await.expect("must be published");
        assert_eq!(msg.kind, Kind::MeshConfigUpdated);

        time::sleep(Duration::from_secs(15)).await;
        assert!(proxy.try_recv().is_none());
        assert!(gateway.try_recv().is_none());
        assert_eq!(metrics.domain(Domain::Proxy).broadcasts.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn scrape_change_is_published_directly() {
        let (broker, metrics, _signal) = broker();
        let mut targeted = broker.subscribe(Bus::Proxy, &["proxy:UUID-A"]);
        let mut broadcast = broker.subscribe(Bus::Proxy, &["proxy-update"]);

        broker.publish(PubSubMessage::new(
            Kind::PodUpdated,
            Some(pod("false")),
            Some(pod("true")),
        ));

        let msg = time::timeout(Duration::from_millis(100), targeted.recv())
            .await
            .expect("must not be coalesced")
            .expect("must be published");
        assert_eq!(msg.kind, Kind::PodUpdated);

        time::sleep(Duration::from_secs(15)).await;
        assert!(broadcast.try_recv().is_none());

        let proxy = metrics.domain(Domain::Proxy);
        assert_eq!(proxy.routed.get(), 1);
        assert_eq!(proxy.dispatched.get(), 1);
        assert_eq!(proxy.broadcasts.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn service_changes_refresh_all_domains() {
        let (broker, metrics, _signal) = broker();
        let mut subs = [
            broker.subscribe(Bus::Proxy, &["proxy-update"]),
            broker.subscribe(Bus::Ingress, &["ingress-update"]),
            broker.subscribe(Bus::Gateway, &["gateway-update"]),
        ];

        let svc = Object::from(k8s::Service::default());
        broker.publish(PubSubMessage::new(Kind::ServiceAdded, None, Some(svc)));
        time::sleep(Duration::from_secs(3)).await;

        for sub in &mut subs {
            let msg = sub.try_recv().expect("must be announced");
            assert_eq!(msg.kind, Kind::ServiceAdded);
        }
        for domain in Domain::ALL {
            let m = metrics.domain(domain);
            assert_eq!(m.routed.get(), 1, "{domain}");
            assert_eq!(m.broadcasts.get(), 1, "{domain}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rotations_and_exports_use_their_own_buses() {
        let (broker, _metrics, _signal) = broker();
        let mut cert = broker.subscribe(Bus::Cert, &["certificate-rotated"]);
        let mut mcs = broker.subscribe(Bus::Mcs, &["mcs-serviceexport-created"]);

        broker.publish(PubSubMessage::signal(Kind::CertificateRotated));
        broker.publish(PubSubMessage::signal(Kind::ServiceExportCreated));

        assert_eq!(
            cert.recv().await.map(|m| m.kind),
            Some(Kind::CertificateRotated)
        );
        assert_eq!(
            mcs.recv().await.map(|m| m.kind),
            Some(Kind::ServiceExportCreated)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn namespace_lifecycle_drives_gauge() {
        let (broker, metrics, _signal) = broker();
        let mut kube = broker.subscribe(Bus::Kube, &["namespace-added", "namespace-deleted"]);

        let ns = |name: &str| {
            Object::from(k8s::Namespace {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            })
        };
        broker.publish(PubSubMessage::new(Kind::NamespaceAdded, None, Some(ns("a"))));
        broker.publish(PubSubMessage::new(Kind::NamespaceAdded, None, Some(ns("b"))));
        broker.publish(PubSubMessage::new(Kind::NamespaceDeleted, Some(ns("a")), None));
        for _ in 0..3 {
            kube.recv().await.expect("must be published");
        }

        assert_eq!(metrics.monitored_namespaces.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_intake() {
        let (broker, _metrics, signal) = broker();
        let mut kube = broker.subscribe(Bus::Kube, &["proxy-update"]);
        signal.drain().await;

        broker.publish(PubSubMessage::signal(Kind::ProxyUpdate));
        time::sleep(Duration::from_secs(1)).await;
        assert!(kube.try_recv().is_none());
        assert_eq!(broker.queue_len(), 0);
    }
}
