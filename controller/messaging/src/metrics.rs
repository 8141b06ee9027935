use crate::Domain;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge, histogram::Histogram},
    registry::Registry,
};

#[derive(Clone, Debug)]
pub struct BrokerMetrics {
    pub(crate) events_queued: Gauge,
    pub(crate) monitored_namespaces: Gauge,
    pub(crate) subscriber_dropped: Counter,

    proxy_broadcasts: Counter,
    ingress_broadcasts: Counter,
    gateway_broadcasts: Counter,
    routed: Family<DomainLabels, Counter>,
    dispatched: Family<DomainLabels, Counter>,
    batch_size: Family<DomainLabels, Histogram>,
}

/// The metrics observed by a single domain's dispatcher.
#[derive(Clone, Debug)]
pub(crate) struct DomainMetrics {
    pub(crate) routed: Counter,
    pub(crate) dispatched: Counter,
    pub(crate) broadcasts: Counter,
    pub(crate) batch_size: Histogram,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DomainLabels {
    domain: &'static str,
}

// === impl BrokerMetrics ===

impl BrokerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let events_queued = Gauge::default();
        prom.register(
            "events_queued",
            "Number of events waiting in the intake queue",
            events_queued.clone(),
        );

        let monitored_namespaces = Gauge::default();
        prom.register(
            "monitored_namespaces",
            "Number of namespaces monitored by the mesh",
            monitored_namespaces.clone(),
        );

        let proxy_broadcasts = Counter::default();
        prom.register(
            "proxy_broadcast_events",
            "Count of coalesced proxy refresh announcements",
            proxy_broadcasts.clone(),
        );

        let ingress_broadcasts = Counter::default();
        prom.register(
            "ingress_broadcast_events",
            "Count of coalesced ingress refresh announcements",
            ingress_broadcasts.clone(),
        );

        let gateway_broadcasts = Counter::default();
        prom.register(
            "gateway_broadcast_events",
            "Count of coalesced gateway refresh announcements",
            gateway_broadcasts.clone(),
        );

        let routed = Family::default();
        prom.register(
            "events_routed",
            "Count of events routed to a refresh domain",
            routed.clone(),
        );

        let dispatched = Family::default();
        prom.register(
            "events_dispatched",
            "Count of events received by a refresh domain's dispatcher",
            dispatched.clone(),
        );

        let batch_size = Family::<DomainLabels, Histogram>::new_with_constructor(|| {
            Histogram::new([1.0, 2.0, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0].into_iter())
        });
        prom.register(
            "coalesced_batch_size",
            "Histogram of the number of events collapsed into one announcement",
            batch_size.clone(),
        );

        let subscriber_dropped = Counter::default();
        prom.register(
            "subscriber_dropped_messages",
            "Count of messages dropped because a subscriber fell behind",
            subscriber_dropped.clone(),
        );

        Self {
            events_queued,
            monitored_namespaces,
            subscriber_dropped,
            proxy_broadcasts,
            ingress_broadcasts,
            gateway_broadcasts,
            routed,
            dispatched,
            batch_size,
        }
    }

    pub(crate) fn domain(&self, domain: Domain) -> DomainMetrics {
        let labels = DomainLabels {
            domain: domain.as_str(),
        };
        let broadcasts = match domain {
            Domain::Proxy => &self.proxy_broadcasts,
            Domain::Ingress => &self.ingress_broadcasts,
            Domain::Gateway => &self.gateway_broadcasts,
        };
        DomainMetrics {
            routed: self.routed.get_or_create(&labels).clone(),
            dispatched: self.dispatched.get_or_create(&labels).clone(),
            broadcasts: broadcasts.clone(),
            batch_size: self.batch_size.get_or_create(&labels).clone(),
        }
    }
}

impl Default for BrokerMetrics {
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}
