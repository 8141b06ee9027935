use crate::{Informers, Monitor};
use mesh_controller_core::{
    EventHandler, EventKinds, InformerCache, InformerKey, Kind, Object, ObservePolicy,
    PubSubMessage,
};
use mesh_controller_messaging::Broker;
use std::sync::Arc;
use tracing::trace;

/// Publishes the observations of one informer to the broker.
#[derive(Debug)]
pub struct IntakeHandler {
    key: InformerKey,
    kinds: EventKinds,
    policy: ObservePolicy,
    monitor: Monitor,
    broker: Broker,
}

// === impl IntakeHandler ===

impl IntakeHandler {
    pub fn new(key: InformerKey, monitor: Monitor, broker: Broker) -> Self {
        Self {
            key,
            kinds: key.event_kinds(),
            policy: key.observe_policy(),
            monitor,
            broker,
        }
    }

    /// Registers an intake handler for every informer.
    pub fn register_all(informers: &Arc<Informers>, broker: &Broker) {
        for key in InformerKey::ALL {
            let handler = Self::new(*key, informers.monitor(), broker.clone());
            informers.add_event_handler(*key, Arc::new(handler));
        }
    }

    fn observed(&self, obj: &Object) -> bool {
        match self.policy {
            ObservePolicy::All => true,
            ObservePolicy::Namespace => self.monitor.is_monitored(obj),
            ObservePolicy::MonitoredNamespace => obj
                .namespace()
                .is_some_and(|ns| self.monitor.is_monitored_namespace(ns)),
        }
    }

    fn publish(&self, kind: Kind, old: Option<&Object>, new: Option<&Object>) {
        self.broker
            .publish(PubSubMessage::new(kind, old.cloned(), new.cloned()));
    }

    fn reject(&self, obj: &Object) {
        trace!(
            informer = %self.key,
            namespace = obj.namespace().unwrap_or_default(),
            name = obj.name().unwrap_or_default(),
            "Ignoring object outside the mesh"
        );
    }
}

impl EventHandler for IntakeHandler {
    fn on_add(&self, obj: &Object) {
        if !self.observed(obj) {
            return self.reject(obj);
        }
        self.publish(self.kinds.added, None, Some(obj));
    }

    fn on_update(&self, old: &Object, new: &Object) {
        let observed = match self.policy {
            // A namespace leaving the mesh is still announced.
            ObservePolicy::Namespace => self.observed(new) || self.observed(old),
            _ => self.observed(new),
        };
        if !observed {
            return self.reject(new);
        }
        self.publish(self.kinds.updated, Some(old), Some(new));
    }

    fn on_delete(&self, obj: &Object) {
        if !self.observed(obj) {
            return self.reject(obj);
        }
        self.publish(self.kinds.deleted, Some(obj), None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ResourceIndex;
    use kubert::index::{IndexClusterResource, IndexNamespacedResource};
    use maplit::btreemap;
    use mesh_controller_k8s_api::{self as k8s, labels, ObjectMeta};
    use mesh_controller_messaging::{BrokerMetrics, Bus, Subscription};
    use tokio::time::{self, Duration};

    fn meta(namespace: Option<&str>, name: &str) -> ObjectMeta {
        ObjectMeta {
            namespace: namespace.map(str::to_string),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    fn namespace(name: &str, monitored: bool) -> k8s::Namespace {
        let mut metadata = meta(None, name);
        if monitored {
            metadata.labels = Some(btreemap! {
                labels::MONITORED_BY.to_string() => "fsm".to_string(),
            });
        }
        k8s::Namespace {
            metadata,
            ..Default::default()
        }
    }

    async fn drain_kinds(sub: &mut Subscription) -> Vec<Kind> {
        time::sleep(Duration::from_secs(1)).await;
        std::iter::from_fn(|| sub.try_recv().map(|m| m.kind)).collect()
    }

    fn setup() -> (Arc<Informers>, Broker, drain::Signal) {
        let (signal, watch) = drain::channel();
        let broker = Broker::spawn(BrokerMetrics::default(), watch);
        let informers = Informers::new("fsm");
        IntakeHandler::register_all(&informers, &broker);
        (informers, broker, signal)
    }

    #[tokio::test(start_paused = true)]
    async fn pods_require_a_monitored_namespace() {
        let (informers, broker, _signal) = setup();
        let mut sub = broker.subscribe(Bus::Kube, &["pod-added", "pod-deleted"]);

        let namespaces = ResourceIndex::<k8s::Namespace>::shared(&informers);
        namespaces.write().apply(namespace("meshed", true));
        namespaces.write().apply(namespace("plain", false));

        let pods = ResourceIndex::<k8s::Pod>::shared(&informers);
        pods.write().apply(k8s::Pod {
            metadata: meta(Some("meshed"), "a"),
            ..Default::default()
        });
        pods.write().apply(k8s::Pod {
            metadata: meta(Some("plain"), "b"),
            ..Default::default()
        });
        IndexNamespacedResource::<k8s::Pod>::delete(
            &mut *pods.write(),
            "meshed".to_string(),
            "a".to_string(),
        );

        assert_eq!(
            drain_kinds(&mut sub).await,
            vec![Kind::PodAdded, Kind::PodDeleted]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn namespaces_are_judged_by_their_own_label() {
        let (informers, broker, _signal) = setup();
        let mut sub = broker.subscribe(
            Bus::Kube,
            &["namespace-added", "namespace-updated", "namespace-deleted"],
        );

        let namespaces = ResourceIndex::<k8s::Namespace>::shared(&informers);
        namespaces.write().apply(namespace("plain", false));
        namespaces.write().apply(namespace("meshed", true));
        // Leaving the mesh is an update judged on the old object.
        namespaces.write().apply(namespace("meshed", false));
        IndexClusterResource::<k8s::Namespace>::delete(&mut *namespaces.write(), "meshed".to_string());

        assert_eq!(
            drain_kinds(&mut sub).await,
            vec![Kind::NamespaceAdded, Kind::NamespaceUpdated]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn secrets_are_always_observed() {
        let (informers, broker, _signal) = setup();
        let mut sub = broker.subscribe(Bus::Kube, &["secret-added", "secret-updated"]);

        let secrets = ResourceIndex::<k8s::Secret>::shared(&informers);
        let secret = || k8s::Secret {
            metadata: meta(Some("anywhere"), "s"),
            ..Default::default()
        };
        secrets.write().apply(secret());
        secrets.write().apply(secret());

        assert_eq!(
            drain_kinds(&mut sub).await,
            vec![Kind::SecretAdded, Kind::SecretUpdated]
        );
    }
}
