use ahash::AHashMap;
use mesh_controller_core::{EventHandler, InformerCache, InformerKey, Object};
use mesh_controller_k8s_api::{self as k8s, labels, ResourceExt};
use parking_lot::RwLock;
use std::{marker::PhantomData, sync::Arc};

/// Holds the last-seen state of every watched resource and notifies the
/// registered handlers of each change.
pub struct Informers {
    monitor: Monitor,
    handlers: RwLock<AHashMap<InformerKey, Vec<Arc<dyn EventHandler>>>>,
}

/// Judges whether a namespace is monitored by the mesh.
#[derive(Clone, Debug)]
pub struct Monitor {
    mesh_name: Arc<str>,
    store: Arc<RwLock<Store>>,
}

type Store = AHashMap<InformerKey, AHashMap<ObjectRef, Object>>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct ObjectRef {
    namespace: String,
    name: String,
}

/// A resource type tracked by the informer cache.
pub trait Informed: ResourceExt + Into<Object> {
    const KEY: InformerKey;
}

/// Feeds kubert watch events for one resource type into [`Informers`].
pub struct ResourceIndex<R> {
    informers: Arc<Informers>,
    _marker: PhantomData<fn(R)>,
}

macro_rules! informed {
    ($($ty:ty => $key:ident,)+) => {
        $(
            impl Informed for $ty {
                const KEY: InformerKey = InformerKey::$key;
            }
        )+
    };
}

informed! {
    k8s::Namespace => Namespace,
    k8s::Pod => Pod,
    k8s::Service => Service,
    k8s::Endpoints => Endpoints,
    k8s::Ingress => Ingress,
    k8s::IngressClass => IngressClass,
    k8s::Secret => Secret,
    k8s::MeshConfig => MeshConfig,
    k8s::AccessCert => AccessCert,
    k8s::ServiceImport => ServiceImport,
}

// === impl Informers ===

impl Informers {
    pub fn new(mesh_name: impl Into<Arc<str>>) -> Arc<Self> {
        Arc::new(Self {
            monitor: Monitor {
                mesh_name: mesh_name.into(),
                store: Default::default(),
            },
            handlers: Default::default(),
        })
    }

    pub fn monitor(&self) -> Monitor {
        self.monitor.clone()
    }

    fn applied(&self, key: InformerKey, namespace: String, name: String, new: Object) {
        let old = self
            .monitor
            .store
            .write()
            .entry(key)
            .or_default()
            .insert(ObjectRef { namespace, name }, new.clone());

        for handler in self.handlers(key) {
            match &old {
                None => handler.on_add(&new),
                Some(old) => handler.on_update(old, &new),
            }
        }
    }

    fn deleted(&self, key: InformerKey, namespace: String, name: String) {
        let old = self
            .monitor
            .store
            .write()
            .get_mut(&key)
            .and_then(|objs| objs.remove(&ObjectRef { namespace, name }));

        let Some(old) = old else {
            tracing::trace!(%key, "Deleted an unknown object");
            return;
        };
        for handler in self.handlers(key) {
            handler.on_delete(&old);
        }
    }

    fn handlers(&self, key: InformerKey) -> Vec<Arc<dyn EventHandler>> {
        self.handlers.read().get(&key).cloned().unwrap_or_default()
    }
}

impl InformerCache for Informers {
    fn list(&self, key: InformerKey) -> Vec<Object> {
        self.monitor
            .store
            .read()
            .get(&key)
            .map(|objs| objs.values().cloned().collect())
            .unwrap_or_default()
    }

    fn get_by_key(&self, key: InformerKey, namespace: &str, name: &str) -> Option<Object> {
        let name = ObjectRef {
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.monitor.store.read().get(&key)?.get(&name).cloned()
    }

    /// Registers `handler` and replays every object already held for `key`
    /// as an add.
    fn add_event_handler(&self, key: InformerKey, handler: Arc<dyn EventHandler>) {
        let existing = {
            let mut handlers = self.handlers.write();
            handlers.entry(key).or_default().push(handler.clone());
            self.list(key)
        };
        for obj in &existing {
            handler.on_add(obj);
        }
    }

    fn is_monitored_namespace(&self, namespace: &str) -> bool {
        self.monitor.is_monitored_namespace(namespace)
    }
}

impl std::fmt::Debug for Informers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Informers")
            .field("mesh_name", &self.monitor.mesh_name)
            .finish_non_exhaustive()
    }
}

// === impl Monitor ===

impl Monitor {
    pub fn mesh_name(&self) -> &str {
        &self.mesh_name
    }

    /// Looks up the named namespace in the cache.
    pub fn is_monitored_namespace(&self, namespace: &str) -> bool {
        let store = self.store.read();
        let Some(namespaces) = store.get(&InformerKey::Namespace) else {
            return false;
        };
        let name = ObjectRef {
            namespace: String::new(),
            name: namespace.to_string(),
        };
        namespaces.get(&name).is_some_and(|ns| self.is_monitored(ns))
    }

    /// Judges a namespace object by its own label.
    pub fn is_monitored(&self, ns: &Object) -> bool {
        ns.label(labels::MONITORED_BY) == Some(&*self.mesh_name)
    }
}

// === impl ResourceIndex ===

impl<R> ResourceIndex<R> {
    pub fn shared(informers: &Arc<Informers>) -> Arc<RwLock<Self>> {
        Arc::new(RwLock::new(Self {
            informers: informers.clone(),
            _marker: PhantomData,
        }))
    }
}

macro_rules! namespaced {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl kubert::index::IndexNamespacedResource<$ty> for ResourceIndex<$ty> {
                fn apply(&mut self, resource: $ty) {
                    let namespace = resource.namespace().unwrap_or_default();
                    let name = resource.name_unchecked();
                    self.informers
                        .applied(<$ty>::KEY, namespace, name, resource.into());
                }

                fn delete(&mut self, namespace: String, name: String) {
                    self.informers.deleted(<$ty>::KEY, namespace, name);
                }
            }
        )+
    };
}

macro_rules! cluster {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl kubert::index::IndexClusterResource<$ty> for ResourceIndex<$ty> {
                fn apply(&mut self, resource: $ty) {
                    let name = resource.name_unchecked();
                    self.informers
                        .applied(<$ty>::KEY, String::new(), name, resource.into());
                }

                fn delete(&mut self, name: String) {
                    self.informers.deleted(<$ty>::KEY, String::new(), name);
                }
            }
        )+
    };
}

namespaced!(
    k8s::Pod,
    k8s::Service,
    k8s::Endpoints,
    k8s::Ingress,
    k8s::Secret,
    k8s::MeshConfig,
    k8s::AccessCert,
    k8s::ServiceImport,
);

cluster!(k8s::Namespace, k8s::IngressClass);
