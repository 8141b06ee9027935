use mesh_controller_core::{
    Batch, ConfigStore, EventHandler, InformerCache, InformerKey, Object,
};
use mesh_controller_k8s_api::{self as k8s, labels, ByteString, ObjectMeta};
use maplit::btreemap;
use parking_lot::Mutex;
use std::{collections::BTreeMap, sync::Arc};

/// An informer cache whose contents are set by tests. Inserts and removals
/// notify the registered handlers.
#[derive(Default)]
pub struct FakeInformers {
    objects: Mutex<BTreeMap<(InformerKey, String, String), Object>>,
    handlers: Mutex<Vec<(InformerKey, Arc<dyn EventHandler>)>>,
}

/// A config store that records batches, with codebases that exist iff they
/// are listed.
#[derive(Default)]
pub struct FakeStore {
    pub codebases: Mutex<Vec<String>>,
    pub batches: Mutex<Vec<Batch>>,
    pub fail: Mutex<bool>,
}

impl FakeInformers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, obj: impl Into<Object>) {
        let obj = obj.into();
        let id = id_of(&obj);
        let old = self.objects.lock().insert(id.clone(), obj.clone());
        for handler in self.handlers_of(id.0) {
            match &old {
                Some(old) => handler.on_update(old, &obj),
                None => handler.on_add(&obj),
            }
        }
    }

    #[allow(dead_code)]
    pub fn remove(&self, key: InformerKey, namespace: &str, name: &str) {
        let old = self
            .objects
            .lock()
            .remove(&(key, namespace.to_string(), name.to_string()));
        if let Some(old) = old {
            for handler in self.handlers_of(key) {
                handler.on_delete(&old);
            }
        }
    }

    fn handlers_of(&self, key: InformerKey) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .lock()
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, h)| h.clone())
            .collect()
    }
}

impl InformerCache for FakeInformers {
    fn list(&self, key: InformerKey) -> Vec<Object> {
        self.objects
            .lock()
            .iter()
            .filter(|((k, _, _), _)| *k == key)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    fn get_by_key(&self, key: InformerKey, namespace: &str, name: &str) -> Option<Object> {
        self.objects
            .lock()
            .get(&(key, namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn add_event_handler(&self, key: InformerKey, handler: Arc<dyn EventHandler>) {
        self.handlers.lock().push((key, handler.clone()));
        for obj in self.list(key) {
            handler.on_add(&obj);
        }
    }

    fn is_monitored_namespace(&self, _: &str) -> bool {
        true
    }
}

fn id_of(obj: &Object) -> (InformerKey, String, String) {
    let key = match obj {
        Object::Namespace(_) => InformerKey::Namespace,
        Object::Pod(_) => InformerKey::Pod,
        Object::Service(_) => InformerKey::Service,
        Object::Endpoints(_) => InformerKey::Endpoints,
        Object::Ingress(_) => InformerKey::Ingress,
        Object::IngressClass(_) => InformerKey::IngressClass,
        Object::Secret(_) => InformerKey::Secret,
        Object::MeshConfig(_) => InformerKey::MeshConfig,
        Object::AccessCert(_) => InformerKey::AccessCert,
        Object::ServiceImport(_) => InformerKey::ServiceImport,
        other => panic!("not an informer object: {}", other.type_name()),
    };
    (
        key,
        obj.namespace().unwrap_or_default().to_string(),
        obj.name().unwrap_or_default().to_string(),
    )
}

impl FakeStore {
    pub fn with_codebases(paths: &[&str]) -> Arc<Self> {
        let store = Self::default();
        *store.codebases.lock() = paths.iter().map(|p| p.to_string()).collect();
        Arc::new(store)
    }

    pub fn uploaded(&self, base_path: &str) -> Vec<serde_json::Value> {
        self.batches
            .lock()
            .iter()
            .filter(|b| b.base_path == base_path)
            .flat_map(|b| b.items.iter().map(|i| i.content.clone()))
            .collect()
    }
}

#[async_trait::async_trait]
impl ConfigStore for FakeStore {
    async fn codebase_exists(&self, path: &str) -> bool {
        self.codebases.lock().iter().any(|p| p == path)
    }

    async fn batch(&self, batches: Vec<Batch>) -> anyhow::Result<()> {
        if *self.fail.lock() {
            anyhow::bail!("repository unavailable");
        }
        self.batches.lock().extend(batches);
        Ok(())
    }
}

fn meta(namespace: Option<&str>, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: namespace.map(str::to_string),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// A `ClusterIP` service `ns/name` with one port named `http`.
pub fn service(namespace: &str, name: &str, cluster_ip: &str) -> k8s::Service {
    k8s::Service {
        metadata: meta(Some(namespace), name),
        spec: Some(k8s::ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            cluster_ip: Some(cluster_ip.to_string()),
            ports: Some(vec![k8s::ServicePort {
                name: Some("http".to_string()),
                port: 80,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Endpoints for port `http` of `ns/name`.
pub fn endpoints(namespace: &str, name: &str, ips: &[&str]) -> k8s::Endpoints {
    k8s::Endpoints {
        metadata: meta(Some(namespace), name),
        subsets: Some(vec![k8s::EndpointSubset {
            addresses: Some(
                ips.iter()
                    .map(|ip| k8s::EndpointAddress {
                        ip: ip.to_string(),
                        node_name: Some("node-a".to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ports: Some(vec![k8s::EndpointPort {
                name: Some("http".to_string()),
                port: 8080,
                ..Default::default()
            }]),
            ..Default::default()
        }]),
    }
}

/// An ingress `ns/name` routing `a.example.com` paths to `web:http`.
pub fn ingress(name: &str, paths: &[(&str, &str)]) -> k8s::Ingress {
    k8s::Ingress {
        metadata: meta(Some("ns"), name),
        spec: Some(k8s::IngressSpec {
            rules: Some(vec![k8s::IngressRule {
                host: Some("a.example.com".to_string()),
                http: Some(k8s::HTTPIngressRuleValue {
                    paths: paths
                        .iter()
                        .map(|(type_, path)| k8s::HTTPIngressPath {
                            path: Some(path.to_string()),
                            path_type: type_.to_string(),
                            backend: k8s::IngressBackend {
                                service: Some(k8s::IngressServiceBackend {
                                    name: "web".to_string(),
                                    port: Some(k8s::ServiceBackendPort {
                                        name: Some("http".to_string()),
                                        number: None,
                                    }),
                                }),
                                resource: None,
                            },
                        })
                        .collect(),
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn ingress_class(name: &str, controller: &str, default: bool) -> k8s::IngressClass {
    let mut metadata = meta(None, name);
    if default {
        metadata.annotations = Some(btreemap! {
            labels::DEFAULT_INGRESS_CLASS.to_string() => "true".to_string(),
        });
    }
    k8s::IngressClass {
        metadata,
        spec: Some(k8s::api::networking::v1::IngressClassSpec {
            controller: Some(controller.to_string()),
            parameters: None,
        }),
    }
}

pub fn secret(namespace: &str, name: &str, cert: &str, key: &str, ca: &str) -> k8s::Secret {
    let data = [("tls.crt", cert), ("tls.key", key), ("ca.crt", ca)]
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
        .collect();
    k8s::Secret {
        metadata: meta(Some(namespace), name),
        data: Some(data),
        ..Default::default()
    }
}
