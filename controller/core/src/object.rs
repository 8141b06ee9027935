use crate::certificate::IssuedCertificate;
use mesh_controller_k8s_api as k8s;
use std::{collections::BTreeMap, sync::Arc};

macro_rules! objects {
    ($($variant:ident($ty:ty) => $as:ident,)+) => {
        /// A snapshot of an observed object.
        ///
        /// Payloads are shared and never mutated once published.
        #[derive(Clone, Debug)]
        pub enum Object {
            $($variant(Arc<$ty>),)+
            Certificate(Arc<IssuedCertificate>),
            Dynamic(Arc<k8s::DynamicObject>),
        }

        $(
            impl From<$ty> for Object {
                fn from(obj: $ty) -> Self {
                    Object::$variant(Arc::new(obj))
                }
            }

            impl From<Arc<$ty>> for Object {
                fn from(obj: Arc<$ty>) -> Self {
                    Object::$variant(obj)
                }
            }
        )+

        impl Object {
            $(
                pub fn $as(&self) -> Option<&Arc<$ty>> {
                    match self {
                        Object::$variant(obj) => Some(obj),
                        _ => None,
                    }
                }
            )+

            /// The variant name, used when reporting payload mismatches.
            pub fn type_name(&self) -> &'static str {
                match self {
                    $(Object::$variant(_) => stringify!($variant),)+
                    Object::Certificate(_) => "Certificate",
                    Object::Dynamic(_) => "Dynamic",
                }
            }

            pub fn metadata(&self) -> Option<&k8s::ObjectMeta> {
                match self {
                    $(Object::$variant(obj) => Some(&obj.metadata),)+
                    Object::Certificate(_) => None,
                    Object::Dynamic(obj) => Some(&obj.metadata),
                }
            }

            fn addr(&self) -> usize {
                match self {
                    $(Object::$variant(obj) => Arc::as_ptr(obj) as *const () as usize,)+
                    Object::Certificate(obj) => Arc::as_ptr(obj) as *const () as usize,
                    Object::Dynamic(obj) => Arc::as_ptr(obj) as *const () as usize,
                }
            }
        }
    };
}

objects! {
    Namespace(k8s::Namespace) => as_namespace,
    Pod(k8s::Pod) => as_pod,
    Service(k8s::Service) => as_service,
    Endpoints(k8s::Endpoints) => as_endpoints,
    Ingress(k8s::Ingress) => as_ingress,
    IngressClass(k8s::IngressClass) => as_ingress_class,
    Secret(k8s::Secret) => as_secret,
    MeshConfig(k8s::MeshConfig) => as_mesh_config,
    AccessCert(k8s::AccessCert) => as_access_cert,
    ServiceImport(k8s::ServiceImport) => as_service_import,
}

impl Object {
    pub fn as_certificate(&self) -> Option<&Arc<IssuedCertificate>> {
        match self {
            Object::Certificate(cert) => Some(cert),
            _ => None,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata()?.namespace.as_deref()
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata()?.name.as_deref()
    }

    pub fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata()?.labels.as_ref()
    }

    pub fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata()?.annotations.as_ref()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        k8s::labels::get(self.labels(), key)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        k8s::labels::get(self.annotations(), key)
    }

    /// Returns true if both values refer to the same payload allocation.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        self.type_name() == other.type_name() && self.addr() == other.addr()
    }

    pub(crate) fn identity(&self) -> (&'static str, usize) {
        (self.type_name(), self.addr())
    }
}
