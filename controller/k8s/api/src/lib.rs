#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod access_cert;
pub mod duration;
pub mod labels;
pub mod mesh_config;
pub mod multicluster;

pub use self::{
    access_cert::{AccessCert, AccessCertSpec, AccessCertStatus},
    duration::GoDuration,
    mesh_config::{IngressGatewayCertSpec, MeshConfig, MeshConfigSpec},
    multicluster::{ServiceImport, ServiceImportSpec},
};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{
            EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Namespace, Pod, Secret,
            Service, ServicePort, ServiceSpec,
        },
        networking::v1::{
            HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressClass,
            IngressRule, IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
        },
    },
    apimachinery::pkg::{apis::meta::v1::Time, util::intstr::IntOrString},
    ByteString,
};
pub use kube::{
    api::{Api, DeleteParams, DynamicObject, ObjectMeta, Patch, PatchParams, ResourceExt},
    Client, Resource,
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Names a secret by namespace and name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema)]
pub struct SecretReference {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub namespace: String,
}

impl SecretReference {
    pub fn is_set(&self) -> bool {
        !self.name.is_empty() && !self.namespace.is_empty()
    }
}

impl std::fmt::Display for SecretReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
