use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A service imported from one or more peer clusters.
#[derive(Clone, Debug, Default, PartialEq, Eq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "multicluster.flomesh.io",
    version = "v1alpha1",
    kind = "ServiceImport",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceImportSpec {
    #[serde(default, rename = "type")]
    pub type_: String,

    #[serde(default)]
    pub ports: Vec<ServiceImportPort>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceImportPort {
    #[serde(default)]
    pub name: String,

    pub port: i32,

    #[serde(default)]
    pub protocol: Option<String>,

    #[serde(default)]
    pub endpoints: Vec<ClusterEndpoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterEndpoint {
    #[serde(default)]
    pub cluster_key: String,

    pub target: Target,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub host: String,

    #[serde(default)]
    pub ip: String,

    pub port: i32,

    #[serde(default)]
    pub path: String,
}
