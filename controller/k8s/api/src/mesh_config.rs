use crate::SecretReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The mesh-wide configuration object.
///
/// Only the fields the controller reads are typed. Blocks that are only
/// compared for change detection are carried as raw JSON values.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "config.flomesh.io",
    version = "v1alpha3",
    kind = "MeshConfig",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct MeshConfigSpec {
    #[serde(default)]
    pub sidecar: SidecarSpec,

    #[serde(default)]
    pub traffic: TrafficSpec,

    #[serde(default)]
    pub observability: ObservabilitySpec,

    #[serde(default)]
    pub certificate: CertificateSpec,

    #[serde(default)]
    pub feature_flags: FeatureFlags,

    #[serde(default, rename = "gatewayAPI")]
    pub gateway_api: GatewayApiSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_chains: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_set: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSpec {
    #[serde(default)]
    pub log_level: String,

    #[serde(default)]
    pub compress_config: bool,

    #[serde(default)]
    pub sidecar_timeout: i64,

    #[serde(default, rename = "localDNSProxy", skip_serializing_if = "Option::is_none")]
    pub local_dns_proxy: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrafficSpec {
    #[serde(default)]
    pub enable_egress: bool,

    #[serde(default)]
    pub enable_permissive_traffic_policy_mode: bool,

    #[serde(default)]
    pub http1_per_request_load_balancing: bool,

    #[serde(default)]
    pub http2_per_request_load_balancing: bool,

    #[serde(default)]
    pub service_access_mode: String,

    #[serde(default)]
    pub inbound_external_authorization: ExternalAuthzSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAuthzSpec {
    #[serde(default)]
    pub enable: bool,

    #[serde(flatten)]
    pub settings: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservabilitySpec {
    #[serde(default, rename = "fsmLogLevel")]
    pub log_level: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_logging: Option<Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_gateway: Option<IngressGatewayCertSpec>,
}

/// The certificate the ingress gateway presents.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressGatewayCertSpec {
    #[serde(default)]
    pub subject_alt_names: Vec<String>,

    #[serde(default)]
    pub validity_duration: String,

    #[serde(default)]
    pub secret: SecretReference,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    #[serde(default)]
    pub enable_access_cert_policy: bool,

    #[serde(default)]
    pub enable_gateway_agent_service: bool,

    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayApiSpec {
    #[serde(default)]
    pub fgw_log_level: String,

    #[serde(default)]
    pub strip_any_host_port: bool,

    #[serde(default)]
    pub proxy_preserve_host: bool,

    #[serde(default)]
    pub ssl_passthrough_upstream_port: i32,

    #[serde(default)]
    pub http1_per_request_load_balancing: bool,

    #[serde(default)]
    pub http2_per_request_load_balancing: bool,

    #[serde(default)]
    pub proxy_tag: ProxyTagSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxyTagSpec {
    #[serde(default)]
    pub src_host_header: String,

    #[serde(default)]
    pub dst_host_header: String,
}
