//! Classifies intake events into refresh domains.
//!
//! [`routing`] is an exhaustive match over every [`Kind`], so adding a kind
//! without deciding how it is routed fails to compile.

use mesh_controller_core::{Kind, Object, PubSubMessage};
use mesh_controller_k8s_api::{labels, mesh_config::MeshConfigSpec};

/// How a kind is routed to each refresh domain.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Routing {
    pub proxy: ProxyRule,
    pub ingress: bool,
    pub gateway: GatewayRule,
    pub mcs: bool,
    pub cert: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ProxyRule {
    Skip,
    Broadcast,
    NamespaceExclusionList,
    MeshConfig,
    Pod,
    EndpointsUnlessCloudSourced,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum GatewayRule {
    Skip,
    Broadcast,
    MeshConfig,
}

/// Where a proxy refresh is published.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProxyTopic {
    /// Coalesced onto the `proxy-update` topic.
    Broadcast,
    /// Published directly on `proxy:<uuid>`.
    Targeted(String),
}

// === impl Routing ===

impl Routing {
    const KUBE_ONLY: Self = Self {
        proxy: ProxyRule::Skip,
        ingress: false,
        gateway: GatewayRule::Skip,
        mcs: false,
        cert: false,
    };

    const fn proxy(proxy: ProxyRule) -> Self {
        Self {
            proxy,
            ..Self::KUBE_ONLY
        }
    }

    const fn gateway() -> Self {
        Self {
            gateway: GatewayRule::Broadcast,
            ..Self::KUBE_ONLY
        }
    }
}

pub(crate) fn routing(kind: Kind) -> Routing {
    use Kind::*;

    match kind {
        EndpointAdded | EndpointDeleted | EndpointUpdated => Routing {
            proxy: ProxyRule::EndpointsUnlessCloudSourced,
            ingress: true,
            gateway: GatewayRule::Broadcast,
            ..Routing::KUBE_ONLY
        },

        ServiceAdded | ServiceDeleted | ServiceUpdated | ServiceImportAdded
        | ServiceImportDeleted | ServiceImportUpdated => Routing {
            proxy: ProxyRule::Broadcast,
            ingress: true,
            gateway: GatewayRule::Broadcast,
            ..Routing::KUBE_ONLY
        },

        IngressAdded | IngressDeleted | IngressUpdated | IngressClassAdded
        | IngressClassDeleted | IngressClassUpdated => Routing {
            proxy: ProxyRule::Broadcast,
            ingress: true,
            ..Routing::KUBE_ONLY
        },

        IsolationPolicyAdded | IsolationPolicyDeleted | IsolationPolicyUpdated => Routing {
            proxy: ProxyRule::Broadcast,
            gateway: GatewayRule::Broadcast,
            ..Routing::KUBE_ONLY
        },

        MeshConfigUpdated => Routing {
            proxy: ProxyRule::MeshConfig,
            gateway: GatewayRule::MeshConfig,
            ..Routing::KUBE_ONLY
        },

        NamespaceUpdated => Routing::proxy(ProxyRule::NamespaceExclusionList),

        PodAdded | PodDeleted | PodUpdated => Routing::proxy(ProxyRule::Pod),

        ProxyUpdate
        | TrafficSplitAdded
        | TrafficSplitDeleted
        | TrafficSplitUpdated
        | RouteGroupAdded
        | RouteGroupDeleted
        | RouteGroupUpdated
        | TcpRouteAdded
        | TcpRouteDeleted
        | TcpRouteUpdated
        | TrafficTargetAdded
        | TrafficTargetDeleted
        | TrafficTargetUpdated
        | EgressAdded
        | EgressDeleted
        | EgressUpdated
        | EgressGatewayAdded
        | EgressGatewayDeleted
        | EgressGatewayUpdated
        | IngressBackendAdded
        | IngressBackendDeleted
        | IngressBackendUpdated
        | AccessControlAdded
        | AccessControlDeleted
        | AccessControlUpdated
        | RetryPolicyAdded
        | RetryPolicyDeleted
        | RetryPolicyUpdated
        | UpstreamTrafficSettingAdded
        | UpstreamTrafficSettingDeleted
        | UpstreamTrafficSettingUpdated
        | ServiceExportAdded
        | ServiceExportDeleted
        | ServiceExportUpdated
        | GlobalTrafficPolicyAdded
        | GlobalTrafficPolicyDeleted
        | GlobalTrafficPolicyUpdated
        | PluginAdded
        | PluginDeleted
        | PluginUpdated
        | PluginChainAdded
        | PluginChainDeleted
        | PluginChainUpdated
        | PluginConfigAdded
        | PluginConfigDeleted
        | PluginConfigUpdated
        | VirtualMachineAdded
        | VirtualMachineDeleted
        | VirtualMachineUpdated => Routing::proxy(ProxyRule::Broadcast),

        EndpointSlicesAdded
        | EndpointSlicesDeleted
        | EndpointSlicesUpdated
        | SecretAdded
        | SecretDeleted
        | SecretUpdated
        | ConfigMapAdded
        | ConfigMapDeleted
        | ConfigMapUpdated
        | GatewayAdded
        | GatewayDeleted
        | GatewayUpdated
        | GatewayClassAdded
        | GatewayClassDeleted
        | GatewayClassUpdated
        | HttpRouteAdded
        | HttpRouteDeleted
        | HttpRouteUpdated
        | GrpcRouteAdded
        | GrpcRouteDeleted
        | GrpcRouteUpdated
        | TlsRouteAdded
        | TlsRouteDeleted
        | TlsRouteUpdated
        | GatewayTcpRouteAdded
        | GatewayTcpRouteDeleted
        | GatewayTcpRouteUpdated
        | UdpRouteAdded
        | UdpRouteDeleted
        | UdpRouteUpdated
        | ReferenceGrantAdded
        | ReferenceGrantDeleted
        | ReferenceGrantUpdated
        | RateLimitAdded
        | RateLimitDeleted
        | RateLimitUpdated
        | CircuitBreakerAdded
        | CircuitBreakerDeleted
        | CircuitBreakerUpdated
        | HealthCheckPolicyAdded
        | HealthCheckPolicyDeleted
        | HealthCheckPolicyUpdated
        | FaultInjectionAdded
        | FaultInjectionDeleted
        | FaultInjectionUpdated
        | BackendTlsPolicyAdded
        | BackendTlsPolicyDeleted
        | BackendTlsPolicyUpdated
        | BackendLbPolicyAdded
        | BackendLbPolicyDeleted
        | BackendLbPolicyUpdated
        | FilterAdded
        | FilterDeleted
        | FilterUpdated
        | ListenerFilterAdded
        | ListenerFilterDeleted
        | ListenerFilterUpdated
        | FilterDefinitionAdded
        | FilterDefinitionDeleted
        | FilterDefinitionUpdated
        | FilterConfigAdded
        | FilterConfigDeleted
        | FilterConfigUpdated
        | HttpLogAdded
        | HttpLogDeleted
        | HttpLogUpdated
        | MetricsAdded
        | MetricsDeleted
        | MetricsUpdated
        | ZipkinAdded
        | ZipkinDeleted
        | ZipkinUpdated
        | ProxyTagAdded
        | ProxyTagDeleted
        | ProxyTagUpdated => Routing::gateway(),

        ServiceExportCreated
        | ServiceExportRemoved
        | ServiceExportAccepted
        | ServiceExportRejected => Routing {
            mcs: true,
            ..Routing::KUBE_ONLY
        },

        CertificateRotated => Routing {
            cert: true,
            ..Routing::KUBE_ONLY
        },

        IngressUpdate
        | GatewayUpdate
        | NamespaceAdded
        | NamespaceDeleted
        | ServiceAccountAdded
        | ServiceAccountDeleted
        | ServiceAccountUpdated
        | MeshConfigAdded
        | MeshConfigDeleted
        | MeshRootCertificateAdded
        | MeshRootCertificateDeleted
        | MeshRootCertificateUpdated
        | AccessCertAdded
        | AccessCertDeleted
        | AccessCertUpdated => Routing::KUBE_ONLY,
    }
}

/// Decides whether, and where, `msg` triggers a proxy refresh.
pub(crate) fn proxy_topic(rule: ProxyRule, msg: &PubSubMessage) -> Option<ProxyTopic> {
    match rule {
        ProxyRule::Skip => None,
        ProxyRule::Broadcast => Some(ProxyTopic::Broadcast),
        ProxyRule::NamespaceExclusionList => {
            let (old, new) = both(msg, Object::as_namespace)?;
            let old = exclusion_list(old.metadata.annotations.as_ref());
            let new = exclusion_list(new.metadata.annotations.as_ref());
            (!old.eq_ignore_ascii_case(new)).then_some(ProxyTopic::Broadcast)
        }
        ProxyRule::MeshConfig => {
            let (old, new) = both(msg, Object::as_mesh_config)?;
            proxy_config_changed(&old.spec, &new.spec).then_some(ProxyTopic::Broadcast)
        }
        ProxyRule::Pod => pod_topic(msg),
        ProxyRule::EndpointsUnlessCloudSourced => match &msg.new {
            None => Some(ProxyTopic::Broadcast),
            Some(obj) => {
                let Some(eps) = cast(msg, obj, Object::as_endpoints) else {
                    return None;
                };
                let cloud = labels::get(eps.metadata.labels.as_ref(), labels::CLOUD_SOURCED);
                cloud.is_none().then_some(ProxyTopic::Broadcast)
            }
        },
    }
}

pub(crate) fn gateway_refresh(rule: GatewayRule, msg: &PubSubMessage) -> bool {
    match rule {
        GatewayRule::Skip => false,
        GatewayRule::Broadcast => true,
        GatewayRule::MeshConfig => both(msg, Object::as_mesh_config)
            .map(|(old, new)| gateway_config_changed(&old.spec, &new.spec))
            .unwrap_or(false),
    }
}

fn pod_topic(msg: &PubSubMessage) -> Option<ProxyTopic> {
    // Each side is judged on its own; a mismatched payload counts as absent.
    let old = msg.old.as_ref().and_then(|obj| cast(msg, obj, Object::as_pod));
    let new = msg.new.as_ref().and_then(|obj| cast(msg, obj, Object::as_pod));
    let uid = |pod: &mesh_controller_k8s_api::Pod| {
        labels::get(pod.metadata.labels.as_ref(), labels::SIDECAR_UNIQUE_ID).map(str::to_string)
    };
    let scrape = |pod: &mesh_controller_k8s_api::Pod| {
        labels::get(pod.metadata.annotations.as_ref(), labels::PROMETHEUS_SCRAPE)
            .unwrap_or_default()
            .to_string()
    };

    if let (Some(old), Some(new)) = (old, new) {
        if scrape(old) != scrape(new) {
            if let Some(uuid) = uid(new) {
                return Some(ProxyTopic::Targeted(format!("proxy:{uuid}")));
            }
        }
    }

    if new.and_then(|p| uid(p)).is_some() || old.and_then(|p| uid(p)).is_some() {
        return Some(ProxyTopic::Broadcast);
    }

    None
}

fn exclusion_list(annotations: Option<&std::collections::BTreeMap<String, String>>) -> &str {
    labels::get(annotations, labels::SERVICE_EXCLUSION_LIST).unwrap_or_default()
}

fn proxy_config_changed(old: &MeshConfigSpec, new: &MeshConfigSpec) -> bool {
    let (ot, nt) = (&old.traffic, &new.traffic);
    let (oa, na) = (
        &ot.inbound_external_authorization,
        &nt.inbound_external_authorization,
    );
    let (os, ns) = (&old.sidecar, &new.sidecar);
    let (oo, no) = (&old.observability, &new.observability);

    ot.enable_egress != nt.enable_egress
        || ot.enable_permissive_traffic_policy_mode != nt.enable_permissive_traffic_policy_mode
        || ot.http1_per_request_load_balancing != nt.http1_per_request_load_balancing
        || ot.http2_per_request_load_balancing != nt.http2_per_request_load_balancing
        || ot.service_access_mode != nt.service_access_mode
        || oa.enable != na.enable
        || (na.enable && oa != na)
        || oo.tracing != no.tracing
        || oo.remote_logging != no.remote_logging
        || os.log_level != ns.log_level
        || os.compress_config != ns.compress_config
        || os.sidecar_timeout != ns.sidecar_timeout
        || os.local_dns_proxy != ns.local_dns_proxy
        || old.feature_flags != new.feature_flags
        || old.plugin_chains != new.plugin_chains
        || old.connector != new.connector
        || old.cluster_set != new.cluster_set
}

fn gateway_config_changed(old: &MeshConfigSpec, new: &MeshConfigSpec) -> bool {
    let (o, n) = (&old.gateway_api, &new.gateway_api);

    o.fgw_log_level != n.fgw_log_level
        || old.feature_flags.enable_gateway_agent_service
            != new.feature_flags.enable_gateway_agent_service
        || o.strip_any_host_port != n.strip_any_host_port
        || o.proxy_preserve_host != n.proxy_preserve_host
        || o.ssl_passthrough_upstream_port != n.ssl_passthrough_upstream_port
        || o.proxy_tag != n.proxy_tag
        || o.http1_per_request_load_balancing != n.http1_per_request_load_balancing
        || o.http2_per_request_load_balancing != n.http2_per_request_load_balancing
}

/// Extracts both payloads as `T`, logging a mismatch.
fn both<'m, T>(
    msg: &'m PubSubMessage,
    f: impl Fn(&'m Object) -> Option<&'m std::sync::Arc<T>>,
) -> Option<(&'m T, &'m T)> {
    let old = cast(msg, msg.old.as_ref()?, &f)?;
    let new = cast(msg, msg.new.as_ref()?, &f)?;
    Some((old, new))
}

fn cast<'m, T>(
    msg: &PubSubMessage,
    obj: &'m Object,
    f: impl Fn(&'m Object) -> Option<&'m std::sync::Arc<T>>,
) -> Option<&'m T> {
    match f(obj) {
        Some(t) => Some(t.as_ref()),
        None => {
            tracing::error!(
                kind = %msg.kind,
                observed = obj.type_name(),
                "Unexpected payload type"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;
    use mesh_controller_k8s_api::{self as k8s, MeshConfig, ObjectMeta};

    fn mesh_config(f: impl FnOnce(&mut MeshConfigSpec)) -> Object {
        let mut spec = MeshConfigSpec::default();
        f(&mut spec);
        Object::from(MeshConfig::new("fsm-mesh-config", spec))
    }

    fn pod(uid: Option<&str>, scrape: &str) -> Object {
        Object::from(k8s::Pod {
            metadata: ObjectMeta {
                namespace: Some("ns".to_string()),
                name: Some("pod".to_string()),
                labels: uid.map(|uid| {
                    btreemap! { labels::SIDECAR_UNIQUE_ID.to_string() => uid.to_string() }
                }),
                annotations: Some(btreemap! {
                    labels::PROMETHEUS_SCRAPE.to_string() => scrape.to_string(),
                }),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn ns(exclusions: Option<&str>) -> Object {
        Object::from(k8s::Namespace {
            metadata: ObjectMeta {
                name: Some("ns".to_string()),
                annotations: exclusions.map(|v| {
                    btreemap! { labels::SERVICE_EXCLUSION_LIST.to_string() => v.to_string() }
                }),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn update(kind: Kind, old: Object, new: Object) -> PubSubMessage {
        PubSubMessage::new(kind, Some(old), Some(new))
    }

    fn proxy(msg: &PubSubMessage) -> Option<ProxyTopic> {
        proxy_topic(routing(msg.kind).proxy, msg)
    }

    fn gateway(msg: &PubSubMessage) -> bool {
        gateway_refresh(routing(msg.kind).gateway, msg)
    }

    #[test]
    fn log_level_changes_refresh_nothing() {
        let msg = update(
            Kind::MeshConfigUpdated,
            mesh_config(|s| s.observability.log_level = "info".to_string()),
            mesh_config(|s| s.observability.log_level = "debug".to_string()),
        );
        assert_eq!(proxy(&msg), None);
        assert!(!gateway(&msg));
    }

    #[test]
    fn proxy_whitelist_refreshes_proxies_only() {
        let msg = update(
            Kind::MeshConfigUpdated,
            mesh_config(|_| {}),
            mesh_config(|s| s.traffic.enable_egress = true),
        );
        assert_eq!(proxy(&msg), Some(ProxyTopic::Broadcast));
        assert!(!gateway(&msg));
    }

    #[test]
    fn gateway_whitelist_refreshes_gateways_only() {
        let msg = update(
            Kind::MeshConfigUpdated,
            mesh_config(|_| {}),
            mesh_config(|s| s.gateway_api.strip_any_host_port = true),
        );
        assert_eq!(proxy(&msg), None);
        assert!(gateway(&msg));
    }

    #[test]
    fn external_authz_settings_matter_only_when_enabled() {
        let disabled = update(
            Kind::MeshConfigUpdated,
            mesh_config(|_| {}),
            mesh_config(|s| {
                s.traffic
                    .inbound_external_authorization
                    .settings
                    .insert("timeout".to_string(), serde_json::json!("1s"));
            }),
        );
        assert_eq!(proxy(&disabled), None);

        let enabled = update(
            Kind::MeshConfigUpdated,
            mesh_config(|s| s.traffic.inbound_external_authorization.enable = true),
            mesh_config(|s| {
                let authz = &mut s.traffic.inbound_external_authorization;
                authz.enable = true;
                authz
                    .settings
                    .insert("timeout".to_string(), serde_json::json!("1s"));
            }),
        );
        assert_eq!(proxy(&enabled), Some(ProxyTopic::Broadcast));
    }

    #[test]
    fn scrape_change_targets_one_proxy() {
        let msg = update(
            Kind::PodUpdated,
            pod(Some("UUID-A"), "false"),
            pod(Some("UUID-A"), "true"),
        );
        assert_eq!(
            proxy(&msg),
            Some(ProxyTopic::Targeted("proxy:UUID-A".to_string()))
        );
    }

    #[test]
    fn pods_with_sidecars_broadcast() {
        let msg = update(
            Kind::PodUpdated,
            pod(Some("UUID-A"), "true"),
            pod(Some("UUID-A"), "true"),
        );
        assert_eq!(proxy(&msg), Some(ProxyTopic::Broadcast));

        let deleted = PubSubMessage::new(Kind::PodDeleted, Some(pod(Some("UUID-A"), "")), None);
        assert_eq!(proxy(&deleted), Some(ProxyTopic::Broadcast));

        let unmeshed = PubSubMessage::new(Kind::PodAdded, None, Some(pod(None, "")));
        assert_eq!(proxy(&unmeshed), None);
    }

    #[test]
    fn mismatched_old_pod_payload_is_ignored() {
        let msg = update(Kind::PodUpdated, ns(None), pod(Some("UUID-A"), "true"));
        assert_eq!(proxy(&msg), Some(ProxyTopic::Broadcast));

        let msg = update(Kind::PodUpdated, pod(Some("UUID-A"), ""), ns(None));
        assert_eq!(proxy(&msg), Some(ProxyTopic::Broadcast));
    }

    #[test]
    fn exclusion_list_compares_case_insensitively() {
        let same = update(
            Kind::NamespaceUpdated,
            ns(Some("Foo.Bar")),
            ns(Some("foo.bar")),
        );
        assert_eq!(proxy(&same), None);

        let changed = update(Kind::NamespaceUpdated, ns(None), ns(Some("foo.bar")));
        assert_eq!(proxy(&changed), Some(ProxyTopic::Broadcast));
    }

    #[test]
    fn cloud_sourced_endpoints_skip_proxies() {
        let eps = |cloud: bool| {
            Object::from(k8s::Endpoints {
                metadata: ObjectMeta {
                    labels: cloud.then(|| {
                        btreemap! { labels::CLOUD_SOURCED.to_string() => "true".to_string() }
                    }),
                    ..Default::default()
                },
                ..Default::default()
            })
        };
        let cloud = PubSubMessage::new(Kind::EndpointUpdated, Some(eps(true)), Some(eps(true)));
        assert_eq!(proxy(&cloud), None);
        assert!(routing(cloud.kind).ingress);

        let local = PubSubMessage::new(Kind::EndpointAdded, None, Some(eps(false)));
        assert_eq!(proxy(&local), Some(ProxyTopic::Broadcast));
    }

    #[test]
    fn mismatched_payloads_are_dropped() {
        let msg = update(Kind::PodUpdated, ns(None), ns(None));
        assert_eq!(proxy(&msg), None);
    }

    #[test]
    fn every_kind_is_routed_somewhere_sensible() {
        for kind in Kind::ALL {
            let r = routing(*kind);
            if r.cert {
                assert_eq!(*kind, Kind::CertificateRotated);
            }
            if r.mcs {
                assert!(kind.as_str().starts_with("mcs-"), "{kind}");
            }
        }
        assert!(routing(Kind::ServiceUpdated).ingress);
        assert_eq!(routing(Kind::ServiceUpdated).proxy, ProxyRule::Broadcast);
        assert_eq!(routing(Kind::HttpRouteAdded).gateway, GatewayRule::Broadcast);
        assert_eq!(routing(Kind::AccessCertAdded), Routing::KUBE_ONLY);
    }
}
