use std::{fmt, str::FromStr};

/// Declares the closed set of event kinds along with their topic strings.
macro_rules! kinds {
    ($($(#[$meta:meta])* $variant:ident => $name:literal,)+) => {
        /// Names what changed in an observation event.
        ///
        /// The string form doubles as the raw-event topic on the kube bus.
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Kind {
            $($(#[$meta])* $variant,)+
        }

        impl Kind {
            pub const ALL: &'static [Kind] = &[$(Kind::$variant,)+];

            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Kind::$variant => $name,)+
                }
            }
        }

        impl FromStr for Kind {
            type Err = UnknownKind;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Kind::$variant),)+
                    _ => Err(UnknownKind(s.to_string())),
                }
            }
        }
    };
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind: {0}")]
pub struct UnknownKind(String);

kinds! {
    // Coarse refresh signals.
    ProxyUpdate => "proxy-update",
    IngressUpdate => "ingress-update",
    GatewayUpdate => "gateway-update",
    CertificateRotated => "certificate-rotated",

    // Core cluster objects.
    PodAdded => "pod-added",
    PodDeleted => "pod-deleted",
    PodUpdated => "pod-updated",
    EndpointAdded => "endpoint-added",
    EndpointDeleted => "endpoint-deleted",
    EndpointUpdated => "endpoint-updated",
    EndpointSlicesAdded => "endpointslices-added",
    EndpointSlicesDeleted => "endpointslices-deleted",
    EndpointSlicesUpdated => "endpointslices-updated",
    NamespaceAdded => "namespace-added",
    NamespaceDeleted => "namespace-deleted",
    NamespaceUpdated => "namespace-updated",
    ServiceAdded => "service-added",
    ServiceDeleted => "service-deleted",
    ServiceUpdated => "service-updated",
    ServiceAccountAdded => "serviceaccount-added",
    ServiceAccountDeleted => "serviceaccount-deleted",
    ServiceAccountUpdated => "serviceaccount-updated",
    SecretAdded => "secret-added",
    SecretDeleted => "secret-deleted",
    SecretUpdated => "secret-updated",
    ConfigMapAdded => "configmap-added",
    ConfigMapDeleted => "configmap-deleted",
    ConfigMapUpdated => "configmap-updated",
    IngressAdded => "ingress-added",
    IngressDeleted => "ingress-deleted",
    IngressUpdated => "ingress-updated",
    IngressClassAdded => "ingressclass-added",
    IngressClassDeleted => "ingressclass-deleted",
    IngressClassUpdated => "ingressclass-updated",

    // Mesh configuration.
    MeshConfigAdded => "meshconfig-added",
    MeshConfigDeleted => "meshconfig-deleted",
    MeshConfigUpdated => "meshconfig-updated",
    MeshRootCertificateAdded => "meshrootcertificate-added",
    MeshRootCertificateDeleted => "meshrootcertificate-deleted",
    MeshRootCertificateUpdated => "meshrootcertificate-updated",

    // SMI routing.
    TrafficSplitAdded => "trafficsplit-added",
    TrafficSplitDeleted => "trafficsplit-deleted",
    TrafficSplitUpdated => "trafficsplit-updated",
    RouteGroupAdded => "routegroup-added",
    RouteGroupDeleted => "routegroup-deleted",
    RouteGroupUpdated => "routegroup-updated",
    TcpRouteAdded => "tcproute-added",
    TcpRouteDeleted => "tcproute-deleted",
    TcpRouteUpdated => "tcproute-updated",
    TrafficTargetAdded => "traffictarget-added",
    TrafficTargetDeleted => "traffictarget-deleted",
    TrafficTargetUpdated => "traffictarget-updated",

    // Mesh policy.
    EgressAdded => "egress-added",
    EgressDeleted => "egress-deleted",
    EgressUpdated => "egress-updated",
    EgressGatewayAdded => "egressgateway-added",
    EgressGatewayDeleted => "egressgateway-deleted",
    EgressGatewayUpdated => "egressgateway-updated",
    IngressBackendAdded => "ingressbackend-added",
    IngressBackendDeleted => "ingressbackend-deleted",
    IngressBackendUpdated => "ingressbackend-updated",
    AccessControlAdded => "accesscontrol-added",
    AccessControlDeleted => "accesscontrol-deleted",
    AccessControlUpdated => "accesscontrol-updated",
    AccessCertAdded => "accesscert-added",
    AccessCertDeleted => "accesscert-deleted",
    AccessCertUpdated => "accesscert-updated",
    IsolationPolicyAdded => "isolation-added",
    IsolationPolicyDeleted => "isolation-deleted",
    IsolationPolicyUpdated => "isolation-updated",
    RetryPolicyAdded => "retry-added",
    RetryPolicyDeleted => "retry-deleted",
    RetryPolicyUpdated => "retry-updated",
    UpstreamTrafficSettingAdded => "upstreamtrafficsetting-added",
    UpstreamTrafficSettingDeleted => "upstreamtrafficsetting-deleted",
    UpstreamTrafficSettingUpdated => "upstreamtrafficsetting-updated",

    // Multi-cluster.
    ServiceExportAdded => "serviceexport-added",
    ServiceExportDeleted => "serviceexport-deleted",
    ServiceExportUpdated => "serviceexport-updated",
    ServiceImportAdded => "serviceimport-added",
    ServiceImportDeleted => "serviceimport-deleted",
    ServiceImportUpdated => "serviceimport-updated",
    GlobalTrafficPolicyAdded => "globaltrafficpolicy-added",
    GlobalTrafficPolicyDeleted => "globaltrafficpolicy-deleted",
    GlobalTrafficPolicyUpdated => "globaltrafficpolicy-updated",
    ServiceExportCreated => "mcs-serviceexport-created",
    ServiceExportRemoved => "mcs-serviceexport-deleted",
    ServiceExportAccepted => "mcs-serviceexport-accepted",
    ServiceExportRejected => "mcs-serviceexport-rejected",

    // Plugins.
    PluginAdded => "plugin-added",
    PluginDeleted => "plugin-deleted",
    PluginUpdated => "plugin-updated",
    PluginChainAdded => "pluginchain-added",
    PluginChainDeleted => "pluginchain-deleted",
    PluginChainUpdated => "pluginchain-updated",
    PluginConfigAdded => "pluginconfig-added",
    PluginConfigDeleted => "pluginconfig-deleted",
    PluginConfigUpdated => "pluginconfig-updated",

    // Machines.
    VirtualMachineAdded => "virtualmachine-added",
    VirtualMachineDeleted => "virtualmachine-deleted",
    VirtualMachineUpdated => "virtualmachine-updated",

    // Gateway API resources.
    GatewayAdded => "gatewayapi-gateway-added",
    GatewayDeleted => "gatewayapi-gateway-deleted",
    GatewayUpdated => "gatewayapi-gateway-updated",
    GatewayClassAdded => "gatewayapi-gatewayclass-added",
    GatewayClassDeleted => "gatewayapi-gatewayclass-deleted",
    GatewayClassUpdated => "gatewayapi-gatewayclass-updated",
    HttpRouteAdded => "gatewayapi-httproute-added",
    HttpRouteDeleted => "gatewayapi-httproute-deleted",
    HttpRouteUpdated => "gatewayapi-httproute-updated",
    GrpcRouteAdded => "gatewayapi-grpcroute-added",
    GrpcRouteDeleted => "gatewayapi-grpcroute-deleted",
    GrpcRouteUpdated => "gatewayapi-grpcroute-updated",
    TlsRouteAdded => "gatewayapi-tlsroute-added",
    TlsRouteDeleted => "gatewayapi-tlsroute-deleted",
    TlsRouteUpdated => "gatewayapi-tlsroute-updated",
    GatewayTcpRouteAdded => "gatewayapi-tcproute-added",
    GatewayTcpRouteDeleted => "gatewayapi-tcproute-deleted",
    GatewayTcpRouteUpdated => "gatewayapi-tcproute-updated",
    UdpRouteAdded => "gatewayapi-udproute-added",
    UdpRouteDeleted => "gatewayapi-udproute-deleted",
    UdpRouteUpdated => "gatewayapi-udproute-updated",
    ReferenceGrantAdded => "gatewayapi-referencegrant-added",
    ReferenceGrantDeleted => "gatewayapi-referencegrant-deleted",
    ReferenceGrantUpdated => "gatewayapi-referencegrant-updated",

    // Gateway policy attachments.
    RateLimitAdded => "ratelimit-added",
    RateLimitDeleted => "ratelimit-deleted",
    RateLimitUpdated => "ratelimit-updated",
    CircuitBreakerAdded => "circuitbreaker-added",
    CircuitBreakerDeleted => "circuitbreaker-deleted",
    CircuitBreakerUpdated => "circuitbreaker-updated",
    HealthCheckPolicyAdded => "healthcheckpolicy-added",
    HealthCheckPolicyDeleted => "healthcheckpolicy-deleted",
    HealthCheckPolicyUpdated => "healthcheckpolicy-updated",
    FaultInjectionAdded => "faultinjection-added",
    FaultInjectionDeleted => "faultinjection-deleted",
    FaultInjectionUpdated => "faultinjection-updated",
    BackendTlsPolicyAdded => "backendtlspolicy-added",
    BackendTlsPolicyDeleted => "backendtlspolicy-deleted",
    BackendTlsPolicyUpdated => "backendtlspolicy-updated",
    BackendLbPolicyAdded => "backendlbpolicy-added",
    BackendLbPolicyDeleted => "backendlbpolicy-deleted",
    BackendLbPolicyUpdated => "backendlbpolicy-updated",
    FilterAdded => "filter-added",
    FilterDeleted => "filter-deleted",
    FilterUpdated => "filter-updated",
    ListenerFilterAdded => "listenerfilter-added",
    ListenerFilterDeleted => "listenerfilter-deleted",
    ListenerFilterUpdated => "listenerfilter-updated",
    FilterDefinitionAdded => "filterdefinition-added",
    FilterDefinitionDeleted => "filterdefinition-deleted",
    FilterDefinitionUpdated => "filterdefinition-updated",
    FilterConfigAdded => "filterconfig-added",
    FilterConfigDeleted => "filterconfig-deleted",
    FilterConfigUpdated => "filterconfig-updated",
    HttpLogAdded => "httplog-added",
    HttpLogDeleted => "httplog-deleted",
    HttpLogUpdated => "httplog-updated",
    MetricsAdded => "metrics-added",
    MetricsDeleted => "metrics-deleted",
    MetricsUpdated => "metrics-updated",
    ZipkinAdded => "zipkin-added",
    ZipkinDeleted => "zipkin-deleted",
    ZipkinUpdated => "zipkin-updated",
    ProxyTagAdded => "proxytag-added",
    ProxyTagDeleted => "proxytag-deleted",
    ProxyTagUpdated => "proxytag-updated",
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The add/update/delete triple for one informer-backed resource type.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EventKinds {
    pub added: Kind,
    pub updated: Kind,
    pub deleted: Kind,
}
