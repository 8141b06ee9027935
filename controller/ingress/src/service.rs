use crate::{
    service_port::{is_dns1123_subdomain, Endpoint, ServiceInfo, ServicePortName, ServiceType},
    tracker::{ApplyOrder, CanonicalMap, Projection},
};
use mesh_controller_core::Object;
use mesh_controller_k8s_api::{self as k8s, ResourceExt};
use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr},
};
use tracing::warn;

pub type ServiceMap = CanonicalMap<ServicePortName, ServiceInfo>;

/// Projects `ClusterIP` and `ExternalName` services into their ports.
#[derive(Copy, Clone, Debug, Default)]
pub struct Services;

impl Projection for Services {
    type Resource = k8s::Service;
    type Key = ServicePortName;
    type Value = ServiceInfo;

    const ORDER: ApplyOrder = ApplyOrder::MergeThenFilter;

    fn project(&self, svc: &k8s::Service) -> BTreeMap<ServicePortName, ServiceInfo> {
        let Some(spec) = svc.spec.as_ref() else {
            return BTreeMap::new();
        };
        let namespace = svc.namespace().unwrap_or_default();
        let name = svc.name_any();

        let type_ = match spec.type_.as_deref().unwrap_or("ClusterIP") {
            "ClusterIP" => ServiceType::ClusterIp,
            "ExternalName" => ServiceType::ExternalName,
            _ => return BTreeMap::new(),
        };

        let cluster_ip = match type_ {
            ServiceType::ClusterIp => match first_ipv4(spec) {
                Some(ip) => Some(ip),
                None => return BTreeMap::new(),
            },
            _ => None,
        };
        let external_name = match type_ {
            ServiceType::ExternalName => match spec.external_name.as_deref() {
                Some(host) if is_valid_external_name(host) => Some(host),
                host => {
                    warn!(
                        %namespace,
                        %name,
                        external_name = host.unwrap_or_default(),
                        "Ignoring unsupported external name"
                    );
                    return BTreeMap::new();
                }
            },
            _ => None,
        };

        let mut ports = BTreeMap::new();
        for port in spec.ports.iter().flatten() {
            let Ok(number) = u16::try_from(port.port) else {
                continue;
            };
            let port_name = port.name.clone().unwrap_or_default();
            let address = match (cluster_ip, external_name) {
                (Some(ip), _) => ip.to_string(),
                (None, Some(host)) => Endpoint::External {
                    host: host.to_string(),
                    port: target_port(port),
                }
                .address(),
                (None, None) => continue,
            };
            let key = ServicePortName::new(
                &namespace,
                &name,
                &port_name,
                port.protocol.as_deref(),
            );
            let info = ServiceInfo {
                address,
                port: number,
                port_name,
                protocol: key.protocol.clone(),
                type_,
            };
            ports.insert(key, info);
        }
        ports
    }

    fn cast(obj: &Object) -> Option<&k8s::Service> {
        obj.as_service().map(|svc| &**svc)
    }
}

fn first_ipv4(spec: &k8s::ServiceSpec) -> Option<Ipv4Addr> {
    spec.cluster_ips
        .iter()
        .flatten()
        .chain(spec.cluster_ip.iter())
        .find_map(|ip| ip.parse::<Ipv4Addr>().ok())
}

fn target_port(port: &k8s::ServicePort) -> u16 {
    use k8s::IntOrString;

    let target = match &port.target_port {
        Some(IntOrString::Int(n)) => Some(*n),
        Some(IntOrString::String(s)) => s.parse().ok(),
        None => None,
    };
    target
        .and_then(|n| u16::try_from(n).ok())
        .filter(|n| *n > 0)
        .or_else(|| u16::try_from(port.port).ok())
        .unwrap_or_default()
}

fn is_valid_external_name(host: &str) -> bool {
    let host = host.trim_end_matches('.');
    if host.eq_ignore_ascii_case("localhost") {
        return false;
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return !ip.is_loopback();
    }
    is_dns1123_subdomain(host)
}
