use crate::{
    service_port::{Endpoint, ServicePortName},
    tracker::{ApplyOrder, CanonicalMap, Projection},
};
use mesh_controller_core::Object;
use mesh_controller_k8s_api::{self as k8s, ResourceExt};
use std::{collections::BTreeMap, net::Ipv4Addr};
use tracing::{trace, warn};

pub type EndpointsMap = CanonicalMap<ServicePortName, Vec<Endpoint>>;

/// Projects the IPv4 addresses of an `Endpoints` object onto its ports.
#[derive(Copy, Clone, Debug, Default)]
pub struct EndpointsProjection;

impl Projection for EndpointsProjection {
    type Resource = k8s::Endpoints;
    type Key = ServicePortName;
    type Value = Vec<Endpoint>;

    const ORDER: ApplyOrder = ApplyOrder::UnmergeThenMerge;

    fn project(&self, endpoints: &k8s::Endpoints) -> BTreeMap<ServicePortName, Vec<Endpoint>> {
        let namespace = endpoints.namespace().unwrap_or_default();
        let name = endpoints.name_any();

        let mut map = BTreeMap::<_, Vec<_>>::new();
        for subset in endpoints.subsets.iter().flatten() {
            for port in subset.ports.iter().flatten() {
                let port_name = port.name.as_deref().unwrap_or_default();
                let number = match u16::try_from(port.port) {
                    Ok(n) if n > 0 => n,
                    _ => {
                        warn!(%namespace, %name, port = port_name, "Ignoring invalid endpoint port");
                        continue;
                    }
                };
                let key = ServicePortName::new(&namespace, &name, port_name, port.protocol.as_deref());

                for addr in subset.addresses.iter().flatten() {
                    if addr.ip.is_empty() {
                        warn!(%namespace, %name, port = port_name, "Ignoring endpoint with empty address");
                        continue;
                    }
                    let Ok(ip) = addr.ip.parse::<Ipv4Addr>() else {
                        trace!(ip = %addr.ip, "Skipping non-IPv4 endpoint");
                        continue;
                    };
                    map.entry(key.clone()).or_default().push(Endpoint::Ip {
                        ip,
                        port: number,
                        node_name: addr.node_name.clone().unwrap_or_default(),
                        host_name: addr.hostname.clone().unwrap_or_default(),
                    });
                }
            }
        }
        map
    }

    fn cast(obj: &Object) -> Option<&k8s::Endpoints> {
        obj.as_endpoints().map(|ep| &**ep)
    }
}
