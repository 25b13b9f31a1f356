use k8s_openapi::api::core::v1::{EndpointAddress, EndpointPort, Endpoints};
use kxds_core::xds::{Address, ClusterLoadAssignment, Endpoint, LbEndpoint, Locality, LocalityLbEndpoints};
use kxds_core::Resource;

/// One ClusterLoadAssignment per (endpoints, subset, port).
///
/// Ready addresses are emitted sorted by IP so two listings that differ only in
/// address order produce identical resources.
pub fn endpoints_to_resources<'a>(endpoints: impl IntoIterator<Item = &'a Endpoints>) -> Vec<Resource> {
    let mut out = Vec::new();
    for ep in endpoints {
        let name = ep.metadata.name.as_deref().unwrap_or_default();
        let namespace = ep.metadata.namespace.as_deref().unwrap_or_default();
        for subset in ep.subsets.iter().flatten() {
            let mut addresses: Vec<&EndpointAddress> = subset.addresses.iter().flatten().collect();
            addresses.sort_by(|a, b| a.ip.cmp(&b.ip));
            for port in subset.ports.iter().flatten() {
                out.push(load_assignment(name, namespace, port, &addresses).into());
            }
        }
    }
    out
}

/// `<name>.<namespace>:<port name or number>`, matching the service cluster names.
pub fn endpoints_cluster_name(name: &str, namespace: &str, port: &EndpointPort) -> String {
    match port.name.as_deref() {
        Some(port_name) if !port_name.is_empty() => format!("{}.{}:{}", name, namespace, port_name),
        _ => format!("{}.{}:{}", name, namespace, port.port),
    }
}

fn load_assignment(name: &str, namespace: &str, port: &EndpointPort, addresses: &[&EndpointAddress]) -> ClusterLoadAssignment {
    let port_value = u32::try_from(port.port).unwrap_or_default();
    let lb_endpoints = addresses
        .iter()
        .map(|addr| LbEndpoint {
            endpoint: Endpoint { address: Address::tcp(addr.ip.clone(), port_value), hostname: hostname(addr) },
        })
        .collect();
    ClusterLoadAssignment {
        cluster_name: endpoints_cluster_name(name, namespace, port),
        endpoints: vec![LocalityLbEndpoints {
            locality: Locality::default(),
            lb_endpoints,
            load_balancing_weight: Some(1),
        }],
    }
}

// hostname, then targetRef name.namespace, then node name
fn hostname(addr: &EndpointAddress) -> String {
    if let Some(h) = addr.hostname.as_deref().filter(|h| !h.is_empty()) {
        return h.to_string();
    }
    if let Some(target) = &addr.target_ref {
        return format!(
            "{}.{}",
            target.name.as_deref().unwrap_or_default(),
            target.namespace.as_deref().unwrap_or_default()
        );
    }
    addr.node_name.clone().unwrap_or_default()
}
