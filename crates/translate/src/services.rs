use k8s_openapi::api::core::v1::Service;
use kxds_core::xds::{
    ApiListener, Cluster, ConfigSource, DiscoveryType, EdsClusterConfig, HttpConnectionManager, HttpFilter, LbPolicy,
    Listener, Route, RouteAction, RouteConfiguration, RouteMatch, RouteSpecifier, VirtualHost,
};
use kxds_core::Resource;

/// Listener, RouteConfiguration and Cluster for every (service, port), in that order.
///
/// The cluster is EDS over ADS and named `<name>.<namespace>:<port name>`, which is
/// the name the endpoints translation gives the matching load assignment.
pub fn services_to_resources<'a>(services: impl IntoIterator<Item = &'a Service>) -> Vec<Resource> {
    let mut out = Vec::new();
    for svc in services {
        let name = svc.metadata.name.as_deref().unwrap_or_default();
        let namespace = svc.metadata.namespace.as_deref().unwrap_or_default();
        let host = format!("{}.{}", name, namespace);
        let ports = svc.spec.as_ref().and_then(|s| s.ports.as_ref());
        for port in ports.into_iter().flatten() {
            let names = HostNames::new(&host, port.name.as_deref().unwrap_or_default(), port.port);
            let route = route_configuration(&names, name);
            out.push(listener(&names, route.clone()).into());
            out.push(route.into());
            out.push(eds_cluster(&names).into());
        }
    }
    out
}

struct HostNames<'a> {
    host: &'a str,
    with_port_name: String,
    with_port_number: String,
}

impl<'a> HostNames<'a> {
    fn new(host: &'a str, port_name: &str, port_number: i32) -> Self {
        Self {
            host,
            with_port_name: format!("{}:{}", host, port_name),
            with_port_number: format!("{}:{}", host, port_number),
        }
    }
}

fn route_configuration(names: &HostNames<'_>, service_name: &str) -> RouteConfiguration {
    RouteConfiguration {
        name: names.with_port_number.clone(),
        virtual_hosts: vec![VirtualHost {
            name: names.with_port_name.clone(),
            domains: vec![
                names.host.to_string(),
                names.with_port_name.clone(),
                names.with_port_number.clone(),
                service_name.to_string(),
            ],
            routes: vec![Route {
                name: "default".to_string(),
                route_match: RouteMatch { prefix: String::new() },
                route: RouteAction { cluster: names.with_port_name.clone() },
            }],
        }],
    }
}

// Routes are carried inline; this listener never asks for route discovery.
fn listener(names: &HostNames<'_>, route: RouteConfiguration) -> Listener {
    Listener {
        name: names.with_port_number.clone(),
        api_listener: Some(ApiListener {
            api_listener: HttpConnectionManager {
                http_filters: vec![HttpFilter::router()],
                route_specifier: RouteSpecifier::RouteConfig(route),
            },
        }),
    }
}

fn eds_cluster(names: &HostNames<'_>) -> Cluster {
    Cluster {
        name: names.with_port_name.clone(),
        discovery_type: DiscoveryType::Eds,
        lb_policy: LbPolicy::RoundRobin,
        eds_cluster_config: Some(EdsClusterConfig { eds_config: ConfigSource::ads(), service_name: String::new() }),
    }
}
