use serde::{Deserialize, Serialize};

/// Discovery resource kinds. `Resource::kind` maps every resource onto exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Listener,
    Route,
    ScopedRoute,
    Cluster,
    Endpoint,
    Secret,
    Runtime,
    ExtensionConfig,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Listener,
        ResourceKind::Route,
        ResourceKind::ScopedRoute,
        ResourceKind::Cluster,
        ResourceKind::Endpoint,
        ResourceKind::Secret,
        ResourceKind::Runtime,
        ResourceKind::ExtensionConfig,
    ];

    pub fn type_url(self) -> &'static str {
        match self {
            ResourceKind::Listener => "type.googleapis.com/envoy.config.listener.v3.Listener",
            ResourceKind::Route => "type.googleapis.com/envoy.config.route.v3.RouteConfiguration",
            ResourceKind::ScopedRoute => "type.googleapis.com/envoy.config.route.v3.ScopedRouteConfiguration",
            ResourceKind::Cluster => "type.googleapis.com/envoy.config.cluster.v3.Cluster",
            ResourceKind::Endpoint => "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment",
            ResourceKind::Secret => "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret",
            ResourceKind::Runtime => "type.googleapis.com/envoy.service.runtime.v3.Runtime",
            ResourceKind::ExtensionConfig => "type.googleapis.com/envoy.config.core.v3.TypedExtensionConfig",
        }
    }

    pub fn from_type_url(url: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.type_url() == url)
    }

    /// The single authoritative kind -> partition mapping. Endpoints scale and churn
    /// independently, everything else is served together with listeners.
    pub fn partition(self) -> Partition {
        match self {
            ResourceKind::Endpoint => Partition::EndpointOnly,
            ResourceKind::Listener
            | ResourceKind::Route
            | ResourceKind::ScopedRoute
            | ResourceKind::Cluster
            | ResourceKind::Secret
            | ResourceKind::Runtime
            | ResourceKind::ExtensionConfig => Partition::Mixed,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::Listener => "LDS",
            ResourceKind::Route => "RDS",
            ResourceKind::ScopedRoute => "SRDS",
            ResourceKind::Cluster => "CDS",
            ResourceKind::Endpoint => "EDS",
            ResourceKind::Secret => "SDS",
            ResourceKind::Runtime => "RTDS",
            ResourceKind::ExtensionConfig => "ECDS",
        };
        f.write_str(s)
    }
}

/// Independently versioned slice of the snapshot store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Partition {
    Mixed,
    EndpointOnly,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Mixed, Partition::EndpointOnly];

    pub fn label(self) -> &'static str {
        match self {
            Partition::Mixed => "LDS/RDS/CDS",
            Partition::EndpointOnly => "EDS",
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
