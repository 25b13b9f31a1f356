//! xDS v3 resource vocabulary produced and served by kxds.
//!
//! Only the fields the translators populate (plus enough structure to classify the
//! kinds this control plane never produces) are modelled. Collections are `Vec` or
//! `BTreeMap` only, so serializing a value always yields the same bytes no matter in
//! which order its fields were filled in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::kind::ResourceKind;

/// Well-known name of the terminal HTTP router filter.
pub const ROUTER_FILTER: &str = "envoy.filters.http.router";

// ---- core ----

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketAddress {
    pub protocol: Protocol,
    pub address: String,
    pub port_value: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub socket_address: SocketAddress,
}

impl Address {
    pub fn tcp(ip: impl Into<String>, port: u32) -> Self {
        Self {
            socket_address: SocketAddress { protocol: Protocol::Tcp, address: ip.into(), port_value: port },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Locality {
    pub region: String,
    pub zone: String,
    pub sub_zone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedConfigSource {}

/// Where a dynamic resource is fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigSource {
    /// Over the same aggregated stream the client already holds.
    Ads(AggregatedConfigSource),
    /// From a file watched by the proxy.
    Path(String),
}

impl ConfigSource {
    pub fn ads() -> Self {
        ConfigSource::Ads(AggregatedConfigSource {})
    }
}

// ---- endpoint ----

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterLoadAssignment {
    pub cluster_name: String,
    pub endpoints: Vec<LocalityLbEndpoints>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalityLbEndpoints {
    pub locality: Locality,
    pub lb_endpoints: Vec<LbEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_balancing_weight: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LbEndpoint {
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub address: Address,
    pub hostname: String,
}

// ---- route ----

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfiguration {
    pub name: String,
    pub virtual_hosts: Vec<VirtualHost>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHost {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<Route>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub name: String,
    #[serde(rename = "match")]
    pub route_match: RouteMatch,
    pub route: RouteAction,
}

/// Path prefix match; the empty prefix matches every path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMatch {
    pub prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteAction {
    pub cluster: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopedRouteConfiguration {
    pub name: String,
    pub route_configuration_name: String,
    pub key: Vec<String>,
}

// ---- listener ----

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_listener: Option<ApiListener>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiListener {
    pub api_listener: HttpConnectionManager,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConnectionManager {
    pub http_filters: Vec<HttpFilter>,
    pub route_specifier: RouteSpecifier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RouteSpecifier {
    /// Route table carried inline in the listener.
    RouteConfig(RouteConfiguration),
    /// Route table fetched by name over route discovery.
    Rds(Rds),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rds {
    pub config_source: ConfigSource,
    pub route_config_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpFilter {
    pub name: String,
    pub typed_config: HttpFilterConfig,
}

impl HttpFilter {
    pub fn router() -> Self {
        Self { name: ROUTER_FILTER.to_string(), typed_config: HttpFilterConfig::Router(Router {}) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum HttpFilterConfig {
    #[serde(rename = "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router")]
    Router(Router),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Router {}

// ---- cluster ----

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryType {
    #[default]
    Static,
    StrictDns,
    LogicalDns,
    Eds,
    OriginalDst,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LbPolicy {
    #[default]
    RoundRobin,
    LeastRequest,
    RingHash,
    Random,
    Maglev,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    #[serde(rename = "type")]
    pub discovery_type: DiscoveryType,
    pub lb_policy: LbPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eds_cluster_config: Option<EdsClusterConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdsClusterConfig {
    pub eds_config: ConfigSource,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,
}

// ---- kinds kxds never produces ----

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secret {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Runtime {
    pub name: String,
    pub layer: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedExtensionConfig {
    pub name: String,
    pub type_url: String,
}

// ---- resource ----

/// One discovery resource. The serde tag is the xDS type URL, which keeps the JSON
/// rendering close to what protojson produces for an `Any`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "@type")]
pub enum Resource {
    #[serde(rename = "type.googleapis.com/envoy.config.listener.v3.Listener")]
    Listener(Listener),
    #[serde(rename = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration")]
    RouteConfiguration(RouteConfiguration),
    #[serde(rename = "type.googleapis.com/envoy.config.route.v3.ScopedRouteConfiguration")]
    ScopedRouteConfiguration(ScopedRouteConfiguration),
    #[serde(rename = "type.googleapis.com/envoy.config.cluster.v3.Cluster")]
    Cluster(Cluster),
    #[serde(rename = "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment")]
    ClusterLoadAssignment(ClusterLoadAssignment),
    #[serde(rename = "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret")]
    Secret(Secret),
    #[serde(rename = "type.googleapis.com/envoy.service.runtime.v3.Runtime")]
    Runtime(Runtime),
    #[serde(rename = "type.googleapis.com/envoy.config.core.v3.TypedExtensionConfig")]
    ExtensionConfig(TypedExtensionConfig),
}

impl Resource {
    /// Logical name used for identity, ordering and lookup.
    pub fn name(&self) -> &str {
        match self {
            Resource::Listener(r) => &r.name,
            Resource::RouteConfiguration(r) => &r.name,
            Resource::ScopedRouteConfiguration(r) => &r.name,
            Resource::Cluster(r) => &r.name,
            Resource::ClusterLoadAssignment(r) => &r.cluster_name,
            Resource::Secret(r) => &r.name,
            Resource::Runtime(r) => &r.name,
            Resource::ExtensionConfig(r) => &r.name,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Listener(_) => ResourceKind::Listener,
            Resource::RouteConfiguration(_) => ResourceKind::Route,
            Resource::ScopedRouteConfiguration(_) => ResourceKind::ScopedRoute,
            Resource::Cluster(_) => ResourceKind::Cluster,
            Resource::ClusterLoadAssignment(_) => ResourceKind::Endpoint,
            Resource::Secret(_) => ResourceKind::Secret,
            Resource::Runtime(_) => ResourceKind::Runtime,
            Resource::ExtensionConfig(_) => ResourceKind::ExtensionConfig,
        }
    }
}

macro_rules! impl_into_resource {
    ($($ty:ident => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Resource {
            fn from(v: $ty) -> Self { Resource::$variant(v) }
        })*
    };
}

impl_into_resource!(
    Listener => Listener,
    RouteConfiguration => RouteConfiguration,
    ScopedRouteConfiguration => ScopedRouteConfiguration,
    Cluster => Cluster,
    ClusterLoadAssignment => ClusterLoadAssignment,
    Secret => Secret,
    Runtime => Runtime,
    TypedExtensionConfig => ExtensionConfig,
);
