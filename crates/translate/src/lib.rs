//! kxds translate: pure mapping from Kubernetes discovery objects to xDS resources.
//! No state and no I/O; called once per reflector batch.

#![forbid(unsafe_code)]

mod endpoints;
mod services;

pub use endpoints::{endpoints_cluster_name, endpoints_to_resources};
pub use services::services_to_resources;
