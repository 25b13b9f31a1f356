//! kxds kubehub: list/watch reflectors for Endpoints and Services, and the
//! orchestrator that supervises them.

#![forbid(unsafe_code)]

pub mod orchestrator;
pub mod reflector;
pub mod source;

pub use orchestrator::{start, Reflect};
pub use reflector::{
    EndpointsClass, Reflector, ReflectorConfig, ReflectorError, ReflectorPhase, ResourceClass, ServicesClass,
    DEFAULT_RESYNC_PERIOD,
};
pub use source::{Change, ChangeStream, KubeListWatch, ListWatch, Listing, WatchError, DEFAULT_WATCH_TIMEOUT_SECS};

use k8s_openapi::api::core::v1::{Endpoints, Service};

pub type EndpointsReflector<W = KubeListWatch<Endpoints>> = Reflector<EndpointsClass, W>;
pub type ServicesReflector<W = KubeListWatch<Service>> = Reflector<ServicesClass, W>;
