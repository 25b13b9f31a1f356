//! Runs the reflectors as one group: the first failure stops all of them.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::reflector::{Reflector, ReflectorError, ResourceClass};
use crate::source::ListWatch;

/// Object-safe view of a reflector so classes of different object types can share a group.
#[async_trait::async_trait]
pub trait Reflect: Send + Sync {
    fn name(&self) -> &'static str;
    async fn watch(&self, cancel: CancellationToken) -> Result<(), ReflectorError>;
}

#[async_trait::async_trait]
impl<C, W> Reflect for Reflector<C, W>
where
    C: ResourceClass,
    W: ListWatch<C::Object> + 'static,
{
    fn name(&self) -> &'static str {
        Reflector::name(self)
    }

    async fn watch(&self, cancel: CancellationToken) -> Result<(), ReflectorError> {
        self.run(cancel).await
    }
}

/// Start every reflector concurrently and wait for all of them to exit.
///
/// Cancelling `cancel` stops the group and yields `Ok(())`. The first reflector to
/// fail cancels its siblings; its error is returned once they have all returned.
pub async fn start(cancel: CancellationToken, reflectors: Vec<Arc<dyn Reflect>>) -> Result<(), ReflectorError> {
    let group = cancel.child_token();
    let mut tasks = JoinSet::new();
    for r in reflectors {
        let token = group.clone();
        info!(reflector = r.name(), "spawning reflector");
        tasks.spawn(async move { r.watch(token).await });
    }

    let mut first: Option<ReflectorError> = None;
    while let Some(joined) = tasks.join_next().await {
        let result = match joined {
            Ok(res) => res,
            Err(e) => Err(ReflectorError::Panicked(e.to_string())),
        };
        if let Err(e) = result {
            if first.is_none() {
                error!(error = %e, "reflector group failed; stopping the others");
                group.cancel();
                first = Some(e);
            }
        }
    }
    first.map_or(Ok(()), Err)
}
