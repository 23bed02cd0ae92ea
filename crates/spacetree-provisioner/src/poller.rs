use std::ops::ControlFlow;
use std::time::Duration;

use spacetree::topology::ResourceStatus;

use tracing::{error, info, warn};

use uuid::Uuid;

use crate::service::TopologyService;

/// Calls `check` every `interval` until it breaks, returning the break value.
///
/// There is no backoff and no ceiling: callers bound the wait when needed.
pub async fn poll<T, F, Fut>(interval: Duration, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ControlFlow<T>>,
{
    loop {
        if let ControlFlow::Break(value) = check().await {
            return value;
        }
        tokio::time::sleep(interval).await;
    }
}

/// Waits until a resource leaves the provisioning state.
///
/// Returns `true` only when the resource reaches the running state. A failed,
/// cancelled, or missing resource, as well as a failed status request, yields
/// `false`.
pub async fn await_ready<S>(service: &S, id: Uuid, interval: Duration) -> bool
where
    S: TopologyService + ?Sized,
{
    poll(interval, move || async move {
        match service.resource(id).await {
            Ok(Some(resource)) if !resource.status.is_terminal() => {
                info!("Resource {id} is still provisioning");
                ControlFlow::Continue(())
            }
            Ok(Some(resource)) => match resource.status {
                ResourceStatus::Running => ControlFlow::Break(true),
                status => {
                    error!("Resource {id} ended provisioning with status {status}");
                    ControlFlow::Break(false)
                }
            },
            Ok(None) => {
                error!("Resource {id} disappeared while provisioning");
                ControlFlow::Break(false)
            }
            Err(e) => {
                error!("Failed to retrieve the status of resource {id}: {e}");
                ControlFlow::Break(false)
            }
        }
    })
    .await
}

/// Waits until a deleted resource is gone.
///
/// Returns `false` when the status request fails.
pub async fn await_removed<S>(service: &S, id: Uuid, interval: Duration) -> bool
where
    S: TopologyService + ?Sized,
{
    poll(interval, move || async move {
        match service.resource(id).await {
            Ok(Some(resource)) => {
                info!("Resource {id} is still present with status {}", resource.status);
                ControlFlow::Continue(())
            }
            Ok(None) => ControlFlow::Break(true),
            Err(e) => {
                warn!("Failed to retrieve the status of resource {id}: {e}");
                ControlFlow::Break(false)
            }
        }
    })
    .await
}
