use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};

use spacetree::description::{ProvisioningDescription, SpaceDescription};

use tokio_util::sync::CancellationToken;

use tracing::{error, info, warn};

use uuid::Uuid;

use crate::config::ProvisionerConfig;
use crate::poller::await_removed;
use crate::resolver::Resolver;
use crate::service::TopologyService;

/// How the wait for resource deletion ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionWait {
    /// Every deleted resource is gone.
    Confirmed,
    /// Some deletions could not be confirmed.
    Unconfirmed,
    /// The ceiling expired before every deletion was confirmed.
    TimedOut,
    /// The wait was cancelled.
    Cancelled,
}

/// The outcome of a removal run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalReport {
    /// Number of devices removed.
    pub removed_devices: usize,
    /// Number of resources removed.
    pub removed_resources: usize,
    /// How the wait for resource deletion ended.
    pub deletion_wait: DeletionWait,
    /// Names of the spaces removed, root spaces along with their
    /// descendants.
    pub removed_spaces: Vec<String>,
    /// Number of endpoints removed.
    pub removed_endpoints: usize,
}

// A space of the description found in the topology.
struct FoundSpace<'d> {
    description: &'d SpaceDescription,
    id: Uuid,
    children: Vec<FoundSpace<'d>>,
}

impl FoundSpace<'_> {
    fn names(&self, names: &mut Vec<String>) {
        names.push(self.description.name.clone());
        for child in &self.children {
            child.names(names);
        }
    }
}

/// Removes the remote topology described by a [`ProvisioningDescription`].
///
/// Devices are removed first, then resources, then root spaces, whose
/// deletion also removes their descendants.
pub struct Remover<'a, S: ?Sized> {
    service: &'a S,
    config: &'a ProvisionerConfig,
    cancellation: CancellationToken,
    endpoints: bool,
}

impl<'a, S: TopologyService + ?Sized> Remover<'a, S> {
    /// Creates a [`Remover`].
    #[must_use]
    #[inline]
    pub fn new(service: &'a S, config: &'a ProvisionerConfig) -> Self {
        Self {
            service,
            config,
            cancellation: CancellationToken::new(),
            endpoints: false,
        }
    }

    /// Sets the token cancelling the wait for resource deletion.
    #[must_use]
    #[inline]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Also removes every endpoint.
    #[must_use]
    #[inline]
    pub const fn endpoints(mut self, endpoints: bool) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Removes the topology of a description.
    ///
    /// A failed remote call is logged and skips only the entities depending
    /// on it. A resource deletion which cannot be confirmed within the
    /// configured ceiling is reported but does not stop the removal.
    pub async fn run(&self, description: &ProvisioningDescription) -> RemovalReport {
        let mut roots = Vec::new();
        for space in &description.spaces {
            if let Some(found) = self.find(space, None).await {
                roots.push(found);
            }
        }

        let removed_devices = self.remove_devices(description).await;
        let (removed_resources, deletion_wait) = self.remove_resources(&roots).await;

        let mut removed_spaces = Vec::new();
        for root in &roots {
            match self.service.delete_space(root.id).await {
                Ok(()) => {
                    let mut names = Vec::new();
                    root.names(&mut names);
                    for name in &names {
                        info!("Removed space `{name}`");
                    }
                    removed_spaces.extend(names);
                }
                Err(e) => error!("Failed to remove space `{}`: {e}", root.description.name),
            }
        }

        let removed_endpoints = if self.endpoints {
            self.remove_endpoints().await
        } else {
            0
        };

        RemovalReport {
            removed_devices,
            removed_resources,
            deletion_wait,
            removed_spaces,
            removed_endpoints,
        }
    }

    // A space which cannot be looked up is left out along with its
    // descendants.
    fn find<'b, 'd: 'b>(
        &'b self,
        description: &'d SpaceDescription,
        parent_id: Option<Uuid>,
    ) -> BoxFuture<'b, Option<FoundSpace<'d>>> {
        async move {
            let id = match Resolver::new(self.service)
                .space(&description.name, parent_id)
                .await
            {
                Ok(Some(space)) => space.id?,
                Ok(None) => {
                    warn!("Space `{}` does not exist", description.name);
                    return None;
                }
                Err(e) => {
                    error!("Failed to look up space `{}`: {e}", description.name);
                    return None;
                }
            };

            let mut children = Vec::new();
            for child in &description.spaces {
                if let Some(found) = self.find(child, Some(id)).await {
                    children.push(found);
                }
            }

            Some(FoundSpace {
                description,
                id,
                children,
            })
        }
        .boxed()
    }

    async fn remove_devices(&self, description: &ProvisioningDescription) -> usize {
        let hardware_ids: Vec<&str> = description
            .devices()
            .into_iter()
            .map(|device| device.hardware_id.as_str())
            .collect();
        if hardware_ids.is_empty() {
            return 0;
        }

        let found = match Resolver::new(self.service)
            .devices(&hardware_ids, self.config.lookup_group_size)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                error!("Failed to look up devices: {e}");
                return 0;
            }
        };

        let mut removed = 0;
        for device in found.values() {
            let Some(id) = device.id else {
                continue;
            };
            match self.service.delete_device(id).await {
                Ok(()) => {
                    info!("Removed device `{}`", device.hardware_id);
                    removed += 1;
                }
                Err(e) => error!("Failed to remove device `{}`: {e}", device.hardware_id),
            }
        }
        removed
    }

    async fn remove_resources(&self, roots: &[FoundSpace<'_>]) -> (usize, DeletionWait) {
        let mut deleted = Vec::new();
        for root in roots {
            let resources = match self.service.resources(root.id).await {
                Ok(resources) => resources,
                Err(e) => {
                    error!(
                        "Failed to list the resources of space `{}`: {e}",
                        root.description.name
                    );
                    continue;
                }
            };
            for resource in resources {
                let Some(id) = resource.id else {
                    continue;
                };
                match self.service.delete_resource(id).await {
                    Ok(()) => {
                        info!("Removing resource {id} of type `{}`", resource.kind);
                        deleted.push(id);
                    }
                    Err(e) => error!("Failed to remove resource {id}: {e}"),
                }
            }
        }

        if deleted.is_empty() {
            return (0, DeletionWait::Confirmed);
        }

        info!("Polling until all resources are removed");
        let wait = self.await_deletions(&deleted).await;
        match wait {
            DeletionWait::Confirmed => info!("All resources are removed"),
            DeletionWait::Unconfirmed => warn!("Could not verify the deletion of some resources"),
            DeletionWait::TimedOut => warn!(
                "Could not verify the deletion of resources within {:?}",
                self.config.removal_timeout
            ),
            DeletionWait::Cancelled => warn!("Stopped waiting for the deletion of resources"),
        }

        (deleted.len(), wait)
    }

    async fn await_deletions(&self, ids: &[Uuid]) -> DeletionWait {
        let interval = self.config.resource_poll_interval;
        let polls = ids.iter().map(|id| await_removed(self.service, *id, interval));

        tokio::select! {
            () = self.cancellation.cancelled() => DeletionWait::Cancelled,
            () = tokio::time::sleep(self.config.removal_timeout) => DeletionWait::TimedOut,
            removed = join_all(polls) => {
                if removed.iter().all(|removed| *removed) {
                    DeletionWait::Confirmed
                } else {
                    DeletionWait::Unconfirmed
                }
            }
        }
    }

    async fn remove_endpoints(&self) -> usize {
        let endpoints = match self.service.endpoints().await {
            Ok(endpoints) => endpoints,
            Err(e) => {
                error!("Failed to list endpoints: {e}");
                return 0;
            }
        };

        let mut removed = 0;
        for endpoint in endpoints {
            let Some(id) = endpoint.id else {
                continue;
            };
            match self.service.delete_endpoint(id).await {
                Ok(()) => {
                    info!("Removed endpoint {id} of type `{}`", endpoint.kind);
                    removed += 1;
                }
                Err(e) => error!("Failed to remove endpoint {id}: {e}"),
            }
        }
        removed
    }
}
