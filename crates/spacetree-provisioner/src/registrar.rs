use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::Path;

use spacetree::description::ProvisioningDescription;
use spacetree::registry::{ExportImportDevice, ImportMode, JobStatus, parse_export};

use tracing::{error, info, warn};

use crate::config::ProvisionerConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::poller::poll;
use crate::service::DeviceRegistry;

/// Selects the identities to register for a description.
///
/// By default one identity is registered per device-id prefix. With
/// `all_devices`, every declared hardware identifier is registered instead.
#[must_use]
pub fn registry_device_ids(description: &ProvisioningDescription, all_devices: bool) -> Vec<String> {
    if all_devices {
        description
            .devices()
            .into_iter()
            .map(|device| device.hardware_id.clone())
            .collect()
    } else {
        description.devices_by_prefix().into_keys().collect()
    }
}

/// Registers and removes device identities in bulk.
pub struct Registrar<'a, R: ?Sized> {
    registry: &'a R,
    config: &'a ProvisionerConfig,
}

impl<'a, R: DeviceRegistry + ?Sized> Registrar<'a, R> {
    /// Creates a [`Registrar`].
    #[must_use]
    #[inline]
    pub const fn new(registry: &'a R, config: &'a ProvisionerConfig) -> Self {
        Self { registry, config }
    }

    async fn apply(&self, items: &[ExportImportDevice]) -> Result<()> {
        for batch in items.chunks(self.config.batch_size) {
            info!("Submitting a bulk registry operation for {} devices", batch.len());
            let result = self.registry.bulk(batch).await?;
            if result.has_errors() {
                let failures = result
                    .errors
                    .iter()
                    .map(|e| {
                        error!("Device `{}` failed: {} {}", e.device_id, e.error_code, e.error_status);
                        e.device_id.as_str()
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(Error::new(
                    ErrorKind::BulkOperation,
                    format!("The bulk registry operation failed for devices: {failures}"),
                ));
            }
        }
        Ok(())
    }

    async fn export(&self) -> Result<String> {
        let job = self.registry.start_export().await?;
        info!("Started export job {}", job.job_id);

        let registry = self.registry;
        let job_id = job.job_id.as_str();
        let job = poll(self.config.export_poll_interval, move || async move {
            match registry.job(job_id).await {
                Ok(job) if job.status.is_terminal() => ControlFlow::Break(Ok(job)),
                Ok(job) => {
                    info!("Export job {job_id} is {:?}", job.status);
                    ControlFlow::Continue(())
                }
                Err(e) => ControlFlow::Break(Err(e)),
            }
        })
        .await?;

        if job.status != JobStatus::Completed {
            return Err(Error::new(
                ErrorKind::Job,
                format!(
                    "Export job {} ended as {:?}: {}",
                    job.job_id,
                    job.status,
                    job.failure_reason.unwrap_or_default()
                ),
            ));
        }

        self.registry.download_export().await
    }

    /// Registers the given identities and returns their connection strings.
    ///
    /// Identities are created in batches. Once all batches succeed, an export
    /// job retrieves the generated keys. The raw export is written to
    /// `artifact`, where [`Self::remove_devices`] later finds the identity
    /// versions.
    ///
    /// # Errors
    ///
    /// - A batch reports a failure for any device; earlier batches are kept
    /// - The export job fails or its output is malformed
    /// - The artifact cannot be written
    pub async fn create_devices(
        &self,
        ids: &[String],
        artifact: &Path,
    ) -> Result<BTreeMap<String, String>> {
        let items: Vec<_> = ids.iter().map(ExportImportDevice::create).collect();
        self.apply(&items).await?;
        info!("Registered {} devices", ids.len());

        let contents = self.export().await?;
        tokio::fs::write(artifact, &contents).await?;
        info!("Wrote the registry export to `{}`", artifact.display());

        let host_name = self.registry.host_name();
        let mut connections = BTreeMap::new();
        for device in parse_export(&contents)? {
            if !ids.contains(&device.id) {
                continue;
            }
            match device.connection_string(host_name) {
                Some(connection) => {
                    let _ = connections.insert(device.id, connection);
                }
                None => warn!("Device `{}` has no symmetric key", device.id),
            }
        }

        Ok(connections)
    }

    /// Removes the given identities and returns how many were removed.
    ///
    /// When `artifact` holds the export of a previous registration, the
    /// identities it lists are removed in batches if their version did not
    /// change. Other identities are removed one by one, and a missing
    /// identity counts as removed.
    ///
    /// # Errors
    ///
    /// - A batch reports a failure for any device
    /// - The artifact is malformed
    /// - A single removal fails for a reason other than a missing identity
    pub async fn remove_devices(&self, ids: &[String], artifact: &Path) -> Result<usize> {
        let exported = match tokio::fs::read_to_string(artifact).await {
            Ok(contents) => parse_export(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No registry export at `{}`", artifact.display());
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };

        let mut items = Vec::new();
        let mut singles = Vec::new();
        for id in ids {
            match exported.iter().find(|device| &device.id == id) {
                Some(device) => items.push(match &device.etag {
                    Some(etag) => ExportImportDevice::delete_if_match(id, etag),
                    None => ExportImportDevice {
                        id: id.clone(),
                        etag: None,
                        import_mode: ImportMode::Delete,
                    },
                }),
                None => singles.push(id),
            }
        }

        self.apply(&items).await?;

        for id in &singles {
            match self.registry.delete_device(id).await {
                Ok(()) => info!("Removed device `{id}`"),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    info!("Device `{id}` was already removed");
                }
                Err(e) => return Err(e),
            }
        }

        info!("Removed {} devices", ids.len());
        Ok(ids.len())
    }
}
