use serde::{Deserialize, Serialize};

/// Maximum number of device identities in a single bulk registry operation.
pub const MAX_BULK_DEVICES: usize = 100;

/// The operation applied to a device identity in a bulk registry request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ImportMode {
    /// Creates the identity, failing if it already exists.
    Create,
    /// Deletes the identity regardless of its current version.
    Delete,
    /// Deletes the identity only if its version matches the given entity tag.
    #[serde(rename = "deleteIfMatchETag")]
    DeleteIfMatchETag,
}

/// One item of a bulk registry request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportImportDevice {
    /// Device identifier.
    pub id: String,
    /// Entity tag used for optimistic concurrency.
    #[serde(rename = "eTag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Operation to apply.
    pub import_mode: ImportMode,
}

impl ExportImportDevice {
    /// Creates an item which registers a new identity.
    #[must_use]
    pub fn create(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            etag: None,
            import_mode: ImportMode::Create,
        }
    }

    /// Creates an item which removes an identity if its entity tag still
    /// matches.
    #[must_use]
    pub fn delete_if_match(id: impl Into<String>, etag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            etag: Some(etag.into()),
            import_mode: ImportMode::DeleteIfMatchETag,
        }
    }
}

/// A per-item failure reported by a bulk registry operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistryOperationError {
    /// Device identifier.
    pub device_id: String,
    /// Error code.
    #[serde(default)]
    pub error_code: String,
    /// Error details.
    #[serde(default)]
    pub error_status: String,
}

/// The outcome of a bulk registry operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRegistryResult {
    /// Whether every item succeeded.
    pub is_successful: bool,
    /// Per-item failures.
    #[serde(default)]
    pub errors: Vec<DeviceRegistryOperationError>,
}

impl BulkRegistryResult {
    /// A result without failures.
    #[must_use]
    pub const fn success() -> Self {
        Self {
            is_successful: true,
            errors: Vec::new(),
        }
    }

    /// Whether the operation reported any failure.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.is_successful || !self.errors.is_empty()
    }
}

/// Status of an asynchronous registry job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// The job is waiting to run.
    Enqueued,
    /// The job is waiting to run.
    Queued,
    /// The job is scheduled.
    Scheduled,
    /// The job is running.
    Running,
    /// The job completed successfully.
    Completed,
    /// The job failed.
    Failed,
    /// The job was cancelled.
    Cancelled,
    /// The status could not be determined.
    #[default]
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Whether the job reached a final state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// An asynchronous registry job, such as a bulk export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryJob {
    /// Job identifier.
    pub job_id: String,
    /// Job status.
    #[serde(default)]
    pub status: JobStatus,
    /// Reason of a failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Symmetric keys of a device identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymmetricKey {
    /// Primary key.
    #[serde(default)]
    pub primary_key: Option<String>,
    /// Secondary key.
    #[serde(default)]
    pub secondary_key: Option<String>,
}

/// Authentication data of a device identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    /// Symmetric keys, present for key-based identities.
    #[serde(default)]
    pub symmetric_key: Option<SymmetricKey>,
}

/// A device identity record as written by an export job.
///
/// Export files contain one record per line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedDevice {
    /// Device identifier.
    pub id: String,
    /// Entity tag of the identity.
    #[serde(rename = "eTag", default)]
    pub etag: Option<String>,
    /// Identity status.
    #[serde(default)]
    pub status: Option<String>,
    /// Authentication data.
    #[serde(default)]
    pub authentication: Option<Authentication>,
}

impl ExportedDevice {
    /// Returns the primary symmetric key, if any.
    #[must_use]
    pub fn primary_key(&self) -> Option<&str> {
        self.authentication
            .as_ref()?
            .symmetric_key
            .as_ref()?
            .primary_key
            .as_deref()
    }

    /// Assembles the device connection string for the given registry host.
    #[must_use]
    pub fn connection_string(&self, host_name: &str) -> Option<String> {
        self.primary_key().map(|key| {
            format!(
                "HostName={host_name};DeviceId={};SharedAccessKey={key}",
                self.id
            )
        })
    }
}

/// Parses a line-delimited export, skipping blank lines.
///
/// # Errors
///
/// An error is returned when a non-blank line is not a valid record.
pub fn parse_export(contents: &str) -> serde_json::Result<Vec<ExportedDevice>> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(serde_json::from_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{deserialize, serialize};

    use super::{BulkRegistryResult, ExportImportDevice, JobStatus, RegistryJob, parse_export};

    #[test]
    fn bulk_items_wire_format() {
        assert_eq!(
            serialize(ExportImportDevice::create("Room101")),
            json!({ "id": "Room101", "importMode": "create" })
        );
        assert_eq!(
            serialize(ExportImportDevice::delete_if_match("Room101", "AAAA")),
            json!({ "id": "Room101", "eTag": "AAAA", "importMode": "deleteIfMatchETag" })
        );
    }

    #[test]
    fn bulk_result_errors() {
        let result: BulkRegistryResult = deserialize(json!({
            "isSuccessful": false,
            "errors": [{ "deviceId": "Room101", "errorCode": "DeviceAlreadyExists" }],
            "warnings": [],
        }));

        assert!(result.has_errors());
        assert_eq!(result.errors[0].device_id, "Room101");
        assert!(!BulkRegistryResult::success().has_errors());
    }

    #[test]
    fn job_status() {
        let job: RegistryJob = deserialize(json!({
            "jobId": "job-1",
            "type": "export",
            "status": "completed",
        }));
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.status.is_terminal());

        let job: RegistryJob = deserialize(json!({
            "jobId": "job-1",
            "status": "somethingNew",
        }));
        assert_eq!(job.status, JobStatus::Unknown);
        assert!(!JobStatus::Running.is_terminal());

        let job: RegistryJob = deserialize(json!({ "jobId": "job-2" }));
        assert_eq!(job.status, JobStatus::Unknown);
        assert_eq!(
            serde_json::to_value(JobStatus::Cancelled).unwrap(),
            json!("cancelled")
        );
    }

    #[test]
    fn export_lines() {
        let contents = concat!(
            r#"{"id":"Room101","eTag":"MQ==","status":"enabled","authentication":{"symmetricKey":{"primaryKey":"cHJpbWFyeQ==","secondaryKey":"c2Vjb25kYXJ5"},"type":"sas"}}"#,
            "\n\n",
            r#"{"id":"Room102","eTag":"Mg==","authentication":{"type":"selfSigned"}}"#,
            "\n",
        );

        let devices = parse_export(contents).unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].etag.as_deref(), Some("MQ=="));
        assert_eq!(
            devices[0].connection_string("hub.example.net").as_deref(),
            Some("HostName=hub.example.net;DeviceId=Room101;SharedAccessKey=cHJpbWFyeQ==")
        );
        assert_eq!(devices[1].connection_string("hub.example.net"), None);

        assert!(parse_export("not json").is_err());
    }
}
