use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use spacetree::description::{DeviceDescription, ProvisioningDescription, SpaceDescription};
use spacetree::registry::{
    Authentication, BulkRegistryResult, DeviceRegistryOperationError, ExportImportDevice,
    ExportedDevice, ImportMode, JobStatus, RegistryJob, SymmetricKey,
};
use spacetree::topology::{
    BlobUpload, Device, Endpoint, Keystore, Matcher, Property, PropertyKey, Resource,
    ResourceStatus, RoleAssignment, Space, SpaceType, UserDefinedFunction,
};

use uuid::Uuid;

use crate::config::ProvisionerConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::service::{DeviceRegistry, TopologyService};

pub(crate) const TEST_INTERVAL: Duration = Duration::from_millis(1);

pub(crate) fn test_config() -> ProvisionerConfig {
    ProvisionerConfig::new()
        .resource_poll_interval(TEST_INTERVAL)
        .export_poll_interval(TEST_INTERVAL)
        .removal_timeout(Duration::from_secs(5))
}

// Tenant > B1 > H1 (keystore) > F1 > R1 (one thermostat).
pub(crate) fn hotel_description() -> ProvisioningDescription {
    let room = SpaceDescription::new("R1", "Room")
        .device(DeviceDescription::new("Thermostat", "T-R1").sensor("Temperature"));
    let hotel = SpaceDescription::new("H1", "Hotel")
        .keystore("H1 Keys")
        .space(SpaceDescription::new("F1", "Floor").space(room));

    let mut tenant = SpaceDescription::new("Tenant", "Tenant")
        .space(SpaceDescription::new("B1", "Brand").space(hotel));
    tenant.users.push("Head Of Operations".into());

    ProvisioningDescription {
        endpoints: Vec::new(),
        spaces: vec![tenant],
    }
}

fn not_found(what: &str, id: impl std::fmt::Display) -> Error {
    Error::new(ErrorKind::NotFound, format!("No {what} {id}"))
}

#[derive(Default)]
struct TopologyState {
    calls: Vec<String>,
    spaces: Vec<Space>,
    keystores: Vec<Keystore>,
    resources: Vec<Resource>,
    resource_checks: HashMap<Uuid, usize>,
    deleting: HashSet<Uuid>,
    stuck_deletions: bool,
    types: Vec<SpaceType>,
    devices: Vec<Device>,
    matchers: Vec<Matcher>,
    functions: Vec<UserDefinedFunction>,
    role_assignments: Vec<RoleAssignment>,
    property_keys: Vec<PropertyKey>,
    blobs: HashSet<Uuid>,
    endpoints: Vec<Endpoint>,
    failing_calls: HashSet<String>,
    failing_lookups: HashSet<String>,
}

impl TopologyState {
    fn path(&self, id: Uuid) -> Option<String> {
        let space = self.spaces.iter().find(|space| space.id == Some(id))?;
        let parent = match space.parent_space_id {
            Some(parent) => self.path(parent)?,
            None => String::new(),
        };
        Some(format!("{parent}/{}", space.name))
    }

    // The space itself along with all of its descendants.
    fn subtree(&self, id: Uuid) -> HashSet<Uuid> {
        let mut ids = HashSet::from([id]);
        loop {
            let before = ids.len();
            for space in &self.spaces {
                if let (Some(space_id), Some(parent)) = (space.id, space.parent_space_id) {
                    if ids.contains(&parent) {
                        let _ = ids.insert(space_id);
                    }
                }
            }
            if ids.len() == before {
                return ids;
            }
        }
    }
}

/// An in-memory topology service recording the name of every call.
pub(crate) struct MemoryTopology {
    state: Mutex<TopologyState>,
    provisioning_checks: usize,
    final_status: ResourceStatus,
    failing_space: Option<String>,
}

impl MemoryTopology {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TopologyState::default()),
            provisioning_checks: 0,
            final_status: ResourceStatus::Running,
            failing_space: None,
        }
    }

    // Resources report `Provisioning` for `checks` status requests, then
    // `status`.
    pub(crate) fn resource_polls(mut self, checks: usize, status: ResourceStatus) -> Self {
        self.provisioning_checks = checks;
        self.final_status = status;
        self
    }

    pub(crate) fn failing_space(mut self, name: &str) -> Self {
        self.failing_space = Some(name.into());
        self
    }

    // Every later call with this name fails.
    pub(crate) fn fail_calls(&self, call: &str) {
        let _ = self.state.lock().unwrap().failing_calls.insert(call.into());
    }

    // Every later lookup of a space with this name fails.
    pub(crate) fn fail_lookups(&self, name: &str) {
        let _ = self
            .state
            .lock()
            .unwrap()
            .failing_lookups
            .insert(name.into());
    }

    // Deleted resources stay visible forever.
    pub(crate) fn stuck_deletions(&self) {
        self.state.lock().unwrap().stuck_deletions = true;
    }

    pub(crate) fn insert_space(&self, name: &str, parent_id: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().spaces.push(Space {
            id: Some(id),
            name: name.into(),
            parent_space_id: parent_id,
            ..Space::default()
        });
        id
    }

    pub(crate) fn insert_device(&self, hardware_id: &str, space_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        let mut device = DeviceDescription::new(hardware_id, hardware_id).to_device(space_id);
        device.id = Some(id);
        self.state.lock().unwrap().devices.push(device);
        id
    }

    pub(crate) fn insert_resource(&self, kind: &str, space_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().resources.push(Resource {
            id: Some(id),
            kind: kind.into(),
            space_id,
            ..Resource::default()
        });
        id
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn calls_named(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|call| *call == name)
            .count()
    }

    fn record(&self, call: &str) -> MutexGuard<'_, TopologyState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call.into());
        state
    }

    fn record_fallible(&self, call: &str) -> Result<MutexGuard<'_, TopologyState>> {
        let state = self.record(call);
        if state.failing_calls.contains(call) {
            return Err(Error::new(ErrorKind::Remote, "Service unavailable"));
        }
        Ok(state)
    }
}

#[async_trait]
impl TopologyService for MemoryTopology {
    async fn find_spaces(&self, name: &str, parent_id: Option<Uuid>) -> Result<Vec<Space>> {
        let state = self.record("find_spaces");
        if state.failing_lookups.contains(name) {
            return Err(Error::new(ErrorKind::Remote, "Gateway timeout"));
        }
        Ok(state
            .spaces
            .iter()
            .filter(|space| space.name == name && space.parent_space_id == parent_id)
            .cloned()
            .collect())
    }

    async fn space(&self, id: Uuid) -> Result<Option<Space>> {
        let state = self.record("space");
        let path = state.path(id);
        Ok(state
            .spaces
            .iter()
            .find(|space| space.id == Some(id))
            .map(|space| Space {
                space_paths: path.into_iter().collect(),
                ..space.clone()
            }))
    }

    async fn create_space(&self, space: &Space) -> Result<Uuid> {
        let mut state = self.record("create_space");
        if self.failing_space.as_deref() == Some(space.name.as_str()) {
            return Err(Error::new(ErrorKind::Remote, "Internal server error"));
        }
        let id = Uuid::new_v4();
        state.spaces.push(Space {
            id: Some(id),
            ..space.clone()
        });
        Ok(id)
    }

    async fn delete_space(&self, id: Uuid) -> Result<()> {
        let mut state = self.record("delete_space");
        let removed = state.subtree(id);
        state
            .spaces
            .retain(|space| !space.id.is_some_and(|id| removed.contains(&id)));
        Ok(())
    }

    async fn find_keystores(&self, name: &str, space_id: Uuid) -> Result<Vec<Keystore>> {
        let state = self.record("find_keystores");
        Ok(state
            .keystores
            .iter()
            .filter(|keystore| keystore.name == name && keystore.space_id == space_id)
            .cloned()
            .collect())
    }

    async fn create_keystore(&self, keystore: &Keystore) -> Result<Uuid> {
        let mut state = self.record("create_keystore");
        let id = Uuid::new_v4();
        state.keystores.push(Keystore {
            id: Some(id),
            ..keystore.clone()
        });
        Ok(id)
    }

    async fn create_keystore_key(&self, keystore_id: Uuid) -> Result<()> {
        let state = self.record("create_keystore_key");
        if state.keystores.iter().any(|k| k.id == Some(keystore_id)) {
            Ok(())
        } else {
            Err(not_found("keystore", keystore_id))
        }
    }

    async fn device_token(&self, keystore_id: Uuid, hardware_id: &str) -> Result<String> {
        let _state = self.record("device_token");
        Ok(format!("token-{keystore_id}-{hardware_id}"))
    }

    async fn resources(&self, space_id: Uuid) -> Result<Vec<Resource>> {
        let state = self.record_fallible("resources")?;
        let spaces = state.subtree(space_id);
        Ok(state
            .resources
            .iter()
            .filter(|resource| spaces.contains(&resource.space_id))
            .cloned()
            .collect())
    }

    async fn resource(&self, id: Uuid) -> Result<Option<Resource>> {
        let mut state = self.record("resource");
        let Some(resource) = state
            .resources
            .iter()
            .find(|resource| resource.id == Some(id))
            .cloned()
        else {
            return Ok(None);
        };

        if state.deleting.contains(&id) {
            return Ok(Some(Resource {
                status: ResourceStatus::Deleting,
                ..resource
            }));
        }

        let checks = state.resource_checks.entry(id).or_default();
        *checks += 1;
        let status = if *checks <= self.provisioning_checks {
            ResourceStatus::Provisioning
        } else {
            self.final_status.clone()
        };
        Ok(Some(Resource { status, ..resource }))
    }

    async fn create_resource(&self, resource: &Resource) -> Result<Uuid> {
        let mut state = self.record("create_resource");
        let id = Uuid::new_v4();
        state.resources.push(Resource {
            id: Some(id),
            ..resource.clone()
        });
        Ok(id)
    }

    async fn delete_resource(&self, id: Uuid) -> Result<()> {
        let mut state = self.record("delete_resource");
        if state.stuck_deletions {
            let _ = state.deleting.insert(id);
        } else {
            state.resources.retain(|resource| resource.id != Some(id));
        }
        Ok(())
    }

    async fn types(&self, space_id: Uuid) -> Result<Vec<SpaceType>> {
        let state = self.record("types");
        Ok(state
            .types
            .iter()
            .filter(|kind| kind.space_id == space_id)
            .cloned()
            .collect())
    }

    async fn create_type(&self, kind: &SpaceType) -> Result<Uuid> {
        let mut state = self.record("create_type");
        state.types.push(kind.clone());
        Ok(Uuid::new_v4())
    }

    async fn find_devices(&self, hardware_ids: &[&str]) -> Result<Vec<Device>> {
        let state = self.record("find_devices");
        Ok(state
            .devices
            .iter()
            .filter(|device| {
                hardware_ids
                    .iter()
                    .any(|id| id.eq_ignore_ascii_case(&device.hardware_id))
            })
            .cloned()
            .collect())
    }

    async fn create_device(&self, device: &Device) -> Result<Uuid> {
        let mut state = self.record("create_device");
        let id = Uuid::new_v4();
        state.devices.push(Device {
            id: Some(id),
            ..device.clone()
        });
        Ok(id)
    }

    async fn delete_device(&self, id: Uuid) -> Result<()> {
        let mut state = self.record("delete_device");
        let count = state.devices.len();
        state.devices.retain(|device| device.id != Some(id));
        if state.devices.len() == count {
            Err(not_found("device", id))
        } else {
            Ok(())
        }
    }

    async fn matchers(&self, space_id: Uuid) -> Result<Vec<Matcher>> {
        let state = self.record("matchers");
        Ok(state
            .matchers
            .iter()
            .filter(|matcher| matcher.space_id == space_id)
            .cloned()
            .collect())
    }

    async fn find_matchers(&self, names: &[String], space_id: Uuid) -> Result<Vec<Matcher>> {
        let state = self.record("find_matchers");
        Ok(state
            .matchers
            .iter()
            .filter(|matcher| matcher.space_id == space_id && names.contains(&matcher.name))
            .cloned()
            .collect())
    }

    async fn create_matcher(&self, matcher: &Matcher) -> Result<Uuid> {
        let mut state = self.record("create_matcher");
        let id = Uuid::new_v4();
        state.matchers.push(Matcher {
            id: Some(id),
            ..matcher.clone()
        });
        Ok(id)
    }

    async fn find_user_defined_functions(
        &self,
        name: &str,
        space_id: Uuid,
    ) -> Result<Vec<UserDefinedFunction>> {
        let state = self.record("find_user_defined_functions");
        Ok(state
            .functions
            .iter()
            .filter(|function| function.name == name && function.space_id == space_id)
            .cloned()
            .collect())
    }

    async fn create_user_defined_function(
        &self,
        function: &UserDefinedFunction,
        _script: &str,
    ) -> Result<Uuid> {
        let mut state = self.record("create_user_defined_function");
        let id = Uuid::new_v4();
        state.functions.push(UserDefinedFunction {
            id: Some(id),
            ..function.clone()
        });
        Ok(id)
    }

    async fn update_user_defined_function(
        &self,
        function: &UserDefinedFunction,
        _script: &str,
    ) -> Result<()> {
        let mut state = self.record("update_user_defined_function");
        match state.functions.iter_mut().find(|f| f.id == function.id) {
            Some(existing) => {
                existing.matchers = function.matchers.clone();
                Ok(())
            }
            None => Err(not_found("user-defined function", &function.name)),
        }
    }

    async fn find_role_assignments(
        &self,
        path: &str,
        object_id: &str,
    ) -> Result<Vec<RoleAssignment>> {
        let state = self.record("find_role_assignments");
        Ok(state
            .role_assignments
            .iter()
            .filter(|assignment| assignment.path == path && assignment.object_id == object_id)
            .cloned()
            .collect())
    }

    async fn create_role_assignment(&self, assignment: &RoleAssignment) -> Result<()> {
        let mut state = self.record("create_role_assignment");
        state.role_assignments.push(assignment.clone());
        Ok(())
    }

    async fn property_keys(&self, space_id: Uuid) -> Result<Vec<PropertyKey>> {
        let state = self.record("property_keys");
        Ok(state
            .property_keys
            .iter()
            .filter(|key| key.space_id == space_id)
            .cloned()
            .collect())
    }

    async fn create_property_key(&self, key: &PropertyKey) -> Result<()> {
        let mut state = self.record("create_property_key");
        state.property_keys.push(key.clone());
        Ok(())
    }

    async fn create_property(&self, space_id: Uuid, property: &Property) -> Result<()> {
        let mut state = self.record("create_property");
        let space = state
            .spaces
            .iter_mut()
            .find(|space| space.id == Some(space_id))
            .ok_or_else(|| not_found("space", space_id))?;
        space.properties.retain(|p| p.name != property.name);
        space.properties.push(property.clone());
        Ok(())
    }

    async fn create_blob(&self, _blob: &BlobUpload) -> Result<Uuid> {
        let mut state = self.record("create_blob");
        let id = Uuid::new_v4();
        let _ = state.blobs.insert(id);
        Ok(id)
    }

    async fn update_blob(&self, id: Uuid, _blob: &BlobUpload) -> Result<()> {
        let state = self.record("update_blob");
        if state.blobs.contains(&id) {
            Ok(())
        } else {
            Err(not_found("blob", id))
        }
    }

    fn blob_contents_path(&self, id: Uuid) -> String {
        format!("memory://spaces/blobs/{id}/contents/latest")
    }

    async fn endpoints(&self) -> Result<Vec<Endpoint>> {
        let state = self.record_fallible("endpoints")?;
        Ok(state.endpoints.clone())
    }

    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<Uuid> {
        let mut state = self.record("create_endpoint");
        let id = Uuid::new_v4();
        state.endpoints.push(Endpoint {
            id: Some(id),
            ..endpoint.clone()
        });
        Ok(id)
    }

    async fn delete_endpoint(&self, id: Uuid) -> Result<()> {
        let mut state = self.record_fallible("delete_endpoint")?;
        state.endpoints.retain(|endpoint| endpoint.id != Some(id));
        Ok(())
    }
}

#[derive(Default)]
struct RegistryState {
    // Device identifier to entity tag.
    devices: BTreeMap<String, String>,
    versions: usize,
    batches: Vec<Vec<ExportImportDevice>>,
    polls: usize,
    single_deletions: usize,
}

impl RegistryState {
    fn next_etag(&mut self) -> String {
        self.versions += 1;
        format!("\"{}\"", self.versions)
    }
}

/// An in-memory device identity registry.
///
/// Export jobs report `Running` on the first status request, then the
/// configured final status.
pub(crate) struct MemoryRegistry {
    state: Mutex<RegistryState>,
    export_status: JobStatus,
}

impl MemoryRegistry {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            export_status: JobStatus::Completed,
        }
    }

    pub(crate) fn existing(self, id: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let etag = state.next_etag();
            let _ = state.devices.insert(id.into(), etag);
        }
        self
    }

    pub(crate) fn export_status(mut self, status: JobStatus) -> Self {
        self.export_status = status;
        self
    }

    pub(crate) fn batches(&self) -> Vec<Vec<ExportImportDevice>> {
        self.state.lock().unwrap().batches.clone()
    }

    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.batches().iter().map(Vec::len).collect()
    }

    pub(crate) fn polls(&self) -> usize {
        self.state.lock().unwrap().polls
    }

    pub(crate) fn single_deletions(&self) -> usize {
        self.state.lock().unwrap().single_deletions
    }
}

#[async_trait]
impl DeviceRegistry for MemoryRegistry {
    fn host_name(&self) -> &str {
        "hub.example.net"
    }

    async fn bulk(&self, devices: &[ExportImportDevice]) -> Result<BulkRegistryResult> {
        let mut state = self.state.lock().unwrap();
        state.batches.push(devices.to_vec());

        let mut errors = Vec::new();
        for item in devices {
            let failure = match item.import_mode {
                ImportMode::Create if state.devices.contains_key(&item.id) => {
                    Some("DeviceAlreadyExists")
                }
                ImportMode::Create => {
                    let etag = state.next_etag();
                    let _ = state.devices.insert(item.id.clone(), etag);
                    None
                }
                ImportMode::DeleteIfMatchETag
                    if state.devices.get(&item.id) != item.etag.as_ref() =>
                {
                    Some("PreconditionFailed")
                }
                ImportMode::Delete | ImportMode::DeleteIfMatchETag => {
                    state.devices.remove(&item.id).map_or(Some("DeviceNotFound"), |_| None)
                }
            };

            if let Some(code) = failure {
                errors.push(DeviceRegistryOperationError {
                    device_id: item.id.clone(),
                    error_code: code.into(),
                    error_status: format!("{code}: {}", item.id),
                });
            }
        }

        Ok(BulkRegistryResult {
            is_successful: errors.is_empty(),
            errors,
        })
    }

    async fn start_export(&self) -> Result<RegistryJob> {
        Ok(RegistryJob {
            job_id: "export-1".into(),
            status: JobStatus::Enqueued,
            failure_reason: None,
        })
    }

    async fn job(&self, job_id: &str) -> Result<RegistryJob> {
        let mut state = self.state.lock().unwrap();
        state.polls += 1;
        let (status, failure_reason) = match (state.polls, self.export_status) {
            (1, _) => (JobStatus::Running, None),
            (_, JobStatus::Completed) => (JobStatus::Completed, None),
            (_, status) => (status, Some("Export container unreachable".into())),
        };
        Ok(RegistryJob {
            job_id: job_id.into(),
            status,
            failure_reason,
        })
    }

    async fn download_export(&self) -> Result<String> {
        let state = self.state.lock().unwrap();
        let mut lines = Vec::with_capacity(state.devices.len());
        for (id, etag) in &state.devices {
            let device = ExportedDevice {
                id: id.clone(),
                etag: Some(etag.clone()),
                status: Some("enabled".into()),
                authentication: Some(Authentication {
                    symmetric_key: Some(SymmetricKey {
                        primary_key: Some(format!("key-{id}")),
                        secondary_key: Some(format!("secondary-{id}")),
                    }),
                }),
            };
            lines.push(serde_json::to_string(&device)?);
        }
        Ok(lines.join("\n"))
    }

    async fn delete_device(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.single_deletions += 1;
        match state.devices.remove(id) {
            Some(_) => Ok(()),
            None => Err(not_found("device", id)),
        }
    }
}
