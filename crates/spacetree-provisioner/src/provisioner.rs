use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, join_all};

use serde::Serialize;

use spacetree::description::{
    BlobDescription, DeviceDescription, ProvisioningDescription, RoleAssignmentDescription,
    SpaceDescription, UserDefinedFunctionDescription,
};
use spacetree::topology::{
    BlobUpload, Keystore, Property, RoleAssignment, Space, USER_DEFINED_FUNCTION_OBJECT_ID_TYPE,
    USER_OBJECT_ID_TYPE, USER_ROLE_ID, UserDefinedFunction,
};
use spacetree::users::UserObjectIds;

use tracing::{error, info, warn};

use uuid::Uuid;

use crate::config::ProvisionerConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::poller::await_ready;
use crate::resolver::Resolver;
use crate::service::TopologyService;

fn pretty(payload: &impl Serialize) -> String {
    serde_json::to_string_pretty(payload).unwrap_or_default()
}

// Logs the outcome of a creation, turning a failure into `None`.
fn outcome<T>(what: &str, payload: &impl Serialize, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Failed to create {what}: {e}\n{}", pretty(payload));
            None
        }
    }
}

fn resolve_path(directory: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        directory.join(path)
    }
}

#[derive(Debug, Default)]
struct Counters {
    spaces: AtomicUsize,
    keystores: AtomicUsize,
    devices: AtomicUsize,
}

impl Counters {
    fn increment(counter: &AtomicUsize) {
        let _ = counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> [usize; 3] {
        [
            self.spaces.load(Ordering::Relaxed),
            self.keystores.load(Ordering::Relaxed),
            self.devices.load(Ordering::Relaxed),
        ]
    }
}

/// The outcome of a provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningReport {
    /// Number of spaces created by the run.
    pub created_spaces: usize,
    /// Number of keystores created by the run.
    pub created_keystores: usize,
    /// Number of devices created by the run.
    pub created_devices: usize,
    /// Identifier of every root space, in description order, or `None` when
    /// the root could be neither found nor created.
    pub roots: Vec<Option<Uuid>>,
}

/// Creates the remote topology described by a [`ProvisioningDescription`].
///
/// Every space is provisioned in a fixed order: the space itself, its
/// keystore, resources, types, devices, matchers, user-defined functions,
/// role assignments, user role assignments, property keys, properties,
/// blobs, and finally its children.
///
/// Existing entities are reused, so running the provisioner again over the
/// same description only creates what is missing. When a space can be
/// neither found nor created, its subtree is skipped. Nothing already
/// created is rolled back.
pub struct Provisioner<'a, S: ?Sized> {
    service: &'a S,
    config: &'a ProvisionerConfig,
    directory: PathBuf,
    users: UserObjectIds,
    tenant_id: Option<String>,
    counters: Counters,
}

impl<'a, S: TopologyService + ?Sized> Provisioner<'a, S> {
    /// Creates a [`Provisioner`].
    #[must_use]
    #[inline]
    pub fn new(service: &'a S, config: &'a ProvisionerConfig) -> Self {
        Self {
            service,
            config,
            directory: PathBuf::new(),
            users: UserObjectIds::new(),
            tenant_id: None,
            counters: Counters::default(),
        }
    }

    /// Sets the directory scripts and blobs are read from.
    #[must_use]
    #[inline]
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    /// Sets the object identifiers of the users named in the description.
    #[must_use]
    #[inline]
    pub fn users(mut self, users: UserObjectIds) -> Self {
        self.users = users;
        self
    }

    /// Sets the directory tenant of the users.
    #[must_use]
    #[inline]
    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Provisions every space and endpoint of a description.
    ///
    /// Devices of the description receive their owning space and, when a
    /// keystore applies to them, their token.
    ///
    /// # Errors
    ///
    /// An error is returned, before any remote call, when a user named in
    /// the description has no object identifier. Remote failures are logged
    /// and skip the affected subtree instead.
    pub async fn run(&self, description: &mut ProvisioningDescription) -> Result<ProvisioningReport> {
        let missing = self.users.missing(description.users());
        if !missing.is_empty() {
            return Err(Error::new(
                ErrorKind::Validation,
                format!("Missing object identifiers for users: {}", missing.join(", ")),
            ));
        }

        let before = self.counters.snapshot();

        let roots = self.provision_spaces(&mut description.spaces, None, None).await;
        self.endpoints(description).await;

        let after = self.counters.snapshot();
        let report = ProvisioningReport {
            created_spaces: after[0] - before[0],
            created_keystores: after[1] - before[1],
            created_devices: after[2] - before[2],
            roots,
        };
        info!("Created {} spaces", report.created_spaces);

        Ok(report)
    }

    async fn provision_spaces(
        &self,
        spaces: &mut [SpaceDescription],
        parent_id: Option<Uuid>,
        keystore_id: Option<Uuid>,
    ) -> Vec<Option<Uuid>> {
        if self.config.parallel {
            join_all(
                spaces
                    .iter_mut()
                    .map(|space| self.provision_space(space, parent_id, keystore_id)),
            )
            .await
        } else {
            let mut ids = Vec::with_capacity(spaces.len());
            for space in spaces {
                ids.push(self.provision_space(space, parent_id, keystore_id).await);
            }
            ids
        }
    }

    fn provision_space<'b>(
        &'b self,
        node: &'b mut SpaceDescription,
        parent_id: Option<Uuid>,
        keystore_id: Option<Uuid>,
    ) -> BoxFuture<'b, Option<Uuid>> {
        async move {
            let space_id = self.space(node, parent_id).await?;

            // Closer keystores take precedence for the devices below them.
            let keystore_id = self.keystore(node, space_id).await.or(keystore_id);

            self.resources(node, space_id).await;
            self.types(node, space_id).await;
            self.devices(&mut node.devices, space_id, keystore_id).await;
            self.matchers(node, space_id).await;
            self.user_defined_functions(node, space_id).await;

            let details = if node.role_assignments.is_empty()
                && node.users.is_empty()
                && node.properties.is_empty()
                && node.blobs.is_empty()
            {
                None
            } else {
                self.details(space_id).await
            };

            if let Some(path) = details.as_ref().and_then(Space::full_path) {
                self.role_assignments(&node.role_assignments, space_id, path)
                    .await;
                self.user_role_assignments(&node.users, path).await;
            } else if !node.role_assignments.is_empty() || !node.users.is_empty() {
                error!(
                    "Skipping role assignments of space `{}`: its full path is unknown",
                    node.name
                );
            }

            self.property_keys(node, space_id).await;
            self.properties(node, space_id, details.as_ref()).await;
            self.blobs(&node.blobs, space_id, details.as_ref()).await;

            let _ = self
                .provision_spaces(&mut node.spaces, Some(space_id), keystore_id)
                .await;

            Some(space_id)
        }
        .boxed()
    }

    async fn space(&self, node: &SpaceDescription, parent_id: Option<Uuid>) -> Option<Uuid> {
        match Resolver::new(self.service).space(&node.name, parent_id).await {
            Ok(Some(Space { id: Some(id), .. })) => {
                info!("Found space `{}`: {id}", node.name);
                return Some(id);
            }
            Ok(_) => {}
            Err(e) => {
                error!("Failed to look up space `{}`: {e}", node.name);
                return None;
            }
        }

        let space = node.to_space(parent_id);
        info!("Creating space: {}", pretty(&space));
        let id = outcome("space", &space, self.service.create_space(&space).await)?;
        Counters::increment(&self.counters.spaces);
        Some(id)
    }

    async fn keystore(&self, node: &SpaceDescription, space_id: Uuid) -> Option<Uuid> {
        let name = node.keystore_name.as_deref()?;
        match Resolver::new(self.service).keystore(name, space_id).await {
            Ok(Some(id)) => return Some(id),
            Ok(None) => {}
            Err(e) => {
                error!("Failed to look up keystore `{name}`: {e}");
                return None;
            }
        }

        let keystore = Keystore {
            id: None,
            name: name.to_owned(),
            space_id,
        };
        info!("Creating keystore: {}", pretty(&keystore));
        let id = outcome(
            "keystore",
            &keystore,
            self.service.create_keystore(&keystore).await,
        )?;
        Counters::increment(&self.counters.keystores);

        info!("Generating a key in keystore {id}");
        if let Err(e) = self.service.create_keystore_key(id).await {
            error!("Failed to generate a key in keystore {id}: {e}");
        }
        Some(id)
    }

    async fn resources(&self, node: &SpaceDescription, space_id: Uuid) {
        if node.resources.is_empty() {
            return;
        }

        let existing = match self.service.resources(space_id).await {
            Ok(existing) => existing,
            Err(e) => {
                error!("Failed to list the resources of space {space_id}: {e}");
                return;
            }
        };

        let creations = node
            .resources
            .iter()
            .filter(|resource| {
                !existing
                    .iter()
                    .any(|e| e.kind.eq_ignore_ascii_case(&resource.kind))
            })
            .map(|resource| async move {
                let resource = resource.to_resource(space_id);
                info!("Creating resource: {}", pretty(&resource));
                outcome(
                    "resource",
                    &resource,
                    self.service.create_resource(&resource).await,
                )
            });
        let created: Vec<Uuid> = join_all(creations).await.into_iter().flatten().collect();

        if created.is_empty() {
            return;
        }

        info!("Polling until all resources are no longer provisioning");
        let interval = self.config.resource_poll_interval;
        let ready = join_all(
            created
                .iter()
                .map(|id| await_ready(self.service, *id, interval)),
        )
        .await;
        if ready.iter().any(|ready| !ready) {
            error!("Some resources of space {space_id} are not running");
        }
    }

    async fn types(&self, node: &SpaceDescription, space_id: Uuid) {
        if node.types.is_empty() {
            return;
        }

        let existing = match self.service.types(space_id).await {
            Ok(existing) => existing,
            Err(e) => {
                error!("Failed to list the types of space {space_id}: {e}");
                return;
            }
        };

        for description in &node.types {
            let present = existing.iter().any(|e| {
                e.name.eq_ignore_ascii_case(&description.name)
                    && e.category.eq_ignore_ascii_case(&description.category)
            });
            if present {
                continue;
            }

            let kind = description.to_type(space_id);
            info!("Creating type: {}", pretty(&kind));
            let _ = outcome("type", &kind, self.service.create_type(&kind).await);
        }
    }

    async fn devices(
        &self,
        devices: &mut [DeviceDescription],
        space_id: Uuid,
        keystore_id: Option<Uuid>,
    ) {
        if devices.is_empty() {
            return;
        }

        let hardware_ids: Vec<&str> = devices.iter().map(|d| d.hardware_id.as_str()).collect();
        let existing = match Resolver::new(self.service)
            .devices(&hardware_ids, self.config.lookup_group_size)
            .await
        {
            Ok(existing) => existing,
            Err(e) => {
                error!("Failed to look up the devices of space {space_id}: {e}");
                return;
            }
        };

        let provisions = devices.iter_mut().map(|description| {
            let found = existing
                .get(&description.hardware_id.to_lowercase())
                .and_then(|device| device.id);
            self.device(description, found, space_id, keystore_id)
        });
        let _ = join_all(provisions).await;
    }

    async fn device(
        &self,
        description: &mut DeviceDescription,
        found: Option<Uuid>,
        space_id: Uuid,
        keystore_id: Option<Uuid>,
    ) {
        description.space_id = Some(space_id);

        if let Some(id) = found {
            info!("Found device `{}`: {id}", description.hardware_id);
        } else {
            let device = description.to_device(space_id);
            info!("Creating device: {}", pretty(&device));
            if outcome("device", &device, self.service.create_device(&device).await).is_none() {
                return;
            }
            Counters::increment(&self.counters.devices);
        }

        let Some(keystore_id) = keystore_id else {
            return;
        };
        match self
            .service
            .device_token(keystore_id, &description.hardware_id)
            .await
        {
            Ok(token) if !token.trim().is_empty() => description.sas_token = Some(token),
            Ok(_) => warn!("Empty token for device `{}`", description.hardware_id),
            Err(e) => error!(
                "Failed to retrieve the token of device `{}`: {e}",
                description.hardware_id
            ),
        }
    }

    async fn matchers(&self, node: &SpaceDescription, space_id: Uuid) {
        if node.matchers.is_empty() {
            return;
        }

        let resolver = Resolver::new(self.service);
        for description in &node.matchers {
            match resolver.matcher(&description.name, space_id).await {
                Ok(Some(id)) => {
                    info!("Found matcher `{}`: {id}", description.name);
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Failed to look up matcher `{}`: {e}", description.name);
                    continue;
                }
            }

            let matcher = description.to_matcher(space_id);
            info!("Creating matcher: {}", pretty(&matcher));
            let _ = outcome(
                "matcher",
                &matcher,
                self.service.create_matcher(&matcher).await,
            );
        }
    }

    async fn user_defined_functions(&self, node: &SpaceDescription, space_id: Uuid) {
        for description in &node.user_defined_functions {
            if let Err(e) = self.user_defined_function(description, space_id).await {
                error!(
                    "Failed to provision user-defined function `{}`: {e}",
                    description.name
                );
            }
        }
    }

    async fn user_defined_function(
        &self,
        description: &UserDefinedFunctionDescription,
        space_id: Uuid,
    ) -> Result<()> {
        let matchers = if description.matcher_names.is_empty() {
            Vec::new()
        } else {
            self.service
                .find_matchers(&description.matcher_names, space_id)
                .await?
        };

        let path = resolve_path(&self.directory, &description.script);
        let script = tokio::fs::read_to_string(&path).await?;
        if script.trim().is_empty() {
            warn!(
                "Skipping user-defined function `{}`: the script `{}` is empty",
                description.name,
                path.display()
            );
            return Ok(());
        }

        let existing = self
            .service
            .find_user_defined_functions(&description.name, space_id)
            .await?;

        let mut function = UserDefinedFunction {
            id: None,
            name: description.name.clone(),
            space_id,
            matchers: matchers.iter().filter_map(|matcher| matcher.id).collect(),
        };

        if let [existing] = existing.as_slice() {
            function.id = existing.id;
            info!("Updating user-defined function: {}", pretty(&function));
            self.service
                .update_user_defined_function(&function, &script)
                .await
        } else {
            info!("Creating user-defined function: {}", pretty(&function));
            let _ = self
                .service
                .create_user_defined_function(&function, &script)
                .await?;
            Ok(())
        }
    }

    async fn details(&self, space_id: Uuid) -> Option<Space> {
        match self.service.space(space_id).await {
            Ok(details) => details,
            Err(e) => {
                error!("Failed to retrieve the details of space {space_id}: {e}");
                None
            }
        }
    }

    async fn assign(&self, assignment: RoleAssignment) {
        match self
            .service
            .find_role_assignments(&assignment.path, &assignment.object_id)
            .await
        {
            Ok(existing) if existing.len() == 1 => {
                info!(
                    "Found role assignment of {} on `{}`",
                    assignment.object_id, assignment.path
                );
                return;
            }
            Ok(_) => {}
            Err(e) => {
                error!(
                    "Failed to look up role assignments on `{}`: {e}",
                    assignment.path
                );
                return;
            }
        }

        info!("Creating role assignment: {}", pretty(&assignment));
        let _ = outcome(
            "role assignment",
            &assignment,
            self.service.create_role_assignment(&assignment).await,
        );
    }

    async fn role_assignments(
        &self,
        descriptions: &[RoleAssignmentDescription],
        space_id: Uuid,
        path: &str,
    ) {
        for description in descriptions {
            if description.object_id_type != USER_DEFINED_FUNCTION_OBJECT_ID_TYPE {
                warn!(
                    "Skipping role assignment of `{}`: unsupported object type `{}`",
                    description.object_name, description.object_id_type
                );
                continue;
            }

            let functions = match self
                .service
                .find_user_defined_functions(&description.object_name, space_id)
                .await
            {
                Ok(functions) => functions,
                Err(e) => {
                    error!(
                        "Failed to look up user-defined function `{}`: {e}",
                        description.object_name
                    );
                    continue;
                }
            };

            let Some(object_id) = functions.first().and_then(|function| function.id) else {
                error!(
                    "Skipping role assignment: no user-defined function named `{}`",
                    description.object_name
                );
                continue;
            };

            self.assign(description.to_role_assignment(
                object_id.to_string(),
                self.tenant_id.as_deref(),
                path,
            ))
            .await;
        }
    }

    async fn user_role_assignments(&self, users: &[String], path: &str) {
        for user in users {
            // Users are validated before the run starts.
            let Some(object_id) = self.users.get(user) else {
                continue;
            };

            self.assign(RoleAssignment {
                role_id: USER_ROLE_ID.into(),
                object_id: object_id.into(),
                object_id_type: USER_OBJECT_ID_TYPE.into(),
                path: path.into(),
                tenant_id: self.tenant_id.clone(),
            })
            .await;
        }
    }

    async fn property_keys(&self, node: &SpaceDescription, space_id: Uuid) {
        if node.property_keys.is_empty() {
            return;
        }

        let existing = match self.service.property_keys(space_id).await {
            Ok(existing) => existing,
            Err(e) => {
                error!("Failed to list the property keys of space {space_id}: {e}");
                return;
            }
        };

        for description in &node.property_keys {
            if existing.iter().any(|key| key.name == description.name) {
                continue;
            }

            let key = description.to_property_key(space_id);
            info!("Creating property key: {}", pretty(&key));
            let _ = outcome(
                "property key",
                &key,
                self.service.create_property_key(&key).await,
            );
        }
    }

    async fn properties(&self, node: &SpaceDescription, space_id: Uuid, details: Option<&Space>) {
        for description in &node.properties {
            if details.is_some_and(|space| space.property(&description.name).is_some()) {
                continue;
            }

            self.property(space_id, description.to_property()).await;
        }
    }

    async fn property(&self, space_id: Uuid, property: Property) {
        info!("Creating property: {}", pretty(&property));
        let _ = outcome(
            "property",
            &property,
            self.service.create_property(space_id, &property).await,
        );
    }

    async fn blobs(&self, blobs: &[BlobDescription], space_id: Uuid, details: Option<&Space>) {
        for description in blobs {
            if let Err(e) = self.blob(description, space_id, details).await {
                error!("Failed to upload blob `{}`: {e}", description.name);
            }
        }
    }

    async fn blob(
        &self,
        description: &BlobDescription,
        space_id: Uuid,
        details: Option<&Space>,
    ) -> Result<()> {
        let (path_property, id_property) = description.property_names();
        let existing = details
            .and_then(|space| space.property(id_property))
            .and_then(|property| Uuid::parse_str(&property.value).ok());

        let path = resolve_path(&self.directory, &description.filepath);
        let upload = BlobUpload {
            metadata: description.to_metadata(space_id),
            content_type: description.content_type.clone(),
            contents: tokio::fs::read(&path).await?,
            existing,
        };

        if let Some(id) = existing {
            info!("Updating blob {id} of space {space_id} from `{}`", path.display());
            return self.service.update_blob(id, &upload).await;
        }

        info!("Creating blob of space {space_id} from `{}`", path.display());
        let id = self.service.create_blob(&upload).await?;

        self.property(
            space_id,
            Property::new(path_property, self.service.blob_contents_path(id)),
        )
        .await;
        self.property(space_id, Property::new(id_property, id.to_string()))
            .await;
        Ok(())
    }

    async fn endpoints(&self, description: &ProvisioningDescription) {
        if description.endpoints.is_empty() {
            return;
        }

        let existing = match self.service.endpoints().await {
            Ok(existing) => existing,
            Err(e) => {
                error!("Failed to list the endpoints: {e}");
                return;
            }
        };

        for endpoint in &description.endpoints {
            if existing
                .iter()
                .any(|e| e.overlaps(&endpoint.kind, &endpoint.event_types))
            {
                info!(
                    "Found endpoint of type `{}` for the same events",
                    endpoint.kind
                );
                continue;
            }

            let endpoint = endpoint.to_endpoint(&self.config.endpoint_connection);
            info!("Creating endpoint of type `{}`", endpoint.kind);
            // Connection strings are secrets: only the type is logged.
            if let Err(e) = self.service.create_endpoint(&endpoint).await {
                error!("Failed to create endpoint of type `{}`: {e}", endpoint.kind);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use spacetree::description::{
        BlobDescription, DeviceDescription, EndpointDescription, PropertyDescription,
        ProvisioningDescription, RoleAssignmentDescription, SpaceDescription,
        UserDefinedFunctionDescription,
    };
    use spacetree::topology::ResourceStatus;
    use spacetree::users::UserObjectIds;

    use crate::config::ProvisionerConfig;
    use crate::error::ErrorKind;
    use crate::tests::{MemoryTopology, hotel_description, test_config};

    use super::Provisioner;

    #[tokio::test]
    async fn provision_twice() {
        let topology = MemoryTopology::new();
        let config = test_config();
        let users = UserObjectIds::new().user("Head Of Operations", "oid-1");

        let mut description = hotel_description();
        let report = Provisioner::new(&topology, &config)
            .users(users.clone())
            .run(&mut description)
            .await
            .unwrap();

        assert_eq!(report.created_spaces, 5);
        assert_eq!(report.created_keystores, 1);
        assert_eq!(report.created_devices, 1);
        assert_eq!(topology.calls_named("create_keystore_key"), 1);
        assert!(report.roots[0].is_some());

        let device = &description.spaces[0].spaces[0].spaces[0].spaces[0].spaces[0].devices[0];
        assert!(device.sas_token.is_some());
        assert!(device.space_id.is_some());

        let mut description = hotel_description();
        let report = Provisioner::new(&topology, &config)
            .users(users)
            .run(&mut description)
            .await
            .unwrap();

        assert_eq!(report.created_spaces, 0);
        assert_eq!(report.created_keystores, 0);
        assert_eq!(report.created_devices, 0);
        assert_eq!(topology.calls_named("create_space"), 5);
        assert_eq!(topology.calls_named("create_device"), 1);
        assert_eq!(topology.calls_named("create_role_assignment"), 1);
    }

    #[tokio::test]
    async fn keystore_before_devices() {
        let topology = MemoryTopology::new();
        let config = test_config();

        let mut description = ProvisioningDescription {
            endpoints: Vec::new(),
            spaces: vec![
                SpaceDescription::new("Room 101", "Room")
                    .keystore("Room Keys")
                    .device(DeviceDescription::new("Thermostat", "T-101"))
                    .device(DeviceDescription::new("Light", "L-101")),
            ],
        };
        let _ = Provisioner::new(&topology, &config)
            .run(&mut description)
            .await
            .unwrap();

        let calls = topology.calls();
        let keystore = calls.iter().position(|call| call == "create_keystore").unwrap();
        let first_device = calls.iter().position(|call| call == "create_device").unwrap();
        assert!(keystore < first_device);
    }

    #[tokio::test]
    async fn failed_space_skips_subtree() {
        let topology = MemoryTopology::new().failing_space("B1");
        let config = test_config();

        let mut description = hotel_description();
        let report = Provisioner::new(&topology, &config)
            .users(UserObjectIds::new().user("Head Of Operations", "oid-1"))
            .run(&mut description)
            .await
            .unwrap();

        assert_eq!(report.created_spaces, 1);
        assert_eq!(topology.calls_named("create_device"), 0);
    }

    #[tokio::test]
    async fn failed_lookup_skips_subtree() {
        let topology = MemoryTopology::new();
        topology.fail_lookups("B1");
        let config = test_config();

        let mut description = hotel_description();
        let report = Provisioner::new(&topology, &config)
            .users(UserObjectIds::new().user("Head Of Operations", "oid-1"))
            .run(&mut description)
            .await
            .unwrap();

        assert_eq!(report.created_spaces, 1);
        assert_eq!(topology.calls_named("create_space"), 1);
        assert_eq!(topology.calls_named("create_keystore"), 0);
        assert_eq!(topology.calls_named("create_device"), 0);
    }

    #[tokio::test]
    async fn missing_user_object_ids() {
        let topology = MemoryTopology::new();
        let config = test_config();

        let mut description = hotel_description();
        let error = Provisioner::new(&topology, &config)
            .run(&mut description)
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::Validation);
        assert!(topology.calls().is_empty());
    }

    #[tokio::test]
    async fn resources_are_awaited() {
        let topology = MemoryTopology::new().resource_polls(2, ResourceStatus::Running);
        let config = test_config();

        let mut description = ProvisioningDescription {
            endpoints: Vec::new(),
            spaces: vec![
                SpaceDescription::new("Tenant", "Tenant")
                    .resource("IoTHub")
                    .resource("iothub")
                    .device(DeviceDescription::new("Thermostat", "T-101")),
            ],
        };
        let _ = Provisioner::new(&topology, &config)
            .run(&mut description)
            .await
            .unwrap();

        let calls = topology.calls();
        assert_eq!(topology.calls_named("create_resource"), 2);
        let last_poll = calls.iter().rposition(|call| call == "resource").unwrap();
        let device = calls.iter().position(|call| call == "create_device").unwrap();
        assert!(last_poll < device);

        // Resources of the same type already exist.
        let _ = Provisioner::new(&topology, &config)
            .run(&mut description)
            .await
            .unwrap();
        assert_eq!(topology.calls_named("create_resource"), 2);
    }

    #[tokio::test]
    async fn parallel_siblings() {
        let topology = MemoryTopology::new();
        let config = ProvisionerConfig::new().parallel(true);

        let mut description = ProvisioningDescription {
            endpoints: Vec::new(),
            spaces: vec![
                SpaceDescription::new("Tenant", "Tenant")
                    .space(SpaceDescription::new("Brand 1", "Brand"))
                    .space(SpaceDescription::new("Brand 2", "Brand"))
                    .space(SpaceDescription::new("Brand 3", "Brand")),
            ],
        };
        let report = Provisioner::new(&topology, &config)
            .run(&mut description)
            .await
            .unwrap();

        assert_eq!(report.created_spaces, 4);
    }

    #[tokio::test]
    async fn secondary_entities() {
        let directory = tempfile::tempdir().unwrap();
        fs::write(directory.path().join("alerts.js"), "function process() {}").unwrap();
        fs::write(directory.path().join("empty.js"), "  ").unwrap();
        fs::write(directory.path().join("floor.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();

        let topology = MemoryTopology::new();
        let config = test_config();

        let mut space = SpaceDescription::new("Tenant", "Tenant");
        space.matchers.push(spacetree::description::MatcherDescription {
            name: "Temperature".into(),
            data_type_value: "Temperature".into(),
        });
        space.user_defined_functions = vec![
            UserDefinedFunctionDescription {
                name: "Alerts".into(),
                matcher_names: vec!["Temperature".into()],
                script: "alerts.js".into(),
            },
            UserDefinedFunctionDescription {
                name: "Empty".into(),
                matcher_names: Vec::new(),
                script: "empty.js".into(),
            },
        ];
        space.role_assignments.push(RoleAssignmentDescription {
            object_id_type: "UserDefinedFunctionId".into(),
            object_name: "Alerts".into(),
            role_id: "98e44ad7-28d4-4007-853b-b9968ad132d1".into(),
        });
        space.properties.push(PropertyDescription {
            name: "DeviceIdPrefix".into(),
            value: "T".into(),
        });
        space.blobs.push(BlobDescription {
            name: "Floorplan".into(),
            kind: "Map".into(),
            subtype: None,
            description: None,
            filepath: "floor.png".into(),
            content_type: "image/png".into(),
            is_primary_blob: true,
        });

        let mut description = ProvisioningDescription {
            endpoints: vec![EndpointDescription {
                kind: "EventHub".into(),
                event_types: vec!["SensorChange".into()],
            }],
            spaces: vec![space],
        };

        for _ in 0..2 {
            let _ = Provisioner::new(&topology, &config)
                .directory(directory.path())
                .run(&mut description)
                .await
                .unwrap();
        }

        assert_eq!(topology.calls_named("create_matcher"), 1);
        assert_eq!(topology.calls_named("create_user_defined_function"), 1);
        assert_eq!(topology.calls_named("update_user_defined_function"), 1);
        assert_eq!(topology.calls_named("create_role_assignment"), 1);
        assert_eq!(topology.calls_named("create_blob"), 1);
        assert_eq!(topology.calls_named("update_blob"), 1);
        assert_eq!(topology.calls_named("create_endpoint"), 1);

        // The prefix, the image path and the image blob identifier.
        assert_eq!(topology.calls_named("create_property"), 3);
    }
}
