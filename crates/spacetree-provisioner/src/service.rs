use async_trait::async_trait;

use spacetree::registry::{BulkRegistryResult, ExportImportDevice, RegistryJob};
use spacetree::topology::{
    BlobUpload, Device, Endpoint, Keystore, Matcher, Property, PropertyKey, Resource,
    RoleAssignment, Space, SpaceType, UserDefinedFunction,
};

use uuid::Uuid;

use crate::error::Result;

/// The topology management service.
///
/// Lookups return every match and leave the choice to the caller. Creations
/// return the identifier assigned by the service.
///
/// A non-success response is reported as an error of kind
/// [`ErrorKind::Remote`](crate::error::ErrorKind::Remote), or
/// [`ErrorKind::NotFound`](crate::error::ErrorKind::NotFound) when the
/// addressed entity does not exist.
#[async_trait]
pub trait TopologyService: Send + Sync {
    /// Finds the spaces with the given name under the given parent.
    async fn find_spaces(&self, name: &str, parent_id: Option<Uuid>) -> Result<Vec<Space>>;
    /// Retrieves a space along with its full path and properties.
    async fn space(&self, id: Uuid) -> Result<Option<Space>>;
    /// Creates a space.
    async fn create_space(&self, space: &Space) -> Result<Uuid>;
    /// Deletes a space along with its descendants.
    async fn delete_space(&self, id: Uuid) -> Result<()>;

    /// Finds the keystores with the given name in a space.
    async fn find_keystores(&self, name: &str, space_id: Uuid) -> Result<Vec<Keystore>>;
    /// Creates a keystore.
    async fn create_keystore(&self, keystore: &Keystore) -> Result<Uuid>;
    /// Generates a new signing key in a keystore.
    async fn create_keystore_key(&self, keystore_id: Uuid) -> Result<()>;
    /// Retrieves the token of a device signed with the last key of a
    /// keystore.
    async fn device_token(&self, keystore_id: Uuid, hardware_id: &str) -> Result<String>;

    /// Lists the resources of a space and its descendants.
    async fn resources(&self, space_id: Uuid) -> Result<Vec<Resource>>;
    /// Retrieves a resource.
    async fn resource(&self, id: Uuid) -> Result<Option<Resource>>;
    /// Creates a resource.
    async fn create_resource(&self, resource: &Resource) -> Result<Uuid>;
    /// Deletes a resource.
    async fn delete_resource(&self, id: Uuid) -> Result<()>;

    /// Lists the types of a space.
    async fn types(&self, space_id: Uuid) -> Result<Vec<SpaceType>>;
    /// Creates a type.
    async fn create_type(&self, kind: &SpaceType) -> Result<Uuid>;

    /// Finds the devices with the given hardware identifiers.
    async fn find_devices(&self, hardware_ids: &[&str]) -> Result<Vec<Device>>;
    /// Creates a device.
    async fn create_device(&self, device: &Device) -> Result<Uuid>;
    /// Deletes a device.
    async fn delete_device(&self, id: Uuid) -> Result<()>;

    /// Lists the matchers of a space.
    async fn matchers(&self, space_id: Uuid) -> Result<Vec<Matcher>>;
    /// Finds the matchers with the given names in a space.
    async fn find_matchers(&self, names: &[String], space_id: Uuid) -> Result<Vec<Matcher>>;
    /// Creates a matcher.
    async fn create_matcher(&self, matcher: &Matcher) -> Result<Uuid>;

    /// Finds the user-defined functions with the given name in a space.
    async fn find_user_defined_functions(
        &self,
        name: &str,
        space_id: Uuid,
    ) -> Result<Vec<UserDefinedFunction>>;
    /// Creates a user-defined function running the given script.
    async fn create_user_defined_function(
        &self,
        function: &UserDefinedFunction,
        script: &str,
    ) -> Result<Uuid>;
    /// Replaces the matchers and the script of a user-defined function.
    async fn update_user_defined_function(
        &self,
        function: &UserDefinedFunction,
        script: &str,
    ) -> Result<()>;

    /// Finds the role assignments of an object on a space path.
    async fn find_role_assignments(
        &self,
        path: &str,
        object_id: &str,
    ) -> Result<Vec<RoleAssignment>>;
    /// Creates a role assignment.
    async fn create_role_assignment(&self, assignment: &RoleAssignment) -> Result<()>;

    /// Lists the property keys of a space.
    async fn property_keys(&self, space_id: Uuid) -> Result<Vec<PropertyKey>>;
    /// Creates a property key.
    async fn create_property_key(&self, key: &PropertyKey) -> Result<()>;
    /// Assigns a property to a space.
    async fn create_property(&self, space_id: Uuid, property: &Property) -> Result<()>;

    /// Uploads a new space blob.
    async fn create_blob(&self, blob: &BlobUpload) -> Result<Uuid>;
    /// Replaces the metadata and the contents of a space blob.
    async fn update_blob(&self, id: Uuid, blob: &BlobUpload) -> Result<()>;
    /// Returns the address of the latest contents of a space blob.
    fn blob_contents_path(&self, id: Uuid) -> String;

    /// Lists the endpoints.
    async fn endpoints(&self) -> Result<Vec<Endpoint>>;
    /// Creates an endpoint.
    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<Uuid>;
    /// Deletes an endpoint.
    async fn delete_endpoint(&self, id: Uuid) -> Result<()>;
}

/// The device identity registry.
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    /// Host name of the registry, used in device connection strings.
    fn host_name(&self) -> &str;

    /// Applies a bulk operation to at most
    /// [`MAX_BULK_DEVICES`](spacetree::registry::MAX_BULK_DEVICES) identities.
    async fn bulk(&self, devices: &[ExportImportDevice]) -> Result<BulkRegistryResult>;

    /// Starts a job exporting every identity, keys included.
    async fn start_export(&self) -> Result<RegistryJob>;

    /// Retrieves the status of a job.
    async fn job(&self, job_id: &str) -> Result<RegistryJob>;

    /// Downloads the line-delimited output of the last export job.
    async fn download_export(&self) -> Result<String>;

    /// Deletes an identity regardless of its version.
    async fn delete_device(&self, id: &str) -> Result<()>;
}
