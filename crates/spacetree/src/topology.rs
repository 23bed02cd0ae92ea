use std::fmt;

use serde::{Deserialize, Serialize};

use uuid::Uuid;

/// Role identifier granting a user access to a space path.
pub const USER_ROLE_ID: &str = "b1ffdb77-c635-4e7e-ad25-948237d85b30";

/// Object identifier type of a user principal.
pub const USER_OBJECT_ID_TYPE: &str = "UserId";

/// Object identifier type of a user-defined function.
pub const USER_DEFINED_FUNCTION_OBJECT_ID_TYPE: &str = "UserDefinedFunctionId";

/// A node of the remote topology.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    /// Space identifier, assigned by the service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Space name, unique among its siblings.
    pub name: String,
    /// Space description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Human-readable name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    /// Space type, for example `Tenant` or `Room`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Parent space identifier, absent for root spaces.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_space_id: Option<Uuid>,
    /// Space subtype.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Space status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Materialized paths of the space, present when requested with the
    /// `fullpath` include.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub space_paths: Vec<String>,
    /// Properties of the space, present when requested with the
    /// `Properties` include.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Property>,
}

impl Space {
    /// Returns the value of the property with the given name, if any.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Returns the first materialized path of the space, if any.
    #[must_use]
    pub fn full_path(&self) -> Option<&str> {
        self.space_paths
            .first()
            .map(String::as_str)
            .filter(|path| !path.trim().is_empty())
    }
}

/// Status of a [`Resource`].
///
/// Parsed case-insensitively. Unknown values are preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceStatus {
    /// The resource is still being provisioned.
    #[default]
    Provisioning,
    /// The resource is ready to use.
    Running,
    /// The resource provisioning failed.
    Failed,
    /// The resource provisioning was cancelled.
    Cancelled,
    /// The resource is being deleted.
    Deleting,
    /// Any other status reported by the service.
    Other(String),
}

impl ResourceStatus {
    /// Whether the resource has left the provisioning state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Provisioning)
    }
}

impl From<String> for ResourceStatus {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "provisioning" => Self::Provisioning,
            "running" => Self::Running,
            "failed" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            "deleting" => Self::Deleting,
            _ => Self::Other(value),
        }
    }
}

impl From<ResourceStatus> for String {
    fn from(value: ResourceStatus) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provisioning => "Provisioning",
            Self::Running => "Running",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
            Self::Deleting => "Deleting",
            Self::Other(status) => status.as_str(),
        }
        .fmt(f)
    }
}

/// A provisioned capability attached to a space, such as an event
/// ingestion endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Resource identifier, assigned by the service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Resource type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Region hosting the resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Owning space.
    pub space_id: Uuid,
    /// Provisioning status, never sent on creation.
    #[serde(default, skip_serializing)]
    pub status: ResourceStatus,
}

/// A key-management container scoped to a space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Keystore {
    /// Keystore identifier, assigned by the service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Keystore name.
    pub name: String,
    /// Owning space.
    pub space_id: Uuid,
}

/// A sensor attached to a [`Device`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    /// Kind of data produced, for example `Temperature`.
    pub data_type: String,
    /// Sensor type.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// A device registered in the topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Device identifier, assigned by the service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Device name.
    pub name: String,
    /// Globally unique hardware identifier.
    pub hardware_id: String,
    /// Owning space.
    pub space_id: Uuid,
    /// Device status.
    #[serde(default = "Device::active")]
    pub status: String,
    /// Whether the service should also create a registry identity.
    #[serde(default, rename = "createIoTHubDevice")]
    pub create_registry_identity: bool,
    /// Attached sensors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sensors: Vec<Sensor>,
}

impl Device {
    /// Status given to newly created devices.
    #[must_use]
    pub fn active() -> String {
        "Active".into()
    }
}

/// A space-scoped taxonomy entry referenced by devices and sensors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceType {
    /// Type name.
    pub name: String,
    /// Type category, for example `SensorType`.
    pub category: String,
    /// Owning space.
    pub space_id: Uuid,
}

/// A condition of a [`Matcher`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition target, for example `Sensor`.
    pub target: String,
    /// JSON path evaluated on the target.
    pub path: String,
    /// Expected value, JSON-encoded.
    pub value: String,
    /// Comparison operator.
    pub comparison: String,
}

/// A rule associating telemetry with a user-defined function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matcher {
    /// Matcher identifier, assigned by the service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Matcher name.
    pub name: String,
    /// Owning space.
    pub space_id: Uuid,
    /// Conditions which must all hold.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A script executed by the service when one of its matchers fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDefinedFunction {
    /// Function identifier, assigned by the service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Function name.
    pub name: String,
    /// Owning space.
    pub space_id: Uuid,
    /// Identifiers of the matchers triggering the function.
    #[serde(default, deserialize_with = "matcher_ids")]
    pub matchers: Vec<Uuid>,
}

// The service returns matchers either as identifiers or as full objects.
fn matcher_ids<'de, D>(deserializer: D) -> Result<Vec<Uuid>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MatcherRef {
        Id(Uuid),
        Object { id: Uuid },
    }

    let refs = Vec::<MatcherRef>::deserialize(deserializer)?;
    Ok(refs
        .into_iter()
        .map(|r| match r {
            MatcherRef::Id(id) | MatcherRef::Object { id } => id,
        })
        .collect())
}

/// Grants an object a role on a space path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    /// Role identifier.
    pub role_id: String,
    /// Object receiving the role.
    pub object_id: String,
    /// Type of the object receiving the role.
    pub object_id_type: String,
    /// Space path the role is scoped to.
    pub path: String,
    /// Directory tenant of the object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Definition of a space property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyKey {
    /// Property name.
    pub name: String,
    /// Primitive type of the property values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primitive_data_type: Option<String>,
    /// Property description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Owning space.
    pub space_id: Uuid,
    /// Kind of entity the property applies to.
    #[serde(default = "PropertyKey::spaces_scope")]
    pub scope: String,
    /// Validation data, for example an enumeration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_data: Option<String>,
    /// Minimum value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    /// Maximum value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
}

impl PropertyKey {
    /// Scope of properties attached to spaces.
    #[must_use]
    pub fn spaces_scope() -> String {
        "Spaces".into()
    }
}

/// A property value assigned to a space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    /// Property name.
    pub name: String,
    /// Property value.
    pub value: String,
}

impl Property {
    /// Creates a [`Property`].
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Metadata sent alongside the contents of a space blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMetadata {
    /// Owning space.
    pub parent_id: Uuid,
    /// Blob name.
    pub name: String,
    /// Blob type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Blob subtype.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Blob description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Sharing mode.
    pub sharing: String,
}

/// A blob upload request.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobUpload {
    /// Blob metadata.
    pub metadata: BlobMetadata,
    /// Media type of the contents.
    pub content_type: String,
    /// Raw contents.
    pub contents: Vec<u8>,
    /// Blob to patch in place, if it already exists.
    pub existing: Option<Uuid>,
}

/// An egress endpoint receiving topology events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Endpoint identifier, assigned by the service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Endpoint type, for example `EventHub`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event types routed to the endpoint.
    #[serde(default)]
    pub event_types: Vec<String>,
    /// Primary connection string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
    /// Secondary connection string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_connection_string: Option<String>,
    /// Path, for example the event hub name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Endpoint {
    /// Whether this endpoint has the given type and shares at least one
    /// event type with the given list.
    #[must_use]
    pub fn overlaps(&self, kind: &str, event_types: &[String]) -> bool {
        self.kind == kind && self.event_types.iter().any(|e| event_types.contains(e))
    }
}
