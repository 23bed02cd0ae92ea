use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use uuid::Uuid;

use crate::topology::{
    BlobMetadata, Condition, Device, Endpoint, Matcher, Property, PropertyKey, Resource,
    RoleAssignment, Sensor, Space, SpaceType,
};

/// Name of the property extending the device-id prefix of child spaces.
pub const DEVICE_ID_PREFIX_PROPERTY: &str = "DeviceIdPrefix";
/// Name of the property holding the primary image path of a space.
pub const IMAGE_PATH_PROPERTY: &str = "ImagePath";
/// Name of the property holding the primary image blob of a space.
pub const IMAGE_BLOB_ID_PROPERTY: &str = "ImageBlobId";
/// Name of the property holding the detailed image path of a space.
pub const DETAILED_IMAGE_PATH_PROPERTY: &str = "DetailedImagePath";
/// Name of the property holding the detailed image blob of a space.
pub const DETAILED_IMAGE_BLOB_ID_PROPERTY: &str = "DetailedImageBlobId";

/// The root of a declarative description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningDescription {
    /// Egress endpoints created once all spaces exist.
    #[serde(default)]
    pub endpoints: Vec<EndpointDescription>,
    /// Root spaces.
    #[serde(default)]
    pub spaces: Vec<SpaceDescription>,
}

/// A pointer to an external file describing child spaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceReference {
    /// File name, relative to the directory of the root description.
    pub filename: String,
}

/// A space of the description tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpaceDescription {
    /// Space name, unique among its siblings.
    pub name: String,
    /// Space description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Human-readable name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    /// Space type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Space subtype.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_type: Option<String>,
    /// Name of the keystore to create in this space.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keystore_name: Option<String>,
    /// External files holding the children of this space.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub space_references: Vec<SpaceReference>,
    /// Child spaces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spaces: Vec<SpaceDescription>,
    /// Devices located in this space.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<DeviceDescription>,
    /// Resources attached to this space.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceDescription>,
    /// Types defined in this space.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<TypeDescription>,
    /// Names of the users granted access to this space.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    /// Property definitions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub property_keys: Vec<PropertyKeyDescription>,
    /// Property values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<PropertyDescription>,
    /// Telemetry matchers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<MatcherDescription>,
    /// User-defined functions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_defined_functions: Vec<UserDefinedFunctionDescription>,
    /// Role assignments of named objects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub role_assignments: Vec<RoleAssignmentDescription>,
    /// Blobs uploaded to this space.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blobs: Vec<BlobDescription>,
}

/// A device of the description tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescription {
    /// Device name.
    pub name: String,
    /// Globally unique hardware identifier.
    pub hardware_id: String,
    /// Attached sensors.
    #[serde(default)]
    pub sensors: Vec<SensorDescription>,
    /// Signed token assigned during provisioning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sas_token: Option<String>,
    /// Owning space assigned during provisioning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_id: Option<Uuid>,
}

/// A sensor of a [`DeviceDescription`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorDescription {
    /// Kind of data produced.
    pub data_type: String,
    /// Sensor type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// A resource of the description tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescription {
    /// Resource type.
    #[serde(rename = "type")]
    pub kind: String,
}

/// A type of the description tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescription {
    /// Type name.
    pub name: String,
    /// Type category.
    pub category: String,
}

/// A matcher selecting sensors by data type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatcherDescription {
    /// Matcher name.
    pub name: String,
    /// Sensor data type selected by the matcher.
    pub data_type_value: String,
}

/// A user-defined function of the description tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDefinedFunctionDescription {
    /// Function name.
    pub name: String,
    /// Names of the matchers triggering the function.
    #[serde(default)]
    pub matcher_names: Vec<String>,
    /// Script file, relative to the directory of the root description.
    pub script: String,
}

/// A role assignment of a named object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignmentDescription {
    /// Type of the object receiving the role.
    pub object_id_type: String,
    /// Name of the object receiving the role.
    pub object_name: String,
    /// Role identifier.
    pub role_id: String,
}

/// A property definition of the description tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyKeyDescription {
    /// Property name.
    pub name: String,
    /// Primitive type of the property values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primitive_data_type: Option<String>,
    /// Property description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Validation data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_data: Option<String>,
    /// Minimum value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    /// Maximum value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
}

/// A property value of the description tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDescription {
    /// Property name.
    pub name: String,
    /// Property value.
    pub value: String,
}

/// A blob of the description tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobDescription {
    /// Blob name.
    pub name: String,
    /// Blob type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Blob subtype.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Blob description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Contents file, relative to the directory of the root description.
    pub filepath: String,
    /// Media type of the contents.
    pub content_type: String,
    /// Whether this is the primary image of the space.
    #[serde(default)]
    pub is_primary_blob: bool,
}

/// An egress endpoint of the description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescription {
    /// Endpoint type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Event types routed to the endpoint.
    #[serde(default)]
    pub event_types: Vec<String>,
}

/// Connection settings of the endpoints created by a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointConnection {
    /// Primary connection string.
    pub connection_string: String,
    /// Secondary connection string.
    pub secondary_connection_string: String,
    /// Endpoint path.
    pub path: String,
}

impl EndpointDescription {
    /// Builds the [`Endpoint`] to create.
    #[must_use]
    pub fn to_endpoint(&self, connection: &EndpointConnection) -> Endpoint {
        Endpoint {
            id: None,
            kind: self.kind.clone(),
            event_types: self.event_types.clone(),
            connection_string: Some(connection.connection_string.clone()),
            secondary_connection_string: Some(connection.secondary_connection_string.clone()),
            path: Some(connection.path.clone()),
        }
    }
}

impl SpaceDescription {
    /// Creates a [`SpaceDescription`] with the given name and type.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Some(kind.into()),
            ..Self::default()
        }
    }

    /// Adds a child space.
    #[must_use]
    pub fn space(mut self, space: SpaceDescription) -> Self {
        self.spaces.push(space);
        self
    }

    /// Adds a device.
    #[must_use]
    pub fn device(mut self, device: DeviceDescription) -> Self {
        self.devices.push(device);
        self
    }

    /// Declares the keystore of this space.
    #[must_use]
    pub fn keystore(mut self, name: impl Into<String>) -> Self {
        self.keystore_name = Some(name.into());
        self
    }

    /// Adds a resource.
    #[must_use]
    pub fn resource(mut self, kind: impl Into<String>) -> Self {
        self.resources.push(ResourceDescription { kind: kind.into() });
        self
    }

    /// Builds the [`Space`] to create under the given parent.
    #[must_use]
    pub fn to_space(&self, parent_id: Option<Uuid>) -> Space {
        Space {
            name: self.name.clone(),
            description: self.description.clone(),
            friendly_name: self.friendly_name.clone(),
            kind: self.kind.clone(),
            subtype: self.sub_type.clone(),
            parent_space_id: parent_id,
            ..Space::default()
        }
    }

    /// Number of spaces in this subtree, this space included.
    #[must_use]
    pub fn space_count(&self) -> usize {
        1 + self.spaces.iter().map(Self::space_count).sum::<usize>()
    }

    /// Returns the value of the property with the given name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Visits this space and all of its descendants, depth-first.
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a SpaceDescription)) {
        f(self);
        for child in &self.spaces {
            child.visit(f);
        }
    }

    // Only the spaces on the returned path are modified.
    fn retain_path_to(&mut self, name: &str) -> bool {
        if self.name == name {
            return true;
        }

        if let Some(index) = self.spaces.iter_mut().position(|s| s.retain_path_to(name)) {
            let kept = self.spaces.swap_remove(index);
            self.spaces = vec![kept];
            return true;
        }

        false
    }
}

impl DeviceDescription {
    /// Creates a [`DeviceDescription`] without sensors.
    #[must_use]
    pub fn new(name: impl Into<String>, hardware_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hardware_id: hardware_id.into(),
            ..Self::default()
        }
    }

    /// Adds a sensor.
    #[must_use]
    pub fn sensor(mut self, data_type: impl Into<String>) -> Self {
        self.sensors.push(SensorDescription {
            data_type: data_type.into(),
            kind: None,
        });
        self
    }

    /// Builds the [`Device`] to create in the given space.
    #[must_use]
    pub fn to_device(&self, space_id: Uuid) -> Device {
        Device {
            id: None,
            name: self.name.clone(),
            hardware_id: self.hardware_id.clone(),
            space_id,
            status: Device::active(),
            create_registry_identity: true,
            sensors: self
                .sensors
                .iter()
                .map(|s| Sensor {
                    data_type: s.data_type.clone(),
                    kind: s.kind.clone(),
                })
                .collect(),
        }
    }
}

impl ResourceDescription {
    /// Builds the [`Resource`] to create in the given space.
    #[must_use]
    pub fn to_resource(&self, space_id: Uuid) -> Resource {
        Resource {
            kind: self.kind.clone(),
            space_id,
            ..Resource::default()
        }
    }
}

impl TypeDescription {
    /// Builds the [`SpaceType`] to create in the given space.
    #[must_use]
    pub fn to_type(&self, space_id: Uuid) -> SpaceType {
        SpaceType {
            name: self.name.clone(),
            category: self.category.clone(),
            space_id,
        }
    }
}

impl MatcherDescription {
    /// Builds the [`Matcher`] to create in the given space.
    #[must_use]
    pub fn to_matcher(&self, space_id: Uuid) -> Matcher {
        Matcher {
            id: None,
            name: self.name.clone(),
            space_id,
            conditions: vec![Condition {
                target: "Sensor".into(),
                path: "$.dataType".into(),
                value: format!("\"{}\"", self.data_type_value),
                comparison: "Equals".into(),
            }],
        }
    }
}

impl RoleAssignmentDescription {
    /// Builds the [`RoleAssignment`] of the given object on a space path.
    #[must_use]
    pub fn to_role_assignment(
        &self,
        object_id: impl Into<String>,
        tenant_id: Option<&str>,
        path: impl Into<String>,
    ) -> RoleAssignment {
        RoleAssignment {
            role_id: self.role_id.clone(),
            object_id: object_id.into(),
            object_id_type: self.object_id_type.clone(),
            path: path.into(),
            tenant_id: tenant_id.map(str::to_owned),
        }
    }
}

impl PropertyKeyDescription {
    /// Builds the [`PropertyKey`] to create in the given space.
    #[must_use]
    pub fn to_property_key(&self, space_id: Uuid) -> PropertyKey {
        PropertyKey {
            name: self.name.clone(),
            primitive_data_type: self.primitive_data_type.clone(),
            description: self.description.clone(),
            space_id,
            scope: PropertyKey::spaces_scope(),
            validation_data: self.validation_data.clone(),
            min: self.min.clone(),
            max: self.max.clone(),
        }
    }
}

impl PropertyDescription {
    /// Builds the [`Property`] to assign.
    #[must_use]
    pub fn to_property(&self) -> Property {
        Property::new(self.name.clone(), self.value.clone())
    }
}

impl BlobDescription {
    /// Builds the [`BlobMetadata`] of a blob in the given space.
    #[must_use]
    pub fn to_metadata(&self, space_id: Uuid) -> BlobMetadata {
        BlobMetadata {
            parent_id: space_id,
            name: self.name.clone(),
            kind: self.kind.clone(),
            subtype: self.subtype.clone(),
            description: self.description.clone(),
            sharing: "None".into(),
        }
    }

    /// Names of the path and blob-id properties tracking this blob.
    #[must_use]
    pub const fn property_names(&self) -> (&'static str, &'static str) {
        if self.is_primary_blob {
            (IMAGE_PATH_PROPERTY, IMAGE_BLOB_ID_PROPERTY)
        } else {
            (DETAILED_IMAGE_PATH_PROPERTY, DETAILED_IMAGE_BLOB_ID_PROPERTY)
        }
    }
}

impl ProvisioningDescription {
    /// Number of spaces in the whole description, roots included.
    #[must_use]
    pub fn space_count(&self) -> usize {
        self.spaces.iter().map(SpaceDescription::space_count).sum()
    }

    /// Names of all users referenced by any space.
    #[must_use]
    pub fn users(&self) -> BTreeSet<&str> {
        let mut users = BTreeSet::new();
        for root in &self.spaces {
            root.visit(&mut |space| users.extend(space.users.iter().map(String::as_str)));
        }
        users
    }

    /// All devices of the description, depth-first.
    #[must_use]
    pub fn devices(&self) -> Vec<&DeviceDescription> {
        let mut devices = Vec::new();
        for root in &self.spaces {
            root.visit(&mut |space| devices.extend(space.devices.iter()));
        }
        devices
    }

    /// Groups all devices by their device-id prefix.
    ///
    /// The prefix of a space holding devices is the prefix inherited from its
    /// ancestors followed by its capitalized name without blanks. A space
    /// declaring the [`DEVICE_ID_PREFIX_PROPERTY`] property extends the prefix
    /// inherited by its children.
    #[must_use]
    pub fn devices_by_prefix(&self) -> BTreeMap<String, Vec<DeviceDescription>> {
        let mut devices = BTreeMap::new();
        collect_devices_by_prefix(&self.spaces, "", &mut devices);
        devices
    }

    /// Restricts the description to the subtree rooted at the first space
    /// named `name`, found depth-first.
    ///
    /// The ancestors of that space are kept, without their other children,
    /// so that the subtree is still attached to its parents.
    ///
    /// Returns `false`, leaving the description untouched, if no space has
    /// the given name.
    pub fn retain_sub_tenant(&mut self, name: &str) -> bool {
        let Some(index) = self
            .spaces
            .iter_mut()
            .position(|root| root.retain_path_to(name))
        else {
            return false;
        };

        let root = self.spaces.swap_remove(index);
        self.spaces = vec![root];
        true
    }
}

fn collect_devices_by_prefix(
    spaces: &[SpaceDescription],
    parent_prefix: &str,
    devices: &mut BTreeMap<String, Vec<DeviceDescription>>,
) {
    for space in spaces {
        if !space.devices.is_empty() {
            let prefix = format!("{parent_prefix}{}", prefix_segment(&space.name));
            devices
                .entry(prefix)
                .or_default()
                .extend(space.devices.iter().cloned());
        }

        if !space.spaces.is_empty() {
            let extension = space.property(DEVICE_ID_PREFIX_PROPERTY).unwrap_or_default();
            collect_devices_by_prefix(
                &space.spaces,
                &format!("{parent_prefix}{extension}"),
                devices,
            );
        }
    }
}

fn prefix_segment(name: &str) -> String {
    let mut chars = name.chars();
    let capitalized = match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
        None => String::new(),
    };
    capitalized.split_whitespace().collect()
}
