//! The data model shared by the `spacetree` provisioning tools.
//!
//! This crate provides:
//!
//! - The declarative description of a facility topology. A topology is a
//!   tree of spaces (tenant, brand, hotel, floor, room, ...) where every space
//!   may declare devices with their sensors, resources, types, keystores,
//!   matchers, user-defined functions, role assignments, property keys,
//!   properties, and blobs. A space can also reference external files which
//!   contain its children.
//! - The wire structures exchanged with the topology management service,
//!   the remote owner of spaces, resources, devices, and keystores.
//! - The wire structures exchanged with the device identity registry, the
//!   remote owner of device credentials.
//!
//! The description structures are deserialized from a declarative file and
//! then walked by a provisioner, which translates each of them into one or
//! more wire structures.
//!
//! All algorithms in this crate are pure: they inspect or reshape a
//! description tree without performing any input/output operation.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Declarative description of a facility topology.
pub mod description;
/// Device identity registry structures.
pub mod registry;
/// Topology management service structures.
pub mod topology;
/// Mapping between user names and directory object identifiers.
pub mod users;

#[cfg(test)]
pub(crate) fn serialize<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap()
}

#[cfg(test)]
pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
    serde_json::from_value(value).unwrap()
}
