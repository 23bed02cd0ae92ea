//! The `spacetree-provisioner` library crate turns a declarative
//! [`ProvisioningDescription`](spacetree::description::ProvisioningDescription)
//! into a live topology of a space management service, and removes it again.
//!
//! Core functionalities of this crate include:
//!
//! - Loading a description file, following the references to external files
//!   which hold child spaces
//! - Provisioning every space of the tree top-down, reusing the entities
//!   which already exist so that a run can be repeated safely
//! - Waiting for the resources of a space to be running before its devices
//!   are created
//! - Registering device identities in bulk in a device registry and
//!   retrieving their connection strings through an export job
//! - Removing a provisioned topology along with its device identities
//!
//! The remote collaborators are reached through the
//! [`TopologyService`](service::TopologyService) and
//! [`DeviceRegistry`](service::DeviceRegistry) traits. HTTP implementations
//! of both are provided, built on `reqwest`. All operations run on `tokio`,
//! and independent remote calls are awaited concurrently.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// An HTTP client of the topology management service.
pub mod client;
/// Settings of the provisioning, registration, and removal passes.
pub mod config;
/// Error management.
pub mod error;
/// Loading of description files.
pub mod loader;
/// Output files consumed by device configuration tooling.
pub mod output;
/// Fixed-interval polling of remote state.
pub mod poller;
/// The top-down space provisioner.
pub mod provisioner;
/// Bulk registration and removal of device identities.
pub mod registrar;
/// An HTTP client of the device identity registry.
pub mod registry_client;
/// Removal of a provisioned topology.
pub mod removal;
/// Lookup of existing remote entities.
pub mod resolver;
/// The interfaces of the remote collaborators.
pub mod service;

#[cfg(test)]
mod tests;
