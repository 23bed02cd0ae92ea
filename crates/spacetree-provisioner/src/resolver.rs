use std::collections::HashMap;

use spacetree::topology::{Device, Space};

use tracing::warn;

use uuid::Uuid;

use crate::error::Result;
use crate::service::TopologyService;

// Only an unambiguous match identifies an entity.
fn single<T>(mut matches: Vec<T>) -> Option<T> {
    if matches.len() == 1 { matches.pop() } else { None }
}

/// Maps the keys of a description to existing remote entities.
///
/// A lookup yields an entity only when exactly one remote entity matches the
/// key. No match or several matches both yield nothing, so the caller creates
/// a new entity.
#[derive(Debug)]
pub struct Resolver<'a, S: ?Sized> {
    service: &'a S,
}

impl<'a, S: TopologyService + ?Sized> Resolver<'a, S> {
    /// Creates a [`Resolver`] over a topology service.
    #[must_use]
    #[inline]
    pub const fn new(service: &'a S) -> Self {
        Self { service }
    }

    /// Finds the space with the given name under the given parent.
    ///
    /// # Errors
    ///
    /// The lookup failed.
    pub async fn space(&self, name: &str, parent_id: Option<Uuid>) -> Result<Option<Space>> {
        let spaces = self.service.find_spaces(name, parent_id).await?;
        if spaces.len() > 1 {
            warn!("Found {} spaces named `{name}` under the same parent", spaces.len());
        }
        Ok(single(spaces))
    }

    /// Finds the identifier of the keystore with the given name in a space.
    ///
    /// # Errors
    ///
    /// The lookup failed.
    pub async fn keystore(&self, name: &str, space_id: Uuid) -> Result<Option<Uuid>> {
        let keystores = self.service.find_keystores(name, space_id).await?;
        Ok(single(keystores).and_then(|keystore| keystore.id))
    }

    /// Finds the identifier of the matcher with the given name in a space.
    ///
    /// # Errors
    ///
    /// The lookup failed.
    pub async fn matcher(&self, name: &str, space_id: Uuid) -> Result<Option<Uuid>> {
        let matchers = self.service.matchers(space_id).await?;
        Ok(single(
            matchers
                .into_iter()
                .filter(|matcher| matcher.name == name)
                .collect(),
        )
        .and_then(|matcher| matcher.id))
    }

    /// Finds the devices with the given hardware identifiers, looking them up
    /// `group_size` at a time.
    ///
    /// The returned map only holds the hardware identifiers matched by
    /// exactly one device, lowercased.
    ///
    /// # Errors
    ///
    /// A lookup failed.
    pub async fn devices(
        &self,
        hardware_ids: &[&str],
        group_size: usize,
    ) -> Result<HashMap<String, Device>> {
        let mut found: HashMap<String, Vec<Device>> = HashMap::new();
        for group in hardware_ids.chunks(group_size.max(1)) {
            for device in self.service.find_devices(group).await? {
                found
                    .entry(device.hardware_id.to_lowercase())
                    .or_default()
                    .push(device);
            }
        }

        Ok(found
            .into_iter()
            .filter_map(|(hardware_id, devices)| single(devices).map(|d| (hardware_id, d)))
            .collect())
    }
}
