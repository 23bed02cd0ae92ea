use indexmap::IndexMap;

use serde::{Deserialize, Deserializer, Serialize};

/// Directory object identifiers of the users named in a description.
///
/// User names are compared case-insensitively, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserObjectIds(IndexMap<String, String>);

impl UserObjectIds {
    /// Creates an empty [`UserObjectIds`].
    #[must_use]
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Adds the object identifier of a user, replacing any previous one.
    #[must_use]
    pub fn user(mut self, name: &str, object_id: impl Into<String>) -> Self {
        let _ = self.0.insert(Self::key(name), object_id.into());
        self
    }

    /// Returns the non-blank object identifier of a user.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&Self::key(name))
            .map(String::as_str)
            .filter(|oid| !oid.trim().is_empty())
    }

    /// Returns the names, among the given ones, which lack an object
    /// identifier.
    #[must_use]
    pub fn missing<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        names
            .into_iter()
            .filter(|name| self.get(name).is_none())
            .collect()
    }

    /// Number of users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no users.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn key(name: &str) -> String {
        name.trim().to_lowercase()
    }
}

impl<'de> Deserialize<'de> for UserObjectIds {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = IndexMap::<String, String>::deserialize(deserializer)?;
        Ok(raw
            .into_iter()
            .fold(Self::new(), |users, (name, oid)| users.user(&name, oid)))
    }
}
