use std::path::{Path, PathBuf};

use serde::Deserialize;

use spacetree::description::{ProvisioningDescription, SpaceDescription};

use tracing::{error, info, warn};

use crate::config::ProvisionerConfig;
use crate::error::{Error, ErrorKind, Result};

fn validation_error(description: impl Into<std::borrow::Cow<'static, str>>) -> Error {
    Error::new(ErrorKind::Validation, description)
}

// A referenced file holds a single space or a list of sibling spaces.
#[derive(Deserialize)]
#[serde(untagged)]
enum ReferencedSpaces {
    Many(Vec<SpaceDescription>),
    One(Box<SpaceDescription>),
}

impl From<ReferencedSpaces> for Vec<SpaceDescription> {
    fn from(value: ReferencedSpaces) -> Self {
        match value {
            ReferencedSpaces::Many(spaces) => spaces,
            ReferencedSpaces::One(space) => vec![*space],
        }
    }
}

/// Where a space count stands with respect to the service limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceLimitStatus {
    /// The count is below the warning threshold.
    WithinLimit,
    /// The count reached the warning threshold without exceeding the limit.
    CloseToLimit,
    /// The count exceeds the limit.
    OverLimit,
}

/// Compares a space count with the limits of a [`ProvisionerConfig`],
/// logging a warning or an error when the count is too high.
///
/// The check never prevents provisioning.
pub fn check_space_limit(count: usize, config: &ProvisionerConfig) -> SpaceLimitStatus {
    if count > config.space_limit {
        error!(
            "The description contains {count} spaces, more than the {} spaces supported by the service.",
            config.space_limit
        );
        SpaceLimitStatus::OverLimit
    } else if count >= config.space_warning_threshold {
        warn!(
            "The description contains {count} spaces, close to the {} spaces supported by the service.",
            config.space_limit
        );
        SpaceLimitStatus::CloseToLimit
    } else {
        SpaceLimitStatus::WithinLimit
    }
}

/// A resolved description along with the directory its relative file paths
/// refer to.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    /// The description, without space references left.
    pub description: ProvisioningDescription,
    /// Directory of the root description file.
    pub directory: PathBuf,
}

/// Loads a description file and resolves all of its space references.
///
/// References are resolved relative to the directory of the root file. Every
/// referenced file replaces the references of its space with the spaces it
/// describes.
///
/// # Errors
///
/// - The root file or a referenced file is missing or malformed
/// - A space declares both children and references to children
/// - A file references itself, directly or through other files
pub fn load(path: &Path, config: &ProvisionerConfig) -> Result<Definition> {
    let directory = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();

    let contents = read(path)?;
    let mut description: ProvisioningDescription = serde_yaml::from_str(&contents)
        .map_err(|e| validation_error(format!("Malformed description `{}`: {e}", path.display())))?;

    let mut chain = vec![identity(path)];
    for space in &mut description.spaces {
        resolve(space, &directory, &mut chain)?;
    }

    let count = description.space_count();
    info!("Loaded {count} spaces from `{}`", path.display());
    let _ = check_space_limit(count, config);

    Ok(Definition {
        description,
        directory,
    })
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            validation_error(format!("Missing description file `{}`", path.display()))
        } else {
            e.into()
        }
    })
}

fn identity(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn resolve(space: &mut SpaceDescription, directory: &Path, chain: &mut Vec<PathBuf>) -> Result<()> {
    if space.space_references.is_empty() {
        for child in &mut space.spaces {
            resolve(child, directory, chain)?;
        }
        return Ok(());
    }

    if !space.spaces.is_empty() {
        return Err(validation_error(format!(
            "The space `{}` declares both spaces and space references",
            space.name
        )));
    }

    let references = std::mem::take(&mut space.space_references);
    for reference in references {
        let path = directory.join(&reference.filename);
        let key = identity(&path);
        if chain.contains(&key) {
            return Err(validation_error(format!(
                "The space reference `{}` of `{}` forms a cycle",
                reference.filename, space.name
            )));
        }

        let contents = read(&path)?;
        let loaded: ReferencedSpaces = serde_yaml::from_str(&contents).map_err(|e| {
            validation_error(format!("Malformed space reference `{}`: {e}", path.display()))
        })?;
        let mut loaded: Vec<SpaceDescription> = loaded.into();

        chain.push(key);
        for child in &mut loaded {
            resolve(child, directory, chain)?;
        }
        let _ = chain.pop();

        space.spaces.extend(loaded);
    }

    Ok(())
}
