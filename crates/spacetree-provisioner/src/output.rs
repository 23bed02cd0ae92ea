use std::path::{Path, PathBuf};

use serde::Serialize;

use tracing::info;

use crate::error::Result;

/// File name of the raw registry export, next to the registry output.
pub const EXPORT_ARTIFACT: &str = "devices.txt";

/// Returns the path of the registry export artifact belonging to an output
/// file.
#[must_use]
pub fn export_artifact_path(output: &Path) -> PathBuf {
    output
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join(EXPORT_ARTIFACT)
}

/// Writes a value to a file as pretty JSON.
///
/// Maps with ordered keys, such as a `BTreeMap`, are written with sorted
/// keys.
///
/// # Errors
///
/// The value cannot be serialized or the file cannot be written.
pub async fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    let mut contents = serde_json::to_vec_pretty(value)?;
    contents.push(b'\n');
    tokio::fs::write(path, contents).await?;
    info!("Wrote `{}`", path.display());
    Ok(())
}
