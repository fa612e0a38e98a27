//! Manifest helpers
//!
//! Manifests are opaque to the engine: each one is handed to every plugin
//! as a JSON value and never interpreted.

use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::error::Result;

/// One unit of infrastructure-as-data
pub type Manifest = JsonValue;

/// Split a multi-document YAML stream into manifests
///
/// Empty documents (`---` separators with no content) are skipped.
pub fn manifests_from_yaml(yaml: &str) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();

    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = JsonValue::deserialize(document)?;
        if !value.is_null() {
            manifests.push(value);
        }
    }

    Ok(manifests)
}

/// Best-effort `Kind/name` label for a manifest, for use in resource paths
pub fn resource_label(manifest: &Manifest) -> Option<String> {
    let kind = manifest.get("kind")?.as_str()?;
    let name = manifest
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(|n| n.as_str())?;
    Some(format!("{}/{}", kind, name))
}
