//! Manifest file loading and storing.
//!
//! Interfaces and transforms are persisted as versioned JSON documents.
//! Loaders validate the version tag and symbol names; any failure is a
//! [`ManifestError`], which callers treat as *manifest-malformed*: the
//! affected pass becomes inert rather than aborting the pipeline.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::call_info::ComponentInterface;
use super::transform::ComponentInterfaceTransform;

/// Current manifest schema version.
pub const MANIFEST_VERSION: u32 = 1;

/// Errors that can occur when loading or storing a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported manifest version {found} (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("empty symbol name in manifest")]
    EmptyName,
}

#[derive(Serialize, Deserialize)]
struct InterfaceDoc {
    version: u32,
    interface: ComponentInterface,
}

#[derive(Serialize, Deserialize)]
struct TransformDoc {
    version: u32,
    transform: ComponentInterfaceTransform,
}

fn check_version(found: u32) -> Result<(), ManifestError> {
    if found != MANIFEST_VERSION {
        return Err(ManifestError::VersionMismatch { found, expected: MANIFEST_VERSION });
    }
    Ok(())
}

fn validate_interface(interface: &ComponentInterface) -> Result<(), ManifestError> {
    if interface.functions().any(String::is_empty) || interface.references().any(String::is_empty) {
        return Err(ManifestError::EmptyName);
    }
    Ok(())
}

/// Load a component interface from a manifest file.
pub fn load_interface(path: &Path) -> Result<ComponentInterface, ManifestError> {
    let text = fs::read_to_string(path)?;
    let doc: InterfaceDoc = serde_json::from_str(&text)?;
    check_version(doc.version)?;
    validate_interface(&doc.interface)?;
    Ok(doc.interface)
}

/// Store a component interface to a manifest file.
pub fn store_interface(path: &Path, interface: &ComponentInterface) -> Result<(), ManifestError> {
    let doc = InterfaceDoc { version: MANIFEST_VERSION, interface: interface.clone() };
    let json = serde_json::to_string_pretty(&doc)?;
    fs::write(path, json)?;
    Ok(())
}

/// Load a transform from a manifest file.
pub fn load_transform(path: &Path) -> Result<ComponentInterfaceTransform, ManifestError> {
    let text = fs::read_to_string(path)?;
    let doc: TransformDoc = serde_json::from_str(&text)?;
    check_version(doc.version)?;
    validate_interface(&doc.transform.interface)?;
    Ok(doc.transform)
}

/// Store a transform to a manifest file.
pub fn store_transform(
    path: &Path,
    transform: &ComponentInterfaceTransform,
) -> Result<(), ManifestError> {
    let doc = TransformDoc { version: MANIFEST_VERSION, transform: transform.clone() };
    let json = serde_json::to_string_pretty(&doc)?;
    fs::write(path, json)?;
    Ok(())
}
