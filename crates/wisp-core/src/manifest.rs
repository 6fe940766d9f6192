use crate::error::{Result, WispError};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// Wall-clock budget for this action's build, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

// ---------------------------------------------------------------------------
// ManifestAction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestAction {
    pub name: String,
    /// Runtime identifier, e.g. `nodejs:18`.
    pub runtime: String,
    /// Name of the exported function to invoke. Defaults to `main`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Limits>,
}

// ---------------------------------------------------------------------------
// ManifestPackage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestPackage {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<ManifestAction>,
}

// ---------------------------------------------------------------------------
// Manifest (top-level)
// ---------------------------------------------------------------------------

/// The declarative project manifest: packages of named actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub packages: Vec<ManifestPackage>,
}

impl Manifest {
    /// Load and validate a manifest file.
    ///
    /// A manifest with zero packages is rejected here, before any route
    /// construction or socket binding happens.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(WispError::ManifestNotFound(path.to_path_buf()));
        }
        let data = std::fs::read_to_string(path)?;
        let manifest: Manifest = serde_yaml::from_str(&data)?;
        if manifest.packages.is_empty() {
            return Err(WispError::EmptyManifest(path.to_path_buf()));
        }
        Ok(manifest)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
