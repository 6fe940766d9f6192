use crate::error::{Result, WispError};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Filename of the per-action package descriptor.
pub const DESCRIPTOR_FILE: &str = "package.json";

/// Entrypoint module used when the descriptor has no `main` field.
pub const DEFAULT_ENTRY_MODULE: &str = "index";

// ---------------------------------------------------------------------------
// PackageDescriptor
// ---------------------------------------------------------------------------

/// The `package.json` found in an action's source directory.
///
/// Only the fields the emulator consumes are modelled; everything else in
/// the file is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageDescriptor {
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub scripts: HashMap<String, String>,
}

impl PackageDescriptor {
    /// Load the descriptor from an action source directory.
    pub fn load(source_dir: &Path) -> Result<Self> {
        let path = source_dir.join(DESCRIPTOR_FILE);
        if !path.exists() {
            return Err(WispError::MissingDescriptor(path));
        }
        let data = std::fs::read_to_string(&path)?;
        serde_json::from_str(&data).map_err(|source| WispError::InvalidDescriptor { path, source })
    }

    /// The entrypoint module to `require`, defaulting to `index`.
    pub fn entry_module(&self) -> String {
        self.main
            .clone()
            .unwrap_or_else(|| DEFAULT_ENTRY_MODULE.to_string())
    }

    /// The declared build script, if any.
    pub fn build_script(&self) -> Option<&str> {
        self.scripts.get("build").map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
