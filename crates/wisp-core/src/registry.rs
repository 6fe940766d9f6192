use crate::descriptor::PackageDescriptor;
use crate::error::WispError;
use crate::manifest::Manifest;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// The single runtime family the emulator can execute.
pub const SUPPORTED_RUNTIME_FAMILY: &str = "nodejs";

/// Exported function invoked when the manifest action has no `main` field.
pub const DEFAULT_MAIN_EXPORT: &str = "main";

// ---------------------------------------------------------------------------
// Route
// ---------------------------------------------------------------------------

/// Mapping from an HTTP path prefix to an action's source location and
/// invocation metadata. Immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// `/{package}/{action}`, used as a path-prefix match key.
    pub route_path: String,
    /// `{project_root}/packages/{package}/{action}`.
    pub source_dir: PathBuf,
    /// Module loaded by the invoker, from the descriptor's `main` field.
    pub entry_module: String,
    /// Exported function called by the invoker.
    pub main_export: String,
    /// Manifest runtime identifier, e.g. `nodejs:18`.
    pub runtime: String,
    /// Build timeout budget from the manifest's `limits.timeout`.
    pub timeout: Option<Duration>,
    /// Build command derived from the descriptor's `build` script.
    pub build_command: Option<Vec<String>>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered, immutable set of routes derived from the manifest.
///
/// Construction failures are per-action: an unsupported runtime or a
/// missing/unparsable descriptor excludes that action (logged) without
/// affecting its siblings.
#[derive(Debug, Default)]
pub struct Registry {
    routes: Vec<Route>,
}

impl Registry {
    /// Walk the manifest's packages and actions in declaration order and
    /// build a Route for each action that passes validation.
    pub fn from_manifest(root: &Path, manifest: &Manifest) -> Self {
        let mut routes: Vec<Route> = Vec::new();

        for package in &manifest.packages {
            for action in &package.actions {
                let route_path = format!("/{}/{}", package.name, action.name);
                let source_dir = root
                    .join("packages")
                    .join(&package.name)
                    .join(&action.name);

                if !runtime_supported(&action.runtime) {
                    warn!(
                        route = %route_path,
                        runtime = %action.runtime,
                        "skipping action: unsupported runtime"
                    );
                    continue;
                }

                let descriptor = match PackageDescriptor::load(&source_dir) {
                    Ok(d) => d,
                    Err(e @ WispError::MissingDescriptor(_)) => {
                        warn!(route = %route_path, error = %e, "skipping action");
                        continue;
                    }
                    Err(e) => {
                        warn!(route = %route_path, error = %e, "skipping action");
                        continue;
                    }
                };

                if routes.iter().any(|r| r.route_path == route_path) {
                    // Prefix matching resolves to the first registration.
                    warn!(route = %route_path, "duplicate route path; first registration wins");
                }

                routes.push(Route {
                    route_path,
                    source_dir,
                    entry_module: descriptor.entry_module(),
                    main_export: action
                        .main
                        .clone()
                        .unwrap_or_else(|| DEFAULT_MAIN_EXPORT.to_string()),
                    runtime: action.runtime.clone(),
                    timeout: action
                        .limits
                        .as_ref()
                        .and_then(|l| l.timeout)
                        .map(Duration::from_millis),
                    build_command: descriptor
                        .build_script()
                        .map(|_| vec!["npm".to_string(), "run".to_string(), "build".to_string()]),
                });
            }
        }

        Self { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve a request path to the first route whose `route_path` is a
    /// prefix of it, in registration order.
    pub fn resolve(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|r| path.starts_with(&r.route_path))
    }
}

fn runtime_supported(runtime: &str) -> bool {
    match runtime.strip_prefix(SUPPORTED_RUNTIME_FAMILY) {
        Some("") => true,
        Some(rest) => rest.starts_with(':'),
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
