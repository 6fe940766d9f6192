use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::Arc;

use wisp_core::manifest::Manifest;
use wisp_core::{Registry, WispError};

/// Load the manifest, derive the route registry, and serve it.
///
/// Manifest validation (including the zero-package rejection) happens
/// before the listening socket is bound.
pub fn run(manifest_path: &Path, port: u16) -> Result<()> {
    let manifest = match Manifest::load(manifest_path) {
        Ok(m) => m,
        Err(e @ WispError::ManifestNotFound(_)) => {
            return Err(anyhow!(
                "{e}\nusage: wisp run-local <manifest-path> [--port <port>]"
            ));
        }
        Err(e) => return Err(anyhow!("{e}")),
    };
    let root = manifest_path.parent().unwrap_or(Path::new(".")).to_path_buf();

    let registry = Arc::new(Registry::from_manifest(&root, &manifest));
    for route in registry.routes() {
        tracing::info!(
            route = %route.route_path,
            dir = %route.source_dir.display(),
            "registered"
        );
    }
    if registry.is_empty() {
        tracing::warn!("no servable routes; every request will fail");
    }
    if !action_runner::node_available() {
        tracing::warn!("no `node` executable on PATH; invocations will fail");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        tokio::select! {
            res = wisp_server::serve_on(registry, listener) => res,
            _ = tokio::signal::ctrl_c() => Ok(()),
        }
    })
}
