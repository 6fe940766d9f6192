use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WispError {
    #[error("manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("manifest declares no packages: {0}")]
    EmptyManifest(PathBuf),

    #[error("unsupported runtime '{runtime}' for {package}/{action}")]
    UnsupportedRuntime {
        package: String,
        action: String,
        runtime: String,
    },

    #[error("no package descriptor at {0}")]
    MissingDescriptor(PathBuf),

    #[error("invalid package descriptor at {path}: {source}")]
    InvalidDescriptor {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WispError>;
