use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] chronicle_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Sync config not found for id/prefix: {0}")]
    ConfigNotFound(String),
    #[error("{0}")]
    AmbiguousConfigId(String),
    #[error("A credential is required: pass --password or set CHRONICLE_PASSWORD")]
    MissingCredential,
    #[error("No enabled sync configurations. Run `chronicle config add` first.")]
    NoConfigs,
}
