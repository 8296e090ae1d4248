//! Error type owned by the PCD completion engine (component G).

use std::path::PathBuf;

use thiserror::Error;

pub type PcdResult<T> = Result<T, PcdError>;

#[derive(Debug, Error)]
pub enum PcdError {
    #[error("failed to probe {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not resolve an anchor directory for {word:?}")]
    InvalidAnchor { word: String },
}
