//! Error types owned by the persistence manager (component H).
//!
//! Mirrors the shape of `storage::error` (one enum per concern, helper
//! constructors, `#[from]` where unambiguous) minus any encryption-specific
//! variants, which have no counterpart here.

use std::path::PathBuf;

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;
pub type DatabaseResult<T> = Result<T, DatabaseError>;
pub type StoragePathsResult<T> = Result<T, StoragePathsError>;
pub type RepositoryResult<T> = Result<T, RepositoryError>;
pub type SqlScriptResult<T> = Result<T, SqlScriptError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Paths(#[from] StoragePathsError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    SqlScript(#[from] SqlScriptError),
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("failed to open database at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("migration failed: {source}")]
    Migration {
        #[source]
        source: sqlx::Error,
    },

    #[error("database lock contention exceeded retry budget")]
    Busy,

    #[error("database returned no valid schema; treating as empty")]
    Corruption,
}

impl DatabaseError {
    pub fn open(path: PathBuf, source: sqlx::Error) -> Self {
        Self::Open { path, source }
    }
}

#[derive(Debug, Error)]
pub enum StoragePathsError {
    #[error("application directory is not configured")]
    AppDirectoryMissing,

    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to access directory {path}: {source}")]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoragePathsError {
    pub fn directory_create(path: PathBuf, source: std::io::Error) -> Self {
        Self::DirectoryCreate { path, source }
    }

    pub fn directory_access(path: PathBuf, source: std::io::Error) -> Self {
        Self::DirectoryAccess { path, source }
    }
}

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("command key not found: {command}")]
    CommandNotFound { command: String },
}

#[derive(Debug, Error)]
pub enum SqlScriptError {
    #[error("sql directory missing: {path}")]
    DirectoryMissing { path: PathBuf },

    #[error("failed to read sql directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk sql directory {path}: {source}")]
    WalkDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read sql file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sql file name is not valid utf-8: {path}")]
    InvalidFileName { path: PathBuf },

    #[error("sql file {filename} is missing a numeric order prefix")]
    MissingOrder { filename: String },

    #[error("sql file {filename} has an unparsable order prefix: {source}")]
    ParseOrder {
        filename: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

impl SqlScriptError {
    pub fn read_directory(path: PathBuf, source: std::io::Error) -> Self {
        Self::ReadDirectory { path, source }
    }

    pub fn walk_directory(path: PathBuf, source: std::io::Error) -> Self {
        Self::WalkDirectory { path, source }
    }

    pub fn read_file(path: PathBuf, source: std::io::Error) -> Self {
        Self::ReadFile { path, source }
    }
}
