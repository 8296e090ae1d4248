//! Storage path management, grounded on `storage::paths`'s `StoragePaths`.

use std::fs;
use std::path::PathBuf;

use crate::storage::error::{StoragePathsError, StoragePathsResult};

const DATA_DIR_NAME: &str = "data";
const SQL_DIR_NAME: &str = "sql";
const DATABASE_FILE_NAME: &str = "pscued.sqlite3";

#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub app_dir: PathBuf,
    pub data_dir: PathBuf,
    pub sql_dir: PathBuf,
}

impl StoragePaths {
    pub fn new(app_dir: PathBuf) -> StoragePathsResult<Self> {
        let data_dir = app_dir.join(DATA_DIR_NAME);
        let sql_dir = app_dir.join(SQL_DIR_NAME);
        let paths = Self {
            app_dir,
            data_dir,
            sql_dir,
        };
        paths.ensure_directories()?;
        Ok(paths)
    }

    pub fn database_file(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }

    pub fn ensure_directories(&self) -> StoragePathsResult<()> {
        for dir in [&self.app_dir, &self.data_dir] {
            if !dir.exists() {
                fs::create_dir_all(dir)
                    .map_err(|e| StoragePathsError::directory_create(dir.clone(), e))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_missing_directories() {
        let root = TempDir::new().unwrap();
        let app_dir = root.path().join("pscued");
        let paths = StoragePaths::new(app_dir.clone()).unwrap();
        assert!(paths.data_dir.exists());
        assert_eq!(paths.database_file(), paths.data_dir.join(DATABASE_FILE_NAME));
    }
}
