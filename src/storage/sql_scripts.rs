//! Ordered SQL migration script loader, grounded on `storage::sql_scripts`'s
//! `SqlScriptCatalog`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;

use crate::storage::error::{SqlScriptError, SqlScriptResult};

#[derive(Debug, Clone)]
pub struct SqlScript {
    pub path: PathBuf,
    pub name: Arc<str>,
    pub order: u32,
    pub statements: Arc<[String]>,
}

#[derive(Debug, Clone)]
pub struct SqlScriptCatalog {
    scripts: Arc<[SqlScript]>,
}

impl SqlScriptCatalog {
    pub async fn load(dir: impl AsRef<Path>) -> SqlScriptResult<Self> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Err(SqlScriptError::DirectoryMissing {
                path: dir.to_path_buf(),
            });
        }

        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|err| SqlScriptError::read_directory(dir.to_path_buf(), err))?;

        let mut scripts = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| SqlScriptError::walk_directory(dir.to_path_buf(), err))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("sql") {
                continue;
            }

            let file_name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| SqlScriptError::InvalidFileName { path: path.clone() })?;
            let order = parse_order(file_name)?;
            let content = fs::read_to_string(&path)
                .await
                .map_err(|err| SqlScriptError::read_file(path.clone(), err))?;
            let statements = parse_statements(&content);
            if statements.is_empty() {
                continue;
            }

            scripts.push(SqlScript {
                path: path.clone(),
                name: Arc::<str>::from(file_name.to_string()),
                order,
                statements: statements.into(),
            });
        }

        scripts.sort_by(|a, b| match a.order.cmp(&b.order) {
            std::cmp::Ordering::Equal => a.name.cmp(&b.name),
            other => other,
        });

        Ok(Self {
            scripts: scripts.into(),
        })
    }

    /// Catalog with no scripts, used when the sql directory can't be found
    /// (e.g. schema already applied by a prior run on a read-only install).
    pub fn load_empty() -> Self {
        Self {
            scripts: Arc::from(Vec::new()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SqlScript> {
        self.scripts.iter()
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}

/// Split a script's content into individual statements on `;` terminators,
/// stripping line comments. Block comments and triggers are not needed by
/// this crate's fixed schema.
fn parse_statements(content: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    for line in content.lines() {
        let stripped = match line.find("--") {
            Some(idx) => &line[..idx],
            None => line,
        };
        let stripped = stripped.trim();
        if stripped.is_empty() {
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(stripped);
        if stripped.ends_with(';') {
            current.pop();
            let stmt = current.trim().to_string();
            if !stmt.is_empty() {
                statements.push(stmt);
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

fn parse_order(filename: &str) -> SqlScriptResult<u32> {
    let digits: String = filename
        .split(['_', '-'])
        .next()
        .unwrap_or_default()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        return Err(SqlScriptError::MissingOrder {
            filename: filename.to_string(),
        });
    }
    digits
        .parse::<u32>()
        .map_err(|err| SqlScriptError::ParseOrder {
            filename: filename.to_string(),
            source: err,
        })
}
