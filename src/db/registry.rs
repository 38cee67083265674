use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const DATABASE_EXTENSION: &str = "duckdb";

/// Letters, digits, `_` and `-`: safe as a directory or file stem.
fn is_safe_identifier(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= 128
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Opaque identifier of the user issuing a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Accepts identifiers that are safe to use as a directory name.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        is_safe_identifier(raw).then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The database a request runs against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseRef {
    pub id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseInfo {
    pub id: String,
    /// True for the database named after its owner
    pub default: bool,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("invalid database name '{0}'")]
    InvalidName(String),
    #[error("database '{0}' not found")]
    NotFound(String),
    #[error("database '{0}' already exists")]
    AlreadyExists(String),
    #[error("database '{0}' is in use")]
    InUse(String),
    #[error("database storage error: {0}")]
    Io(String),
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::Io(err.to_string())
    }
}

/// Maps users to their DuckDB files under the data directory.
///
/// Every user has a default database, `<data_dir>/<user>/<user>.duckdb`,
/// created on first use. Further databases live next to it as
/// `<data_dir>/<user>/<name>.duckdb` and must be created explicitly.
pub struct DatabaseRegistry {
    data_dir: PathBuf,
}

impl DatabaseRegistry {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn user_dir(&self, user: &UserId) -> PathBuf {
        self.data_dir.join(user.as_str())
    }

    fn database_path(&self, user: &UserId, name: &str) -> PathBuf {
        self.user_dir(user)
            .join(format!("{}.{}", name, DATABASE_EXTENSION))
    }

    fn ensure_user_dir(&self, user: &UserId) -> PathBuf {
        let user_dir = self.user_dir(user);
        if !user_dir.exists() {
            if let Err(e) = std::fs::create_dir_all(&user_dir) {
                warn!("Failed to create database directory for {}: {}", user, e);
            }
        }
        user_dir
    }

    fn checked_name<'a>(&self, name: &'a str) -> Result<&'a str, RegistryError> {
        let name = name.trim();
        if is_safe_identifier(name) {
            Ok(name)
        } else {
            Err(RegistryError::InvalidName(name.to_string()))
        }
    }

    /// The database named `name`, or the user's default one when `name` is
    /// `None`. Named databases must already exist.
    pub fn resolve(&self, user: &UserId, name: Option<&str>) -> Result<DatabaseRef, RegistryError> {
        self.ensure_user_dir(user);

        let name = match name {
            None => user.as_str(),
            Some(raw) => self.checked_name(raw)?,
        };
        let path = self.database_path(user, name);

        if name != user.as_str() && !path.exists() {
            return Err(RegistryError::NotFound(name.to_string()));
        }

        debug!("Resolved database {} for {} at {}", name, user, path.display());
        Ok(DatabaseRef {
            id: name.to_string(),
            path,
        })
    }

    /// Reserves a new named database. The file itself appears when the first
    /// connection opens it.
    pub fn prepare_new(&self, user: &UserId, name: &str) -> Result<DatabaseRef, RegistryError> {
        let name = self.checked_name(name)?;
        std::fs::create_dir_all(self.user_dir(user))?;

        let path = self.database_path(user, name);
        if path.exists() {
            return Err(RegistryError::AlreadyExists(name.to_string()));
        }

        Ok(DatabaseRef {
            id: name.to_string(),
            path,
        })
    }

    /// Databases owned by `user`, sorted by name.
    pub fn list(&self, user: &UserId) -> Result<Vec<DatabaseInfo>, RegistryError> {
        let user_dir = self.ensure_user_dir(user);
        let mut databases = Vec::new();

        for entry in std::fs::read_dir(&user_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DATABASE_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            databases.push(DatabaseInfo {
                id: id.to_string(),
                default: id == user.as_str(),
                size_bytes: std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0),
            });
        }

        databases.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(databases)
    }

    /// Removes the database file and its write-ahead log. The caller must
    /// have released every connection to it first.
    pub fn remove(&self, database: &DatabaseRef) -> Result<(), RegistryError> {
        if !database.path.exists() {
            return Err(RegistryError::NotFound(database.id.clone()));
        }

        std::fs::remove_file(&database.path)?;
        let wal = wal_path(&database.path);
        if wal.exists() {
            std::fs::remove_file(&wal)?;
        }

        info!("Removed database {} at {}", database.id, database.path.display());
        Ok(())
    }
}

fn wal_path(path: &Path) -> PathBuf {
    let mut wal = path.as_os_str().to_owned();
    wal.push(".wal");
    PathBuf::from(wal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserId {
        UserId::parse("alice").unwrap()
    }

    #[test]
    fn parses_safe_identifiers_only() {
        assert!(UserId::parse("2f1c-44_ab").is_some());
        assert!(UserId::parse("").is_none());
        assert!(UserId::parse("../etc").is_none());
        assert!(UserId::parse("a b").is_none());
    }

    #[test]
    fn resolves_default_database_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DatabaseRegistry::new(dir.path());

        let db = registry.resolve(&alice(), None).unwrap();
        assert_eq!(db.id, "alice");
        assert_eq!(db.path, dir.path().join("alice").join("alice.duckdb"));
        assert!(dir.path().join("alice").is_dir());
    }

    #[test]
    fn named_database_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DatabaseRegistry::new(dir.path());

        assert_eq!(
            registry.resolve(&alice(), Some("sales")),
            Err(RegistryError::NotFound("sales".to_string()))
        );
        assert_eq!(
            registry.resolve(&alice(), Some("../bob/bob")),
            Err(RegistryError::InvalidName("../bob/bob".to_string()))
        );

        let sales = registry.prepare_new(&alice(), "sales").unwrap();
        std::fs::write(&sales.path, b"").unwrap();

        let resolved = registry.resolve(&alice(), Some("sales")).unwrap();
        assert_eq!(resolved, sales);
        assert_eq!(resolved.path, dir.path().join("alice").join("sales.duckdb"));
    }

    #[test]
    fn prepare_new_rejects_existing_name() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DatabaseRegistry::new(dir.path());
        let sales = registry.prepare_new(&alice(), "sales").unwrap();
        std::fs::write(&sales.path, b"").unwrap();

        assert_eq!(
            registry.prepare_new(&alice(), "sales"),
            Err(RegistryError::AlreadyExists("sales".to_string()))
        );
    }

    #[test]
    fn lists_and_removes_databases() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DatabaseRegistry::new(dir.path());
        let default = registry.resolve(&alice(), None).unwrap();
        std::fs::write(&default.path, b"abc").unwrap();
        let sales = registry.prepare_new(&alice(), "sales").unwrap();
        std::fs::write(&sales.path, b"").unwrap();
        std::fs::write(wal_path(&sales.path), b"").unwrap();
        std::fs::write(dir.path().join("alice").join("notes.txt"), b"").unwrap();

        let listed = registry.list(&alice()).unwrap();
        assert_eq!(
            listed,
            vec![
                DatabaseInfo {
                    id: "alice".to_string(),
                    default: true,
                    size_bytes: 3
                },
                DatabaseInfo {
                    id: "sales".to_string(),
                    default: false,
                    size_bytes: 0
                },
            ]
        );

        registry.remove(&sales).unwrap();
        assert!(!sales.path.exists());
        assert!(!wal_path(&sales.path).exists());
        assert_eq!(registry.remove(&sales), Err(RegistryError::NotFound("sales".to_string())));
        assert_eq!(registry.list(&alice()).unwrap().len(), 1);
    }
}
