use duckdb::{AccessMode, Config, Connection};
use r2d2::ManageConnection;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// r2d2 manager for a single DuckDB database.
///
/// All pooled connections are clones of one root connection so they share a
/// single database instance; opening the same file twice in one process
/// would not.
pub struct DuckDBConnectionManager {
    root: Mutex<Connection>,
}

impl DuckDBConnectionManager {
    pub fn open(path: &Path) -> duckdb::Result<Self> {
        Ok(Self {
            root: Mutex::new(Connection::open(path)?),
        })
    }

    pub fn in_memory() -> duckdb::Result<Self> {
        Ok(Self {
            root: Mutex::new(Connection::open_in_memory()?),
        })
    }
}

/// Opens `path`, honouring the requested access mode.
pub fn open_connection(path: &Path, read_only: bool) -> duckdb::Result<Connection> {
    if read_only {
        let config = Config::default().access_mode(AccessMode::ReadOnly)?;
        Connection::open_with_flags(path, config)
    } else {
        Connection::open(path)
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        self.root
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_clone()
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute("SELECT 1", [])?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}
