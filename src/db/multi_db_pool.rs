use duckdb::Connection;
use std::collections::HashMap;
use std::ops::Deref;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::db::db_pool::open_connection;
use crate::db::registry::DatabaseRef;

/// One open database file. `leases` counts the connections handed out.
struct AttachedDb {
    root: Connection,
    leases: Arc<()>,
    last_used: u64,
}

impl AttachedDb {
    fn is_idle(&self) -> bool {
        Arc::strong_count(&self.leases) == 1
    }
}

/// A connection to a user database. Holds a lease on its root so the file is
/// not closed underneath it.
pub struct LeasedConnection {
    conn: Connection,
    _lease: Arc<()>,
}

impl Deref for LeasedConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

#[derive(Default)]
struct Attached {
    dbs: HashMap<PathBuf, AttachedDb>,
    clock: u64,
}

/// Hands out connections to user databases, keeping one root connection
/// per database file and cloning it for each request.
///
/// At most `max_open` roots stay open. When a new file is attached beyond
/// that, the least recently used roots without live connections are closed.
pub struct MultiDbConnectionManager {
    read_only: bool,
    max_open: usize,
    attached: Mutex<Attached>,
}

impl MultiDbConnectionManager {
    pub fn new(read_only: bool, max_open: usize) -> Self {
        Self {
            read_only,
            max_open: max_open.max(1),
            attached: Mutex::new(Attached::default()),
        }
    }

    pub fn connect(&self, database: &DatabaseRef) -> duckdb::Result<LeasedConnection> {
        let mut attached = self.attached.lock().unwrap_or_else(PoisonError::into_inner);
        attached.clock += 1;
        let now = attached.clock;

        if let Some(db) = attached.dbs.get_mut(&database.path) {
            db.last_used = now;
            return Ok(LeasedConnection {
                conn: db.root.try_clone()?,
                _lease: Arc::clone(&db.leases),
            });
        }

        if attached.dbs.len() >= self.max_open {
            // Room for one more root
            evict_idle(&mut attached.dbs, self.max_open - 1);
        }

        let root = open_connection(&database.path, self.read_only)?;
        let leases = Arc::new(());
        let conn = LeasedConnection {
            conn: root.try_clone()?,
            _lease: Arc::clone(&leases),
        };
        attached.dbs.insert(
            database.path.clone(),
            AttachedDb {
                root,
                leases,
                last_used: now,
            },
        );
        debug!("Attached database {} at {}", database.id, database.path.display());
        Ok(conn)
    }

    /// Closes the root of `database` so its file can be removed. Returns
    /// `false` while connections to it are still live.
    pub fn detach(&self, database: &DatabaseRef) -> bool {
        let mut attached = self.attached.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = match attached.dbs.get(&database.path) {
            Some(db) => db.is_idle(),
            None => return true,
        };
        if idle {
            attached.dbs.remove(&database.path);
            info!("Detached database {}", database.id);
        }
        idle
    }

    #[cfg(test)]
    fn open_count(&self) -> usize {
        self.attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dbs
            .len()
    }
}

/// Closes least recently used idle roots until at most `target` remain.
fn evict_idle(dbs: &mut HashMap<PathBuf, AttachedDb>, target: usize) {
    let mut idle: Vec<(u64, PathBuf)> = dbs
        .iter()
        .filter(|(_, db)| db.is_idle())
        .map(|(path, db)| (db.last_used, path.clone()))
        .collect();
    idle.sort();

    for (_, path) in idle {
        if dbs.len() <= target {
            break;
        }
        dbs.remove(&path);
        debug!("Closed idle database at {}", path.display());
    }

    if dbs.len() > target {
        warn!(
            "{} databases have live connections; keeping them open past the limit",
            dbs.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database(dir: &tempfile::TempDir, name: &str) -> DatabaseRef {
        DatabaseRef {
            id: name.to_string(),
            path: dir.path().join(format!("{name}.duckdb")),
        }
    }

    #[test]
    fn reuses_root_for_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = MultiDbConnectionManager::new(false, 4);
        let db = database(&dir, "a");

        manager.connect(&db).unwrap().execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        let conn = manager.connect(&db).unwrap();
        let count: i64 = conn.query_row("SELECT count(*) FROM t", [], |r| r.get(0)).unwrap();

        assert_eq!(count, 0);
        assert_eq!(manager.open_count(), 1);
    }

    #[test]
    fn closes_least_recently_used_idle_roots() {
        let dir = tempfile::tempdir().unwrap();
        let manager = MultiDbConnectionManager::new(false, 2);
        let (a, b, c) = (database(&dir, "a"), database(&dir, "b"), database(&dir, "c"));

        drop(manager.connect(&a).unwrap());
        drop(manager.connect(&b).unwrap());
        drop(manager.connect(&a).unwrap());
        drop(manager.connect(&c).unwrap());

        assert_eq!(manager.open_count(), 2);
        let attached = manager.attached.lock().unwrap();
        assert!(attached.dbs.contains_key(&a.path));
        assert!(!attached.dbs.contains_key(&b.path));
        assert!(attached.dbs.contains_key(&c.path));
    }

    #[test]
    fn leased_roots_stay_open_past_limit() {
        let dir = tempfile::tempdir().unwrap();
        let manager = MultiDbConnectionManager::new(false, 1);
        let (a, b) = (database(&dir, "a"), database(&dir, "b"));

        let held = manager.connect(&a).unwrap();
        let other = manager.connect(&b).unwrap();
        assert_eq!(manager.open_count(), 2);

        held.execute_batch("SELECT 1").unwrap();
        drop(held);
        drop(other);

        drop(manager.connect(&database(&dir, "c")).unwrap());
        assert_eq!(manager.open_count(), 1);
    }

    #[test]
    fn detach_waits_for_live_connections() {
        let dir = tempfile::tempdir().unwrap();
        let manager = MultiDbConnectionManager::new(false, 4);
        let db = database(&dir, "a");

        let conn = manager.connect(&db).unwrap();
        assert!(!manager.detach(&db));
        drop(conn);

        assert!(manager.detach(&db));
        assert_eq!(manager.open_count(), 0);
        assert!(manager.detach(&db));
    }
}
