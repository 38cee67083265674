pub mod db_pool;
pub mod executor;
pub mod introspect;
pub mod multi_db_pool;
pub mod registry;
