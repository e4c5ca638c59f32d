//! Database module for the read-only warehouse pool

pub mod connection;

pub use connection::{check_connection, init_read_only_pool, pool_stats, DbPool, PoolStats};
