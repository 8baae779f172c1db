//! Postgres connection pool and schema migrations

mod migrations;
mod pool;

pub use pool::{Database, PoolStats};
