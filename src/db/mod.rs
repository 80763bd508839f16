//! Database layer
//!
//! Durable, transactional storage for users, OTP challenges, and sessions.
//! Supports:
//! - SQLite (default, for single-binary deployment)
//! - MySQL (for larger deployments)
//!
//! The driver is selected from configuration; repositories work against the
//! `DatabasePool` abstraction and never know the specific backend.

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
