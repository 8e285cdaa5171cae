//! # sv-db
//!
//! SQLite persistence for transcoding jobs: an r2d2 pool with embedded
//! migrations, row-level query functions, and [`SqliteJobStore`] which
//! implements [`sv_core::JobStore`].

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
pub mod store;

pub use pool::{get_conn, init_memory_pool, init_pool, DbPool, PooledConnection};
pub use store::SqliteJobStore;
