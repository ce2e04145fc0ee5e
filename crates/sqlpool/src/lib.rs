//! # sqlpool
//!
//! Async connection pool for SQL databases.
//!
//! The pool is driver-agnostic: plug in any client by implementing
//! [`Driver`] and [`Connection`]. Connections are opened on demand up to a
//! fixed capacity, reused across callers and closed when the pool closes.
//!
//! ## Features
//!
//! - **Bounded**: never more than `max_connections` open connections;
//!   callers wait in arrival order when all are busy
//! - **Validated startup**: [`Pool::connect`] opens one connection before
//!   returning, so a bad target fails fast
//! - **Scoped results**: cursors, single-row results and transactions hold
//!   their connection until they finish and return it exactly once, on
//!   success and on error alike
//! - **Uniform errors**: a cursor or row whose connection could not be
//!   borrowed carries the error and reports it on first use
//! - **Graceful shutdown**: [`Pool::close`] waits for every borrowed
//!   connection to come back and be closed
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlpool::{Pool, PoolBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sqlpool::Error> {
//!     let pool = PoolBuilder::new()
//!         .max_connections(10)
//!         .build(MyDriver::default(), "postgres://localhost/app")
//!         .await?;
//!
//!     let tag = pool
//!         .execute("UPDATE users SET active = $1", &[true.into()])
//!         .await?;
//!     println!("updated {} rows", tag.rows_affected());
//!
//!     let user = pool
//!         .query_row("SELECT name FROM users WHERE id = $1", &[1.into()])
//!         .await
//!         .get()
//!         .await?;
//!
//!     let tx = pool.begin_transaction().await?;
//!     // ...
//!     tx.commit().await?;
//!
//!     println!("pool: {:?}", pool.stat());
//!     pool.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod instrumentation;
pub mod manager;
pub mod pool;
pub mod rows;
pub mod transaction;
pub mod value;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::{BoxError, Error, Result, SharedError};

// Driver seam
pub use driver::{Connection, Driver};
pub use manager::ConnectionManager;

// Implementations of `Driver` and `Connection` use this attribute.
pub use async_trait::async_trait;

// Pool types
pub use connection::{DriverRow, PoolConnection};
pub use pool::{Pool, PoolBuilder};
pub use rows::{PoolRow, PoolRows};
pub use transaction::PoolTransaction;

// Values
pub use value::{CommandTag, SqlValue};

// Re-exported from the resource pool
pub use sqlpool_resource::{CancellationToken, ResourceMetadata, Stat};
