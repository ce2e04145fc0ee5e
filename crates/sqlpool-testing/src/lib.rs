//! # sqlpool-testing
//!
//! Test infrastructure for sqlpool.
//!
//! Provides [`MockDriver`], an in-memory [`Driver`](sqlpool::Driver) that
//! counts connections opened and closed, returns scripted rows, and fails
//! chosen operations. The end-to-end pool tests in this crate's `tests/`
//! directory are built on it.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlpool::Pool;
//! use sqlpool_testing::{MockDriver, MockOp};
//!
//! let driver = MockDriver::new();
//! let pool = Pool::connect(driver.clone(), "mock://").await?;
//!
//! driver.fail_next(MockOp::Query);
//! let rows = pool.query_rows("SELECT 1", &[]).await;
//! assert!(rows.err().is_some());
//!
//! pool.close().await;
//! assert_eq!(driver.stats().connects, driver.stats().closes);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod mock;

pub use mock::{MockConnection, MockDriver, MockError, MockOp, MockRow, MockStats};
