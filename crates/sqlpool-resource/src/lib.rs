//! # sqlpool-resource
//!
//! Generic bounded pool for expensive, long-lived resources such as database
//! connections.
//!
//! The pool knows nothing about the resource itself: a [`Manage`]
//! implementation supplies the constructor and destructor, and the pool
//! decides when to call them.
//!
//! ## Features
//!
//! - Grows on demand up to a fixed capacity, never shrinks while open
//! - Callers block (FIFO) when the pool is exhausted, giving natural
//!   backpressure
//! - Cancellation via [`CancellationToken`](tokio_util::sync::CancellationToken);
//!   a cancelled or dropped acquire never leaks a resource
//! - Graceful [`close`](ResourcePool::close) that waits for every borrowed
//!   resource to come back and be destroyed
//! - Consistent [`Stat`] snapshots for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use sqlpool_resource::{Manage, PoolConfig, ResourcePool};
//! use tokio_util::sync::CancellationToken;
//!
//! let pool = ResourcePool::new(manager, PoolConfig::new().max_size(5))?;
//!
//! // Get a resource from the pool
//! let conn = pool.acquire(&CancellationToken::new()).await?;
//! // Use resource...
//! // Resource automatically returned to pool on drop
//!
//! // Check pool status
//! let stat = pool.stat();
//! println!("Pool utilization: {:.1}%", stat.utilization());
//!
//! pool.close().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod stat;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::PoolError;

// Pool types
pub use pool::{Resource, ResourcePool};
pub use stat::Stat;

// Lifecycle management
pub use lifecycle::{Manage, ResourceMetadata, ResourceState};

// Cancellation is part of the acquire signature.
pub use tokio_util::sync::CancellationToken;
