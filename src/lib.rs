//! Transfer Preparer
//!
//! Moves newly created transfer requests out of PREPARING: picks the closest
//! usable source replica, checks that source and destination share a
//! transfertool, applies per-endpoint transfer limits and persists the outcome
//! (QUEUED, WAITING or NO_SOURCES) in one transaction.
//!
//! # Modules
//!
//! - [`core_types`] - Identifiers (RequestId, RseId, Did)
//! - [`catalog`] - Storage endpoints, replicas and distances
//! - [`request`] - Transfer requests and their state machine
//! - [`preparer`] - Candidate resolution, ranking, filtering, reduction and the pass itself
//! - [`throttler`] - Admission control against transfer limits
//! - [`store`] - Catalog access trait with PostgreSQL and in-memory backends
//! - [`db`] - Connection pool and schema
//! - [`config`] / [`logging`] - Daemon configuration and tracing setup

// Core types - must be first!
pub mod core_types;
pub mod error;

// Catalog model
pub mod catalog;
pub mod request;

// Preparation
pub mod preparer;
pub mod throttler;

// Persistence
pub mod db;
pub mod store;

// Runtime
pub mod config;
pub mod logging;

// Convenient re-exports at crate root
pub use catalog::{DistanceTable, Replica, ReplicaState, StorageEndpoint};
pub use config::{AppConfig, PreparerConfig, WaitingAssignmentPolicy};
pub use core_types::{Did, Ranking, RequestId, RseId};
pub use error::PreparerError;
pub use preparer::{PassSummary, Preparer};
pub use request::{RequestState, RequestUpdate, TransferRequest};
pub use store::{MemorySession, MemoryStore, PgSession, PreparerStore};
pub use throttler::{Admission, LimitStrategy, ThrottleKey, Throttler, ThrottlerMode, TransferLimit};
