//! Catalog access used by a preparation pass
//!
//! A [`PreparerStore`] is one transaction's view of the catalog. Every read
//! and write of a pass goes through the same store value, and the caller
//! decides whether to commit or drop it.
//!
//! Two implementations:
//! - [`postgres::PgSession`] - a borrowed PostgreSQL transaction
//! - [`memory::MemorySession`] - a journaled session over an in-process catalog

pub mod memory;
pub mod postgres;

pub use memory::{MemorySession, MemoryStore};
pub use postgres::PgSession;

use async_trait::async_trait;

use crate::core_types::{RequestId, RseId};
use crate::error::PreparerError;
use crate::preparer::candidate::CandidateRow;
use crate::request::{RequestUpdate, TransferRequest};
use crate::throttler::{ThrottleKey, TransferLimit};

#[async_trait]
pub trait PreparerStore: Send {
    /// Select up to `limit` PREPARING requests, oldest first, and lock them
    /// for the rest of the transaction
    ///
    /// Requests already locked by a concurrent transaction are skipped rather
    /// than waited for.
    async fn lock_preparing_requests(
        &mut self,
        limit: usize,
    ) -> Result<Vec<TransferRequest>, PreparerError>;

    /// Candidate rows (replica x distance join) for the given requests
    async fn list_candidates(
        &mut self,
        request_ids: &[RequestId],
    ) -> Result<Vec<CandidateRow>, PreparerError>;

    /// Raw value of an RSE attribute
    async fn rse_attribute(
        &mut self,
        rse_id: RseId,
        key: &str,
    ) -> Result<Option<String>, PreparerError>;

    /// Shared configuration option
    async fn config_value(
        &mut self,
        section: &str,
        option: &str,
    ) -> Result<Option<String>, PreparerError>;

    /// Limit configured for `key`, locked until the transaction ends
    async fn lock_transfer_limit(
        &mut self,
        key: &ThrottleKey,
    ) -> Result<Option<TransferLimit>, PreparerError>;

    /// Requests in an admitted state sharing `key`, including writes made
    /// earlier in this transaction
    async fn count_admitted(&mut self, key: &ThrottleKey) -> Result<u64, PreparerError>;

    /// Apply a transition if the request is still PREPARING
    ///
    /// Returns `false` when the request moved on in the meantime.
    async fn update_request(&mut self, update: &RequestUpdate) -> Result<bool, PreparerError>;
}
