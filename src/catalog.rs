//! Catalog records consumed by the preparer
//!
//! Endpoints, replicas and distances are owned by other services; the preparer
//! only reads them.

use rustc_hash::FxHashMap;

use crate::core_types::{Did, Ranking, RseId};

/// RSE attribute naming the transfertools an endpoint supports
pub const TRANSFERTOOL_ATTRIBUTE: &str = "transfertool";

/// A storage endpoint (RSE)
#[derive(Debug, Clone, PartialEq)]
pub struct StorageEndpoint {
    pub id: RseId,
    pub name: String,
    pub deleted: bool,
    /// Read availability; endpoints that cannot be read never act as sources
    pub available_read: bool,
    pub attributes: FxHashMap<String, String>,
}

impl StorageEndpoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: RseId::new(),
            name: name.into(),
            deleted: false,
            available_read: true,
            attributes: FxHashMap::default(),
        }
    }

    /// Whether replicas on this endpoint may be read from
    #[inline]
    pub fn is_readable(&self) -> bool {
        !self.deleted && self.available_read
    }
}

/// Replica state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ReplicaState {
    Available = 1,
    Unavailable = 2,
    Copying = 3,
    BeingDeleted = 4,
    Bad = 5,
}

impl ReplicaState {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }
}

/// A copy of a file on an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replica {
    pub did: Did,
    pub rse_id: RseId,
    pub state: ReplicaState,
}

impl Replica {
    pub fn available(did: Did, rse_id: RseId) -> Self {
        Self {
            did,
            rse_id,
            state: ReplicaState::Available,
        }
    }
}

/// Distance lookup keyed by (source, destination)
///
/// A missing pair means the destination cannot be reached from the source.
#[derive(Debug, Clone, Default)]
pub struct DistanceTable {
    rankings: FxHashMap<(RseId, RseId), Ranking>,
}

impl DistanceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the ranking for a pair
    pub fn insert(&mut self, src_rse_id: RseId, dest_rse_id: RseId, ranking: Ranking) {
        self.rankings.insert((src_rse_id, dest_rse_id), ranking);
    }

    pub fn get(&self, src_rse_id: RseId, dest_rse_id: RseId) -> Option<Ranking> {
        self.rankings.get(&(src_rse_id, dest_rse_id)).copied()
    }

    pub fn len(&self) -> usize {
        self.rankings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rankings.is_empty()
    }
}
