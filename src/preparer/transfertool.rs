//! Transfertool Compatibility
//!
//! An endpoint advertises the transfertools it can be driven by through the
//! `transfertool` RSE attribute. A candidate row survives only if its source
//! and destination share at least one tool.
//!
//! Attribute lookups go through [`TransfertoolCache`], a TTL cache owned by
//! the [`TransfertoolResolver`]. Callers that change attributes out of band
//! (tests, admin tooling) call [`TransfertoolResolver::invalidate`].

use cached::{Cached, TimedCache};
use std::collections::BTreeSet;
use std::sync::Mutex;
use tracing::{debug, warn};

use super::candidate::CandidateRow;
use crate::catalog::TRANSFERTOOL_ATTRIBUTE;
use crate::core_types::RseId;
use crate::error::PreparerError;
use crate::store::PreparerStore;

/// Set of transfertool identifiers, kept sorted
pub type TransfertoolSet = BTreeSet<String>;

/// Separator used both in the RSE attribute and in the rendered intersection
pub const TRANSFERTOOL_SEPARATOR: char = ',';

/// Transfertools assumed for endpoints without a usable attribute
pub const DEFAULT_TRANSFERTOOLS: [&str; 2] = ["fts3", "globus"];

/// Candidate row that passed the compatibility check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibleCandidate {
    pub row: CandidateRow,
    /// Sorted, comma-separated intersection of source and destination tools
    pub transfertools: String,
}

/// Parse a `transfertool` attribute value
///
/// Returns `None` when the value names no tool at all, which callers treat
/// the same as a missing attribute.
pub fn parse_transfertools(value: &str) -> Option<TransfertoolSet> {
    let tools: TransfertoolSet = value
        .split(TRANSFERTOOL_SEPARATOR)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if tools.is_empty() { None } else { Some(tools) }
}

/// Render a tool set in its canonical (sorted) form
pub fn render_transfertools(tools: &TransfertoolSet) -> String {
    tools
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(&TRANSFERTOOL_SEPARATOR.to_string())
}

/// Compatibility filter over a ranked candidate stream
///
/// `get_transfertools` answers "which tools does this endpoint support". The
/// filter is lazy and keeps the relative order of the rows it forwards.
pub struct TransfertoolFilter<F> {
    get_transfertools: F,
}

impl<F> TransfertoolFilter<F>
where
    F: FnMut(RseId) -> TransfertoolSet,
{
    pub fn new(get_transfertools: F) -> Self {
        Self { get_transfertools }
    }

    pub fn apply<I>(mut self, rows: I) -> impl Iterator<Item = CompatibleCandidate>
    where
        I: IntoIterator<Item = CandidateRow>,
    {
        rows.into_iter().filter_map(move |row| {
            let dest = (self.get_transfertools)(row.dest_rse_id);
            let source = (self.get_transfertools)(row.source_rse_id);
            let common: TransfertoolSet = dest.intersection(&source).cloned().collect();
            if common.is_empty() {
                debug!(
                    request_id = %row.request_id,
                    source_rse_id = %row.source_rse_id,
                    dest_rse_id = %row.dest_rse_id,
                    "Dropping source without common transfertool"
                );
                return None;
            }
            Some(CompatibleCandidate {
                transfertools: render_transfertools(&common),
                row,
            })
        })
    }
}

/// Explicitly invalidated TTL cache of per-endpoint transfertool sets
pub struct TransfertoolCache {
    inner: Mutex<TimedCache<RseId, TransfertoolSet>>,
}

impl TransfertoolCache {
    pub fn with_ttl(ttl_secs: u64) -> Self {
        Self {
            inner: Mutex::new(TimedCache::with_lifespan(ttl_secs)),
        }
    }

    pub fn get(&self, rse_id: RseId) -> Option<TransfertoolSet> {
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        cache.cache_get(&rse_id).cloned()
    }

    pub fn insert(&self, rse_id: RseId, tools: TransfertoolSet) {
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        cache.cache_set(rse_id, tools);
    }

    /// Drop every cached entry
    pub fn invalidate(&self) {
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        cache.cache_clear();
    }

    pub fn len(&self) -> usize {
        let cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        cache.cache_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves the supported transfertools of an endpoint
///
/// Missing, empty or unparseable attributes resolve to the configured default
/// set, never to an empty set.
pub struct TransfertoolResolver {
    defaults: TransfertoolSet,
    cache: TransfertoolCache,
}

impl TransfertoolResolver {
    pub fn new<I, S>(defaults: I, cache_ttl_secs: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut defaults: TransfertoolSet = defaults.into_iter().map(Into::into).collect();
        if defaults.is_empty() {
            warn!("No default transfertools configured, using built-in defaults");
            defaults = DEFAULT_TRANSFERTOOLS.iter().map(|t| t.to_string()).collect();
        }
        Self {
            defaults,
            cache: TransfertoolCache::with_ttl(cache_ttl_secs),
        }
    }

    pub fn defaults(&self) -> &TransfertoolSet {
        &self.defaults
    }

    /// Forget all cached attribute values
    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    /// Supported transfertools for one endpoint
    pub async fn supported<S>(
        &self,
        store: &mut S,
        rse_id: RseId,
    ) -> Result<TransfertoolSet, PreparerError>
    where
        S: PreparerStore + ?Sized,
    {
        if let Some(tools) = self.cache.get(rse_id) {
            return Ok(tools);
        }

        let attribute = store.rse_attribute(rse_id, TRANSFERTOOL_ATTRIBUTE).await?;
        let tools = match attribute.as_deref().map(parse_transfertools) {
            Some(Some(tools)) => tools,
            Some(None) => {
                warn!(rse_id = %rse_id, value = ?attribute, "Malformed transfertool attribute, using defaults");
                self.defaults.clone()
            }
            None => self.defaults.clone(),
        };

        self.cache.insert(rse_id, tools.clone());
        Ok(tools)
    }

    /// Supported transfertools for every endpoint referenced by `rows`
    pub async fn prefetch<S>(
        &self,
        store: &mut S,
        rows: &[CandidateRow],
    ) -> Result<rustc_hash::FxHashMap<RseId, TransfertoolSet>, PreparerError>
    where
        S: PreparerStore + ?Sized,
    {
        let mut resolved = rustc_hash::FxHashMap::default();
        for row in rows {
            for rse_id in [row.dest_rse_id, row.source_rse_id] {
                if !resolved.contains_key(&rse_id) {
                    let tools = self.supported(store, rse_id).await?;
                    resolved.insert(rse_id, tools);
                }
            }
        }
        Ok(resolved)
    }
}
