//! Admission Controller (Throttler)
//!
//! Decides QUEUED vs WAITING for requests that already have a source.
//!
//! # Keys
//!
//! The process-wide `throttler.mode` option picks which request fields key a
//! limit:
//!
//! | mode               | endpoint    | activity          |
//! |--------------------|-------------|-------------------|
//! | `DEST_PER_ACT`     | destination | request activity  |
//! | `DEST_PER_ALL_ACT` | destination | `all_activities`  |
//! | `SRC_PER_ACT`      | source      | request activity  |
//! | `SRC_PER_ALL_ACT`  | source      | `all_activities`  |
//!
//! No mode, or no limit row for the key, means admission is unconditional.
//!
//! # Concurrency
//!
//! The limit row is read with a row lock and the admitted population is
//! counted in the same transaction that writes the decision, so two preparers
//! racing on one key are serialized by the store.

use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::core_types::RseId;
use crate::error::PreparerError;
use crate::preparer::reducer::Assignment;
use crate::request::RequestState;
use crate::store::PreparerStore;

/// Shared configuration section holding the throttler options
pub const THROTTLER_SECTION: &str = "throttler";

/// Option naming the throttler mode
pub const MODE_OPTION: &str = "mode";

/// Pseudo-activity for limits that cover every activity
pub const ALL_ACTIVITIES: &str = "all_activities";

/// Which request fields key a transfer limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThrottlerMode {
    DestPerAct,
    DestPerAllAct,
    SrcPerAct,
    SrcPerAllAct,
}

impl ThrottlerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThrottlerMode::DestPerAct => "DEST_PER_ACT",
            ThrottlerMode::DestPerAllAct => "DEST_PER_ALL_ACT",
            ThrottlerMode::SrcPerAct => "SRC_PER_ACT",
            ThrottlerMode::SrcPerAllAct => "SRC_PER_ALL_ACT",
        }
    }

    pub fn direction(&self) -> ThrottleDirection {
        match self {
            ThrottlerMode::DestPerAct | ThrottlerMode::DestPerAllAct => {
                ThrottleDirection::Destination
            }
            ThrottlerMode::SrcPerAct | ThrottlerMode::SrcPerAllAct => ThrottleDirection::Source,
        }
    }

    pub fn per_activity(&self) -> bool {
        matches!(self, ThrottlerMode::DestPerAct | ThrottlerMode::SrcPerAct)
    }

    /// Lenient parse for values read from shared configuration
    ///
    /// Unknown values are logged and disable throttling.
    pub fn from_config(value: Option<&str>) -> Option<Self> {
        let value = value.map(str::trim).filter(|v| !v.is_empty())?;
        match value.parse() {
            Ok(mode) => Some(mode),
            Err(e) => {
                warn!(error = %e, "Ignoring throttler mode");
                None
            }
        }
    }
}

impl fmt::Display for ThrottlerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ThrottlerMode {
    type Err = PreparerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEST_PER_ACT" => Ok(ThrottlerMode::DestPerAct),
            "DEST_PER_ALL_ACT" => Ok(ThrottlerMode::DestPerAllAct),
            "SRC_PER_ACT" => Ok(ThrottlerMode::SrcPerAct),
            "SRC_PER_ALL_ACT" => Ok(ThrottlerMode::SrcPerAllAct),
            other => Err(PreparerError::Config(format!(
                "unknown throttler mode: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThrottleDirection {
    Destination,
    Source,
}

/// Key a limit is looked up and counted under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    pub direction: ThrottleDirection,
    pub rse_id: RseId,
    /// `None` for the `*_PER_ALL_ACT` modes
    pub activity: Option<String>,
}

impl ThrottleKey {
    pub fn for_assignment(mode: ThrottlerMode, assignment: &Assignment) -> Self {
        let rse_id = match mode.direction() {
            ThrottleDirection::Destination => assignment.dest_rse_id,
            ThrottleDirection::Source => assignment.source_rse_id,
        };
        let activity = mode.per_activity().then(|| assignment.activity.clone());
        Self {
            direction: mode.direction(),
            rse_id,
            activity,
        }
    }

    /// Activity column value of the matching `rse_transfer_limits` row
    pub fn limit_activity(&self) -> &str {
        self.activity.as_deref().unwrap_or(ALL_ACTIVITIES)
    }
}

impl fmt::Display for ThrottleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.direction {
            ThrottleDirection::Destination => "dest",
            ThrottleDirection::Source => "src",
        };
        write!(f, "{}={}/{}", side, self.rse_id, self.limit_activity())
    }
}

/// How an external throttler orders WAITING requests when it releases them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LimitStrategy {
    #[default]
    Fifo,
    GroupedFifo,
}

impl LimitStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitStrategy::Fifo => "fifo",
            LimitStrategy::GroupedFifo => "grouped_fifo",
        }
    }

    /// Unknown tags are logged and read as FIFO
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(|t| t.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("fifo") => LimitStrategy::Fifo,
            Some("grouped_fifo") => LimitStrategy::GroupedFifo,
            Some(other) => {
                warn!(strategy = other, "Unknown transfer limit strategy, using fifo");
                LimitStrategy::Fifo
            }
        }
    }
}

impl fmt::Display for LimitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configured limit for one (endpoint, activity)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLimit {
    pub rse_id: RseId,
    pub activity: String,
    pub max_transfers: u64,
    pub strategy: LimitStrategy,
}

/// Admission decision for one assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// No mode or no limit for the key
    Unthrottled,
    /// Below the limit
    Admitted { active: u64, limit: TransferLimit },
    /// Limit reached
    Throttled { active: u64, limit: TransferLimit },
}

impl Admission {
    pub fn state(&self) -> RequestState {
        match self {
            Admission::Unthrottled | Admission::Admitted { .. } => RequestState::Queued,
            Admission::Throttled { .. } => RequestState::Waiting,
        }
    }
}

/// Per-pass admission controller
#[derive(Debug, Clone, Copy, Default)]
pub struct Throttler {
    mode: Option<ThrottlerMode>,
}

impl Throttler {
    pub fn new(mode: Option<ThrottlerMode>) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> Option<ThrottlerMode> {
        self.mode
    }

    /// Resolve the mode for this pass
    ///
    /// The shared configuration table wins over `fallback` (the daemon's own
    /// config file).
    pub async fn load<S>(store: &mut S, fallback: Option<&str>) -> Result<Self, PreparerError>
    where
        S: PreparerStore + ?Sized,
    {
        let shared = store.config_value(THROTTLER_SECTION, MODE_OPTION).await?;
        let mode = ThrottlerMode::from_config(shared.as_deref().or(fallback));
        Ok(Self::new(mode))
    }

    /// Decide admission for `assignment`
    ///
    /// Must run in the transaction that subsequently writes the decision.
    pub async fn decide<S>(
        &self,
        store: &mut S,
        assignment: &Assignment,
    ) -> Result<Admission, PreparerError>
    where
        S: PreparerStore + ?Sized,
    {
        let Some(mode) = self.mode else {
            return Ok(Admission::Unthrottled);
        };
        let key = ThrottleKey::for_assignment(mode, assignment);

        let Some(limit) = store.lock_transfer_limit(&key).await? else {
            return Ok(Admission::Unthrottled);
        };

        let active = store.count_admitted(&key).await?;
        debug!(
            request_id = %assignment.request_id,
            key = %key,
            active,
            max_transfers = limit.max_transfers,
            strategy = %limit.strategy,
            "Checked transfer limit"
        );

        if active < limit.max_transfers {
            Ok(Admission::Admitted { active, limit })
        } else {
            Ok(Admission::Throttled { active, limit })
        }
    }
}
