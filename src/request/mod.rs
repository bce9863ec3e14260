//! Transfer requests
//!
//! Lifecycle states and the row shapes the preparer reads and writes.

pub mod state;
pub mod types;

pub use state::RequestState;
pub use types::{DEFAULT_ACTIVITY, RequestUpdate, TransferRequest};
