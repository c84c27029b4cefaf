//! Territory Report Runner
//!
//! Sequences the report pipeline over a territory table, one territory
//! at a time, reporting progress through an event stream and honouring
//! cooperative cancellation between territories.

pub mod cancel;
pub mod coordinator;
pub mod handle;
pub mod state;

pub use cancel::CancelToken;
pub use coordinator::{Coordinator, RowError, RunError, RunOutcome, RunRequest};
pub use handle::RunHandle;
pub use state::ProcessingState;
