//! Video entitlement and watch-progress engine
//!
//! - `resolver`: pure playback decision
//! - `grants`: payment intake, renewal, extension, revocation
//! - `progress`: position reports and completion
//! - `engine`: the store-backed service tying them together

pub mod engine;
pub mod grants;
pub mod locks;
pub mod progress;
pub mod resolver;
pub mod retry;
pub mod types;

pub use engine::{EntitlementEngine, LibraryEntry};
pub use grants::{plan_grant, GrantPlan};
pub use progress::{plan_progress, ProgressPlan};
pub use resolver::resolve_access;
pub use retry::{retry_on_conflict, RetryPolicy};
pub use types::*;
