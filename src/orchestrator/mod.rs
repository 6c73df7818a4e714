//! Session orchestration.
//!
//! Covers the per-session state machine, the process registry, the
//! supervisor that serializes host operations, and periodic retention.

pub mod registry;
pub mod retention;
pub mod session;
pub mod supervisor;

pub use registry::Registry;
pub use retention::spawn_retention_task;
pub use session::{SessionContext, SessionHandle};
pub use supervisor::{PruneSummary, Supervisor};
