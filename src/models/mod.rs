//! Domain model module declarations.

pub mod record;
pub mod script;
pub mod session;
pub mod target;

pub use record::ProcessRecord;
pub use script::{ScriptSpec, TargetRequirement};
pub use session::{PendingRequest, RequestKind, SessionFailure, SessionState, Termination};
pub use target::{Target, TargetKind};
