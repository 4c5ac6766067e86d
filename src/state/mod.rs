//! Session state management module.
//!
//! Contains the per-user session record, its lifecycle state machine and the
//! concurrent registry that owns every live session.

mod dashmap_ext;
pub mod machine;
mod record;
mod registry;
mod session;

pub use dashmap_ext::DashMapExt;
pub use machine::{Input, next_state};
pub use record::{SessionRecord, SessionSnapshot, SessionState, Transition, UserId};
pub use registry::{Admission, SessionRegistry};
pub use session::Session;
