//! Session lifecycle: creation, event pumping, destruction and idle reaping.

mod controller;
mod reaper;

pub use controller::{DestroyOutcome, SessionManager, SessionSettings};
pub use reaper::{Clock, IdleReaper};
