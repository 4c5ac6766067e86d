//! Session lifecycle state machine.
//!
//! Pure transition rules. The lifecycle controller feeds client events and
//! administrative commands through [`next_state`]; nothing else decides
//! which state a session moves to.
//!
//! ## State Machine
//!
//! ```text
//!                 qr                    authenticated / ready
//! ┌──────────────┐ ───────► ┌──────────────┐ ───────────────► ┌─────────┐
//! │ Initializing │          │ AwaitingScan │ ◄─┐ qr (refresh) │  Ready  │
//! └──────┬───────┘          └──────┬───────┘ ──┘              └────┬────┘
//!        │    authenticated / ready │                              │
//!        └──────────────────────────┼─────────────────────────────►│
//!                                   │                              │
//!   disconnected(reason) ─► Disconnected       error(reason) ─► Failed
//!
//!   destroy (any state) ─► Destroyed   (destroying Destroyed is a no-op)
//! ```
//!
//! `Disconnected` and `Failed` ignore further client events. Recovery from
//! either is destroy + create; there is no automatic resurrection.

use crate::client::ClientEvent;
use crate::state::SessionState;

/// Inputs that can move a session.
#[derive(Debug, Clone, Copy)]
pub enum Input<'a> {
    /// An event from the session's client handle.
    Event(&'a ClientEvent),
    /// Explicit destroy command (close request or idle reaper).
    Destroy,
}

/// Compute the state reached from `current` on `input`.
///
/// Returns `None` when the input has no effect. `AwaitingScan` on a QR event
/// returns `Some(AwaitingScan)` so the caller can refresh the payload.
pub fn next_state(current: SessionState, input: &Input<'_>) -> Option<SessionState> {
    use SessionState::*;

    let event = match input {
        Input::Destroy if current == Destroyed => return None,
        Input::Destroy => return Some(Destroyed),
        Input::Event(event) => event,
    };

    if !current.accepts_events() {
        return None;
    }

    match (current, event) {
        (Initializing | AwaitingScan, ClientEvent::Qr(_)) => Some(AwaitingScan),
        (Ready, ClientEvent::Qr(_)) => None,
        (Initializing | AwaitingScan, ClientEvent::Authenticated | ClientEvent::Ready) => {
            Some(Ready)
        }
        (Ready, ClientEvent::Authenticated | ClientEvent::Ready) => None,
        (_, ClientEvent::Disconnected(_)) => Some(Disconnected),
        (_, ClientEvent::Error(_)) => Some(Failed),
        _ => None,
    }
}
