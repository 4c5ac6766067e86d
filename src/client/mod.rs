//! External messaging client abstraction.
//!
//! The messaging protocol itself lives behind [`ClientFactory`] and
//! [`ClientHandle`]. The session core only consumes a handle's capability
//! surface and the event channel returned alongside it.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ClientError;

mod address;
pub mod loopback;
mod types;

pub use address::ChatAddress;
pub use types::{Chat, ClientEvent, Label, MediaBlob, Payload};

/// One authenticated (or authenticating) connection to the remote service.
#[async_trait]
pub trait ClientHandle: Send + Sync {
    /// Send one message. Must not retry internally.
    async fn send_message(&self, to: &ChatAddress, payload: &Payload) -> Result<(), ClientError>;

    /// All chats visible to this account.
    async fn get_chats(&self) -> Result<Vec<Chat>, ClientError>;

    /// Labels defined on this account.
    async fn get_labels(&self) -> Result<Vec<Label>, ClientError>;

    /// Chats carrying the given label.
    async fn get_chats_by_label(&self, label_id: &str) -> Result<Vec<Chat>, ClientError>;

    /// Participant numbers of a group chat.
    async fn get_participants(&self, chat_id: &str) -> Result<Vec<String>, ClientError>;

    /// Close the underlying connection. Callers bound this with a timeout.
    async fn close(&self) -> Result<(), ClientError>;
}

/// A freshly opened connection: the handle plus its ordered event stream.
pub struct ClientConnection {
    pub handle: Box<dyn ClientHandle>,
    pub events: mpsc::Receiver<ClientEvent>,
}

/// Opens client connections for users.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, user_id: &str) -> Result<ClientConnection, ClientError>;
}
