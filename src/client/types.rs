//! Data types exchanged with the messaging client.

use bytes::Bytes;
use serde::Serialize;

/// Lifecycle events emitted by a client handle, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A new pairing code to be scanned.
    Qr(String),
    Authenticated,
    Ready,
    Disconnected(String),
    /// Unrecoverable client failure.
    Error(String),
}

/// What gets sent to each recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Media(MediaBlob),
}

impl Payload {
    /// Short description for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Media(_) => "media",
        }
    }
}

/// An in-memory media attachment.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaBlob {
    pub mime_type: String,
    pub filename: Option<String>,
    pub data: Bytes,
    pub caption: Option<String>,
}

impl std::fmt::Debug for MediaBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaBlob")
            .field("mime_type", &self.mime_type)
            .field("filename", &self.filename)
            .field("len", &self.data.len())
            .field("caption", &self.caption)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chat {
    /// Serialized chat id (`5491112345678@c.us`, `1203...@g.us`).
    pub id: String,
    pub name: String,
    pub is_group: bool,
}

impl Chat {
    /// The user part of the chat id (the phone number for direct chats).
    pub fn user(&self) -> &str {
        self.id.split_once('@').map_or(self.id.as_str(), |(user, _)| user)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Label {
    pub id: String,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_user_part() {
        let chat = Chat {
            id: "5491112345678@c.us".into(),
            name: "Ana".into(),
            is_group: false,
        };
        assert_eq!(chat.user(), "5491112345678");

        let bare = Chat {
            id: "local".into(),
            name: String::new(),
            is_group: false,
        };
        assert_eq!(bare.user(), "local");
    }

    #[test]
    fn media_debug_hides_bytes() {
        let blob = MediaBlob {
            mime_type: "image/png".into(),
            filename: Some("a.png".into()),
            data: Bytes::from_static(&[1, 2, 3]),
            caption: None,
        };
        let dbg = format!("{blob:?}");
        assert!(dbg.contains("len: 3"));
        assert_eq!(Payload::Media(blob).kind(), "media");
    }
}
