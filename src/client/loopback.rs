//! In-process loopback client backend.
//!
//! Every connection emits a pairing code immediately and, when auto-pairing
//! is enabled, authenticates on its own after a fixed delay. Sent messages
//! are recorded instead of leaving the process. The factory also exposes a
//! scripting surface (failures, latency, disconnects, fixtures) so the
//! session core can be exercised end to end without a remote service.

use super::{
    Chat, ChatAddress, ClientConnection, ClientEvent, ClientFactory, ClientHandle, Label, Payload,
};
use crate::error::ClientError;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Capacity of each connection's event channel.
const EVENT_CHANNEL_SIZE: usize = 32;

/// Failure count meaning "fail every attempt".
const ALWAYS: u32 = u32::MAX;

/// A message accepted by a loopback handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub to: ChatAddress,
    pub payload: Payload,
}

/// Behaviour and recordings shared by a handle and its factory.
#[derive(Default)]
struct Script {
    sent: Mutex<Vec<SentMessage>>,
    attempts: Mutex<HashMap<ChatAddress, u32>>,
    failures: Mutex<HashMap<ChatAddress, u32>>,
    send_latency: Mutex<Duration>,
    close_latency: Mutex<Duration>,
    disconnect_after: Mutex<Option<usize>>,
    closed: AtomicBool,
    chats: Mutex<Vec<Chat>>,
    labels: Mutex<Vec<(Label, Vec<String>)>>,
    participants: Mutex<HashMap<String, Vec<String>>>,
}

#[derive(Clone)]
struct Link {
    events: mpsc::Sender<ClientEvent>,
    script: Arc<Script>,
}

struct Shared {
    auto_pair: Option<Duration>,
    connect_delay: Mutex<Duration>,
    connect_failure: Mutex<Option<String>>,
    links: DashMap<String, Link>,
}

/// Factory for loopback connections.
#[derive(Clone)]
pub struct LoopbackFactory {
    shared: Arc<Shared>,
}

impl LoopbackFactory {
    /// Connections stay in `AwaitingScan` until an event is emitted.
    pub fn manual() -> Self {
        Self::build(None)
    }

    /// Connections authenticate by themselves after `after`.
    pub fn auto_pair(after: Duration) -> Self {
        Self::build(Some(after))
    }

    fn build(auto_pair: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared {
                auto_pair,
                connect_delay: Mutex::new(Duration::ZERO),
                connect_failure: Mutex::new(None),
                links: DashMap::new(),
            }),
        }
    }

    /// Make every following `connect` fail with `reason` (or succeed again).
    pub fn fail_connect(&self, reason: Option<&str>) {
        *self.shared.connect_failure.lock() = reason.map(str::to_string);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.shared.connect_delay.lock() = delay;
    }

    /// Wait (up to two seconds) for `user_id` to be connected.
    pub async fn wait_connected(&self, user_id: &str) -> bool {
        self.link(user_id).await.is_some()
    }

    async fn link(&self, user_id: &str) -> Option<Link> {
        for _ in 0..400 {
            if let Some(link) = self.shared.links.get(user_id).map(|l| l.value().clone()) {
                return Some(link);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        None
    }

    fn script(&self, user_id: &str) -> Option<Arc<Script>> {
        self.shared
            .links
            .get(user_id)
            .map(|l| Arc::clone(&l.value().script))
    }

    /// Push an event into the user's event stream.
    pub async fn emit(&self, user_id: &str, event: ClientEvent) -> bool {
        match self.link(user_id).await {
            Some(link) => link.events.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Fail the next `times` sends to `recipient`.
    pub fn fail_sends(&self, user_id: &str, recipient: &ChatAddress, times: u32) {
        if let Some(script) = self.script(user_id) {
            script.failures.lock().insert(recipient.clone(), times);
        }
    }

    /// Fail every send to `recipient`.
    pub fn fail_always(&self, user_id: &str, recipient: &ChatAddress) {
        self.fail_sends(user_id, recipient, ALWAYS);
    }

    pub fn set_send_latency(&self, user_id: &str, latency: Duration) {
        if let Some(script) = self.script(user_id) {
            *script.send_latency.lock() = latency;
        }
    }

    pub fn set_close_latency(&self, user_id: &str, latency: Duration) {
        if let Some(script) = self.script(user_id) {
            *script.close_latency.lock() = latency;
        }
    }

    /// Emit `Disconnected` right after the `n`-th successful send.
    pub fn disconnect_after(&self, user_id: &str, n: usize) {
        if let Some(script) = self.script(user_id) {
            *script.disconnect_after.lock() = Some(n);
        }
    }

    pub fn add_chat(&self, user_id: &str, chat: Chat) {
        if let Some(script) = self.script(user_id) {
            script.chats.lock().push(chat);
        }
    }

    pub fn add_label(&self, user_id: &str, label: Label, chat_ids: Vec<String>) {
        if let Some(script) = self.script(user_id) {
            script.labels.lock().push((label, chat_ids));
        }
    }

    pub fn set_participants(&self, user_id: &str, chat_id: &str, numbers: Vec<String>) {
        if let Some(script) = self.script(user_id) {
            script
                .participants
                .lock()
                .insert(chat_id.to_string(), numbers);
        }
    }

    /// Messages accepted so far for `user_id`, in send order.
    pub fn sent(&self, user_id: &str) -> Vec<SentMessage> {
        self.script(user_id)
            .map(|s| s.sent.lock().clone())
            .unwrap_or_default()
    }

    /// Send attempts made to `recipient`, successful or not.
    pub fn attempts(&self, user_id: &str, recipient: &ChatAddress) -> u32 {
        self.script(user_id)
            .and_then(|s| s.attempts.lock().get(recipient).copied())
            .unwrap_or(0)
    }

    pub fn is_closed(&self, user_id: &str) -> bool {
        self.script(user_id)
            .is_some_and(|s| s.closed.load(Ordering::SeqCst))
    }
}

#[async_trait]
impl ClientFactory for LoopbackFactory {
    async fn connect(&self, user_id: &str) -> Result<ClientConnection, ClientError> {
        let delay = *self.shared.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.shared.connect_failure.lock().clone() {
            return Err(ClientError::Connect(reason));
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let script = Arc::new(Script::default());
        let qr = format!("loopback:{user_id}:{}", uuid::Uuid::new_v4().simple());
        // Fresh channel, cannot be full.
        let _ = tx.try_send(ClientEvent::Qr(qr));

        if let Some(after) = self.shared.auto_pair {
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                let _ = tx.send(ClientEvent::Authenticated).await;
                let _ = tx.send(ClientEvent::Ready).await;
            });
        }

        self.shared.links.insert(
            user_id.to_string(),
            Link {
                events: tx.clone(),
                script: Arc::clone(&script),
            },
        );
        debug!(user_id = %user_id, "Loopback client connected");

        Ok(ClientConnection {
            handle: Box::new(LoopbackHandle {
                user_id: user_id.to_string(),
                script,
                events: Some(tx),
            }),
            events: rx,
        })
    }
}

/// Handle for one loopback connection.
pub struct LoopbackHandle {
    user_id: String,
    script: Arc<Script>,
    events: Option<mpsc::Sender<ClientEvent>>,
}

impl LoopbackHandle {
    /// A handle with no factory and no event stream.
    pub fn detached() -> Self {
        Self {
            user_id: String::from("detached"),
            script: Arc::new(Script::default()),
            events: None,
        }
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.script.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl ClientHandle for LoopbackHandle {
    async fn send_message(&self, to: &ChatAddress, payload: &Payload) -> Result<(), ClientError> {
        let latency = *self.script.send_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.ensure_open()?;

        *self.script.attempts.lock().entry(to.clone()).or_insert(0) += 1;

        {
            let mut failures = self.script.failures.lock();
            if let Some(remaining) = failures.get_mut(to)
                && *remaining > 0
            {
                if *remaining != ALWAYS {
                    *remaining -= 1;
                }
                return Err(ClientError::Send(format!("scripted failure for {to}")));
            }
        }

        let delivered = {
            let mut sent = self.script.sent.lock();
            sent.push(SentMessage {
                to: to.clone(),
                payload: payload.clone(),
            });
            sent.len()
        };
        info!(
            user_id = %self.user_id,
            to = %to,
            kind = payload.kind(),
            "Loopback message delivered"
        );

        if *self.script.disconnect_after.lock() == Some(delivered)
            && let Some(events) = &self.events
        {
            let _ = events.try_send(ClientEvent::Disconnected("scripted disconnect".into()));
        }
        Ok(())
    }

    async fn get_chats(&self) -> Result<Vec<Chat>, ClientError> {
        self.ensure_open()?;
        Ok(self.script.chats.lock().clone())
    }

    async fn get_labels(&self) -> Result<Vec<Label>, ClientError> {
        self.ensure_open()?;
        Ok(self
            .script
            .labels
            .lock()
            .iter()
            .map(|(label, _)| label.clone())
            .collect())
    }

    async fn get_chats_by_label(&self, label_id: &str) -> Result<Vec<Chat>, ClientError> {
        self.ensure_open()?;
        let ids: Vec<String> = self
            .script
            .labels
            .lock()
            .iter()
            .find(|(label, _)| label.id == label_id)
            .map(|(_, ids)| ids.clone())
            .unwrap_or_default();
        let chats = self.script.chats.lock();
        Ok(chats
            .iter()
            .filter(|c| ids.contains(&c.id))
            .cloned()
            .collect())
    }

    async fn get_participants(&self, chat_id: &str) -> Result<Vec<String>, ClientError> {
        self.ensure_open()?;
        let chat = self
            .script
            .chats
            .lock()
            .iter()
            .find(|c| c.id == chat_id)
            .cloned()
            .ok_or_else(|| ClientError::ChatNotFound(chat_id.to_string()))?;
        if !chat.is_group {
            return Err(ClientError::NotAGroup(chat_id.to_string()));
        }
        Ok(self
            .script
            .participants
            .lock()
            .get(chat_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn close(&self) -> Result<(), ClientError> {
        let latency = *self.script.close_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.script.closed.store(true, Ordering::SeqCst);
        debug!(user_id = %self.user_id, "Loopback client closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> ChatAddress {
        ChatAddress::parse(s).unwrap()
    }

    #[tokio::test]
    async fn connect_emits_qr_first() {
        let factory = LoopbackFactory::manual();
        let mut conn = factory.connect("u1").await.unwrap();
        match conn.events.recv().await {
            Some(ClientEvent::Qr(code)) => assert!(code.starts_with("loopback:u1:")),
            other => panic!("expected qr, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn auto_pair_authenticates() {
        let factory = LoopbackFactory::auto_pair(Duration::from_secs(3));
        let mut conn = factory.connect("u1").await.unwrap();
        assert!(matches!(conn.events.recv().await, Some(ClientEvent::Qr(_))));
        assert_eq!(conn.events.recv().await, Some(ClientEvent::Authenticated));
        assert_eq!(conn.events.recv().await, Some(ClientEvent::Ready));
    }

    #[tokio::test]
    async fn scripted_failures_then_success() {
        let factory = LoopbackFactory::manual();
        let conn = factory.connect("u1").await.unwrap();
        let to = addr("111");
        factory.fail_sends("u1", &to, 2);

        let payload = Payload::Text("hi".into());
        assert!(conn.handle.send_message(&to, &payload).await.is_err());
        assert!(conn.handle.send_message(&to, &payload).await.is_err());
        assert!(conn.handle.send_message(&to, &payload).await.is_ok());
        assert_eq!(factory.attempts("u1", &to), 3);
        assert_eq!(factory.sent("u1").len(), 1);
    }

    #[tokio::test]
    async fn disconnect_after_n_sends() {
        let factory = LoopbackFactory::manual();
        let mut conn = factory.connect("u1").await.unwrap();
        let _qr = conn.events.recv().await;
        factory.disconnect_after("u1", 1);
        conn.handle
            .send_message(&addr("1"), &Payload::Text("x".into()))
            .await
            .unwrap();
        assert!(matches!(
            conn.events.recv().await,
            Some(ClientEvent::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn closed_handle_rejects_sends() {
        let factory = LoopbackFactory::manual();
        let conn = factory.connect("u1").await.unwrap();
        conn.handle.close().await.unwrap();
        assert!(factory.is_closed("u1"));
        assert_eq!(
            conn.handle
                .send_message(&addr("1"), &Payload::Text("x".into()))
                .await,
            Err(ClientError::Closed)
        );
    }

    #[tokio::test]
    async fn participants_require_group() {
        let factory = LoopbackFactory::manual();
        let conn = factory.connect("u1").await.unwrap();
        factory.add_chat(
            "u1",
            Chat {
                id: "g1@g.us".into(),
                name: "Team".into(),
                is_group: true,
            },
        );
        factory.add_chat(
            "u1",
            Chat {
                id: "5@c.us".into(),
                name: "Bo".into(),
                is_group: false,
            },
        );
        factory.set_participants("u1", "g1@g.us", vec!["5".into(), "6".into()]);

        assert_eq!(
            conn.handle.get_participants("g1@g.us").await.unwrap(),
            vec!["5".to_string(), "6".to_string()]
        );
        assert_eq!(
            conn.handle.get_participants("5@c.us").await,
            Err(ClientError::NotAGroup("5@c.us".into()))
        );
        assert!(matches!(
            conn.handle.get_participants("nope").await,
            Err(ClientError::ChatNotFound(_))
        ));
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let factory = LoopbackFactory::manual();
        factory.fail_connect(Some("browser crashed"));
        assert_eq!(
            factory.connect("u1").await.err(),
            Some(ClientError::Connect("browser crashed".into()))
        );
    }
}
