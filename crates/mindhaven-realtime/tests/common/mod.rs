#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mindhaven_common::{Error, MessageId, Result};
use mindhaven_realtime::{
    CallTransition, ChannelFailure, ChannelHandle, ChatMessage, Connection, ConnectionState,
    Dispatcher, Notification, ReconnectPolicy, Transport, TransportFrame,
};
use tokio::sync::mpsc;
use url::Url;

/// How the next `connect` call behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Fail,
    Accept,
    /// Never completes, like a handshake stuck on a dead network.
    Hang,
}

/// The far end of an accepted connection.
pub struct ServerSide {
    pub endpoint: Url,
    pub written: mpsc::UnboundedReceiver<String>,
    pub frames: mpsc::Sender<TransportFrame>,
}

impl ServerSide {
    pub async fn push(&self, text: impl Into<String>) {
        self.frames
            .send(TransportFrame::Text(text.into()))
            .await
            .expect("client side should still be listening");
    }

    /// Like `push`, but tolerates a client that already hung up.
    pub async fn try_push(&self, text: impl Into<String>) -> bool {
        self.frames
            .send(TransportFrame::Text(text.into()))
            .await
            .is_ok()
    }

    pub async fn drop_unclean(&self) {
        let _ = self
            .frames
            .send(TransportFrame::Closed { clean: false })
            .await;
    }

    pub async fn close_clean(&self) {
        let _ = self.frames.send(TransportFrame::Closed { clean: true }).await;
    }
}

/// In-memory transport that follows a script of outcomes, then fails.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Outcome>>,
    connects: AtomicUsize,
    endpoints: Mutex<Vec<Url>>,
    accepted_tx: mpsc::UnboundedSender<ServerSide>,
}

impl ScriptedTransport {
    pub fn new(
        script: impl IntoIterator<Item = Outcome>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            connects: AtomicUsize::new(0),
            endpoints: Mutex::new(Vec::new()),
            accepted_tx,
        });
        (transport, accepted_rx)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn endpoints(&self) -> Vec<Url> {
        self.endpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, endpoint: &Url) -> Result<Connection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().unwrap().push(endpoint.clone());
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Fail);

        match outcome {
            Outcome::Fail => Err(Error::Transport("scripted failure".into())),
            Outcome::Hang => std::future::pending().await,
            Outcome::Accept => {
                let (writer, written) = mpsc::unbounded_channel();
                let (frames_tx, frames) = mpsc::channel(16);
                let _ = self.accepted_tx.send(ServerSide {
                    endpoint: endpoint.clone(),
                    written,
                    frames: frames_tx,
                });
                Ok(Connection { writer, frames })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Chat(ChatMessage),
    Status(MessageId, String),
    Moderation(MessageId, String),
    Notification(Notification),
    Call(CallTransition),
}

#[derive(Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<Recorded>>,
    states: Mutex<Vec<ConnectionState>>,
    failures: Mutex<Vec<ChannelFailure>>,
}

impl RecordingDispatcher {
    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().unwrap().clone()
    }

    pub fn failures(&self) -> Vec<ChannelFailure> {
        self.failures.lock().unwrap().clone()
    }

    fn record(&self, event: Recorded) {
        self.events.lock().unwrap().push(event);
    }
}

impl Dispatcher for RecordingDispatcher {
    fn on_chat_message(&self, message: ChatMessage) {
        self.record(Recorded::Chat(message));
    }

    fn on_message_status(&self, message_id: MessageId, status: String) {
        self.record(Recorded::Status(message_id, status));
    }

    fn on_moderation_warning(&self, message_id: MessageId, warning: String) {
        self.record(Recorded::Moderation(message_id, warning));
    }

    fn on_notification(&self, notification: Notification) {
        self.record(Recorded::Notification(notification));
    }

    fn on_call_transition(&self, transition: CallTransition) {
        self.record(Recorded::Call(transition));
    }

    fn on_state_change(&self, state: &ConnectionState) {
        self.states.lock().unwrap().push(state.clone());
    }

    fn on_terminal_failure(&self, failure: &ChannelFailure) {
        self.failures.lock().unwrap().push(failure.clone());
    }
}

pub fn endpoint(identity: &str) -> Url {
    Url::parse(&format!("ws://realtime.test/ws/chat/{identity}/")).unwrap()
}

/// Deterministic policy: 1s, 2s, 4s ... capped at 30s, no jitter.
pub fn policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy::new(
        max_attempts,
        Duration::from_secs(1),
        Duration::from_secs(30),
        2.0,
    )
    .with_jitter(0.0)
}

pub fn chat_frame(id: u64, content: &str) -> String {
    serde_json::json!({
        "type": "chat_message",
        "message": {"id": id, "content": content, "sender": 1, "receiver": 2}
    })
    .to_string()
}

/// Routes channel logs to the test harness; run with `RUST_LOG=debug` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const WAIT_LIMIT: Duration = Duration::from_secs(600);

pub async fn wait_for_state(
    handle: &ChannelHandle,
    predicate: impl FnMut(&ConnectionState) -> bool,
) -> ConnectionState {
    let mut rx = handle.watch_state();
    tokio::time::timeout(WAIT_LIMIT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for channel state")
        .expect("channel state sender dropped")
        .clone()
}

pub async fn wait_open(handle: &ChannelHandle) {
    wait_for_state(handle, ConnectionState::is_open).await;
}

/// Polls `condition` until it holds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(WAIT_LIMIT, poll)
        .await
        .expect("condition never held");
}

pub async fn with_timeout<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT_LIMIT, future)
        .await
        .expect("operation timed out")
}
