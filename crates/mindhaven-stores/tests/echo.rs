use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mindhaven_common::{Identity, Result};
use mindhaven_realtime::{
    ChannelHandle, ChannelOptions, Connection, ConnectionState, OutboundMessage, Transport,
    TransportFrame,
};
use mindhaven_stores::{StoreDispatcher, Stores};
use tokio::sync::mpsc;
use url::Url;

/// Server that sends every frame it receives straight back.
struct EchoTransport;

#[async_trait]
impl Transport for EchoTransport {
    async fn connect(&self, _endpoint: &Url) -> Result<Connection> {
        let (writer, mut written) = mpsc::unbounded_channel::<String>();
        let (frames_tx, frames) = mpsc::channel(16);
        tokio::spawn(async move {
            while let Some(text) = written.recv().await {
                if frames_tx.send(TransportFrame::Text(text)).await.is_err() {
                    return;
                }
            }
        });
        Ok(Connection { writer, frames })
    }
}

#[tokio::test(start_paused = true)]
async fn echoed_chat_reaches_the_conversation_store() {
    let stores = Arc::new(Stores::new());
    let dispatcher = Arc::new(StoreDispatcher::new(Arc::clone(&stores)));
    let options = ChannelOptions::new(
        Url::parse("ws://echo.test/ws/chat/1/").unwrap(),
        Arc::new(EchoTransport),
    );
    let handle = ChannelHandle::open(Identity::from_string("1"), options, dispatcher.clone())
        .expect("identity is not blank");

    let mut state = handle.watch_state();
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(ConnectionState::is_open))
        .await
        .unwrap()
        .unwrap();
    assert!(dispatcher.connection_state().is_open());

    handle
        .send(&OutboundMessage::chat(
            "1".into(),
            "2".into(),
            "how are you feeling today?",
        ))
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while stores.conversation.messages().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let messages = stores.conversation.messages().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message.content, "how are you feeling today?");
    assert_eq!(messages[0].message.sender, Identity::from_string("1"));
    assert_eq!(messages[0].message.receiver, Identity::from_string("2"));

    handle.close().await;
}

#[tokio::test(start_paused = true)]
async fn video_call_events_are_not_mistaken_for_updates() {
    let stores = Arc::new(Stores::new());
    let dispatcher = Arc::new(StoreDispatcher::new(Arc::clone(&stores)));
    let options = ChannelOptions::new(
        Url::parse("ws://echo.test/ws/chat/1/").unwrap(),
        Arc::new(EchoTransport),
    );
    let handle = ChannelHandle::open(Identity::from_string("1"), options, dispatcher)
        .expect("identity is not blank");

    let mut state = handle.watch_state();
    tokio::time::timeout(Duration::from_secs(5), state.wait_for(ConnectionState::is_open))
        .await
        .unwrap()
        .unwrap();

    handle
        .send(&OutboundMessage::call_joined(
            "12".into(),
            mindhaven_realtime::ParticipantRole::Mentor,
        ))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The echoed `video_call_event` is an unknown inbound tag and is ignored.
    assert_eq!(stores.call.snapshot().unwrap(), Default::default());
    assert!(handle.is_open());
    handle.close().await;
}
