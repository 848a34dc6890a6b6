use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use mindhaven_common::{Error, Result};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::protocol::MAX_FRAME_BYTES;
use crate::transport::{Connection, Transport, TransportFrame};

/// Inbound frames buffered between the socket and the channel driver.
const DEFAULT_FRAME_BUFFER: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport over `tokio-tungstenite` (ws:// and wss://).
#[derive(Debug, Clone)]
pub struct WsTransport {
    frame_buffer: usize,
}

impl WsTransport {
    pub fn new() -> Self {
        Self {
            frame_buffer: DEFAULT_FRAME_BUFFER,
        }
    }

    pub fn with_frame_buffer(mut self, frame_buffer: usize) -> Self {
        self.frame_buffer = frame_buffer.max(1);
        self
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, endpoint: &Url) -> Result<Connection> {
        debug!("realtime: opening websocket to {endpoint}");
        let (stream, _response) = tokio_tungstenite::connect_async_with_config(
            endpoint.as_str(),
            Some(socket_config()),
            false,
        )
        .await
        .map_err(|e| Error::Transport(format!("websocket connect failed: {e}")))?;
        info!("realtime: websocket connected");

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::channel(self.frame_buffer);
        tokio::spawn(pump(stream, writer_rx, frames_tx));

        Ok(Connection {
            writer: writer_tx,
            frames: frames_rx,
        })
    }
}

/// Oversized frames are refused by the socket before they are buffered.
fn socket_config() -> WebSocketConfig {
    WebSocketConfig::default()
        .max_message_size(Some(MAX_FRAME_BYTES))
        .max_frame_size(Some(MAX_FRAME_BYTES))
}

/// Moves text between the socket and the channel until either side goes away.
async fn pump(
    stream: WsStream,
    mut outbound: mpsc::UnboundedReceiver<String>,
    frames: mpsc::Sender<TransportFrame>,
) {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            next = outbound.recv() => match next {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        warn!("realtime: websocket write failed: {e}");
                        let _ = frames.send(TransportFrame::Closed { clean: false }).await;
                        return;
                    }
                }
                None => {
                    debug!("realtime: writer released, closing websocket");
                    let _ = sink.close().await;
                    return;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if frames
                        .send(TransportFrame::Text(text.as_str().to_owned()))
                        .await
                        .is_err()
                    {
                        let _ = sink.close().await;
                        return;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let clean = frame.as_ref().is_some_and(|f| f.code == CloseCode::Normal);
                    match &frame {
                        Some(f) => info!(
                            code = %f.code,
                            reason = f.reason.as_str(),
                            "realtime: websocket closed by server"
                        ),
                        None => info!("realtime: websocket closed by server without a code"),
                    }
                    let _ = frames.send(TransportFrame::Closed { clean }).await;
                    return;
                }
                Some(Ok(Message::Binary(bytes))) => {
                    debug!(len = bytes.len(), "realtime: ignoring binary frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("realtime: websocket error: {e}");
                    let _ = frames.send(TransportFrame::Closed { clean: false }).await;
                    return;
                }
                None => {
                    info!("realtime: websocket stream ended");
                    let _ = frames.send(TransportFrame::Closed { clean: false }).await;
                    return;
                }
            }
        }
    }
}
