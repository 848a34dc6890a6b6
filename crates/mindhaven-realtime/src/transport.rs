use async_trait::async_trait;
use mindhaven_common::Result;
use tokio::sync::mpsc;
use url::Url;

/// What a live connection reports back to its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Text(String),
    /// The connection is gone. `clean` is true only for a normal close
    /// initiated by the server; this is always the last frame.
    Closed { clean: bool },
}

/// An established duplex connection.
///
/// Dropping `writer` asks the transport to close the socket. If `frames`
/// ends without a `Closed` frame the channel treats it as an unclean close.
#[derive(Debug)]
pub struct Connection {
    pub writer: mpsc::UnboundedSender<String>,
    pub frames: mpsc::Receiver<TransportFrame>,
}

/// Opens socket connections for a realtime channel.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, endpoint: &Url) -> Result<Connection>;
}
