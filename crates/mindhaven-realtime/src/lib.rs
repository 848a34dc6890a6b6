pub mod backoff;
pub mod channel;
pub mod manager;
mod machine;
pub mod protocol;
pub mod traits;
pub mod transport;
#[cfg(feature = "tungstenite")]
pub mod ws;

pub use backoff::ReconnectPolicy;
pub use channel::{ChannelHandle, ChannelOptions, SendError};
pub use manager::SessionManager;
pub use protocol::{
    CallEventType, CallTransition, CallUpdate, ChatMessage, InboundEvent, MAX_FRAME_BYTES,
    Notification, OutboundChat, OutboundMessage, ParticipantRole, VideoCallEvent,
};
pub use traits::{ChannelFailure, CloseReason, ConnectionState, Dispatcher};
pub use transport::{Connection, Transport, TransportFrame};
#[cfg(feature = "tungstenite")]
pub use ws::WsTransport;
