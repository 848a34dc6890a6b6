use std::sync::Arc;

use mindhaven_common::{Identity, Result};
use mindhaven_config::RealtimeConfig;
use tokio::sync::watch;
use tracing::info;

use crate::backoff::ReconnectPolicy;
use crate::channel::{ChannelHandle, ChannelOptions, SendError};
use crate::protocol::OutboundMessage;
use crate::traits::Dispatcher;
use crate::transport::Transport;

/// Keeps at most one realtime channel alive, bound to the signed-in identity.
///
/// Switching identity always closes the previous channel completely before
/// the next one starts connecting.
pub struct SessionManager {
    config: RealtimeConfig,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<dyn Dispatcher>,
    network: Option<watch::Receiver<bool>>,
    active: Option<ChannelHandle>,
}

impl SessionManager {
    pub fn new(
        config: RealtimeConfig,
        transport: Arc<dyn Transport>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            config,
            transport,
            dispatcher,
            network: None,
            active: None,
        }
    }

    pub fn with_network(mut self, network: watch::Receiver<bool>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn current(&self) -> Option<&ChannelHandle> {
        self.active.as_ref()
    }

    /// Binds the manager to `identity` (login, session restore, user switch).
    ///
    /// `None` or a blank identity behaves like a logout. Re-activating the
    /// identity of a channel that is still alive returns that channel untouched.
    pub async fn activate(&mut self, identity: Option<Identity>) -> Result<Option<ChannelHandle>> {
        let Some(identity) = identity.filter(|i| !i.is_blank()) else {
            self.deactivate().await;
            return Ok(None);
        };

        if let Some(active) = &self.active
            && active.identity() == &identity
            && !active.is_closed()
        {
            return Ok(Some(active.clone()));
        }

        self.deactivate().await;

        let endpoint = self.config.endpoint_for(&identity)?;
        let mut options = ChannelOptions::new(endpoint, Arc::clone(&self.transport))
            .with_policy(ReconnectPolicy::from_config(&self.config.reconnect));
        if let Some(network) = &self.network {
            options = options.with_network(network.clone());
        }

        info!(identity = %identity, "realtime: activating session channel");
        self.active = ChannelHandle::open(identity, options, Arc::clone(&self.dispatcher));
        Ok(self.active.clone())
    }

    /// Closes the active channel, if any. Safe to call repeatedly.
    pub async fn deactivate(&mut self) {
        if let Some(previous) = self.active.take() {
            info!(identity = %previous.identity(), "realtime: closing session channel");
            previous.close().await;
        }
    }

    /// Sends through the active channel.
    pub fn send(&self, message: &OutboundMessage) -> std::result::Result<(), SendError> {
        match &self.active {
            Some(handle) => handle.send(message),
            None => Err(SendError::NotOpen),
        }
    }

    pub fn is_open(&self) -> bool {
        self.active.as_ref().is_some_and(ChannelHandle::is_open)
    }
}
