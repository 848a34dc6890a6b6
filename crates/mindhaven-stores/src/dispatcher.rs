use std::sync::{Arc, Mutex};

use mindhaven_common::MessageId;
use mindhaven_realtime::{
    CallTransition, ChannelFailure, ChatMessage, ConnectionState, Dispatcher, Notification,
};
use tracing::warn;

use crate::call::CallSessionStore;
use crate::conversation::ConversationStore;
use crate::notifications::NotificationStore;

/// The application state a realtime channel feeds.
#[derive(Default)]
pub struct Stores {
    pub conversation: ConversationStore,
    pub notifications: NotificationStore,
    pub call: CallSessionStore,
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears everything, e.g. on logout.
    pub fn reset(&self) -> mindhaven_common::Result<()> {
        self.conversation.reset()?;
        self.notifications.clear()?;
        self.call.reset()
    }
}

/// Routes channel events into [`Stores`] and remembers the last connection
/// state and any terminal connection error for the UI.
pub struct StoreDispatcher {
    stores: Arc<Stores>,
    connection: Mutex<ConnectionState>,
    connection_error: Mutex<Option<String>>,
}

impl StoreDispatcher {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self {
            stores,
            connection: Mutex::new(ConnectionState::Idle),
            connection_error: Mutex::new(None),
        }
    }

    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
            .lock()
            .map(|s| s.clone())
            .unwrap_or(ConnectionState::Idle)
    }

    /// Set once the channel gave up reconnecting.
    pub fn connection_error(&self) -> Option<String> {
        self.connection_error
            .lock()
            .ok()
            .and_then(|e| e.clone())
    }
}

impl Dispatcher for StoreDispatcher {
    fn on_chat_message(&self, message: ChatMessage) {
        if let Err(e) = self.stores.conversation.add_message(message) {
            warn!("stores: failed to store chat message: {e}");
        }
    }

    fn on_message_status(&self, message_id: MessageId, status: String) {
        if let Err(e) = self.stores.conversation.update_status(&message_id, status) {
            warn!("stores: failed to update message status: {e}");
        }
    }

    fn on_moderation_warning(&self, message_id: MessageId, warning: String) {
        warn!(message_id = %message_id, "stores: message blocked by moderation: {warning}");
        if let Err(e) = self.stores.conversation.record_warning(message_id, warning) {
            warn!("stores: failed to record moderation warning: {e}");
        }
    }

    fn on_notification(&self, notification: Notification) {
        if let Err(e) = self.stores.notifications.add(notification) {
            warn!("stores: failed to store notification: {e}");
        }
    }

    fn on_call_transition(&self, transition: CallTransition) {
        if let Err(e) = self.stores.call.apply(transition) {
            warn!("stores: failed to apply call transition: {e}");
        }
    }

    fn on_state_change(&self, state: &ConnectionState) {
        if let Ok(mut current) = self.connection.lock() {
            *current = state.clone();
        }
        if state.is_open()
            && let Ok(mut error) = self.connection_error.lock()
        {
            *error = None;
        }
    }

    fn on_terminal_failure(&self, failure: &ChannelFailure) {
        if let Ok(mut error) = self.connection_error.lock() {
            *error = Some(failure.to_string());
        }
    }
}
