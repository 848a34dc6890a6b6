use colored::Colorize;
use mindhaven_common::MessageId;
use mindhaven_realtime::{
    CallTransition, ChannelFailure, ChatMessage, ConnectionState, Dispatcher, Notification,
};
use mindhaven_stores::StoreDispatcher;

/// Prints every channel event to the terminal, then hands it to the stores.
pub struct ConsoleDispatcher {
    inner: StoreDispatcher,
}

impl ConsoleDispatcher {
    pub fn new(inner: StoreDispatcher) -> Self {
        Self { inner }
    }
}

impl Dispatcher for ConsoleDispatcher {
    fn on_chat_message(&self, message: ChatMessage) {
        println!(
            "{} {}: {}",
            "[chat]".cyan(),
            message.sender.to_string().bold(),
            message.content
        );
        self.inner.on_chat_message(message);
    }

    fn on_message_status(&self, message_id: MessageId, status: String) {
        println!("{} message {message_id} is {status}", "[status]".dimmed());
        self.inner.on_message_status(message_id, status);
    }

    fn on_moderation_warning(&self, message_id: MessageId, warning: String) {
        println!(
            "{} message {message_id} was blocked: {warning}",
            "[moderation]".yellow()
        );
        self.inner.on_moderation_warning(message_id, warning);
    }

    fn on_notification(&self, notification: Notification) {
        println!("{} {}", "[notification]".magenta(), notification.content);
        self.inner.on_notification(notification);
    }

    fn on_call_transition(&self, transition: CallTransition) {
        let line = match &transition {
            CallTransition::WaitingForPeer => "waiting for the other participant".to_string(),
            CallTransition::Active => "call is live".to_string(),
            CallTransition::Ended {
                duration_secs: Some(secs),
            } => format!("call ended after {}m {:02}s", secs / 60, secs % 60),
            CallTransition::Ended { duration_secs: None } => "call ended".to_string(),
        };
        println!("{} {line}", "[call]".blue());
        self.inner.on_call_transition(transition);
    }

    fn on_state_change(&self, state: &ConnectionState) {
        let label = match state {
            ConnectionState::Open => "connected".green().to_string(),
            ConnectionState::Backoff { attempt, delay } => format!(
                "connection lost, retry {attempt} in {:.1}s",
                delay.as_secs_f64()
            )
            .yellow()
            .to_string(),
            ConnectionState::Offline => "offline, waiting for network".yellow().to_string(),
            ConnectionState::Closed(reason) => format!("closed ({reason:?})").dimmed().to_string(),
            other => format!("{other:?}").to_lowercase().dimmed().to_string(),
        };
        println!("{} {label}", "[channel]".dimmed());
        self.inner.on_state_change(state);
    }

    fn on_terminal_failure(&self, failure: &ChannelFailure) {
        eprintln!("{} {failure}", "error:".red().bold());
        self.inner.on_terminal_failure(failure);
    }
}
