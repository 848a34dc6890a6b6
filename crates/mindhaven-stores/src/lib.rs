pub mod call;
pub mod conversation;
pub mod dispatcher;
pub mod notifications;

pub use call::{CallSessionStore, CallSnapshot};
pub use conversation::{ConversationStore, ModerationWarning, StoredMessage};
pub use dispatcher::{StoreDispatcher, Stores};
pub use notifications::{NotificationKind, NotificationStore, StoredNotification};
