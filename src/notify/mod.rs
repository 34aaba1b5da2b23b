//! Workflow events and their delivery as role-topic notifications.

pub mod event;
pub mod router;
pub mod sink;

pub use event::{EventBus, EventKind, LetterEvent};
pub use router::{NotificationRouter, RouterHandle, RouterOptions};
pub use sink::{FanoutSink, LogSink, MemorySink, Notification, NotificationSink, WebhookSink};
