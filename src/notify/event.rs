//! Workflow events and the bounded queue that carries them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::error::NotifyError;
use crate::letters::{Letter, LetterStatus};

/// Default queue capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A letter was stored for the first time.
    Created,
    /// An existing letter changed status.
    StatusMoved,
}

/// Emitted after a committed status change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LetterEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub previous_status: Option<LetterStatus>,
    pub new_status: LetterStatus,
    /// Snapshot of the letter as committed.
    pub letter: Letter,
    pub occurred_at: DateTime<Utc>,
}

impl LetterEvent {
    pub fn created(letter: Letter) -> Self {
        Self::new(EventKind::Created, None, letter)
    }

    pub fn status_moved(previous: LetterStatus, letter: Letter) -> Self {
        Self::new(EventKind::StatusMoved, Some(previous), letter)
    }

    fn new(kind: EventKind, previous_status: Option<LetterStatus>, letter: Letter) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            previous_status,
            new_status: letter.status,
            letter,
            occurred_at: Utc::now(),
        }
    }
}

/// Producer side of the event queue.
///
/// `publish` waits for capacity when the queue is full; events are never
/// dropped while the router is running.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::Sender<LetterEvent>,
}

impl EventBus {
    /// Create a bus and the receiver the router consumes.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<LetterEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn publish(&self, event: LetterEvent) -> Result<(), NotifyError> {
        debug!(
            event_id = %event.id,
            letter_id = event.letter.id,
            status = %event.new_status,
            "Publishing letter event"
        );
        self.tx.send(event).await.map_err(|_| NotifyError::QueueClosed)
    }
}
