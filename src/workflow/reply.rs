//! Linking an outbound reply to the inbound letter it answers.

use chrono::Utc;
use tracing::info;

use crate::error::WorkflowError;
use crate::letters::{Letter, LetterId, LetterStatus};
use crate::store::LetterTransaction;

/// The parent after linking, with the status it had before.
#[derive(Debug, Clone)]
pub struct ArchivedParent {
    pub letter: Letter,
    pub previous_status: LetterStatus,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyLinkCoordinator;

impl ReplyLinkCoordinator {
    /// Point `reply` at `parent_id` and archive the parent in `tx`.
    ///
    /// The parent must be inbound, flagged as needing a reply, and in a
    /// status with an edge to Archived. Archiving it is what stops a second
    /// reply from linking.
    pub async fn link_reply(
        &self,
        tx: &mut dyn LetterTransaction,
        reply: &mut Letter,
        parent_id: LetterId,
    ) -> Result<ArchivedParent, WorkflowError> {
        let mut parent = tx
            .get_letter(parent_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("letter", parent_id))?;

        if !parent.is_inbound() {
            return Err(WorkflowError::Validation(format!(
                "letter {parent_id} is {} and cannot be replied to",
                parent.letter_type
            )));
        }
        if parent.status == LetterStatus::Archived {
            return Err(WorkflowError::Conflict(format!(
                "letter {parent_id} is already archived"
            )));
        }
        if !parent.needs_reply {
            return Err(WorkflowError::Conflict(format!(
                "letter {parent_id} does not need a reply"
            )));
        }
        if !parent.status.can_transition_to(LetterStatus::Archived) {
            return Err(WorkflowError::Conflict(format!(
                "letter {parent_id} is {} and cannot be archived yet",
                parent.status
            )));
        }

        reply.in_reply_to = Some(parent_id);

        let previous_status = parent.status;
        parent.status = LetterStatus::Archived;
        parent.updated_at = Utc::now();
        tx.update_letter(&parent).await?;

        info!(
            letter_id = parent_id,
            previous_status = %previous_status,
            "Inbound letter archived by reply"
        );
        Ok(ArchivedParent {
            letter: parent,
            previous_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::letters::{LetterType, NewLetter, Scope};
    use crate::store::{LetterStore, MemoryStore};

    async fn seed(
        store: &MemoryStore,
        letter_type: LetterType,
        status: LetterStatus,
        needs_reply: bool,
    ) -> LetterId {
        let mut letter = Letter::draft(
            NewLetter::new(letter_type, Scope::Eksternal, "Kemenag", "12/KM", "Permohonan"),
            1,
        );
        letter.status = status;
        letter.needs_reply = needs_reply;
        let mut tx = store.begin().await.unwrap();
        let id = tx.insert_letter(&letter).await.unwrap();
        tx.commit().await.unwrap();
        id
    }

    fn reply() -> Letter {
        Letter::draft(
            NewLetter::new(LetterType::Keluar, Scope::Eksternal, "Kami", "01/KLR", "Balasan"),
            1,
        )
    }

    #[tokio::test]
    async fn links_and_archives_parent() {
        let store = MemoryStore::default();
        let parent_id = seed(&store, LetterType::Masuk, LetterStatus::Disposed, true).await;

        let mut tx = store.begin().await.unwrap();
        let mut child = reply();
        let parent = ReplyLinkCoordinator
            .link_reply(tx.as_mut(), &mut child, parent_id)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(child.in_reply_to, Some(parent_id));
        assert_eq!(parent.previous_status, LetterStatus::Disposed);
        let stored = store.fetch_letter(parent_id).await.unwrap().unwrap();
        assert_eq!(stored.status, LetterStatus::Archived);
    }

    #[tokio::test]
    async fn parent_must_exist() {
        let store = MemoryStore::default();
        let mut tx = store.begin().await.unwrap();
        let err = ReplyLinkCoordinator
            .link_reply(tx.as_mut(), &mut reply(), 77)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn parent_must_be_inbound() {
        let store = MemoryStore::default();
        let parent_id = seed(&store, LetterType::Keluar, LetterStatus::Approved, true).await;
        let mut tx = store.begin().await.unwrap();
        let err = ReplyLinkCoordinator
            .link_reply(tx.as_mut(), &mut reply(), parent_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn parent_without_reply_flag_conflicts() {
        let store = MemoryStore::default();
        let parent_id = seed(&store, LetterType::Masuk, LetterStatus::Disposed, false).await;
        let mut tx = store.begin().await.unwrap();
        let mut child = reply();
        let err = ReplyLinkCoordinator
            .link_reply(tx.as_mut(), &mut child, parent_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
        assert!(child.in_reply_to.is_none());
    }

    #[tokio::test]
    async fn archived_parent_conflicts() {
        let store = MemoryStore::default();
        let parent_id = seed(&store, LetterType::Masuk, LetterStatus::Archived, true).await;
        let mut tx = store.begin().await.unwrap();
        let err = ReplyLinkCoordinator
            .link_reply(tx.as_mut(), &mut reply(), parent_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn parent_awaiting_disposition_conflicts() {
        let store = MemoryStore::default();
        let parent_id = seed(
            &store,
            LetterType::Masuk,
            LetterStatus::AwaitingDisposition,
            true,
        )
        .await;
        let mut tx = store.begin().await.unwrap();
        let mut child = reply();
        let err = ReplyLinkCoordinator
            .link_reply(tx.as_mut(), &mut child, parent_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
        assert!(child.in_reply_to.is_none());
        drop(tx);

        let stored = store.fetch_letter(parent_id).await.unwrap().unwrap();
        assert_eq!(stored.status, LetterStatus::AwaitingDisposition);
    }
}
