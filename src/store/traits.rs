//! Persistence seams used by the workflow engine.
//!
//! Every workflow operation runs inside one [`LetterTransaction`]. Dropping a
//! transaction without calling [`LetterTransaction::commit`] rolls it back.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::letters::{Letter, LetterId, LetterType, Role, User, UserId};

/// Source of write transactions over letters.
#[async_trait]
pub trait LetterStore: Send + Sync {
    /// Open a write transaction, waiting at most the configured lock timeout.
    ///
    /// Contention past the timeout surfaces as [`DatabaseError::LockTimeout`].
    async fn begin(&self) -> Result<Box<dyn LetterTransaction>, DatabaseError>;

    /// Read a letter outside of any write transaction.
    async fn fetch_letter(&self, id: LetterId) -> Result<Option<Letter>, DatabaseError>;
}

/// A single open write transaction.
#[async_trait]
pub trait LetterTransaction: Send {
    async fn get_letter(&mut self, id: LetterId) -> Result<Option<Letter>, DatabaseError>;

    /// Insert a new letter and return its assigned id.
    async fn insert_letter(&mut self, letter: &Letter) -> Result<LetterId, DatabaseError>;

    /// Overwrite every stored column of an existing letter.
    async fn update_letter(&mut self, letter: &Letter) -> Result<(), DatabaseError>;

    /// Returns `false` if no row matched.
    async fn delete_letter(&mut self, id: LetterId) -> Result<bool, DatabaseError>;

    /// Highest numeric agenda number of `letter_type` created in `year`, or 0.
    async fn max_agenda_number(
        &mut self,
        letter_type: LetterType,
        year: i32,
    ) -> Result<u64, DatabaseError>;

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError>;
}

/// Lookup of users and their roles.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, DatabaseError>;

    /// All users holding `role`, ordered by id.
    async fn users_with_role(&self, role: Role) -> Result<Vec<User>, DatabaseError>;

    /// Register a user or replace an existing one with the same id.
    async fn upsert_user(&self, user: &User) -> Result<(), DatabaseError>;
}

/// Existence check for uploaded letter scans.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    async fn has_file(&self, letter: &Letter) -> bool;
}
