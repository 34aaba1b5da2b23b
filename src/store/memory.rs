//! In-process store for tests and embedding.
//!
//! A transaction holds the whole-store mutex for its lifetime and works on a
//! staged copy; commit swaps the copy back in.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Datelike;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

use crate::error::DatabaseError;
use crate::letters::{Letter, LetterId, LetterType, Role, User, UserId};
use crate::store::traits::{LetterStore, LetterTransaction, UserDirectory};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    letters: BTreeMap<LetterId, Letter>,
    next_id: LetterId,
}

/// In-memory `LetterStore` and `UserDirectory`.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    users: Arc<RwLock<HashMap<UserId, User>>>,
    lock_timeout: Duration,
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                letters: BTreeMap::new(),
                next_id: 1,
            })),
            users: Arc::new(RwLock::new(HashMap::new())),
            lock_timeout,
        }
    }

    /// Register a user; replaces any user with the same id.
    pub async fn add_user(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }

    /// Number of stored letters.
    pub async fn letter_count(&self) -> usize {
        self.state.lock().await.letters.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl LetterStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn LetterTransaction>, DatabaseError> {
        let guard = tokio::time::timeout(self.lock_timeout, self.state.clone().lock_owned())
            .await
            .map_err(|_| DatabaseError::LockTimeout {
                waited: self.lock_timeout,
            })?;
        let staged = (*guard).clone();
        Ok(Box::new(MemoryTransaction { guard, staged }))
    }

    async fn fetch_letter(&self, id: LetterId) -> Result<Option<Letter>, DatabaseError> {
        Ok(self.state.lock().await.letters.get(&id).cloned())
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl LetterTransaction for MemoryTransaction {
    async fn get_letter(&mut self, id: LetterId) -> Result<Option<Letter>, DatabaseError> {
        Ok(self.staged.letters.get(&id).cloned())
    }

    async fn insert_letter(&mut self, letter: &Letter) -> Result<LetterId, DatabaseError> {
        let id = self.staged.next_id;
        self.staged.next_id += 1;
        let mut stored = letter.clone();
        stored.id = id;
        self.staged.letters.insert(id, stored);
        debug!(letter_id = id, "Letter staged for insert");
        Ok(id)
    }

    async fn update_letter(&mut self, letter: &Letter) -> Result<(), DatabaseError> {
        match self.staged.letters.get_mut(&letter.id) {
            Some(slot) => {
                *slot = letter.clone();
                Ok(())
            }
            None => Err(DatabaseError::NotFound {
                entity: "letter".into(),
                id: letter.id.to_string(),
            }),
        }
    }

    async fn delete_letter(&mut self, id: LetterId) -> Result<bool, DatabaseError> {
        Ok(self.staged.letters.remove(&id).is_some())
    }

    async fn max_agenda_number(
        &mut self,
        letter_type: LetterType,
        year: i32,
    ) -> Result<u64, DatabaseError> {
        Ok(self
            .staged
            .letters
            .values()
            .filter(|l| l.letter_type == letter_type && l.created_at.year() == year)
            .filter_map(|l| l.agenda_number.parse::<u64>().ok())
            .max()
            .unwrap_or(0))
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        let MemoryTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn get_user(&self, id: UserId) -> Result<Option<User>, DatabaseError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn users_with_role(&self, role: Role) -> Result<Vec<User>, DatabaseError> {
        let mut users: Vec<User> = self
            .users
            .read()
            .await
            .values()
            .filter(|u| u.role == role)
            .cloned()
            .collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }

    async fn upsert_user(&self, user: &User) -> Result<(), DatabaseError> {
        self.add_user(user.clone()).await;
        Ok(())
    }
}
