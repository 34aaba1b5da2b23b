//! Attachment existence checks.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::warn;

use crate::letters::Letter;
use crate::store::traits::AttachmentStore;

/// Looks for the letter's `file_path` under a root directory.
pub struct LocalAttachmentStore {
    root: PathBuf,
}

impl LocalAttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl AttachmentStore for LocalAttachmentStore {
    async fn has_file(&self, letter: &Letter) -> bool {
        let Some(key) = letter.file_path.as_deref() else {
            return false;
        };
        // Keys are relative object names; refuse anything that escapes the root.
        let key = key.trim_start_matches('/');
        if key.split('/').any(|part| part == "..") {
            warn!(letter_id = letter.id, key, "Rejected attachment key outside root");
            return false;
        }
        match tokio::fs::try_exists(self.root.join(key)).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(letter_id = letter.id, key, error = %e, "Attachment lookup failed");
                false
            }
        }
    }
}

/// Trusts that a recorded `file_path` was uploaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordedAttachments;

#[async_trait]
impl AttachmentStore for RecordedAttachments {
    async fn has_file(&self, letter: &Letter) -> bool {
        letter
            .file_path
            .as_deref()
            .is_some_and(|p| !p.trim().is_empty())
    }
}
