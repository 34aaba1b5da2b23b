//! JSON command interface over the workflow engine.
//!
//! One command per line in, one result per line out. Lock contention is
//! retried with jittered exponential backoff; every other error is returned
//! to the caller as a typed result.

use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::WorkflowError;
use crate::letters::{ContentPatch, DispositionRequest, Letter, LetterId, NewLetter, User, UserId};
use crate::store::UserDirectory;
use crate::workflow::{CreateMode, SubmitRequest, WorkflowEngine, format_display};

const BASE_BACKOFF: Duration = Duration::from_millis(50);
const MAX_JITTER_MS: u64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    RegisterUser {
        user: User,
    },
    CreateDraft {
        actor: UserId,
        letter: NewLetter,
    },
    CreateAndSubmit {
        actor: UserId,
        letter: NewLetter,
    },
    CreateReply {
        actor: UserId,
        parent_id: LetterId,
        letter: NewLetter,
        #[serde(default)]
        mode: CreateMode,
    },
    UpdateDraft {
        actor: UserId,
        letter_id: LetterId,
        patch: ContentPatch,
    },
    Submit {
        actor: UserId,
        letter_id: LetterId,
        #[serde(default)]
        request: SubmitRequest,
    },
    Verify {
        actor: UserId,
        letter_id: LetterId,
    },
    RejectVerification {
        actor: UserId,
        letter_id: LetterId,
    },
    Approve {
        actor: UserId,
        letter_id: LetterId,
    },
    RejectApproval {
        actor: UserId,
        letter_id: LetterId,
    },
    Dispose {
        actor: UserId,
        letter_id: LetterId,
        disposition: DispositionRequest,
    },
    Archive {
        actor: UserId,
        letter_id: LetterId,
    },
    DeleteDraft {
        actor: UserId,
        letter_id: LetterId,
    },
    GetLetter {
        actor: UserId,
        letter_id: LetterId,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterUser { .. } => "register_user",
            Self::CreateDraft { .. } => "create_draft",
            Self::CreateAndSubmit { .. } => "create_and_submit",
            Self::CreateReply { .. } => "create_reply",
            Self::UpdateDraft { .. } => "update_draft",
            Self::Submit { .. } => "submit",
            Self::Verify { .. } => "verify",
            Self::RejectVerification { .. } => "reject_verification",
            Self::Approve { .. } => "approve",
            Self::RejectApproval { .. } => "reject_approval",
            Self::Dispose { .. } => "dispose",
            Self::Archive { .. } => "archive",
            Self::DeleteDraft { .. } => "delete_draft",
            Self::GetLetter { .. } => "get_letter",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandResult {
    Letter {
        /// Register label such as `001/KLR/2026`; absent for drafts.
        agenda_label: Option<String>,
        letter: Letter,
    },
    Deleted {
        letter_id: LetterId,
    },
    User {
        user: User,
    },
    Error {
        kind: String,
        message: String,
        retryable: bool,
    },
}

impl CommandResult {
    fn letter(letter: Letter) -> Self {
        let agenda_label = (!letter.agenda_number.is_empty()).then(|| {
            format_display(
                &letter.agenda_number,
                letter.letter_type,
                letter.created_at.year(),
            )
        });
        Self::Letter {
            agenda_label,
            letter,
        }
    }

    fn error(kind: &str, message: impl Into<String>, retryable: bool) -> Self {
        Self::Error {
            kind: kind.to_string(),
            message: message.into(),
            retryable,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl From<WorkflowError> for CommandResult {
    fn from(err: WorkflowError) -> Self {
        Self::error(err.kind(), err.to_string(), err.is_retryable())
    }
}

/// Run one command once.
pub async fn execute(
    engine: &WorkflowEngine,
    users: &dyn UserDirectory,
    command: Command,
) -> Result<CommandResult, WorkflowError> {
    let letter = match command {
        Command::RegisterUser { user } => {
            if user.username.trim().is_empty() {
                return Err(WorkflowError::Validation("username cannot be blank".into()));
            }
            users.upsert_user(&user).await?;
            return Ok(CommandResult::User { user });
        }
        Command::DeleteDraft { actor, letter_id } => {
            engine.delete_draft(actor, letter_id).await?;
            return Ok(CommandResult::Deleted { letter_id });
        }
        Command::CreateDraft { actor, letter } => engine.create_draft(actor, letter).await?,
        Command::CreateAndSubmit { actor, letter } => {
            engine.create_and_submit(actor, letter).await?
        }
        Command::CreateReply {
            actor,
            parent_id,
            letter,
            mode,
        } => engine.create_reply(actor, letter, parent_id, mode).await?,
        Command::UpdateDraft {
            actor,
            letter_id,
            patch,
        } => engine.update_draft(actor, letter_id, patch).await?,
        Command::Submit {
            actor,
            letter_id,
            request,
        } => engine.submit(actor, letter_id, request).await?,
        Command::Verify { actor, letter_id } => engine.verify(actor, letter_id).await?,
        Command::RejectVerification { actor, letter_id } => {
            engine.reject_verification(actor, letter_id).await?
        }
        Command::Approve { actor, letter_id } => engine.approve(actor, letter_id).await?,
        Command::RejectApproval { actor, letter_id } => {
            engine.reject_approval(actor, letter_id).await?
        }
        Command::Dispose {
            actor,
            letter_id,
            disposition,
        } => engine.dispose(actor, letter_id, disposition).await?,
        Command::Archive { actor, letter_id } => engine.archive(actor, letter_id).await?,
        Command::GetLetter { actor, letter_id } => engine.get_letter(actor, letter_id).await?,
    };
    Ok(CommandResult::letter(letter))
}

/// Run a command, retrying contended attempts up to `max_attempts` in total.
pub async fn execute_with_retry(
    engine: &WorkflowEngine,
    users: &dyn UserDirectory,
    command: Command,
    max_attempts: u32,
) -> CommandResult {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match execute(engine, users, command.clone()).await {
            Ok(result) => return result,
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff(attempt);
                warn!(
                    command = command.name(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Command contended, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                debug!(command = command.name(), kind = e.kind(), error = %e, "Command failed");
                return e.into();
            }
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    let exp = BASE_BACKOFF * 2u32.saturating_pow(attempt.saturating_sub(1).min(6));
    let jitter = rand::thread_rng().gen_range(0..=MAX_JITTER_MS);
    exp + Duration::from_millis(jitter)
}

/// Line-oriented front end used by the binary.
pub struct CommandDriver {
    engine: Arc<WorkflowEngine>,
    users: Arc<dyn UserDirectory>,
    max_attempts: u32,
}

impl CommandDriver {
    pub fn new(
        engine: Arc<WorkflowEngine>,
        users: Arc<dyn UserDirectory>,
        max_attempts: u32,
    ) -> Self {
        Self {
            engine,
            users,
            max_attempts,
        }
    }

    pub async fn handle(&self, command: Command) -> CommandResult {
        execute_with_retry(&self.engine, self.users.as_ref(), command, self.max_attempts).await
    }

    /// Parse a JSON command line and return the JSON result line.
    pub async fn handle_line(&self, line: &str) -> String {
        let result = match serde_json::from_str::<Command>(line) {
            Ok(command) => self.handle(command).await,
            Err(e) => CommandResult::error("parse", format!("invalid command: {e}"), false),
        };
        serde_json::to_string(&result).unwrap_or_else(|e| {
            format!(r#"{{"result":"error","kind":"serialization","message":"{e}","retryable":false}}"#)
        })
    }
}
