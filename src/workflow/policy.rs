//! Role and scope authorization for workflow actions.
//!
//! Decisions come from two static tables. `CREATE_RULES` says which staff
//! role may open which kind of letter. `RULES` grants an action to a set of
//! roles when every guard on the row holds for the letter at hand. An action
//! is allowed if any row grants it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WorkflowError;
use crate::letters::{Letter, LetterField, LetterStatus, LetterType, Role, Scope, User};

/// Something an actor can do to a letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Submit,
    Verify,
    RejectVerification,
    Approve,
    RejectApproval,
    Dispose,
    Archive,
    EditField,
    View,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Submit => "submit",
            Self::Verify => "verify",
            Self::RejectVerification => "reject_verification",
            Self::Approve => "approve",
            Self::RejectApproval => "reject_approval",
            Self::Dispose => "dispose",
            Self::Archive => "archive",
            Self::EditField => "edit_field",
            Self::View => "view",
            Self::Delete => "delete",
        }
    }

    /// The action a status edge represents, if the edge exists.
    pub fn for_edge(from: LetterStatus, to: LetterStatus) -> Option<Action> {
        use LetterStatus::*;

        if !from.can_transition_to(to) {
            return None;
        }
        Some(match (from, to) {
            (Draft, _) | (NeedsRevision, _) => Self::Submit,
            (NeedsVerification, NeedsApproval) => Self::Verify,
            (NeedsVerification, _) => Self::RejectVerification,
            (NeedsApproval, NeedsRevision) => Self::RejectApproval,
            (NeedsApproval, _) => Self::Approve,
            (AwaitingDisposition, _) => Self::Dispose,
            (Approved, _) | (Disposed, _) => Self::Archive,
            (Archived, _) => return None,
        })
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition on the actor/letter pair.
#[derive(Debug, Clone, Copy)]
enum Guard {
    StatusIn(&'static [LetterStatus]),
    TypeIn(&'static [LetterType]),
    Creator,
    /// The actor's role verifies the letter's scope.
    ScopeVerifier,
    /// If a verifier was assigned, it is the actor.
    AssignedVerifierIfSet,
    AssignedVerifier,
    ContentField,
    DispositionField,
}

impl Guard {
    fn holds(&self, actor: &User, letter: &Letter, field: Option<LetterField>) -> bool {
        match self {
            Self::StatusIn(statuses) => statuses.contains(&letter.status),
            Self::TypeIn(types) => types.contains(&letter.letter_type),
            Self::Creator => letter.created_by == actor.id,
            Self::ScopeVerifier => actor.role.can_verify_scope(letter.scope),
            Self::AssignedVerifierIfSet => letter.assigned_verifier.is_none_or(|v| v == actor.id),
            Self::AssignedVerifier => letter.assigned_verifier == Some(actor.id),
            Self::ContentField => field.is_some_and(|f| f.is_content()),
            Self::DispositionField => field.is_some_and(|f| f.is_disposition()),
        }
    }

    fn describe(&self, letter: &Letter) -> String {
        match self {
            Self::StatusIn(_) => format!("not allowed while letter is {}", letter.status),
            Self::TypeIn(_) => format!("not allowed on {} letters", letter.letter_type),
            Self::Creator => "only the creator may do this".into(),
            Self::ScopeVerifier => format!("role cannot verify {} letters", letter.scope),
            Self::AssignedVerifierIfSet | Self::AssignedVerifier => {
                "letter is assigned to another verifier".into()
            }
            Self::ContentField => "field is not a content field".into(),
            Self::DispositionField => "field is not a disposition field".into(),
        }
    }
}

struct Rule {
    action: Action,
    roles: &'static [Role],
    guards: &'static [Guard],
}

const STAFF: &[Role] = &[Role::StafProgram, Role::StafLembaga];
const MANAGERS: &[Role] = &[Role::ManajerKpp, Role::ManajerPemas, Role::ManajerPkl];
const DIRECTOR: &[Role] = &[Role::Direktur];
const EVERYONE: &[Role] = &Role::ALL;

const EDITABLE: &[LetterStatus] = &[LetterStatus::Draft, LetterStatus::NeedsRevision];
const ARCHIVABLE: &[LetterStatus] = &[LetterStatus::Approved, LetterStatus::Disposed];
const OUTBOUND: &[LetterType] = &[LetterType::Keluar, LetterType::Internal];

static RULES: &[Rule] = &[
    Rule {
        action: Action::Submit,
        roles: STAFF,
        guards: &[Guard::Creator, Guard::StatusIn(EDITABLE)],
    },
    Rule {
        action: Action::Verify,
        roles: MANAGERS,
        guards: &[
            Guard::ScopeVerifier,
            Guard::AssignedVerifierIfSet,
            Guard::StatusIn(&[LetterStatus::NeedsVerification]),
        ],
    },
    Rule {
        action: Action::RejectVerification,
        roles: MANAGERS,
        guards: &[
            Guard::ScopeVerifier,
            Guard::AssignedVerifierIfSet,
            Guard::StatusIn(&[LetterStatus::NeedsVerification]),
        ],
    },
    Rule {
        action: Action::Approve,
        roles: DIRECTOR,
        guards: &[Guard::StatusIn(&[LetterStatus::NeedsApproval])],
    },
    Rule {
        action: Action::RejectApproval,
        roles: DIRECTOR,
        guards: &[Guard::StatusIn(&[LetterStatus::NeedsApproval])],
    },
    Rule {
        action: Action::Dispose,
        roles: DIRECTOR,
        guards: &[
            Guard::TypeIn(&[LetterType::Masuk]),
            Guard::StatusIn(&[LetterStatus::AwaitingDisposition]),
        ],
    },
    Rule {
        action: Action::Archive,
        roles: STAFF,
        guards: &[Guard::Creator, Guard::StatusIn(ARCHIVABLE)],
    },
    Rule {
        action: Action::Archive,
        roles: &[Role::ARCHIVIST],
        guards: &[Guard::StatusIn(ARCHIVABLE)],
    },
    Rule {
        action: Action::EditField,
        roles: STAFF,
        guards: &[Guard::Creator, Guard::ContentField, Guard::StatusIn(EDITABLE)],
    },
    Rule {
        action: Action::EditField,
        roles: DIRECTOR,
        guards: &[
            Guard::DispositionField,
            Guard::StatusIn(&[LetterStatus::AwaitingDisposition]),
        ],
    },
    Rule {
        action: Action::View,
        roles: &[Role::Admin, Role::Direktur, Role::Pengurus],
        guards: &[],
    },
    Rule {
        action: Action::View,
        roles: EVERYONE,
        guards: &[Guard::Creator],
    },
    Rule {
        action: Action::View,
        roles: MANAGERS,
        guards: &[Guard::AssignedVerifier],
    },
    Rule {
        action: Action::View,
        roles: &[Role::ARCHIVIST],
        guards: &[Guard::TypeIn(OUTBOUND)],
    },
    Rule {
        action: Action::Delete,
        roles: &[Role::Admin],
        guards: &[],
    },
    Rule {
        action: Action::Delete,
        roles: STAFF,
        guards: &[Guard::Creator, Guard::StatusIn(&[LetterStatus::Draft])],
    },
];

/// Which letters a staff role may open.
struct CreateRule {
    role: Role,
    types: &'static [LetterType],
    scopes: &'static [Scope],
}

static CREATE_RULES: &[CreateRule] = &[
    CreateRule {
        role: Role::StafProgram,
        types: OUTBOUND,
        scopes: &[Scope::Eksternal],
    },
    CreateRule {
        role: Role::StafLembaga,
        types: &[LetterType::Masuk],
        scopes: &[Scope::Internal, Scope::Eksternal],
    },
    CreateRule {
        role: Role::StafLembaga,
        types: OUTBOUND,
        scopes: &[Scope::Internal],
    },
];

/// Pure authorization decisions over the rule tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionPolicy;

impl PermissionPolicy {
    pub fn new() -> Self {
        Self
    }

    pub fn can_create(&self, role: Role, scope: Scope, letter_type: LetterType) -> bool {
        CREATE_RULES
            .iter()
            .any(|r| r.role == role && r.types.contains(&letter_type) && r.scopes.contains(&scope))
    }

    pub fn can_submit(&self, actor: &User, letter: &Letter) -> bool {
        self.decide(Action::Submit, actor, letter, None).is_ok()
    }

    pub fn can_verify(&self, actor: &User, letter: &Letter) -> bool {
        self.decide(Action::Verify, actor, letter, None).is_ok()
    }

    pub fn can_approve(&self, actor: &User, letter: &Letter) -> bool {
        self.decide(Action::Approve, actor, letter, None).is_ok()
    }

    pub fn can_dispose(&self, actor: &User, letter: &Letter) -> bool {
        self.decide(Action::Dispose, actor, letter, None).is_ok()
    }

    pub fn can_archive(&self, actor: &User, letter: &Letter) -> bool {
        self.decide(Action::Archive, actor, letter, None).is_ok()
    }

    pub fn can_edit_field(&self, actor: &User, letter: &Letter, field: LetterField) -> bool {
        self.decide(Action::EditField, actor, letter, Some(field)).is_ok()
    }

    pub fn can_view(&self, actor: &User, letter: &Letter) -> bool {
        self.decide(Action::View, actor, letter, None).is_ok()
    }

    pub fn can_delete(&self, actor: &User, letter: &Letter) -> bool {
        self.decide(Action::Delete, actor, letter, None).is_ok()
    }

    /// Authorize `action` on an existing letter.
    pub fn check(
        &self,
        action: Action,
        actor: &User,
        letter: &Letter,
    ) -> Result<(), WorkflowError> {
        self.decide(action, actor, letter, None)
            .map_err(|reason| WorkflowError::denied(action, reason))
    }

    /// Authorize every field in `fields`; the first refused field wins.
    pub fn check_fields(
        &self,
        actor: &User,
        letter: &Letter,
        fields: &[LetterField],
    ) -> Result<(), WorkflowError> {
        for field in fields {
            self.decide(Action::EditField, actor, letter, Some(*field))
                .map_err(|reason| {
                    WorkflowError::denied(Action::EditField, format!("{field:?}: {reason}"))
                })?;
        }
        Ok(())
    }

    /// Authorize creating a letter of this kind.
    pub fn check_create(
        &self,
        actor: &User,
        scope: Scope,
        letter_type: LetterType,
    ) -> Result<(), WorkflowError> {
        if self.can_create(actor.role, scope, letter_type) {
            Ok(())
        } else {
            Err(WorkflowError::denied(
                Action::Create,
                format!(
                    "{} may not create {letter_type} letters with {scope} scope",
                    actor.role
                ),
            ))
        }
    }

    fn decide(
        &self,
        action: Action,
        actor: &User,
        letter: &Letter,
        field: Option<LetterField>,
    ) -> Result<(), String> {
        let mut reason = None;
        for rule in RULES
            .iter()
            .filter(|r| r.action == action && r.roles.contains(&actor.role))
        {
            match rule
                .guards
                .iter()
                .find(|g| !g.holds(actor, letter, field))
            {
                None => return Ok(()),
                Some(failed) => reason = Some(failed.describe(letter)),
            }
        }
        let reason = reason.unwrap_or_else(|| format!("role {} may not {action}", actor.role));
        debug!(
            letter_id = letter.id,
            actor = actor.id,
            action = %action,
            %reason,
            "Permission denied"
        );
        Err(reason)
    }
}
