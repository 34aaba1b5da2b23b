//! The letter workflow engine.
//!
//! Every operation resolves the actor, opens one store transaction, checks
//! the status edge and the permission table, applies the change, commits,
//! and only then publishes the resulting event. Any error before commit
//! drops the transaction, which rolls it back.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::WorkflowError;
use crate::letters::{
    ContentPatch, DispositionRequest, Letter, LetterField, LetterId, LetterStatus, NewLetter,
    Role, Scope, User, UserId,
};
use crate::notify::{EventBus, LetterEvent};
use crate::store::{AttachmentStore, LetterStore, LetterTransaction, UserDirectory};
use crate::workflow::agenda::AgendaAllocator;
use crate::workflow::policy::{Action, PermissionPolicy};
use crate::workflow::reply::ReplyLinkCoordinator;

#[derive(Debug, Clone, Copy)]
pub struct WorkflowOptions {
    /// Director approval moves a letter straight to Archived instead of Approved.
    pub archive_on_approval: bool,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            archive_on_approval: true,
        }
    }
}

/// Whether a new letter stays in Draft or is published immediately.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateMode {
    #[default]
    Draft,
    Submit,
}

/// Extra input for a submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Replaces the current verifier when set.
    #[serde(default)]
    pub assigned_verifier: Option<UserId>,
    /// Content changes saved together with the submission.
    #[serde(default)]
    pub patch: ContentPatch,
}

/// Field changes that ride along with a transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionPatch {
    pub content: ContentPatch,
    pub assigned_verifier: Option<UserId>,
    pub disposition: Option<DispositionRequest>,
}

impl TransitionPatch {
    pub fn content(content: ContentPatch) -> Self {
        Self {
            content,
            ..Default::default()
        }
    }

    pub fn disposition(disposition: DispositionRequest) -> Self {
        Self {
            disposition: Some(disposition),
            ..Default::default()
        }
    }

    pub fn fields(&self) -> Vec<LetterField> {
        let mut fields = self.content.fields();
        if self.assigned_verifier.is_some() {
            fields.push(LetterField::AssignedVerifier);
        }
        if let Some(ref d) = self.disposition {
            fields.extend(d.fields());
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    fn apply(&self, letter: &mut Letter) -> Result<(), WorkflowError> {
        self.content.validate()?;
        self.content.apply(letter);
        if let Some(verifier) = self.assigned_verifier {
            if letter.is_inbound() {
                return Err(WorkflowError::Validation(
                    "inbound letters are not verified".into(),
                ));
            }
            letter.assigned_verifier = Some(verifier);
        }
        if let Some(ref d) = self.disposition {
            if d.instruction.trim().is_empty() {
                return Err(WorkflowError::Validation(
                    "disposition instruction cannot be blank".into(),
                ));
            }
            if d.needs_reply && !letter.is_inbound() {
                return Err(WorkflowError::Validation(
                    "only inbound letters can await a reply".into(),
                ));
            }
            letter.disposition = Some(d.rendered());
            letter.disposition_target = d
                .target_unit
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            letter.needs_reply = d.needs_reply;
        }
        Ok(())
    }
}

/// Result of a committed transition.
#[derive(Debug, Clone)]
pub struct Transition {
    pub letter: Letter,
    /// `None` for pure field edits.
    pub event: Option<LetterEvent>,
}

/// What the caller asked for, resolved against the loaded letter.
#[derive(Debug, Clone, Copy)]
enum Step {
    Edit,
    To {
        status: LetterStatus,
        expected: Option<Action>,
    },
    Submit,
    Approve,
}

pub struct WorkflowEngine {
    store: Arc<dyn LetterStore>,
    users: Arc<dyn UserDirectory>,
    attachments: Arc<dyn AttachmentStore>,
    events: EventBus,
    policy: PermissionPolicy,
    agenda: AgendaAllocator,
    replies: ReplyLinkCoordinator,
    options: WorkflowOptions,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn LetterStore>,
        users: Arc<dyn UserDirectory>,
        attachments: Arc<dyn AttachmentStore>,
        events: EventBus,
        options: WorkflowOptions,
    ) -> Self {
        Self {
            store,
            users,
            attachments,
            events,
            policy: PermissionPolicy::new(),
            agenda: AgendaAllocator,
            replies: ReplyLinkCoordinator,
            options,
        }
    }

    pub fn policy(&self) -> &PermissionPolicy {
        &self.policy
    }

    // ── Creation ────────────────────────────────────────────────────

    /// Save a new letter in Draft. No agenda number is assigned.
    pub async fn create_draft(
        &self,
        actor: UserId,
        request: NewLetter,
    ) -> Result<Letter, WorkflowError> {
        self.create(actor, request, CreateMode::Draft, None).await
    }

    /// Create a letter and publish it in the same transaction.
    ///
    /// Inbound letters land in AwaitingDisposition, everything else in
    /// NeedsVerification.
    pub async fn create_and_submit(
        &self,
        actor: UserId,
        request: NewLetter,
    ) -> Result<Letter, WorkflowError> {
        self.create(actor, request, CreateMode::Submit, None).await
    }

    /// Create an outbound reply to `parent_id` and archive the parent.
    pub async fn create_reply(
        &self,
        actor: UserId,
        request: NewLetter,
        parent_id: LetterId,
        mode: CreateMode,
    ) -> Result<Letter, WorkflowError> {
        if request.letter_type.is_inbound() {
            return Err(WorkflowError::Validation(
                "a reply must be an outbound letter".into(),
            ));
        }
        self.create(actor, request, mode, Some(parent_id)).await
    }

    async fn create(
        &self,
        actor_id: UserId,
        request: NewLetter,
        mode: CreateMode,
        parent_id: Option<LetterId>,
    ) -> Result<Letter, WorkflowError> {
        let actor = self.actor(actor_id).await?;
        request.validate()?;
        self.policy
            .check_create(&actor, request.scope, request.letter_type)?;
        if request.letter_type.is_inbound() && request.assigned_verifier.is_some() {
            return Err(WorkflowError::Validation(
                "inbound letters are not verified".into(),
            ));
        }

        let mut letter = Letter::draft(request, actor.id);
        let mut tx = self.store.begin().await?;

        if mode == CreateMode::Submit {
            self.prepare_publication(tx.as_mut(), &mut letter).await?;
            letter.status = LetterStatus::first_published(letter.letter_type);
        }

        let parent = match parent_id {
            Some(parent_id) => Some(
                self.replies
                    .link_reply(tx.as_mut(), &mut letter, parent_id)
                    .await?,
            ),
            None => None,
        };

        letter.id = tx.insert_letter(&letter).await?;
        tx.commit().await?;

        info!(
            letter_id = letter.id,
            letter_type = %letter.letter_type,
            status = %letter.status,
            agenda_number = %letter.agenda_number,
            actor = actor.id,
            "Letter created"
        );

        self.emit(LetterEvent::created(letter.clone())).await;
        if let Some(parent) = parent {
            self.emit(LetterEvent::status_moved(parent.previous_status, parent.letter))
                .await;
        }
        Ok(letter)
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Move a letter to `desired`, or only edit fields when `desired` is `None`.
    pub async fn apply_transition(
        &self,
        letter_id: LetterId,
        actor: UserId,
        desired: Option<LetterStatus>,
        patch: TransitionPatch,
    ) -> Result<Transition, WorkflowError> {
        let step = match desired {
            Some(status) => Step::To {
                status,
                expected: None,
            },
            None => Step::Edit,
        };
        self.transact(letter_id, actor, step, patch).await
    }

    /// Edit content of a Draft or NeedsRevision letter.
    pub async fn update_draft(
        &self,
        actor: UserId,
        letter_id: LetterId,
        patch: ContentPatch,
    ) -> Result<Letter, WorkflowError> {
        self.transact(letter_id, actor, Step::Edit, TransitionPatch::content(patch))
            .await
            .map(|t| t.letter)
    }

    /// Publish a Draft, or resubmit a letter sent back for revision.
    pub async fn submit(
        &self,
        actor: UserId,
        letter_id: LetterId,
        request: SubmitRequest,
    ) -> Result<Letter, WorkflowError> {
        let patch = TransitionPatch {
            content: request.patch,
            assigned_verifier: request.assigned_verifier,
            disposition: None,
        };
        self.transact(letter_id, actor, Step::Submit, patch)
            .await
            .map(|t| t.letter)
    }

    pub async fn verify(
        &self,
        actor: UserId,
        letter_id: LetterId,
    ) -> Result<Letter, WorkflowError> {
        self.step_to(actor, letter_id, LetterStatus::NeedsApproval, Action::Verify)
            .await
    }

    pub async fn reject_verification(
        &self,
        actor: UserId,
        letter_id: LetterId,
    ) -> Result<Letter, WorkflowError> {
        self.step_to(
            actor,
            letter_id,
            LetterStatus::NeedsRevision,
            Action::RejectVerification,
        )
        .await
    }

    pub async fn approve(
        &self,
        actor: UserId,
        letter_id: LetterId,
    ) -> Result<Letter, WorkflowError> {
        self.transact(letter_id, actor, Step::Approve, TransitionPatch::default())
            .await
            .map(|t| t.letter)
    }

    pub async fn reject_approval(
        &self,
        actor: UserId,
        letter_id: LetterId,
    ) -> Result<Letter, WorkflowError> {
        self.step_to(
            actor,
            letter_id,
            LetterStatus::NeedsRevision,
            Action::RejectApproval,
        )
        .await
    }

    pub async fn dispose(
        &self,
        actor: UserId,
        letter_id: LetterId,
        request: DispositionRequest,
    ) -> Result<Letter, WorkflowError> {
        let step = Step::To {
            status: LetterStatus::Disposed,
            expected: Some(Action::Dispose),
        };
        self.transact(letter_id, actor, step, TransitionPatch::disposition(request))
            .await
            .map(|t| t.letter)
    }

    pub async fn archive(
        &self,
        actor: UserId,
        letter_id: LetterId,
    ) -> Result<Letter, WorkflowError> {
        self.step_to(actor, letter_id, LetterStatus::Archived, Action::Archive)
            .await
    }

    async fn step_to(
        &self,
        actor: UserId,
        letter_id: LetterId,
        status: LetterStatus,
        expected: Action,
    ) -> Result<Letter, WorkflowError> {
        let step = Step::To {
            status,
            expected: Some(expected),
        };
        self.transact(letter_id, actor, step, TransitionPatch::default())
            .await
            .map(|t| t.letter)
    }

    // ── Other operations ────────────────────────────────────────────

    /// Remove a letter. Admins may delete anything, creators only their drafts.
    pub async fn delete_draft(
        &self,
        actor_id: UserId,
        letter_id: LetterId,
    ) -> Result<Letter, WorkflowError> {
        let actor = self.actor(actor_id).await?;
        let mut tx = self.store.begin().await?;
        let letter = load(tx.as_mut(), letter_id).await?;
        self.policy.check(Action::Delete, &actor, &letter)?;

        if !tx.delete_letter(letter_id).await? {
            return Err(WorkflowError::not_found("letter", letter_id));
        }
        tx.commit().await?;
        info!(letter_id, actor = actor.id, "Letter deleted");
        Ok(letter)
    }

    pub async fn get_letter(
        &self,
        actor_id: UserId,
        letter_id: LetterId,
    ) -> Result<Letter, WorkflowError> {
        let actor = self.actor(actor_id).await?;
        let letter = self
            .store
            .fetch_letter(letter_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("letter", letter_id))?;
        self.policy.check(Action::View, &actor, &letter)?;
        Ok(letter)
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn actor(&self, id: UserId) -> Result<User, WorkflowError> {
        self.users
            .get_user(id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("user", id))
    }

    /// Resolve a step to a target status and the action it must represent.
    fn target(&self, step: Step, letter: &Letter) -> Option<(LetterStatus, Option<Action>)> {
        match step {
            Step::Edit => None,
            Step::To { status, expected } => Some((status, expected)),
            Step::Submit => {
                let status = if letter.status == LetterStatus::NeedsRevision {
                    LetterStatus::NeedsVerification
                } else {
                    LetterStatus::first_published(letter.letter_type)
                };
                Some((status, Some(Action::Submit)))
            }
            Step::Approve => {
                let status = if self.options.archive_on_approval {
                    LetterStatus::Archived
                } else {
                    LetterStatus::Approved
                };
                Some((status, Some(Action::Approve)))
            }
        }
    }

    async fn transact(
        &self,
        letter_id: LetterId,
        actor_id: UserId,
        step: Step,
        patch: TransitionPatch,
    ) -> Result<Transition, WorkflowError> {
        let actor = self.actor(actor_id).await?;
        let mut tx = self.store.begin().await?;
        let mut letter = load(tx.as_mut(), letter_id).await?;
        let previous = letter.status;

        let target = self.target(step, &letter);
        let action = match target {
            None => {
                if patch.is_empty() {
                    return Err(WorkflowError::Validation("nothing to update".into()));
                }
                None
            }
            Some((to, expected)) => {
                let action = Action::for_edge(previous, to)
                    .filter(|a| expected.is_none_or(|e| e == *a))
                    .ok_or(WorkflowError::InvalidTransition { from: previous, to })?;
                // A draft only ever leaves for the status its type publishes into.
                if previous == LetterStatus::Draft
                    && to != LetterStatus::first_published(letter.letter_type)
                {
                    return Err(WorkflowError::InvalidTransition { from: previous, to });
                }
                self.policy.check(action, &actor, &letter)?;
                if action == Action::Dispose && patch.disposition.is_none() {
                    return Err(WorkflowError::Validation(
                        "a disposition instruction is required".into(),
                    ));
                }
                Some((action, to))
            }
        };

        if patch.disposition.is_some() && !matches!(action, Some((Action::Dispose, _))) {
            return Err(WorkflowError::Validation(
                "a disposition is only recorded by disposing the letter".into(),
            ));
        }
        self.policy.check_fields(&actor, &letter, &patch.fields())?;
        if let Some(scope) = patch.content.scope.filter(|s| *s != letter.scope) {
            let creator = self.actor(letter.created_by).await?;
            self.policy.check_create(&creator, scope, letter.letter_type)?;
        }
        patch.apply(&mut letter)?;

        if let Some((action, to)) = action {
            if previous.is_editable() && to.is_published() {
                self.prepare_publication(tx.as_mut(), &mut letter).await?;
            }
            letter.status = to;
            match action {
                Action::Verify => letter.verified_by = Some(actor.id),
                Action::Approve | Action::Dispose => {
                    letter.disposed_by = Some(actor.id);
                    letter.disposed_at = Some(Utc::now());
                }
                _ => {}
            }
        }

        letter.updated_at = Utc::now();
        tx.update_letter(&letter).await?;
        tx.commit().await?;

        let event = match action {
            Some((action, to)) => {
                info!(
                    letter_id,
                    from = %previous,
                    to = %to,
                    action = %action,
                    actor = actor.id,
                    "Letter status changed"
                );
                let event = LetterEvent::status_moved(previous, letter.clone());
                self.emit(event.clone()).await;
                Some(event)
            }
            None => {
                info!(letter_id, actor = actor.id, "Letter fields updated");
                None
            }
        };

        Ok(Transition { letter, event })
    }

    /// Checks and side effects of a letter leaving Draft for the first
    /// published status.
    async fn prepare_publication(
        &self,
        tx: &mut dyn LetterTransaction,
        letter: &mut Letter,
    ) -> Result<(), WorkflowError> {
        if letter.uses_verification() {
            let verifier = self.resolve_verifier(letter).await?;
            letter.assigned_verifier = Some(verifier);
        }

        if !self.attachments.has_file(letter).await {
            return Err(WorkflowError::Precondition(
                "a scanned letter must be attached before submission".into(),
            ));
        }

        if letter.agenda_number.is_empty() {
            letter.agenda_number = self
                .agenda
                .allocate(tx, letter.letter_type, letter.created_at.year())
                .await?;
        }
        Ok(())
    }

    async fn resolve_verifier(&self, letter: &Letter) -> Result<UserId, WorkflowError> {
        match letter.assigned_verifier {
            Some(id) => {
                let user = self.users.get_user(id).await?.ok_or_else(|| {
                    WorkflowError::Validation(format!("verifier {id} does not exist"))
                })?;
                if !user.role.can_verify_scope(letter.scope) {
                    return Err(WorkflowError::Validation(format!(
                        "{} cannot verify {} letters",
                        user.role, letter.scope
                    )));
                }
                Ok(user.id)
            }
            None if letter.scope == Scope::Internal => self
                .users
                .users_with_role(Role::ManajerPkl)
                .await?
                .first()
                .map(|u| u.id)
                .ok_or_else(|| {
                    WorkflowError::Precondition("no manajer_pkl is registered to verify".into())
                }),
            None => Err(WorkflowError::Precondition(
                "an outbound letter needs an assigned verifier before submission".into(),
            )),
        }
    }

    async fn emit(&self, event: LetterEvent) {
        let event_id = event.id;
        let letter_id = event.letter.id;
        if let Err(e) = self.events.publish(event).await {
            warn!(
                %event_id,
                letter_id,
                error = %e,
                "Letter event not published"
            );
        }
    }
}

async fn load(
    tx: &mut dyn LetterTransaction,
    letter_id: LetterId,
) -> Result<Letter, WorkflowError> {
    tx.get_letter(letter_id)
        .await?
        .ok_or_else(|| WorkflowError::not_found("letter", letter_id))
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::letters::{LetterType, Priority};
    use crate::notify::EventKind;
    use crate::store::{MemoryStore, RecordedAttachments};

    const STAF_PROGRAM: UserId = 1;
    const STAF_LEMBAGA: UserId = 2;
    const KPP: UserId = 7;
    const PEMAS: UserId = 8;
    const PKL: UserId = 9;
    const DIREKTUR: UserId = 20;

    struct Harness {
        engine: WorkflowEngine,
        store: MemoryStore,
        events: mpsc::Receiver<LetterEvent>,
    }

    impl Harness {
        async fn new(options: WorkflowOptions) -> Self {
            let store = MemoryStore::default();
            for (id, role) in [
                (STAF_PROGRAM, Role::StafProgram),
                (STAF_LEMBAGA, Role::StafLembaga),
                (KPP, Role::ManajerKpp),
                (PEMAS, Role::ManajerPemas),
                (PKL, Role::ManajerPkl),
                (DIREKTUR, Role::Direktur),
            ] {
                store.add_user(User::new(id, format!("u{id}"), role)).await;
            }
            let (bus, events) = EventBus::channel(64);
            let engine = WorkflowEngine::new(
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                Arc::new(RecordedAttachments),
                bus,
                options,
            );
            Self {
                engine,
                store,
                events,
            }
        }

        fn drain(&mut self) -> Vec<LetterEvent> {
            let mut out = Vec::new();
            while let Ok(e) = self.events.try_recv() {
                out.push(e);
            }
            out
        }
    }

    fn outbound() -> NewLetter {
        NewLetter::new(
            LetterType::Keluar,
            Scope::Eksternal,
            "Yayasan Digimail",
            "01/KLR/2026",
            "Undangan Rapat",
        )
        .with_file("surat/keluar/01.pdf")
    }

    fn inbound() -> NewLetter {
        NewLetter::new(
            LetterType::Masuk,
            Scope::Eksternal,
            "Dinas Sosial",
            "77/DS/2026",
            "Permohonan Data",
        )
        .with_file("surat/masuk/77.pdf")
    }

    #[tokio::test]
    async fn draft_has_no_agenda_number() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let letter = h.engine.create_draft(STAF_PROGRAM, outbound()).await.unwrap();
        assert_eq!(letter.status, LetterStatus::Draft);
        assert!(letter.agenda_number.is_empty());
        assert_eq!(letter.created_by, STAF_PROGRAM);
    }

    #[tokio::test]
    async fn creation_is_gated_by_role_and_scope() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let err = h.engine.create_draft(DIREKTUR, outbound()).await.unwrap_err();
        assert_eq!(err.kind(), "permission_denied");

        let mut internal = outbound();
        internal.scope = Scope::Internal;
        let err = h.engine.create_draft(STAF_PROGRAM, internal.clone()).await.unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
        assert!(h.engine.create_draft(STAF_LEMBAGA, internal).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_actor_is_not_found() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let err = h.engine.create_draft(404, outbound()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { ref entity, .. } if entity == "user"));
    }

    #[tokio::test]
    async fn blank_fields_fail_validation() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let mut request = outbound();
        request.title = "  ".into();
        let err = h.engine.create_draft(STAF_PROGRAM, request).await.unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn eksternal_submit_requires_verifier() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let draft = h.engine.create_draft(STAF_PROGRAM, outbound()).await.unwrap();
        let err = h
            .engine
            .submit(STAF_PROGRAM, draft.id, SubmitRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "precondition");

        let stored = h.store.fetch_letter(draft.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LetterStatus::Draft);
        assert!(stored.agenda_number.is_empty());
    }

    #[tokio::test]
    async fn verifier_must_match_scope() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let draft = h
            .engine
            .create_draft(STAF_PROGRAM, outbound().with_verifier(PKL))
            .await
            .unwrap();
        let err = h
            .engine
            .submit(STAF_PROGRAM, draft.id, SubmitRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn internal_scope_auto_assigns_pkl() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let mut request = outbound();
        request.scope = Scope::Internal;
        let letter = h.engine.create_and_submit(STAF_LEMBAGA, request).await.unwrap();
        assert_eq!(letter.status, LetterStatus::NeedsVerification);
        assert_eq!(letter.assigned_verifier, Some(PKL));
        assert_eq!(letter.agenda_number, "1");
    }

    #[tokio::test]
    async fn submit_requires_attachment() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let mut request = outbound().with_verifier(KPP);
        request.file_path = None;
        let err = h.engine.create_and_submit(STAF_PROGRAM, request).await.unwrap_err();
        assert_eq!(err.kind(), "precondition");
        assert_eq!(h.store.letter_count().await, 0);
    }

    #[tokio::test]
    async fn outbound_happy_path_archives_on_approval() {
        let mut h = Harness::new(WorkflowOptions::default()).await;
        let draft = h.engine.create_draft(STAF_PROGRAM, outbound()).await.unwrap();
        let submitted = h
            .engine
            .submit(
                STAF_PROGRAM,
                draft.id,
                SubmitRequest {
                    assigned_verifier: Some(KPP),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(submitted.status, LetterStatus::NeedsVerification);
        assert_eq!(submitted.agenda_number, "1");

        let verified = h.engine.verify(KPP, draft.id).await.unwrap();
        assert_eq!(verified.status, LetterStatus::NeedsApproval);
        assert_eq!(verified.verified_by, Some(KPP));

        let approved = h.engine.approve(DIREKTUR, draft.id).await.unwrap();
        assert_eq!(approved.status, LetterStatus::Archived);
        assert_eq!(approved.disposed_by, Some(DIREKTUR));

        let statuses: Vec<LetterStatus> = h.drain().iter().map(|e| e.new_status).collect();
        assert_eq!(
            statuses,
            vec![
                LetterStatus::Draft,
                LetterStatus::NeedsVerification,
                LetterStatus::NeedsApproval,
                LetterStatus::Archived,
            ]
        );
    }

    #[tokio::test]
    async fn approval_can_stop_at_approved() {
        let h = Harness::new(WorkflowOptions {
            archive_on_approval: false,
        })
        .await;
        let letter = h
            .engine
            .create_and_submit(STAF_PROGRAM, outbound().with_verifier(PEMAS))
            .await
            .unwrap();
        h.engine.verify(PEMAS, letter.id).await.unwrap();
        let approved = h.engine.approve(DIREKTUR, letter.id).await.unwrap();
        assert_eq!(approved.status, LetterStatus::Approved);

        let err = h.engine.archive(DIREKTUR, letter.id).await.unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
        let archived = h.engine.archive(STAF_PROGRAM, letter.id).await.unwrap();
        assert_eq!(archived.status, LetterStatus::Archived);
    }

    #[tokio::test]
    async fn only_assigned_verifier_may_verify() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let letter = h
            .engine
            .create_and_submit(STAF_PROGRAM, outbound().with_verifier(KPP))
            .await
            .unwrap();
        let err = h.engine.verify(PEMAS, letter.id).await.unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
        let err = h.engine.approve(DIREKTUR, letter.id).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[tokio::test]
    async fn revision_keeps_agenda_and_verifier() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let letter = h
            .engine
            .create_and_submit(STAF_PROGRAM, outbound().with_verifier(KPP))
            .await
            .unwrap();
        let rejected = h.engine.reject_verification(KPP, letter.id).await.unwrap();
        assert_eq!(rejected.status, LetterStatus::NeedsRevision);

        let edited = h
            .engine
            .update_draft(
                STAF_PROGRAM,
                letter.id,
                ContentPatch {
                    title: Some("Undangan Rapat (revisi)".into()),
                    priority: Some(Priority::Segera),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.status, LetterStatus::NeedsRevision);

        let resubmitted = h
            .engine
            .submit(STAF_PROGRAM, letter.id, SubmitRequest::default())
            .await
            .unwrap();
        assert_eq!(resubmitted.status, LetterStatus::NeedsVerification);
        assert_eq!(resubmitted.agenda_number, letter.agenda_number);
        assert_eq!(resubmitted.assigned_verifier, Some(KPP));
        assert_eq!(resubmitted.title, "Undangan Rapat (revisi)");
    }

    #[tokio::test]
    async fn wrong_action_for_edge_is_invalid_transition() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let letter = h
            .engine
            .create_and_submit(STAF_PROGRAM, outbound().with_verifier(KPP))
            .await
            .unwrap();
        let err = h.engine.reject_approval(DIREKTUR, letter.id).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
    }

    #[tokio::test]
    async fn field_edit_emits_no_event() {
        let mut h = Harness::new(WorkflowOptions::default()).await;
        let draft = h.engine.create_draft(STAF_PROGRAM, outbound()).await.unwrap();
        h.drain();

        let t = h
            .engine
            .apply_transition(
                draft.id,
                STAF_PROGRAM,
                None,
                TransitionPatch::content(ContentPatch {
                    body: Some("Isi surat".into()),
                    ..Default::default()
                }),
            )
            .await
            .unwrap();
        assert!(t.event.is_none());
        assert!(h.drain().is_empty());

        let err = h
            .engine
            .update_draft(STAF_PROGRAM, draft.id, ContentPatch::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn content_is_frozen_after_submission() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let letter = h
            .engine
            .create_and_submit(STAF_PROGRAM, outbound().with_verifier(KPP))
            .await
            .unwrap();
        let err = h
            .engine
            .update_draft(
                STAF_PROGRAM,
                letter.id,
                ContentPatch {
                    title: Some("x".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
    }

    #[tokio::test]
    async fn director_cannot_edit_content_while_disposing() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let letter = h.engine.create_and_submit(STAF_LEMBAGA, inbound()).await.unwrap();
        let patch = TransitionPatch {
            content: ContentPatch {
                sender: Some("Lain".into()),
                ..Default::default()
            },
            disposition: Some(DispositionRequest::new("Tindak lanjuti")),
            ..Default::default()
        };
        let err = h
            .engine
            .apply_transition(letter.id, DIREKTUR, Some(LetterStatus::Disposed), patch)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
    }

    #[tokio::test]
    async fn inbound_disposition_path() {
        let mut h = Harness::new(WorkflowOptions::default()).await;
        let letter = h.engine.create_and_submit(STAF_LEMBAGA, inbound()).await.unwrap();
        assert_eq!(letter.status, LetterStatus::AwaitingDisposition);
        assert_eq!(letter.agenda_number, "1");
        assert!(letter.assigned_verifier.is_none());

        let mut request = DispositionRequest::new("Siapkan balasan").requiring_reply();
        request.target_unit = Some("Program".into());
        request.note = Some("minggu ini".into());
        let disposed = h.engine.dispose(DIREKTUR, letter.id, request).await.unwrap();
        assert_eq!(disposed.status, LetterStatus::Disposed);
        assert_eq!(
            disposed.disposition.as_deref(),
            Some("Siapkan balasan | Catatan: minggu ini")
        );
        assert_eq!(disposed.disposition_target.as_deref(), Some("Program"));
        assert!(disposed.needs_reply);
        assert_eq!(disposed.disposed_by, Some(DIREKTUR));
        assert!(disposed.disposed_at.is_some());

        let events = h.drain();
        assert_eq!(events[0].kind, EventKind::Created);
        assert_eq!(events[1].previous_status, Some(LetterStatus::AwaitingDisposition));
    }

    #[tokio::test]
    async fn dispose_requires_instruction() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let letter = h.engine.create_and_submit(STAF_LEMBAGA, inbound()).await.unwrap();
        let err = h
            .engine
            .apply_transition(
                letter.id,
                DIREKTUR,
                Some(LetterStatus::Disposed),
                TransitionPatch::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn reply_archives_parent_once() {
        let mut h = Harness::new(WorkflowOptions::default()).await;
        let parent = h.engine.create_and_submit(STAF_LEMBAGA, inbound()).await.unwrap();
        h.engine
            .dispose(
                DIREKTUR,
                parent.id,
                DispositionRequest::new("Balas").requiring_reply(),
            )
            .await
            .unwrap();
        h.drain();

        let reply = h
            .engine
            .create_reply(STAF_PROGRAM, outbound(), parent.id, CreateMode::Draft)
            .await
            .unwrap();
        assert_eq!(reply.in_reply_to, Some(parent.id));
        let stored_parent = h.store.fetch_letter(parent.id).await.unwrap().unwrap();
        assert_eq!(stored_parent.status, LetterStatus::Archived);

        let events = h.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].letter.id, parent.id);
        assert_eq!(events[1].new_status, LetterStatus::Archived);

        let err = h
            .engine
            .create_reply(STAF_PROGRAM, outbound(), parent.id, CreateMode::Draft)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
        assert_eq!(h.store.letter_count().await, 2);
    }

    #[tokio::test]
    async fn archived_letters_are_terminal() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let letter = h
            .engine
            .create_and_submit(STAF_PROGRAM, outbound().with_verifier(KPP))
            .await
            .unwrap();
        h.engine.verify(KPP, letter.id).await.unwrap();
        h.engine.approve(DIREKTUR, letter.id).await.unwrap();

        for status in LetterStatus::ALL {
            let err = h
                .engine
                .apply_transition(letter.id, DIREKTUR, Some(status), TransitionPatch::default())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "invalid_transition", "archived -> {status}");
        }
    }

    #[tokio::test]
    async fn delete_only_drafts_for_creator() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let draft = h.engine.create_draft(STAF_PROGRAM, outbound()).await.unwrap();
        let err = h.engine.delete_draft(DIREKTUR, draft.id).await.unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
        h.engine.delete_draft(STAF_PROGRAM, draft.id).await.unwrap();
        let err = h.engine.get_letter(STAF_PROGRAM, draft.id).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn get_letter_checks_visibility() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let letter = h
            .engine
            .create_and_submit(STAF_PROGRAM, outbound().with_verifier(KPP))
            .await
            .unwrap();
        assert!(h.engine.get_letter(KPP, letter.id).await.is_ok());
        assert!(h.engine.get_letter(DIREKTUR, letter.id).await.is_ok());
        let err = h.engine.get_letter(PEMAS, letter.id).await.unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
    }

    #[tokio::test]
    async fn agenda_numbers_are_per_type() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let a = h
            .engine
            .create_and_submit(STAF_PROGRAM, outbound().with_verifier(KPP))
            .await
            .unwrap();
        let b = h.engine.create_and_submit(STAF_LEMBAGA, inbound()).await.unwrap();
        let c = h
            .engine
            .create_and_submit(STAF_PROGRAM, outbound().with_verifier(KPP))
            .await
            .unwrap();
        assert_eq!(a.agenda_number, "1");
        assert_eq!(b.agenda_number, "1");
        assert_eq!(c.agenda_number, "2");
    }

    #[tokio::test]
    async fn draft_only_leaves_for_its_first_published_status() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let keluar = h
            .engine
            .create_draft(STAF_PROGRAM, outbound().with_verifier(KPP))
            .await
            .unwrap();
        let masuk = h.engine.create_draft(STAF_LEMBAGA, inbound()).await.unwrap();

        for (letter, actor, status) in [
            (&keluar, STAF_PROGRAM, LetterStatus::AwaitingDisposition),
            (&masuk, STAF_LEMBAGA, LetterStatus::NeedsVerification),
        ] {
            let err = h
                .engine
                .apply_transition(letter.id, actor, Some(status), TransitionPatch::default())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), "invalid_transition", "{} -> {status}", letter.letter_type);
            let stored = h.store.fetch_letter(letter.id).await.unwrap().unwrap();
            assert_eq!(stored.status, LetterStatus::Draft);
            assert!(stored.agenda_number.is_empty());
        }

        let t = h
            .engine
            .apply_transition(
                keluar.id,
                STAF_PROGRAM,
                Some(LetterStatus::NeedsVerification),
                TransitionPatch::default(),
            )
            .await
            .unwrap();
        assert_eq!(t.letter.agenda_number, "1");
        assert_eq!(t.letter.assigned_verifier, Some(KPP));

        let t = h
            .engine
            .apply_transition(
                masuk.id,
                STAF_LEMBAGA,
                Some(LetterStatus::AwaitingDisposition),
                TransitionPatch::default(),
            )
            .await
            .unwrap();
        assert_eq!(t.letter.agenda_number, "1");
    }

    #[tokio::test]
    async fn raw_transition_out_of_draft_runs_publication_checks() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let draft = h.engine.create_draft(STAF_PROGRAM, outbound()).await.unwrap();
        let err = h
            .engine
            .apply_transition(
                draft.id,
                STAF_PROGRAM,
                Some(LetterStatus::NeedsVerification),
                TransitionPatch::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "precondition");
        let stored = h.store.fetch_letter(draft.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LetterStatus::Draft);
        assert!(stored.agenda_number.is_empty());
    }

    #[tokio::test]
    async fn disposition_fields_need_the_dispose_action() {
        let mut h = Harness::new(WorkflowOptions::default()).await;
        let letter = h.engine.create_and_submit(STAF_LEMBAGA, inbound()).await.unwrap();
        h.drain();

        let err = h
            .engine
            .apply_transition(
                letter.id,
                DIREKTUR,
                None,
                TransitionPatch::disposition(DispositionRequest::new("Balas").requiring_reply()),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let stored = h.store.fetch_letter(letter.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LetterStatus::AwaitingDisposition);
        assert!(!stored.needs_reply);
        assert!(stored.disposition.is_none());
        assert!(stored.disposed_by.is_none());
        assert!(h.drain().is_empty());
    }

    #[tokio::test]
    async fn reply_cannot_skip_the_disposition() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let parent = h.engine.create_and_submit(STAF_LEMBAGA, inbound()).await.unwrap();

        // Flag set without going through dispose.
        let mut flagged = h.store.fetch_letter(parent.id).await.unwrap().unwrap();
        flagged.needs_reply = true;
        let mut tx = h.store.begin().await.unwrap();
        tx.update_letter(&flagged).await.unwrap();
        tx.commit().await.unwrap();

        let err = h
            .engine
            .create_reply(STAF_PROGRAM, outbound(), parent.id, CreateMode::Draft)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");

        let stored = h.store.fetch_letter(parent.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LetterStatus::AwaitingDisposition);
        assert_eq!(h.store.letter_count().await, 1);
    }

    #[tokio::test]
    async fn scope_edit_respects_creation_rules() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let draft = h.engine.create_draft(STAF_PROGRAM, outbound()).await.unwrap();
        let err = h
            .engine
            .update_draft(
                STAF_PROGRAM,
                draft.id,
                ContentPatch {
                    scope: Some(Scope::Internal),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "permission_denied");
        let stored = h.store.fetch_letter(draft.id).await.unwrap().unwrap();
        assert_eq!(stored.scope, Scope::Eksternal);

        let mut internal = outbound();
        internal.scope = Scope::Internal;
        let draft = h.engine.create_draft(STAF_LEMBAGA, internal).await.unwrap();
        let err = h
            .engine
            .update_draft(
                STAF_LEMBAGA,
                draft.id,
                ContentPatch {
                    scope: Some(Scope::Eksternal),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "permission_denied");

        // Switching an inbound letter between scopes stays allowed.
        let masuk = h.engine.create_draft(STAF_LEMBAGA, inbound()).await.unwrap();
        let edited = h
            .engine
            .update_draft(
                STAF_LEMBAGA,
                masuk.id,
                ContentPatch {
                    scope: Some(Scope::Internal),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.scope, Scope::Internal);
    }

    #[tokio::test]
    async fn inbound_submit_rejects_a_verifier() {
        let h = Harness::new(WorkflowOptions::default()).await;
        let draft = h.engine.create_draft(STAF_LEMBAGA, inbound()).await.unwrap();
        let err = h
            .engine
            .submit(
                STAF_LEMBAGA,
                draft.id,
                SubmitRequest {
                    assigned_verifier: Some(KPP),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let stored = h.store.fetch_letter(draft.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LetterStatus::Draft);
        assert!(stored.assigned_verifier.is_none());
    }
}
