//! Letter data model: letters, users, roles, and the patches staff and
//! directors apply to them.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::state::LetterStatus;
use crate::error::WorkflowError;

pub type LetterId = i64;
pub type UserId = i64;

/// Direction of the correspondence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LetterType {
    /// Inbound.
    Masuk,
    /// Outbound.
    Keluar,
    Internal,
}

impl LetterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Masuk => "masuk",
            Self::Keluar => "keluar",
            Self::Internal => "internal",
        }
    }

    pub fn is_inbound(&self) -> bool {
        matches!(self, Self::Masuk)
    }

    /// Short code used in the printed register label.
    pub fn register_code(&self) -> &'static str {
        match self {
            Self::Masuk => "MSK",
            Self::Keluar => "KLR",
            Self::Internal => "INT",
        }
    }
}

impl std::fmt::Display for LetterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LetterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "masuk" => Ok(Self::Masuk),
            "keluar" => Ok(Self::Keluar),
            "internal" => Ok(Self::Internal),
            other => Err(format!("unknown letter type '{other}'")),
        }
    }
}

/// Correspondence classification; decides which manager verifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Internal,
    Eksternal,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::Eksternal => "eksternal",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "internal" => Ok(Self::Internal),
            "eksternal" => Ok(Self::Eksternal),
            other => Err(format!("unknown scope '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Biasa,
    Segera,
    Penting,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Biasa => "biasa",
            Self::Segera => "segera",
            Self::Penting => "penting",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "biasa" => Ok(Self::Biasa),
            "segera" => Ok(Self::Segera),
            "penting" => Ok(Self::Penting),
            other => Err(format!("unknown priority '{other}'")),
        }
    }
}

/// Organisational role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Direktur,
    /// Read-only observer.
    Pengurus,
    /// Staff handling external correspondence.
    StafProgram,
    /// Staff handling internal correspondence; also the archivist.
    StafLembaga,
    ManajerKpp,
    ManajerPemas,
    ManajerPkl,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Self::Admin,
        Self::Direktur,
        Self::Pengurus,
        Self::StafProgram,
        Self::StafLembaga,
        Self::ManajerKpp,
        Self::ManajerPemas,
        Self::ManajerPkl,
    ];

    /// The role that files finished outbound correspondence.
    pub const ARCHIVIST: Role = Role::StafLembaga;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Direktur => "direktur",
            Self::Pengurus => "pengurus",
            Self::StafProgram => "staf_program",
            Self::StafLembaga => "staf_lembaga",
            Self::ManajerKpp => "manajer_kpp",
            Self::ManajerPemas => "manajer_pemas",
            Self::ManajerPkl => "manajer_pkl",
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Self::StafProgram | Self::StafLembaga)
    }

    pub fn is_manager(&self) -> bool {
        matches!(self, Self::ManajerKpp | Self::ManajerPemas | Self::ManajerPkl)
    }

    pub fn is_director(&self) -> bool {
        matches!(self, Self::Direktur)
    }

    pub fn can_verify_scope(&self, scope: Scope) -> bool {
        Self::verifiers_for(scope).contains(self)
    }

    /// Manager roles allowed to verify letters of a scope.
    pub fn verifiers_for(scope: Scope) -> &'static [Role] {
        match scope {
            Scope::Eksternal => &[Self::ManajerKpp, Self::ManajerPemas],
            Scope::Internal => &[Self::ManajerPkl],
        }
    }

    /// Staff role that handles correspondence of a scope.
    pub fn staff_for(scope: Scope) -> Role {
        match scope {
            Scope::Eksternal => Self::StafProgram,
            Scope::Internal => Self::StafLembaga,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown role '{s}'"))
    }
}

/// A user as seen by the workflow engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    /// Job title shown in notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

impl User {
    pub fn new(id: UserId, username: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            username: username.into(),
            role,
            position: None,
        }
    }
}

/// A tracked letter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Letter {
    /// Zero until the letter is first persisted.
    pub id: LetterId,
    pub letter_type: LetterType,
    pub scope: Scope,
    pub status: LetterStatus,
    pub priority: Priority,
    /// Register number; empty until the letter leaves Draft.
    pub agenda_number: String,

    pub sender: String,
    pub letter_number: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub letter_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_date: Option<NaiveDate>,
    /// Object-store key of the scanned letter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disposition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disposition_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disposed_at: Option<DateTime<Utc>>,

    pub created_by: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disposed_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_verifier: Option<UserId>,
    #[serde(default)]
    pub needs_reply: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<LetterId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Letter {
    /// Build an unsaved draft from a creation request.
    pub fn draft(request: NewLetter, created_by: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            letter_type: request.letter_type,
            scope: request.scope,
            status: LetterStatus::Draft,
            priority: request.priority.unwrap_or_default(),
            agenda_number: String::new(),
            sender: request.sender.trim().to_string(),
            letter_number: request.letter_number.trim().to_string(),
            title: request.title.trim().to_string(),
            body: request.body,
            summary: request.summary,
            letter_date: request.letter_date,
            received_date: request.received_date,
            file_path: request.file_path.filter(|p| !p.trim().is_empty()),
            disposition: None,
            disposition_target: None,
            disposed_at: None,
            created_by,
            verified_by: None,
            disposed_by: None,
            assigned_verifier: request.assigned_verifier,
            needs_reply: false,
            in_reply_to: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_inbound(&self) -> bool {
        self.letter_type.is_inbound()
    }

    /// Outbound and internal letters pass through manager verification.
    pub fn uses_verification(&self) -> bool {
        !self.is_inbound()
    }

    /// Label used in notification bodies.
    pub fn reference(&self) -> &str {
        if self.letter_number.is_empty() {
            &self.title
        } else {
            &self.letter_number
        }
    }
}

/// Request to create a letter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLetter {
    pub letter_type: LetterType,
    pub scope: Scope,
    #[serde(default)]
    pub priority: Option<Priority>,
    pub sender: String,
    pub letter_number: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub letter_date: Option<NaiveDate>,
    #[serde(default)]
    pub received_date: Option<NaiveDate>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub assigned_verifier: Option<UserId>,
}

impl NewLetter {
    pub fn new(
        letter_type: LetterType,
        scope: Scope,
        sender: impl Into<String>,
        letter_number: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            letter_type,
            scope,
            priority: None,
            sender: sender.into(),
            letter_number: letter_number.into(),
            title: title.into(),
            body: String::new(),
            summary: None,
            letter_date: None,
            received_date: None,
            file_path: None,
            assigned_verifier: None,
        }
    }

    /// Builder: attach the uploaded file key.
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Builder: choose the verifying manager.
    pub fn with_verifier(mut self, verifier: UserId) -> Self {
        self.assigned_verifier = Some(verifier);
        self
    }

    /// Builder: set the body text.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Reject blank required fields.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut missing = Vec::new();
        if self.sender.trim().is_empty() {
            missing.push("sender");
        }
        if self.letter_number.trim().is_empty() {
            missing.push("letter_number");
        }
        if self.title.trim().is_empty() {
            missing.push("title");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(WorkflowError::Validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }
}

/// Individually authorised letter fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LetterField {
    Sender,
    LetterNumber,
    Title,
    Body,
    Summary,
    LetterDate,
    ReceivedDate,
    Priority,
    Scope,
    Attachment,
    AssignedVerifier,
    Disposition,
    DispositionTarget,
    NeedsReply,
}

impl LetterField {
    /// Fields owned by the creating staff member.
    pub fn is_content(&self) -> bool {
        !self.is_disposition()
    }

    /// Fields only a director sets.
    pub fn is_disposition(&self) -> bool {
        matches!(
            self,
            Self::Disposition | Self::DispositionTarget | Self::NeedsReply
        )
    }
}

/// Partial update of content fields; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPatch {
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub letter_number: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub letter_date: Option<NaiveDate>,
    #[serde(default)]
    pub received_date: Option<NaiveDate>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub scope: Option<Scope>,
    #[serde(default)]
    pub file_path: Option<String>,
}

impl ContentPatch {
    /// Fields this patch would change.
    pub fn fields(&self) -> Vec<LetterField> {
        let mut fields = Vec::new();
        if self.sender.is_some() {
            fields.push(LetterField::Sender);
        }
        if self.letter_number.is_some() {
            fields.push(LetterField::LetterNumber);
        }
        if self.title.is_some() {
            fields.push(LetterField::Title);
        }
        if self.body.is_some() {
            fields.push(LetterField::Body);
        }
        if self.summary.is_some() {
            fields.push(LetterField::Summary);
        }
        if self.letter_date.is_some() {
            fields.push(LetterField::LetterDate);
        }
        if self.received_date.is_some() {
            fields.push(LetterField::ReceivedDate);
        }
        if self.priority.is_some() {
            fields.push(LetterField::Priority);
        }
        if self.scope.is_some() {
            fields.push(LetterField::Scope);
        }
        if self.file_path.is_some() {
            fields.push(LetterField::Attachment);
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Required text fields may be replaced but not blanked.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        for (name, value) in [
            ("sender", &self.sender),
            ("letter_number", &self.letter_number),
            ("title", &self.title),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(WorkflowError::Validation(format!("{name} cannot be blank")));
            }
        }
        Ok(())
    }

    pub fn apply(&self, letter: &mut Letter) {
        if let Some(ref v) = self.sender {
            letter.sender = v.trim().to_string();
        }
        if let Some(ref v) = self.letter_number {
            letter.letter_number = v.trim().to_string();
        }
        if let Some(ref v) = self.title {
            letter.title = v.trim().to_string();
        }
        if let Some(ref v) = self.body {
            letter.body = v.clone();
        }
        if let Some(ref v) = self.summary {
            letter.summary = Some(v.clone()).filter(|s| !s.is_empty());
        }
        if let Some(v) = self.letter_date {
            letter.letter_date = Some(v);
        }
        if let Some(v) = self.received_date {
            letter.received_date = Some(v);
        }
        if let Some(v) = self.priority {
            letter.priority = v;
        }
        if let Some(v) = self.scope {
            letter.scope = v;
        }
        if let Some(ref v) = self.file_path {
            letter.file_path = Some(v.clone()).filter(|p| !p.trim().is_empty());
        }
    }
}

/// The director's routing instruction on an inbound letter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispositionRequest {
    pub instruction: String,
    /// Destination unit.
    #[serde(default)]
    pub target_unit: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub needs_reply: bool,
}

impl DispositionRequest {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            ..Default::default()
        }
    }

    /// Builder: flag the letter as awaiting an outbound reply.
    pub fn requiring_reply(mut self) -> Self {
        self.needs_reply = true;
        self
    }

    pub fn fields(&self) -> Vec<LetterField> {
        let mut fields = vec![LetterField::Disposition];
        if self.target_unit.is_some() {
            fields.push(LetterField::DispositionTarget);
        }
        if self.needs_reply {
            fields.push(LetterField::NeedsReply);
        }
        fields
    }

    /// Instruction text as stored, with the note appended.
    pub fn rendered(&self) -> String {
        match self.note.as_deref().map(str::trim) {
            Some(note) if !note.is_empty() => {
                format!("{} | Catatan: {}", self.instruction.trim(), note)
            }
            _ => self.instruction.trim().to_string(),
        }
    }
}
