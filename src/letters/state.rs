//! Letter status state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::model::LetterType;

/// Lifecycle status of a letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LetterStatus {
    /// Saved but not yet published; no agenda number.
    Draft,
    /// Outbound letter waiting for its manager's review.
    NeedsVerification,
    /// Verified outbound letter waiting for the director.
    NeedsApproval,
    /// Sent back to the creator for changes.
    NeedsRevision,
    /// Approved by the director, ready to archive.
    Approved,
    /// Inbound letter waiting for the director's disposition.
    AwaitingDisposition,
    /// Inbound letter routed by the director.
    Disposed,
    /// Terminal.
    Archived,
}

impl LetterStatus {
    pub const ALL: [LetterStatus; 8] = [
        Self::Draft,
        Self::NeedsVerification,
        Self::NeedsApproval,
        Self::NeedsRevision,
        Self::Approved,
        Self::AwaitingDisposition,
        Self::Disposed,
        Self::Archived,
    ];

    /// Statuses reachable from this one in a single step.
    pub fn successors(&self) -> &'static [LetterStatus] {
        use LetterStatus::*;

        match self {
            Draft => &[NeedsVerification, AwaitingDisposition],
            NeedsVerification => &[NeedsApproval, NeedsRevision],
            // Director approval may archive directly.
            NeedsApproval => &[Approved, Archived, NeedsRevision],
            NeedsRevision => &[NeedsVerification, Draft],
            Approved => &[Archived],
            AwaitingDisposition => &[Disposed],
            Disposed => &[Archived],
            Archived => &[],
        }
    }

    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: LetterStatus) -> bool {
        self.successors().contains(&target)
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archived)
    }

    /// Anything past Draft counts as formally registered.
    pub fn is_published(&self) -> bool {
        !matches!(self, Self::Draft)
    }

    /// Staff may still change content in these states.
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::NeedsRevision)
    }

    /// First status a letter of the given type takes when it leaves Draft.
    pub fn first_published(letter_type: LetterType) -> LetterStatus {
        match letter_type {
            LetterType::Masuk => Self::AwaitingDisposition,
            LetterType::Keluar | LetterType::Internal => Self::NeedsVerification,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::NeedsVerification => "needs_verification",
            Self::NeedsApproval => "needs_approval",
            Self::NeedsRevision => "needs_revision",
            Self::Approved => "approved",
            Self::AwaitingDisposition => "awaiting_disposition",
            Self::Disposed => "disposed",
            Self::Archived => "archived",
        }
    }
}

impl std::fmt::Display for LetterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LetterStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown letter status '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_chain_is_reachable() {
        assert!(LetterStatus::Draft.can_transition_to(LetterStatus::NeedsVerification));
        assert!(LetterStatus::NeedsVerification.can_transition_to(LetterStatus::NeedsApproval));
        assert!(LetterStatus::NeedsApproval.can_transition_to(LetterStatus::Approved));
        assert!(LetterStatus::NeedsApproval.can_transition_to(LetterStatus::Archived));
        assert!(LetterStatus::Approved.can_transition_to(LetterStatus::Archived));
    }

    #[test]
    fn inbound_chain_is_reachable() {
        assert!(LetterStatus::Draft.can_transition_to(LetterStatus::AwaitingDisposition));
        assert!(LetterStatus::AwaitingDisposition.can_transition_to(LetterStatus::Disposed));
        assert!(LetterStatus::Disposed.can_transition_to(LetterStatus::Archived));
    }

    #[test]
    fn revision_loops_back() {
        assert!(LetterStatus::NeedsVerification.can_transition_to(LetterStatus::NeedsRevision));
        assert!(LetterStatus::NeedsApproval.can_transition_to(LetterStatus::NeedsRevision));
        assert!(LetterStatus::NeedsRevision.can_transition_to(LetterStatus::NeedsVerification));
        assert!(LetterStatus::NeedsRevision.can_transition_to(LetterStatus::Draft));
    }

    #[test]
    fn chain_cannot_be_skipped() {
        assert!(!LetterStatus::Draft.can_transition_to(LetterStatus::NeedsApproval));
        assert!(!LetterStatus::Draft.can_transition_to(LetterStatus::Archived));
        assert!(!LetterStatus::NeedsVerification.can_transition_to(LetterStatus::Archived));
        assert!(!LetterStatus::NeedsRevision.can_transition_to(LetterStatus::NeedsApproval));
        assert!(!LetterStatus::AwaitingDisposition.can_transition_to(LetterStatus::Archived));
    }

    #[test]
    fn archived_is_terminal() {
        assert!(LetterStatus::Archived.is_terminal());
        for target in LetterStatus::ALL {
            assert!(!LetterStatus::Archived.can_transition_to(target));
        }
        assert!(!LetterStatus::Disposed.is_terminal());
    }

    #[test]
    fn no_self_edges() {
        for status in LetterStatus::ALL {
            assert!(!status.can_transition_to(status), "{status} loops to itself");
        }
    }

    #[test]
    fn first_published_depends_on_type() {
        assert_eq!(
            LetterStatus::first_published(LetterType::Masuk),
            LetterStatus::AwaitingDisposition
        );
        assert_eq!(
            LetterStatus::first_published(LetterType::Keluar),
            LetterStatus::NeedsVerification
        );
        assert_eq!(
            LetterStatus::first_published(LetterType::Internal),
            LetterStatus::NeedsVerification
        );
    }

    #[test]
    fn display_and_parse_agree() {
        for status in LetterStatus::ALL {
            assert_eq!(status.to_string().parse::<LetterStatus>().unwrap(), status);
        }
        assert!("perlu_disposisi".parse::<LetterStatus>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&LetterStatus::AwaitingDisposition).unwrap();
        assert_eq!(json, "\"awaiting_disposition\"");
    }
}
