//! Sequential register ("agenda") numbers.
//!
//! Numbers are partitioned by letter type and calendar year of creation and
//! stored unpadded. Allocation reads the current maximum inside the caller's
//! write transaction, so two allocators for the same partition serialize on
//! the store's write lock.

use tracing::debug;

use crate::error::WorkflowError;
use crate::letters::LetterType;
use crate::store::LetterTransaction;

/// Allocates the next agenda number within an open transaction.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgendaAllocator;

impl AgendaAllocator {
    pub async fn allocate(
        &self,
        tx: &mut dyn LetterTransaction,
        letter_type: LetterType,
        year: i32,
    ) -> Result<String, WorkflowError> {
        let current = tx.max_agenda_number(letter_type, year).await?;
        let next = current + 1;
        debug!(letter_type = %letter_type, year, agenda_number = next, "Agenda number allocated");
        Ok(next.to_string())
    }
}

/// Printed register label, e.g. `001/KLR/2026`.
///
/// Non-numeric input is shown as-is.
pub fn format_display(agenda_number: &str, letter_type: LetterType, year: i32) -> String {
    let number = match agenda_number.parse::<u64>() {
        Ok(n) => format!("{n:03}"),
        Err(_) => agenda_number.to_string(),
    };
    format!("{number}/{}/{year}", letter_type.register_code())
}
