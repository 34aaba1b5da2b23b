//! Letters, users, and the status lifecycle.

pub mod model;
pub mod state;

pub use model::{
    ContentPatch, DispositionRequest, Letter, LetterField, LetterId, LetterType, NewLetter,
    Priority, Role, Scope, User, UserId,
};
pub use state::LetterStatus;
