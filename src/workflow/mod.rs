//! Status transitions, permissions, and the engine that applies them.

pub mod agenda;
pub mod engine;
pub mod policy;
pub mod reply;

pub use agenda::{AgendaAllocator, format_display};
pub use engine::{
    CreateMode, SubmitRequest, Transition, TransitionPatch, WorkflowEngine, WorkflowOptions,
};
pub use policy::{Action, PermissionPolicy};
pub use reply::{ArchivedParent, ReplyLinkCoordinator};
