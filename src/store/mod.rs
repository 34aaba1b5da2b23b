//! Persistence layer: letter transactions, the user directory, and attachments.

pub mod attachments;
pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use attachments::{LocalAttachmentStore, RecordedAttachments};
pub use libsql_backend::LibSqlBackend;
pub use memory::MemoryStore;
pub use traits::{AttachmentStore, LetterStore, LetterTransaction, UserDirectory};
