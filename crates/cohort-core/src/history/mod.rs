//! Bounded local history of finished conversations.

pub mod record;
pub mod repository;
mod store;

pub use record::SessionRecord;
pub use repository::{JsonFileRepository, MemoryRepository, SessionRepository};
pub use store::{MAX_SESSIONS, SessionStore};
