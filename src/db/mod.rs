pub mod message_repository;
pub mod session_repository;

pub use message_repository::{MessageRepository, PgMessageRepository};
pub use session_repository::{PgSessionRepository, SessionRepository};
