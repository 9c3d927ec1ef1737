//! Customer-support conversation engine.
//!
//! Every visitor — anonymous or signed-in — gets a durable session; the
//! transcript merges optimistic local sends with the server-confirmed event
//! stream; replies come from an external generator fed a bounded trailing
//! window of context. The serving layer in `routes`/`main` is a thin shell
//! over [`widget::Widget`], which embedders can also drive directly.

pub mod agent;
pub mod db;
pub mod errors;
pub mod identity;
pub mod models;
pub mod realtime;
pub mod routes;
pub mod service;
pub mod transcript;
pub mod widget;

pub use errors::EngineError;
pub use models::{Identity, Message, MessageOrigin, SenderRole, Session};
pub use transcript::Transcript;
pub use widget::{Widget, WidgetServices};
