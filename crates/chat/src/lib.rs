//! Conversation core: message log, snippet extraction, debounced persistence,
//! per-conversation request serialization and the session context tying them
//! together.

pub mod capture;
mod dispatcher;
mod error;
mod events;
mod message;
mod persistence;
mod registry;
mod session;
pub mod snippets;
mod store;
pub mod suggestions;

pub use dispatcher::{DispatchOutcome, MessageDispatcher, UNSENT_NOTICE_PREFIX};
pub use error::{ChatError, ChatResult};
pub use events::{ChatEvent, Notification, NotificationLevel};
pub use message::{
    Attachment, AttachmentKind, CodeLanguage, CodeSnippet, DEFAULT_GREETING, DispatchState,
    DispatchTarget, DispatchTransition, DispatchTransitionRejection, Message, now_unix_millis,
};
pub use persistence::{
    ConversationPersistence, DEFAULT_SAVE_WINDOW, DEFAULT_TITLE, SESSIONS_KEY, SessionSummary,
    messages_key, parse_conversation_id,
};
pub use registry::SessionRegistry;
pub use session::{ChatSession, UPSTREAM_FAILURE_NOTICE};
pub use snippets::{Extraction, Segment, extract};
pub use store::MessageStore;
pub use vyoma_llm::{Persona, Role};
pub use vyoma_storage::{ConversationId, MessageId};
