use vyoma_llm::Persona;
use vyoma_storage::ConversationId;

use crate::message::{DispatchTarget, Message};

/// Severity of a user-facing toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationLevel {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn new(level: NotificationLevel, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn error(body: impl Into<String>) -> Self {
        Self::new(NotificationLevel::Error, "Error", body)
    }
}

/// Everything a front end needs to mirror the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A conversation got its id on the first send.
    ConversationStarted { conversation_id: ConversationId },
    /// The active log was swapped for a stored one.
    ConversationSelected { conversation_id: ConversationId },
    /// The active log was reset to the greeting.
    ConversationCleared,
    MessageAppended {
        conversation_id: Option<ConversationId>,
        message: Message,
    },
    /// Loading indicator on.
    SendingStarted { target: DispatchTarget },
    /// Loading indicator off, whatever the outcome.
    SendingFinished { target: DispatchTarget },
    PersonaChanged { persona: Persona },
    Notify(Notification),
}

impl ChatEvent {
    pub fn conversation_id(&self) -> Option<ConversationId> {
        match self {
            Self::ConversationStarted { conversation_id }
            | Self::ConversationSelected { conversation_id } => Some(*conversation_id),
            Self::MessageAppended {
                conversation_id, ..
            } => *conversation_id,
            Self::SendingStarted { target } | Self::SendingFinished { target } => {
                Some(target.conversation_id)
            }
            Self::ConversationCleared | Self::PersonaChanged { .. } | Self::Notify(_) => None,
        }
    }
}
