use vyoma_storage::ConversationId;

use crate::error::{ChatError, ChatResult};
use crate::persistence::{SessionSummary, parse_conversation_id};
use crate::session::ChatSession;

/// Conversation list operations for front ends.
#[derive(Clone)]
pub struct SessionRegistry {
    session: ChatSession,
}

impl SessionRegistry {
    pub fn new(session: ChatSession) -> Self {
        Self { session }
    }

    /// Starts a fresh chat. The id is assigned on the first send.
    pub async fn create(&self) {
        self.session.clear().await;
    }

    /// Opens a stored conversation. Unknown or unreadable ids fall back to a
    /// fresh chat and report `NotFound`.
    pub async fn select(&self, raw_id: &str) -> ChatResult<ConversationId> {
        let loaded = match parse_conversation_id(raw_id) {
            Ok(id) => self
                .session
                .persistence()
                .load(id)
                .await
                .map(|messages| (id, messages)),
            Err(error) => Err(error),
        };

        match loaded {
            Ok((id, messages)) => {
                self.session.activate(id, messages).await;
                Ok(id)
            }
            Err(error) => {
                tracing::warn!(conversation_id = raw_id, error = %error, "falling back to a new chat");
                self.session.clear().await;
                Err(error)
            }
        }
    }

    /// Deletes a conversation. Storage failures are logged, never returned.
    pub async fn remove(&self, raw_id: &str) -> ChatResult<()> {
        let id = parse_conversation_id(raw_id)?;

        // Deactivate first so turns still running for `id` discard their results.
        if self.session.active_id().await == Some(id) {
            self.session.clear().await;
        }

        if let Err(error) = self.session.persistence().delete(id).await {
            tracing::warn!(conversation_id = %id, error = %error, "failed to delete conversation");
        }
        Ok(())
    }

    pub async fn summaries(&self) -> Vec<SessionSummary> {
        self.session.persistence().list_summaries().await
    }

    /// Resolves a summary by full id or unique id prefix.
    pub async fn resolve(&self, raw: &str) -> ChatResult<ConversationId> {
        let raw = raw.trim();
        if let Ok(id) = ConversationId::parse(raw) {
            return Ok(id);
        }

        let matches: Vec<_> = self
            .summaries()
            .await
            .into_iter()
            .filter(|summary| !raw.is_empty() && summary.id.to_string().starts_with(raw))
            .collect();
        match matches.as_slice() {
            [only] => Ok(only.id),
            _ => Err(ChatError::NotFound {
                stage: "resolve-conversation",
                conversation_id: raw.to_string(),
            }),
        }
    }
}
