use snafu::ensure;

use crate::error::{ChatResult, InvalidMessageSnafu};
use crate::message::Message;

/// In-memory log of the active conversation.
#[derive(Debug, Clone)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    /// Starts from the greeting, same as [`MessageStore::clear`].
    pub fn new() -> Self {
        Self {
            messages: vec![Message::greeting()],
        }
    }

    pub fn append(&mut self, message: Message) -> ChatResult<()> {
        ensure!(
            message.has_payload(),
            InvalidMessageSnafu {
                stage: "store-append",
                details: "message needs content or an attachment".to_string(),
            }
        );
        ensure!(
            self.messages.iter().all(|existing| existing.id != message.id),
            InvalidMessageSnafu {
                stage: "store-append",
                details: format!("message id '{}' is already in the log", message.id),
            }
        );

        self.messages.push(message);
        Ok(())
    }

    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn clear(&mut self) {
        self.messages = vec![Message::greeting()];
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use vyoma_llm::Role;

    use super::*;
    use crate::error::ChatError;
    use crate::message::{Attachment, DEFAULT_GREETING};

    #[test]
    fn new_store_holds_only_the_greeting() {
        let store = MessageStore::new();
        assert_eq!(store.len(), 1);
        let greeting = store.last().unwrap();
        assert_eq!(greeting.role, Role::Assistant);
        assert_eq!(greeting.content, DEFAULT_GREETING);
    }

    #[test]
    fn append_rejects_messages_without_payload() {
        let mut store = MessageStore::new();
        let error = store.append(Message::user("   ", None)).unwrap_err();
        assert!(matches!(error, ChatError::InvalidMessage { .. }));
        assert_eq!(store.len(), 1);

        store
            .append(Message::user("", Some(Attachment::image("a.png", "data:image/png;base64,AA"))))
            .unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn append_rejects_duplicate_ids() {
        let mut store = MessageStore::new();
        let message = Message::user("hi", None);
        store.append(message.clone()).unwrap();
        let error = store.append(message).unwrap_err();
        assert!(matches!(error, ChatError::InvalidMessage { .. }));
    }

    #[test]
    fn replace_all_and_clear_swap_the_log() {
        let mut store = MessageStore::new();
        let loaded = vec![Message::user("one", None), Message::user("two", None)];
        store.replace_all(loaded.clone());
        assert_eq!(store.messages(), loaded.as_slice());

        store.clear();
        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].content, DEFAULT_GREETING);
    }
}
