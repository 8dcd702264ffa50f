use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use snafu::ResultExt;
use tokio::sync::{Mutex, broadcast};
use vyoma_llm::{CompletionRequest, CompletionService, Persona};
use vyoma_storage::ConversationId;

use crate::error::{ChatResult, InvalidPersonaSnafu};
use crate::events::{ChatEvent, Notification, NotificationLevel};
use crate::message::{DispatchState, DispatchTarget, DispatchTransition, Message};
use crate::persistence::ConversationPersistence;
use crate::snippets::Extraction;
use crate::store::MessageStore;

pub const EVENT_CHANNEL_CAPACITY: usize = 256;
pub const UPSTREAM_FAILURE_NOTICE: &str = "Failed to get response from AI";

struct ActiveState {
    store: MessageStore,
    active: Option<ConversationId>,
    persona: Persona,
    dispatch: HashMap<ConversationId, DispatchState>,
}

impl ActiveState {
    fn settle(&mut self, transition: DispatchTransition, conversation_id: ConversationId) {
        let current = self
            .dispatch
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();
        match current.apply(transition) {
            Ok(DispatchState::Idle) => {
                self.dispatch.remove(&conversation_id);
            }
            Ok(next) => {
                self.dispatch.insert(conversation_id, next);
            }
            Err(rejection) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    rejection = ?rejection,
                    "dispatch transition rejected"
                );
            }
        }
    }
}

struct SessionShared {
    state: Mutex<ActiveState>,
    persistence: ConversationPersistence,
    completion: Arc<dyn CompletionService>,
    events: broadcast::Sender<ChatEvent>,
    request_seq: AtomicU64,
}

/// A request that has taken its turn and can be sent.
pub(crate) struct TurnStart {
    pub(crate) target: DispatchTarget,
    pub(crate) request: CompletionRequest,
}

/// Explicit chat context shared by the dispatcher, the registry and front ends.
///
/// Owns the active log, the active conversation id, the persona and the
/// collaborators. Cloning is cheap; all clones see the same session.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionShared>,
}

impl ChatSession {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        persistence: ConversationPersistence,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SessionShared {
                state: Mutex::new(ActiveState {
                    store: MessageStore::new(),
                    active: None,
                    persona: Persona::default(),
                    dispatch: HashMap::new(),
                }),
                persistence,
                completion,
                events,
                request_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    pub fn persistence(&self) -> &ConversationPersistence {
        &self.inner.persistence
    }

    pub fn completion(&self) -> &Arc<dyn CompletionService> {
        &self.inner.completion
    }

    pub async fn active_id(&self) -> Option<ConversationId> {
        self.inner.state.lock().await.active
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.state.lock().await.store.messages().to_vec()
    }

    pub async fn persona(&self) -> Persona {
        self.inner.state.lock().await.persona
    }

    pub async fn is_sending(&self, conversation_id: ConversationId) -> bool {
        self.inner
            .state
            .lock()
            .await
            .dispatch
            .get(&conversation_id)
            .is_some_and(DispatchState::is_sending)
    }

    /// Rejects unknown names before anything is sent. Applies from the next
    /// request on.
    pub async fn set_persona(&self, raw: &str) -> ChatResult<Persona> {
        let persona = Persona::parse(raw).context(InvalidPersonaSnafu {
            stage: "set-persona",
        })?;

        self.inner.state.lock().await.persona = persona;
        self.emit(ChatEvent::PersonaChanged { persona });
        self.notify(Notification::new(
            NotificationLevel::Success,
            "Persona Changed",
            format!("AI persona changed to {persona}"),
        ));
        Ok(persona)
    }

    pub fn notify(&self, notification: Notification) {
        self.emit(ChatEvent::Notify(notification));
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine; the session works headless.
        let _ = self.inner.events.send(event);
    }

    /// Active conversation id, minting one on the first send of a new chat.
    pub(crate) async fn ensure_active(&self) -> ConversationId {
        let mut state = self.inner.state.lock().await;
        if let Some(id) = state.active {
            return id;
        }

        let id = ConversationId::new_v7();
        state.active = Some(id);
        drop(state);

        tracing::info!(conversation_id = %id, "conversation started");
        self.emit(ChatEvent::ConversationStarted {
            conversation_id: id,
        });
        id
    }

    /// Appends the user message and snapshots the request. Returns `None` when
    /// the conversation is no longer the active one.
    pub(crate) async fn begin_turn(
        &self,
        conversation_id: ConversationId,
        user_message: Message,
    ) -> ChatResult<Option<TurnStart>> {
        let mut state = self.inner.state.lock().await;
        if state.active != Some(conversation_id) {
            return Ok(None);
        }

        state.store.append(user_message.clone())?;

        let target = DispatchTarget::new(
            conversation_id,
            self.inner.request_seq.fetch_add(1, Ordering::Relaxed) + 1,
        );
        state.settle(DispatchTransition::Start(target), conversation_id);

        let snapshot = state.store.messages().to_vec();
        let request = CompletionRequest::new(
            snapshot.iter().map(Message::to_wire).collect(),
            state.persona,
        );
        drop(state);

        self.emit(ChatEvent::MessageAppended {
            conversation_id: Some(conversation_id),
            message: user_message,
        });
        self.emit(ChatEvent::SendingStarted { target });
        self.inner.persistence.save(conversation_id, snapshot).await;

        Ok(Some(TurnStart { target, request }))
    }

    /// Appends the assistant reply. Returns `None` and drops the reply when the
    /// user moved to another conversation meanwhile.
    pub(crate) async fn finish_turn(
        &self,
        target: DispatchTarget,
        extraction: Extraction,
    ) -> ChatResult<Option<Message>> {
        let conversation_id = target.conversation_id;
        let mut state = self.inner.state.lock().await;
        state.settle(DispatchTransition::Complete(target), conversation_id);

        if state.active != Some(conversation_id) {
            drop(state);
            tracing::info!(
                conversation_id = %conversation_id,
                request_seq = target.request_seq,
                "discarding response for inactive conversation"
            );
            self.emit(ChatEvent::SendingFinished { target });
            return Ok(None);
        }

        let reply = Message::assistant(extraction);
        let appended = state.store.append(reply.clone());
        let snapshot = state.store.messages().to_vec();
        drop(state);

        self.emit(ChatEvent::SendingFinished { target });
        appended?;

        self.emit(ChatEvent::MessageAppended {
            conversation_id: Some(conversation_id),
            message: reply.clone(),
        });
        self.inner.persistence.save(conversation_id, snapshot).await;
        Ok(Some(reply))
    }

    pub(crate) async fn fail_turn(&self, target: DispatchTarget) {
        self.inner
            .state
            .lock()
            .await
            .settle(DispatchTransition::Fail(target), target.conversation_id);

        self.emit(ChatEvent::SendingFinished { target });
        self.notify(Notification::error(UPSTREAM_FAILURE_NOTICE));
    }

    /// Resets to the greeting with no active conversation.
    pub(crate) async fn clear(&self) {
        let mut state = self.inner.state.lock().await;
        state.store.clear();
        state.active = None;
        drop(state);

        self.emit(ChatEvent::ConversationCleared);
    }

    pub(crate) async fn activate(&self, conversation_id: ConversationId, messages: Vec<Message>) {
        let mut state = self.inner.state.lock().await;
        state.store.replace_all(messages);
        state.active = Some(conversation_id);
        drop(state);

        self.emit(ChatEvent::ConversationSelected { conversation_id });
    }
}
