use std::collections::HashMap;
use std::sync::Arc;

use snafu::ResultExt;
use tokio::sync::Mutex;
use vyoma_llm::ProviderError;
use vyoma_storage::ConversationId;

use crate::error::{ChatResult, UpstreamSnafu};
use crate::events::{Notification, NotificationLevel};
use crate::message::{Attachment, Message};
use crate::session::ChatSession;
use crate::snippets::extract;

/// What happened to one `enqueue` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Blank text and no attachment; nothing was sent.
    Skipped,
    /// The assistant reply that was appended.
    Completed(Message),
    /// The conversation stopped being active before the turn finished.
    Discarded,
}

pub const UNSENT_NOTICE_PREFIX: &str = "Message not sent, the conversation changed";

fn unsent_notice(text: &str) -> String {
    if text.is_empty() {
        UNSENT_NOTICE_PREFIX.to_string()
    } else {
        format!("{UNSENT_NOTICE_PREFIX}: {text}")
    }
}

type Lane = Arc<Mutex<()>>;

/// Sends user turns to the completion service, one at a time per conversation.
///
/// Each conversation has a lane: a fair mutex held for the whole
/// append-send-append cycle, so later sends queue in arrival order and see the
/// earlier turns in their history. Lanes of different conversations do not
/// block each other.
pub struct MessageDispatcher {
    session: ChatSession,
    lanes: Mutex<HashMap<ConversationId, Lane>>,
}

impl MessageDispatcher {
    pub fn new(session: ChatSession) -> Self {
        Self {
            session,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub async fn enqueue(
        &self,
        text: &str,
        attachment: Option<Attachment>,
    ) -> ChatResult<DispatchOutcome> {
        if text.trim().is_empty() && attachment.is_none() {
            return Ok(DispatchOutcome::Skipped);
        }

        let conversation_id = self.session.ensure_active().await;
        let lane = self.lane(conversation_id).await;
        let outcome = {
            let _turn = lane.lock().await;
            self.run_turn(conversation_id, Message::user(text.trim(), attachment))
                .await
        };
        self.release_lane(conversation_id, lane).await;
        outcome
    }

    async fn run_turn(
        &self,
        conversation_id: ConversationId,
        user_message: Message,
    ) -> ChatResult<DispatchOutcome> {
        let draft = user_message.content.clone();
        let Some(turn) = self.session.begin_turn(conversation_id, user_message).await? else {
            tracing::info!(
                conversation_id = %conversation_id,
                "conversation closed before queued message was sent"
            );
            self.session.notify(Notification::new(
                NotificationLevel::Error,
                "Message Not Sent",
                unsent_notice(&draft),
            ));
            return Ok(DispatchOutcome::Discarded);
        };

        let completion = self.session.completion();
        tracing::debug!(
            conversation_id = %conversation_id,
            provider = completion.id(),
            persona = ?turn.request.persona,
            history = turn.request.messages.len(),
            "dispatching completion request"
        );

        let reply = completion
            .complete(turn.request)
            .await
            .and_then(|text| {
                if text.trim().is_empty() {
                    Err(ProviderError::UnexpectedResponse {
                        stage: "dispatch-reply",
                        details: "completion service returned empty text".to_string(),
                    })
                } else {
                    Ok(text)
                }
            });

        match reply {
            Ok(text) => {
                let appended = self.session.finish_turn(turn.target, extract(&text)).await?;
                Ok(appended.map_or(DispatchOutcome::Discarded, DispatchOutcome::Completed))
            }
            Err(error) => {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %error,
                    "completion request failed"
                );
                self.session.fail_turn(turn.target).await;
                Err(error).context(UpstreamSnafu {
                    stage: "dispatch-complete",
                    conversation_id,
                })
            }
        }
    }

    async fn lane(&self, conversation_id: ConversationId) -> Lane {
        self.lanes
            .lock()
            .await
            .entry(conversation_id)
            .or_default()
            .clone()
    }

    async fn release_lane(&self, conversation_id: ConversationId, lane: Lane) {
        let mut lanes = self.lanes.lock().await;
        // Map plus this handle: nobody else is queued on the lane.
        if Arc::strong_count(&lane) == 2 {
            lanes.remove(&conversation_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::{Notify, mpsc};
    use vyoma_llm::{
        BoxFuture, CompletionRequest, CompletionService, Persona, ProviderResult, Role,
    };
    use vyoma_storage::MemoryStore;

    use super::*;
    use crate::error::ChatError;
    use crate::events::ChatEvent;
    use crate::message::DEFAULT_GREETING;
    use crate::persistence::ConversationPersistence;
    use crate::registry::SessionRegistry;
    use crate::session::UPSTREAM_FAILURE_NOTICE;

    /// Records every request and answers with whatever the test feeds in.
    struct ScriptedService {
        calls: std::sync::Mutex<Vec<CompletionRequest>>,
        called: Notify,
        replies: Mutex<mpsc::UnboundedReceiver<ProviderResult<String>>>,
    }

    impl ScriptedService {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<ProviderResult<String>>) {
            let (sender, receiver) = mpsc::unbounded_channel();
            let service = Arc::new(Self {
                calls: std::sync::Mutex::new(Vec::new()),
                called: Notify::new(),
                replies: Mutex::new(receiver),
            });
            (service, sender)
        }

        fn calls(&self) -> Vec<CompletionRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CompletionService for ScriptedService {
        fn id(&self) -> &str {
            "scripted"
        }

        fn complete<'a>(
            &'a self,
            request: CompletionRequest,
        ) -> BoxFuture<'a, ProviderResult<String>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push(request);
                self.called.notify_one();
                self.replies
                    .lock()
                    .await
                    .recv()
                    .await
                    .expect("test fed a reply")
            })
        }
    }

    fn session_with(service: Arc<ScriptedService>) -> ChatSession {
        let persistence = ConversationPersistence::new(Arc::new(MemoryStore::new()));
        ChatSession::new(service, persistence)
    }

    fn upstream_error(message: &str) -> ProviderError {
        ProviderError::Upstream {
            stage: "test",
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn successful_send_appends_user_then_assistant() {
        let (service, replies) = ScriptedService::new();
        let dispatcher = MessageDispatcher::new(session_with(service.clone()));
        replies
            .send(Ok("Sure:\n```js\nconsole.log(1)\n```".to_string()))
            .unwrap();

        let outcome = dispatcher.enqueue("show me code", None).await.unwrap();

        let messages = dispatcher.session().messages().await;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, DEFAULT_GREETING);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "show me code");
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[2].content, "Sure:\n[CODE_SNIPPET_0]");
        assert_eq!(messages[2].code_snippets.len(), 1);
        assert_eq!(outcome, DispatchOutcome::Completed(messages[2].clone()));
        assert!(dispatcher.session().active_id().await.is_some());
    }

    #[tokio::test]
    async fn blank_input_is_a_no_op() {
        let (service, _replies) = ScriptedService::new();
        let dispatcher = MessageDispatcher::new(session_with(service.clone()));

        let outcome = dispatcher.enqueue("  \n ", None).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Skipped);
        assert!(service.calls().is_empty());
        assert_eq!(dispatcher.session().active_id().await, None);
        assert_eq!(dispatcher.session().messages().await.len(), 1);
    }

    #[tokio::test]
    async fn request_carries_the_selected_persona() {
        let (service, replies) = ScriptedService::new();
        let dispatcher = MessageDispatcher::new(session_with(service.clone()));
        replies.send(Ok("Certainly.".to_string())).unwrap();

        dispatcher.session().set_persona("professional").await.unwrap();
        dispatcher.enqueue("quarterly summary", None).await.unwrap();

        let calls = service.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].persona, Some(Persona::Professional));
        assert_eq!(
            serde_json::to_value(&calls[0]).unwrap()["persona"],
            "professional"
        );
    }

    #[tokio::test]
    async fn unknown_persona_is_rejected_before_any_request() {
        let (service, _replies) = ScriptedService::new();
        let session = session_with(service.clone());

        let error = session.set_persona("pirate").await.unwrap_err();

        assert!(matches!(error, ChatError::InvalidPersona { .. }));
        assert_eq!(session.persona().await, Persona::Casual);
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn second_send_waits_for_the_first_and_sees_its_turns() {
        let (service, replies) = ScriptedService::new();
        let dispatcher = Arc::new(MessageDispatcher::new(session_with(service.clone())));

        let first = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.enqueue("first question", None).await }
        });
        service.called.notified().await;

        let second = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.enqueue("second question", None).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(service.calls().len(), 1, "second request must wait its turn");

        replies.send(Ok("first answer".to_string())).unwrap();
        replies.send(Ok("second answer".to_string())).unwrap();
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let calls = service.calls();
        assert_eq!(calls.len(), 2);
        let history: Vec<_> = calls[1]
            .messages
            .iter()
            .map(|message| (message.role, message.content.as_str()))
            .collect();
        assert_eq!(
            history,
            vec![
                (Role::Assistant, DEFAULT_GREETING),
                (Role::User, "first question"),
                (Role::Assistant, "first answer"),
                (Role::User, "second question"),
            ]
        );

        let contents: Vec<_> = dispatcher
            .session()
            .messages()
            .await
            .into_iter()
            .map(|message| message.content)
            .collect();
        assert_eq!(
            contents,
            vec![
                DEFAULT_GREETING,
                "first question",
                "first answer",
                "second question",
                "second answer",
            ]
        );
    }

    #[tokio::test]
    async fn upstream_failure_notifies_and_returns_to_idle() {
        let (service, replies) = ScriptedService::new();
        let dispatcher = MessageDispatcher::new(session_with(service.clone()));
        let mut events = dispatcher.session().subscribe();
        replies.send(Err(upstream_error("quota exceeded"))).unwrap();

        let error = dispatcher.enqueue("hello?", None).await.unwrap_err();
        assert!(matches!(error, ChatError::Upstream { .. }));

        let messages = dispatcher.session().messages().await;
        assert_eq!(messages.len(), 2, "no synthetic assistant message");
        assert_eq!(messages[1].role, Role::User);

        let conversation_id = dispatcher.session().active_id().await.unwrap();
        assert!(!dispatcher.session().is_sending(conversation_id).await);

        let mut saw_error_toast = false;
        while let Ok(event) = events.try_recv() {
            if let ChatEvent::Notify(notification) = event {
                saw_error_toast |= notification.level == NotificationLevel::Error
                    && notification.body == UPSTREAM_FAILURE_NOTICE;
            }
        }
        assert!(saw_error_toast);

        replies.send(Ok("back online".to_string())).unwrap();
        let outcome = dispatcher.enqueue("hello again", None).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Completed(_)));
        assert_eq!(dispatcher.session().messages().await.len(), 4);
    }

    #[tokio::test]
    async fn empty_reply_counts_as_failure() {
        let (service, replies) = ScriptedService::new();
        let dispatcher = MessageDispatcher::new(session_with(service));
        replies.send(Ok("   ".to_string())).unwrap();

        let error = dispatcher.enqueue("anything", None).await.unwrap_err();
        assert!(matches!(
            error,
            ChatError::Upstream {
                source: ProviderError::UnexpectedResponse { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn late_reply_for_inactive_conversation_is_discarded() {
        let (service, replies) = ScriptedService::new();
        let session = session_with(service.clone());
        let dispatcher = Arc::new(MessageDispatcher::new(session.clone()));
        let registry = SessionRegistry::new(session.clone());

        let abandoned = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.enqueue("slow question", None).await }
        });
        service.called.notified().await;
        let abandoned_id = session.active_id().await.unwrap();

        registry.create().await;
        let current = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.enqueue("new topic", None).await }
        });
        service.called.notified().await;
        assert_eq!(
            service.calls().len(),
            2,
            "other conversations are not blocked"
        );

        replies.send(Ok("late answer".to_string())).unwrap();
        replies.send(Ok("fresh answer".to_string())).unwrap();

        assert_eq!(abandoned.await.unwrap().unwrap(), DispatchOutcome::Discarded);
        assert!(matches!(
            current.await.unwrap().unwrap(),
            DispatchOutcome::Completed(_)
        ));

        let active_id = session.active_id().await.unwrap();
        assert_ne!(active_id, abandoned_id);
        let contents: Vec<_> = session
            .messages()
            .await
            .into_iter()
            .map(|message| message.content)
            .collect();
        assert_eq!(contents, vec![DEFAULT_GREETING, "new topic", "fresh answer"]);

        let stored = session.persistence().load(abandoned_id).await.unwrap();
        assert!(stored.iter().all(|message| message.content != "late answer"));
    }

    #[tokio::test]
    async fn queued_message_reports_when_its_conversation_is_gone() {
        let (service, replies) = ScriptedService::new();
        let session = session_with(service.clone());
        let dispatcher = Arc::new(MessageDispatcher::new(session.clone()));
        let registry = SessionRegistry::new(session.clone());
        let mut events = session.subscribe();

        let first = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.enqueue("first", None).await }
        });
        service.called.notified().await;
        let queued = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.enqueue("waiting in line", None).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        registry.create().await;
        replies.send(Ok("too late".to_string())).unwrap();

        assert_eq!(first.await.unwrap().unwrap(), DispatchOutcome::Discarded);
        assert_eq!(queued.await.unwrap().unwrap(), DispatchOutcome::Discarded);
        assert_eq!(service.calls().len(), 1);

        let mut unsent = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ChatEvent::Notify(notification) = event
                && notification.body.starts_with(UNSENT_NOTICE_PREFIX)
            {
                unsent.push(notification.body);
            }
        }
        assert_eq!(
            unsent,
            vec![format!("{UNSENT_NOTICE_PREFIX}: waiting in line")]
        );
    }

    #[tokio::test]
    async fn image_attachment_travels_with_the_text() {
        let (service, replies) = ScriptedService::new();
        let dispatcher = MessageDispatcher::new(session_with(service.clone()));
        replies.send(Ok("A cat.".to_string())).unwrap();

        dispatcher
            .enqueue(
                "what is this?",
                Some(Attachment::image("cat.png", "data:image/png;base64,iVBOR")),
            )
            .await
            .unwrap();

        let calls = service.calls();
        let latest = calls[0].latest().unwrap();
        assert_eq!(latest.content, "what is this?");
        assert_eq!(latest.image_url.as_deref(), Some("data:image/png;base64,iVBOR"));
    }
}
