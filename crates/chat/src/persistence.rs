use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use tokio::sync::Mutex;
use vyoma_llm::Role;
use vyoma_storage::{ConversationId, KeyValueStore};

use crate::error::{
    BlockingTaskSnafu, ChatResult, EncodeSnafu, NotFoundSnafu, PersistenceSnafu,
};
use crate::message::Message;

pub const SESSIONS_KEY: &str = "vyoma:sessions";
pub const MESSAGES_KEY_PREFIX: &str = "vyoma:messages:";
pub const DEFAULT_TITLE: &str = "New Conversation";
pub const DEFAULT_SAVE_WINDOW: Duration = Duration::from_millis(1000);

const TITLE_CHARS: usize = 30;
const PREVIEW_CHARS: usize = 60;

pub fn messages_key(id: &ConversationId) -> String {
    format!("{MESSAGES_KEY_PREFIX}{id}")
}

/// Unparsable ids can never have been stored, so they read as missing.
pub fn parse_conversation_id(raw: &str) -> ChatResult<ConversationId> {
    ConversationId::parse(raw).map_err(|_| {
        NotFoundSnafu {
            stage: "parse-conversation-id",
            conversation_id: raw.to_string(),
        }
        .build()
    })
}

/// Index entry describing one stored conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: ConversationId,
    pub title: String,
    pub last_message_preview: String,
    pub message_count: usize,
    pub created_at_unix_millis: u64,
    pub updated_at_unix_millis: u64,
}

impl SessionSummary {
    /// Derives the summary for `messages`. `previous` keeps the creation time
    /// and stops `updated_at` from moving backwards.
    pub fn from_messages(
        id: ConversationId,
        messages: &[Message],
        previous: Option<&SessionSummary>,
    ) -> Self {
        let last_timestamp = messages
            .last()
            .map_or(0, |message| message.timestamp_unix_millis);
        let first_timestamp = messages
            .first()
            .map_or(last_timestamp, |message| message.timestamp_unix_millis);

        Self {
            id,
            title: derive_title(messages),
            last_message_preview: messages
                .last()
                .map(|message| truncate_chars(&message.content, PREVIEW_CHARS))
                .unwrap_or_default(),
            message_count: messages.len(),
            created_at_unix_millis: previous
                .map_or(first_timestamp, |summary| summary.created_at_unix_millis),
            updated_at_unix_millis: previous.map_or(last_timestamp, |summary| {
                summary.updated_at_unix_millis.max(last_timestamp)
            }),
        }
    }
}

/// First user message, cut at 30 characters.
pub fn derive_title(messages: &[Message]) -> String {
    messages
        .iter()
        .find(|message| message.role == Role::User && !message.content.trim().is_empty())
        .map(|message| truncate_chars(message.content.trim(), TITLE_CHARS))
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

fn truncate_chars(text: &str, limit: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(limit).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

fn sort_by_recent_desc(summaries: &mut [SessionSummary]) {
    summaries.sort_by_key(|summary| Reverse((summary.updated_at_unix_millis, summary.id)));
}

fn upsert_summary(index: &mut Vec<SessionSummary>, id: ConversationId, messages: &[Message]) {
    let previous = index.iter().position(|summary| summary.id == id);
    let summary =
        SessionSummary::from_messages(id, messages, previous.map(|position| &index[position]));
    match previous {
        Some(position) => index[position] = summary,
        None => index.push(summary),
    }
}

fn write_snapshot(
    store: &dyn KeyValueStore,
    id: ConversationId,
    messages: &[Message],
) -> ChatResult<()> {
    let encoded = serde_json::to_string(messages).context(EncodeSnafu {
        stage: "encode-messages",
    })?;
    store
        .put(&messages_key(&id), encoded)
        .context(PersistenceSnafu {
            stage: "write-messages",
        })?;

    let mut index = read_index(store);
    upsert_summary(&mut index, id, messages);
    write_index(store, &index)?;

    tracing::debug!(conversation_id = %id, message_count = messages.len(), "conversation saved");
    Ok(())
}

/// Stored index. A missing or corrupt index is rebuilt from the message logs;
/// an unreachable store reads as empty.
fn read_index(store: &dyn KeyValueStore) -> Vec<SessionSummary> {
    match store.get(SESSIONS_KEY) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(index) => index,
            Err(error) => {
                tracing::warn!(error = %error, "session index is corrupt, rebuilding from logs");
                rebuild_index(store)
            }
        },
        Ok(None) => rebuild_index(store),
        Err(error) => {
            tracing::warn!(error = %error, "session index unavailable, treating as empty");
            Vec::new()
        }
    }
}

fn rebuild_index(store: &dyn KeyValueStore) -> Vec<SessionSummary> {
    let keys = match store.keys(MESSAGES_KEY_PREFIX) {
        Ok(keys) => keys,
        Err(error) => {
            tracing::warn!(error = %error, "cannot list message logs");
            return Vec::new();
        }
    };

    let mut index = Vec::new();
    for key in keys {
        let Some(id) = key
            .strip_prefix(MESSAGES_KEY_PREFIX)
            .and_then(|raw| ConversationId::parse(raw).ok())
        else {
            continue;
        };
        match load_log(store, id) {
            Ok(messages) => upsert_summary(&mut index, id, &messages),
            Err(error) => tracing::debug!(key = %key, error = %error, "skipping unreadable log"),
        }
    }

    if !index.is_empty() {
        tracing::info!(conversations = index.len(), "rebuilt session index from message logs");
    }
    index
}

fn write_index(store: &dyn KeyValueStore, index: &[SessionSummary]) -> ChatResult<()> {
    let encoded = serde_json::to_string(index).context(EncodeSnafu {
        stage: "encode-session-index",
    })?;
    store.put(SESSIONS_KEY, encoded).context(PersistenceSnafu {
        stage: "write-session-index",
    })
}

/// Missing, unreadable and corrupt logs are all `NotFound`.
fn load_log(store: &dyn KeyValueStore, id: ConversationId) -> ChatResult<Vec<Message>> {
    let not_found = || {
        NotFoundSnafu {
            stage: "load-conversation",
            conversation_id: id.to_string(),
        }
        .build()
    };

    let raw = match store.get(&messages_key(&id)) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Err(not_found()),
        Err(error) => {
            tracing::warn!(conversation_id = %id, error = %error, "message log unavailable");
            return Err(not_found());
        }
    };

    serde_json::from_str(&raw).map_err(|error| {
        tracing::warn!(conversation_id = %id, error = %error, "message log is corrupt");
        not_found()
    })
}

fn delete_log(store: &dyn KeyValueStore, id: ConversationId) -> ChatResult<()> {
    store
        .remove(&messages_key(&id))
        .context(PersistenceSnafu {
            stage: "delete-messages",
        })?;

    let mut index = read_index(store);
    let before = index.len();
    index.retain(|summary| summary.id != id);
    if index.len() != before {
        write_index(store, &index)?;
    }
    Ok(())
}

struct PendingWrite {
    generation: u64,
    messages: Vec<Message>,
}

#[derive(Default)]
struct PendingState {
    writes: HashMap<ConversationId, PendingWrite>,
    // Deleted ids. Saves for them are dropped, so a snapshot taken before the
    // delete cannot bring the conversation back.
    deleted: HashSet<ConversationId>,
}

struct PersistenceInner {
    store: Arc<dyn KeyValueStore>,
    window: Duration,
    pending: Mutex<PendingState>,
    // Serializes every write to the store so a delete cannot interleave with a
    // flush of the same conversation.
    io: Mutex<()>,
    generation: AtomicU64,
}

/// Debounced conversation storage over a [`KeyValueStore`].
///
/// `save` only records the latest snapshot; a timer flushes it once no newer
/// snapshot for the same conversation arrived within the window. Reads see
/// pending snapshots, so callers never observe the debounce. Store calls are
/// blocking and run on the blocking pool.
#[derive(Clone)]
pub struct ConversationPersistence {
    inner: Arc<PersistenceInner>,
}

impl ConversationPersistence {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_window(store, DEFAULT_SAVE_WINDOW)
    }

    pub fn with_window(store: Arc<dyn KeyValueStore>, window: Duration) -> Self {
        Self {
            inner: Arc::new(PersistenceInner {
                store,
                window,
                pending: Mutex::new(PendingState::default()),
                io: Mutex::new(()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    async fn on_store<T, F>(&self, stage: &'static str, op: F) -> ChatResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn KeyValueStore) -> ChatResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.inner.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .context(BlockingTaskSnafu { stage })?
    }

    /// Records `messages` as the latest snapshot of `id`. Ignored once `id`
    /// has been deleted.
    pub async fn save(&self, id: ConversationId, messages: Vec<Message>) {
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut pending = self.inner.pending.lock().await;
            if pending.deleted.contains(&id) {
                tracing::debug!(conversation_id = %id, "ignoring save for deleted conversation");
                return;
            }
            pending.writes.insert(
                id,
                PendingWrite {
                    generation,
                    messages,
                },
            );
        }

        let persistence = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(persistence.inner.window).await;
            persistence.flush_if_current(id, generation).await;
        });
    }

    async fn flush_if_current(&self, id: ConversationId, generation: u64) {
        let _io = self.inner.io.lock().await;
        let messages = {
            let mut pending = self.inner.pending.lock().await;
            let current = pending
                .writes
                .get(&id)
                .is_some_and(|write| write.generation == generation);
            if current {
                pending.writes.remove(&id).map(|write| write.messages)
            } else {
                None
            }
        };

        let Some(messages) = messages else {
            return;
        };
        let written = self
            .on_store("debounced-save", move |store| {
                write_snapshot(store, id, &messages)
            })
            .await;
        if let Err(error) = written {
            tracing::warn!(conversation_id = %id, error = %error, "debounced save failed");
        }
    }

    /// Writes every pending snapshot now. Returns how many were written.
    pub async fn flush(&self) -> usize {
        let _io = self.inner.io.lock().await;
        let drained: Vec<_> = self.inner.pending.lock().await.writes.drain().collect();

        let mut written = 0;
        for (id, write) in drained {
            let result = self
                .on_store("flush", move |store| {
                    write_snapshot(store, id, &write.messages)
                })
                .await;
            match result {
                Ok(()) => written += 1,
                Err(error) => {
                    tracing::warn!(conversation_id = %id, error = %error, "flush failed");
                }
            }
        }
        written
    }

    /// Pending snapshot if there is one, otherwise the stored log. Missing,
    /// unreadable and corrupt logs are all `NotFound`.
    pub async fn load(&self, id: ConversationId) -> ChatResult<Vec<Message>> {
        {
            let pending = self.inner.pending.lock().await;
            if let Some(write) = pending.writes.get(&id) {
                return Ok(write.messages.clone());
            }
            ensure!(
                !pending.deleted.contains(&id),
                NotFoundSnafu {
                    stage: "load-deleted-conversation",
                    conversation_id: id.to_string(),
                }
            );
        }

        self.on_store("load-conversation", move |store| load_log(store, id))
            .await
    }

    /// Removes the log, the index entry and any pending snapshot, and refuses
    /// later saves for `id`. Deleting a missing conversation succeeds.
    pub async fn delete(&self, id: ConversationId) -> ChatResult<()> {
        let _io = self.inner.io.lock().await;
        {
            let mut pending = self.inner.pending.lock().await;
            pending.writes.remove(&id);
            pending.deleted.insert(id);
        }

        self.on_store("delete-conversation", move |store| delete_log(store, id))
            .await?;

        tracing::debug!(conversation_id = %id, "conversation deleted");
        Ok(())
    }

    /// Stored summaries with pending snapshots applied, most recent first.
    pub async fn list_summaries(&self) -> Vec<SessionSummary> {
        let mut index = self
            .on_store("list-summaries", |store| Ok(read_index(store)))
            .await
            .unwrap_or_else(|error| {
                tracing::warn!(error = %error, "failed to read session index");
                Vec::new()
            });

        let pending = self.inner.pending.lock().await;
        index.retain(|summary| !pending.deleted.contains(&summary.id));
        for (id, write) in &pending.writes {
            upsert_summary(&mut index, *id, &write.messages);
        }
        drop(pending);

        sort_by_recent_desc(&mut index);
        index
    }
}
