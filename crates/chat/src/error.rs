use snafu::Snafu;
use vyoma_llm::{ProviderError, UnknownPersona};
use vyoma_storage::{ConversationId, StorageError};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("invalid message: {details}"))]
    InvalidMessage {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("{source}"))]
    InvalidPersona {
        stage: &'static str,
        source: UnknownPersona,
    },
    #[snafu(display("conversation '{conversation_id}' was not found"))]
    NotFound {
        stage: &'static str,
        conversation_id: String,
    },
    #[snafu(display("failed to get response from AI: {source}"))]
    Upstream {
        stage: &'static str,
        conversation_id: ConversationId,
        source: ProviderError,
    },
    #[snafu(display("persistence failed on `{stage}`: {source}"))]
    Persistence {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("storage task failed on `{stage}`: {source}"))]
    BlockingTask {
        stage: &'static str,
        source: tokio::task::JoinError,
    },
    #[snafu(display("failed to encode conversation data on `{stage}`: {source}"))]
    Encode {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("capture device error: {details}"))]
    Capture {
        stage: &'static str,
        details: String,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;
