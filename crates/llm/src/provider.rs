use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use snafu::Snafu;

use super::persona::{Persona, system_prompt_for};

/// Speaker of one conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One history entry as the chat function receives it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(
        default,
        rename = "imageUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub image_url: Option<String>,
}

impl WireMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image_url: None,
        }
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }
}

/// Body of one completion call: full history plus the persona in effect.
/// Without a persona the generic assistant prompt is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<WireMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<Persona>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<WireMessage>, persona: Persona) -> Self {
        Self {
            messages,
            persona: Some(persona),
        }
    }

    pub fn without_persona(messages: Vec<WireMessage>) -> Self {
        Self {
            messages,
            persona: None,
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        system_prompt_for(self.persona)
    }

    pub fn latest(&self) -> Option<&WireMessage> {
        self.messages.last()
    }
}

/// Reply of the chat function: either generated text or an error message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompletionResponse {
    Generated {
        #[serde(rename = "generatedText")]
        generated_text: String,
    },
    Failed {
        error: String,
    },
}

impl CompletionResponse {
    pub fn into_result(self, stage: &'static str) -> ProviderResult<String> {
        match self {
            Self::Generated { generated_text } => Ok(generated_text),
            Self::Failed { error } => UpstreamSnafu {
                stage,
                message: error,
            }
            .fail(),
        }
    }
}

/// Base64 image payload cut out of a `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: &'static str,
    pub data: String,
}

impl InlineImage {
    /// PNG when the URL says so, JPEG for every other image. Returns `None` for
    /// anything that is not a `data:image/...` URL with a payload.
    pub fn from_data_url(url: &str) -> Option<Self> {
        if !url.starts_with("data:image/") {
            return None;
        }

        let (_, data) = url.split_once(',')?;
        let mime_type = if url.starts_with("data:image/png") {
            "image/png"
        } else {
            "image/jpeg"
        };

        Some(Self {
            mime_type,
            data: data.to_string(),
        })
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("missing API key for provider '{provider_id}'"))]
    MissingApiKey {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("completion request has no messages"))]
    EmptyMessageSet { stage: &'static str },
    #[snafu(display("failed to build http client on `{stage}`, {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("http request failed on `{stage}`, {source}"))]
    HttpRequest {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to decode response on `{stage}`: {source}"))]
    DecodeResponse {
        stage: &'static str,
        body: String,
        source: serde_json::Error,
    },
    #[snafu(display("upstream returned an error: {message}"))]
    Upstream {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("unexpected response format: {details}"))]
    UnexpectedResponse {
        stage: &'static str,
        details: String,
    },
}

/// Anything that turns a conversation into the next assistant reply.
pub trait CompletionService: Send + Sync {
    fn id(&self) -> &str;
    fn complete<'a>(&'a self, request: CompletionRequest) -> BoxFuture<'a, ProviderResult<String>>;
}
