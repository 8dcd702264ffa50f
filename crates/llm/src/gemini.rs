use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use snafu::{OptionExt, ResultExt, ensure};

use super::model::{DEFAULT_GEMINI_BASE_URL, GeminiModels, ModelRoute};
use super::persona::{Persona, system_prompt_for};
use super::provider::{
    BoxFuture, BuildClientSnafu, CompletionRequest, CompletionService, DecodeResponseSnafu,
    EmptyMessageSetSnafu, HttpRequestSnafu, InlineImage, MissingApiKeySnafu, ProviderResult,
    Role, UnexpectedResponseSnafu, UpstreamSnafu, WireMessage,
};

pub const GEMINI_PROVIDER_ID: &str = "gemini";
pub const API_KEY_HEADER: &str = "x-goog-api-key";

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];
const SAFETY_THRESHOLD: &str = "BLOCK_MEDIUM_AND_ABOVE";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
    pub safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Content {
    pub role: &'static str,
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: &'static str,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.95,
            max_output_tokens: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetySetting {
    pub category: &'static str,
    pub threshold: &'static str,
}

fn default_safety_settings() -> Vec<SafetySetting> {
    SAFETY_CATEGORIES
        .iter()
        .map(|category| SafetySetting {
            category: *category,
            threshold: SAFETY_THRESHOLD,
        })
        .collect()
}

fn upstream_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

fn text_content(message: &WireMessage) -> Content {
    Content {
        role: upstream_role(message.role),
        parts: vec![Part::Text {
            text: message.content.clone(),
        }],
    }
}

/// The image carried by the latest turn, if that turn is a user turn with an
/// inlinable `data:` image URL. Decides text vs multimodal routing.
pub fn latest_inline_image(messages: &[WireMessage]) -> Option<InlineImage> {
    let latest = messages.last()?;
    if latest.role != Role::User {
        return None;
    }
    latest
        .image_url
        .as_deref()
        .and_then(InlineImage::from_data_url)
}

/// Shapes the upstream body: persona prompt as the opening user turn, then the
/// history, with the latest image inlined when present.
pub fn build_generate_request(
    messages: &[WireMessage],
    persona: Option<Persona>,
) -> (ModelRoute, GenerateContentRequest) {
    let mut contents = Vec::with_capacity(messages.len() + 1);
    contents.push(Content {
        role: "user",
        parts: vec![Part::Text {
            text: system_prompt_for(persona).to_string(),
        }],
    });

    let route = match (latest_inline_image(messages), messages.split_last()) {
        (Some(image), Some((latest, history))) => {
            contents.extend(history.iter().map(text_content));

            let mut parts = Vec::with_capacity(2);
            if !latest.content.is_empty() {
                parts.push(Part::Text {
                    text: latest.content.clone(),
                });
            }
            parts.push(Part::InlineData {
                inline_data: InlineData {
                    mime_type: image.mime_type,
                    data: image.data,
                },
            });
            contents.push(Content {
                role: "user",
                parts,
            });
            ModelRoute::Multimodal
        }
        _ => {
            contents.extend(messages.iter().map(text_content));
            ModelRoute::Text
        }
    };

    (
        route,
        GenerateContentRequest {
            contents,
            generation_config: GenerationConfig::default(),
            safety_settings: default_safety_settings(),
        },
    )
}

/// Pulls the first candidate's text out of a generateContent reply.
pub fn parse_generate_response(payload: &Value) -> ProviderResult<String> {
    if let Some(content) = payload.pointer("/candidates/0/content") {
        return content
            .pointer("/parts/0/text")
            .and_then(Value::as_str)
            .map(str::to_string)
            .context(UnexpectedResponseSnafu {
                stage: "gemini-parse-candidate-text",
                details: "first candidate has no text part".to_string(),
            });
    }

    if let Some(error) = payload.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .filter(|message| !message.is_empty())
            .unwrap_or("Error generating response");
        tracing::error!(error = %error, "gemini api returned an error payload");
        return UpstreamSnafu {
            stage: "gemini-parse-error-payload",
            message,
        }
        .fail();
    }

    tracing::error!(payload = %payload, "unexpected gemini response format");
    UnexpectedResponseSnafu {
        stage: "gemini-parse-unknown",
        details: "Unexpected response format from Gemini API".to_string(),
    }
    .fail()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    pub models: GeminiModels,
    pub timeout: Option<Duration>,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into().trim().to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            models: GeminiModels::default(),
            timeout: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if !base_url.is_empty() {
            self.base_url = base_url;
        }
        self
    }

    pub fn with_models(mut self, models: GeminiModels) -> Self {
        self.models = models;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Direct client for the Gemini generateContent endpoint.
pub struct GeminiClient {
    config: GeminiConfig,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> ProviderResult<Self> {
        ensure!(
            !config.api_key.is_empty(),
            MissingApiKeySnafu {
                stage: "gemini-client-new",
                provider_id: GEMINI_PROVIDER_ID.to_string(),
            }
        );

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context(BuildClientSnafu {
            stage: "gemini-build-client",
        })?;

        Ok(Self { config, http })
    }

    pub fn endpoint_for(&self, route: ModelRoute) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url,
            self.config.models.for_route(route)
        )
    }

    pub async fn generate(&self, request: &CompletionRequest) -> ProviderResult<String> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "gemini-generate",
            }
        );

        let (route, body) = build_generate_request(&request.messages, request.persona);
        let endpoint = self.endpoint_for(route);
        tracing::debug!(
            route = ?route,
            persona = ?request.persona,
            message_count = request.messages.len(),
            "sending request to gemini"
        );

        // The key travels in a header; transport errors print the URL.
        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context(HttpRequestSnafu {
                stage: "gemini-send",
            })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(reqwest::Error::without_url)
            .context(HttpRequestSnafu {
                stage: "gemini-read-body",
            })?;

        let payload: Value = serde_json::from_str(&text).context(DecodeResponseSnafu {
            stage: "gemini-decode-body",
            body: text.clone(),
        })?;
        tracing::debug!(status = status.as_u16(), "gemini response received");

        parse_generate_response(&payload)
    }
}

impl CompletionService for GeminiClient {
    fn id(&self) -> &str {
        GEMINI_PROVIDER_ID
    }

    fn complete<'a>(&'a self, request: CompletionRequest) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move { self.generate(&request).await })
    }
}
