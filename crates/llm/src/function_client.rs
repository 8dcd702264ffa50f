use std::time::Duration;

use snafu::{ResultExt, ensure};

use super::provider::{
    BoxFuture, BuildClientSnafu, CompletionRequest, CompletionResponse, CompletionService,
    DecodeResponseSnafu, EmptyMessageSetSnafu, HttpRequestSnafu, ProviderResult,
};

pub const FUNCTION_PROVIDER_ID: &str = "chat-function";
pub const DEFAULT_FUNCTION_ENDPOINT: &str = "http://127.0.0.1:8787/gemini-chat";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionClientConfig {
    pub endpoint: String,
    /// Sent as both `Authorization: Bearer` and `apikey` when present.
    pub api_key: Option<String>,
    pub timeout: Option<Duration>,
}

impl Default for FunctionClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_FUNCTION_ENDPOINT.to_string(),
            api_key: None,
            timeout: None,
        }
    }
}

impl FunctionClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into().trim().to_string();
        Self {
            endpoint: if endpoint.is_empty() {
                DEFAULT_FUNCTION_ENDPOINT.to_string()
            } else {
                endpoint
            },
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let api_key = api_key.into().trim().to_string();
        self.api_key = (!api_key.is_empty()).then_some(api_key);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Calls the deployed chat function (`POST {messages, persona}`) over HTTP.
pub struct FunctionClient {
    config: FunctionClientConfig,
    http: reqwest::Client,
}

impl FunctionClient {
    pub fn new(config: FunctionClientConfig) -> ProviderResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().context(BuildClientSnafu {
            stage: "function-build-client",
        })?;

        Ok(Self { config, http })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    async fn invoke(&self, request: &CompletionRequest) -> ProviderResult<String> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "function-invoke",
            }
        );

        let mut builder = self.http.post(&self.config.endpoint).json(request);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key).header("apikey", api_key);
        }

        let response = builder.send().await.context(HttpRequestSnafu {
            stage: "function-send",
        })?;
        let status = response.status();
        let body = response.text().await.context(HttpRequestSnafu {
            stage: "function-read-body",
        })?;

        // Failures come back as a non-2xx status carrying `{error}`, so decode the
        // body before looking at the status.
        let parsed: CompletionResponse =
            serde_json::from_str(&body).context(DecodeResponseSnafu {
                stage: "function-decode-body",
                body: body.clone(),
            })?;

        if !status.is_success() {
            tracing::warn!(
                status = status.as_u16(),
                endpoint = %self.config.endpoint,
                "chat function returned a failure status"
            );
        }

        parsed.into_result("function-response")
    }
}

impl CompletionService for FunctionClient {
    fn id(&self) -> &str {
        FUNCTION_PROVIDER_ID
    }

    fn complete<'a>(&'a self, request: CompletionRequest) -> BoxFuture<'a, ProviderResult<String>> {
        Box::pin(async move { self.invoke(&request).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_endpoint_and_key_use_defaults() {
        let config = FunctionClientConfig::new("  ").with_api_key("   ");
        assert_eq!(config.endpoint, DEFAULT_FUNCTION_ENDPOINT);
        assert_eq!(config.api_key, None);

        let config = FunctionClientConfig::new("https://fn.example/gemini-chat").with_api_key("anon");
        assert_eq!(config.endpoint, "https://fn.example/gemini-chat");
        assert_eq!(config.api_key.as_deref(), Some("anon"));
    }
}
