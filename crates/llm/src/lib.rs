use std::sync::Arc;

mod function_client;
mod gemini;
mod model;
mod persona;
mod provider;

pub use function_client::{
    DEFAULT_FUNCTION_ENDPOINT, FUNCTION_PROVIDER_ID, FunctionClient, FunctionClientConfig,
};
pub use gemini::{
    GEMINI_PROVIDER_ID, GeminiClient, GeminiConfig, GenerateContentRequest,
    build_generate_request, latest_inline_image, parse_generate_response,
};
pub use model::{
    DEFAULT_GEMINI_BASE_URL, DEFAULT_TEXT_MODEL, DEFAULT_VISION_MODEL, GeminiModels, ModelRoute,
};
pub use persona::{DEFAULT_SYSTEM_PROMPT, Persona, UnknownPersona, system_prompt_for};
pub use provider::{
    BoxFuture, CompletionRequest, CompletionResponse, CompletionService, InlineImage,
    ProviderError, ProviderResult, Role, WireMessage,
};

/// How the chat client reaches the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceConfig {
    /// Through the deployed chat function.
    Function(FunctionClientConfig),
    /// Straight to Gemini with a local API key.
    Direct(GeminiConfig),
}

pub fn create_service(config: ServiceConfig) -> ProviderResult<Arc<dyn CompletionService>> {
    match config {
        ServiceConfig::Function(config) => Ok(Arc::new(FunctionClient::new(config)?)),
        ServiceConfig::Direct(config) => Ok(Arc::new(GeminiClient::new(config)?)),
    }
}
