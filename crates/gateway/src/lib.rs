//! HTTP chat function: `POST /gemini-chat` with `{messages, persona}` answered
//! by `{generatedText}` or `{error}`.

mod error;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderName, Method, StatusCode, header};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use snafu::{OptionExt, ResultExt, ensure};
use tower_http::cors::{Any, CorsLayer};
use vyoma_llm::{
    CompletionRequest, CompletionResponse, CompletionService, GeminiClient, GeminiConfig, Persona,
    WireMessage,
};

pub use error::{GatewayError, GatewayResult};
use error::{
    BindSnafu, EmptyMessagesSnafu, InvalidBodySnafu, InvalidPersonaSnafu, MissingApiKeySnafu,
    ServeSnafu, UpstreamSnafu,
};

pub const CHAT_ROUTE: &str = "/gemini-chat";
pub const DEFAULT_BIND: &str = "127.0.0.1:8787";

/// Body accepted by the chat function.
#[derive(Debug, Deserialize)]
pub struct ChatFunctionRequest {
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub persona: Option<String>,
}

/// Shared handler state. Without an upstream every request fails with the
/// missing-key error, so a misconfigured server still answers CORS and 400s.
#[derive(Clone)]
pub struct GatewayState {
    upstream: Option<Arc<dyn CompletionService>>,
}

impl GatewayState {
    pub fn new(upstream: Arc<dyn CompletionService>) -> Self {
        Self {
            upstream: Some(upstream),
        }
    }

    pub fn unconfigured() -> Self {
        Self { upstream: None }
    }

    /// Talks to Gemini when `config` carries a key, otherwise unconfigured.
    pub fn from_gemini(config: GeminiConfig) -> GatewayResult<Self> {
        if config.api_key.trim().is_empty() {
            tracing::warn!("GEMINI_API_KEY is not set; chat requests will fail");
            return Ok(Self::unconfigured());
        }

        let client = GeminiClient::new(config).context(UpstreamSnafu {
            stage: "gateway-build-client",
        })?;
        Ok(Self::new(Arc::new(client)))
    }
}

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
            header::CONTENT_TYPE,
        ])
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route(CHAT_ROUTE, post(chat).options(preflight))
        .layer(cors())
        .with_state(state)
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn chat(
    State(state): State<GatewayState>,
    body: Result<Json<ChatFunctionRequest>, JsonRejection>,
) -> GatewayResult<Json<CompletionResponse>> {
    let Json(body) = body.map_err(|rejection| {
        InvalidBodySnafu {
            stage: "gateway-decode-body",
            details: rejection.body_text(),
        }
        .build()
    })?;

    let persona = body
        .persona
        .as_deref()
        .map(Persona::parse)
        .transpose()
        .context(InvalidPersonaSnafu {
            stage: "gateway-persona",
        })?;
    ensure!(
        !body.messages.is_empty(),
        EmptyMessagesSnafu {
            stage: "gateway-messages",
        }
    );

    let upstream = state.upstream.as_ref().context(MissingApiKeySnafu {
        stage: "gateway-upstream",
    })?;

    tracing::debug!(
        persona = ?persona,
        messages = body.messages.len(),
        has_image = body.messages.last().is_some_and(|message| message.image_url.is_some()),
        "forwarding chat request"
    );

    let generated_text = upstream
        .complete(CompletionRequest {
            messages: body.messages,
            persona,
        })
        .await
        .context(UpstreamSnafu {
            stage: "gateway-complete",
        })?;

    Ok(Json(CompletionResponse::Generated { generated_text }))
}

/// Serves the chat function until Ctrl-C.
pub async fn serve(bind: SocketAddr, state: GatewayState) -> GatewayResult<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .context(BindSnafu {
            stage: "gateway-bind",
            addr: bind,
        })?;
    tracing::info!(addr = %bind, route = CHAT_ROUTE, "chat function listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %error, "failed to listen for shutdown signal");
            }
        })
        .await
        .context(ServeSnafu {
            stage: "gateway-serve",
        })
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use vyoma_llm::{BoxFuture, ProviderError, ProviderResult};

    use super::*;

    struct FixedService(Result<&'static str, &'static str>);

    impl CompletionService for FixedService {
        fn id(&self) -> &str {
            "fixed"
        }

        fn complete<'a>(
            &'a self,
            request: CompletionRequest,
        ) -> BoxFuture<'a, ProviderResult<String>> {
            Box::pin(async move {
                match self.0 {
                    Ok(text) => Ok(format!(
                        "{text} ({})",
                        request.persona.map_or("no persona", Persona::as_str)
                    )),
                    Err(message) => Err(ProviderError::Upstream {
                        stage: "test",
                        message: message.to_string(),
                    }),
                }
            })
        }
    }

    fn post_json(body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(CHAT_ROUTE)
            .header(header::ORIGIN, "http://localhost:5173")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn call(state: GatewayState, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn hello(persona: &str) -> Value {
        json!({
            "messages": [{"role": "user", "content": "hello"}],
            "persona": persona,
        })
    }

    #[tokio::test]
    async fn returns_generated_text() {
        let state = GatewayState::new(Arc::new(FixedService(Ok("hi there"))));
        let (status, body) = call(state, post_json(hello("sarcastic"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"generatedText": "hi there (sarcastic)"}));
    }

    #[tokio::test]
    async fn absent_persona_is_forwarded_as_none() {
        let state = GatewayState::new(Arc::new(FixedService(Ok("hi"))));
        let body = json!({"messages": [{"role": "user", "content": "hello"}]});
        let (status, body) = call(state, post_json(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"generatedText": "hi (no persona)"}));
    }

    #[tokio::test]
    async fn transport_failures_never_echo_the_api_key() {
        let config = GeminiConfig::new("SECRET-KEY-123").with_base_url("http://127.0.0.1:1/v1");
        let state = GatewayState::from_gemini(config).unwrap();
        let (status, body) = call(state, post_json(hello("casual"))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let message = body["error"].as_str().unwrap();
        assert!(!message.contains("SECRET-KEY-123"), "key leaked: {message}");
        assert!(!message.contains("key="), "query string leaked: {message}");
    }

    #[tokio::test]
    async fn unknown_persona_is_a_bad_request() {
        let state = GatewayState::new(Arc::new(FixedService(Ok("unused"))));
        let (status, body) = call(state, post_json(hello("pirate"))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("pirate"));
    }

    #[tokio::test]
    async fn malformed_body_and_empty_history_are_bad_requests() {
        let state = GatewayState::new(Arc::new(FixedService(Ok("unused"))));
        let (status, body) = call(state.clone(), post_json(json!({"persona": "casual"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, body) = call(state, post_json(json!({"messages": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "messages must not be empty"}));
    }

    #[tokio::test]
    async fn upstream_errors_become_server_errors() {
        let state = GatewayState::new(Arc::new(FixedService(Err("quota exceeded"))));
        let (status, body) = call(state, post_json(hello("casual"))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "quota exceeded"}));
    }

    #[tokio::test]
    async fn missing_key_is_reported_per_request() {
        let state = GatewayState::from_gemini(GeminiConfig::new("  ")).unwrap();
        let (status, body) = call(state, post_json(hello("casual"))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "GEMINI_API_KEY is not set"}));
    }

    #[tokio::test]
    async fn preflight_allows_function_headers() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri(CHAT_ROUTE)
            .header(header::ORIGIN, "http://localhost:5173")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "apikey, content-type")
            .body(Body::empty())
            .unwrap();
        let response = router(GatewayState::unconfigured())
            .oneshot(request)
            .await
            .unwrap();

        assert!(response.status().is_success());
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let allowed = headers[header::ACCESS_CONTROL_ALLOW_HEADERS].to_str().unwrap();
        for name in ["authorization", "x-client-info", "apikey", "content-type"] {
            assert!(allowed.contains(name), "missing {name} in {allowed}");
        }
    }

    #[tokio::test]
    async fn responses_carry_cors_origin() {
        let state = GatewayState::new(Arc::new(FixedService(Ok("ok"))));
        let response = router(state).oneshot(post_json(hello("casual"))).await.unwrap();

        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
