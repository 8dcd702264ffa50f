use std::net::SocketAddr;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use snafu::Snafu;
use vyoma_llm::{ProviderError, UnknownPersona};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum GatewayError {
    #[snafu(display("invalid request body: {details}"))]
    InvalidBody {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("{source}"))]
    InvalidPersona {
        stage: &'static str,
        source: UnknownPersona,
    },
    #[snafu(display("messages must not be empty"))]
    EmptyMessages { stage: &'static str },
    #[snafu(display("GEMINI_API_KEY is not set"))]
    MissingApiKey { stage: &'static str },
    #[snafu(display("{}", upstream_message(source)))]
    Upstream {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("failed to bind gateway on {addr}: {source}"))]
    Bind {
        stage: &'static str,
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[snafu(display("gateway server stopped on `{stage}`: {source}"))]
    Serve {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Upstream failures report the provider's own message, not our wrapping.
fn upstream_message(error: &ProviderError) -> String {
    match error {
        ProviderError::Upstream { message, .. } => message.clone(),
        ProviderError::UnexpectedResponse { details, .. } => details.clone(),
        other => other.to_string(),
    }
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidBody { .. } | Self::InvalidPersona { .. } | Self::EmptyMessages { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::MissingApiKey { .. }
            | Self::Upstream { .. }
            | Self::Bind { .. }
            | Self::Serve { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "chat function failed");
        } else {
            tracing::warn!(error = %self, "chat function rejected request");
        }

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
