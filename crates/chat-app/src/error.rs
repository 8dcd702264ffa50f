use std::path::PathBuf;

use snafu::Snafu;
use vyoma_chat::ChatError;
use vyoma_gateway::GatewayError;
use vyoma_llm::ProviderError;
use vyoma_storage::StorageError;

use crate::settings::SettingsError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("{source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("failed to open conversation store on `{stage}`: {source}"))]
    OpenStore {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("failed to set up completion service on `{stage}`: {source}"))]
    Service {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("{source}"))]
    Chat {
        stage: &'static str,
        source: ChatError,
    },
    #[snafu(display("{source}"))]
    Gateway {
        stage: &'static str,
        source: GatewayError,
    },
    #[snafu(display("failed to read {path:?} on `{stage}`: {source}"))]
    ReadFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("unsupported image type for {path:?}; use png, jpeg, gif or webp"))]
    UnsupportedImage { stage: &'static str, path: PathBuf },
    #[snafu(display("terminal i/o failed on `{stage}`: {source}"))]
    Terminal {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type AppResult<T> = Result<T, AppError>;
