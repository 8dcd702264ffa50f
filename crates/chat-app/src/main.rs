mod error;
mod repl;
mod settings;

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use snafu::ResultExt;
use tracing_subscriber::EnvFilter;
use vyoma_chat::{ChatSession, ConversationPersistence};
use vyoma_gateway::GatewayState;

use error::{AppResult, ChatSnafu, GatewaySnafu, OpenStoreSnafu, ServiceSnafu, SettingsSnafu};
use repl::{Repl, format_summary};
use settings::SettingsStore;

#[derive(Debug, Parser)]
#[command(name = "vyoma", version, about = "Vyoma AI chat in the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Chat interactively (default).
    Chat {
        /// professional, casual, sarcastic or motivational
        #[arg(long)]
        persona: Option<String>,
    },
    /// Run the chat function that forwards to Gemini.
    Serve {
        /// Address to listen on, e.g. 127.0.0.1:8787
        #[arg(long)]
        bind: Option<String>,
    },
    /// List saved conversations, most recent first.
    Sessions,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "vyoma failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let settings = Arc::new(SettingsStore::load());
    tracing::debug!(path = %settings.config_path().display(), "settings loaded");

    match cli.command.unwrap_or(Command::Chat { persona: None }) {
        Command::Chat { persona } => chat(settings, persona).await,
        Command::Serve { bind } => serve(&settings, bind).await,
        Command::Sessions => sessions(&settings).await,
    }
}

async fn open_persistence(settings: &SettingsStore) -> AppResult<ConversationPersistence> {
    let current = settings.settings();
    let store = vyoma_storage::open_store(current.store, &current.store_location())
        .await
        .context(OpenStoreSnafu {
            stage: "open-conversation-store",
        })?;
    Ok(ConversationPersistence::with_window(
        store,
        current.save_window(),
    ))
}

async fn chat(settings: Arc<SettingsStore>, persona: Option<String>) -> AppResult<()> {
    let persistence = open_persistence(&settings).await?;
    let completion = vyoma_llm::create_service(settings.settings().service_config()).context(
        ServiceSnafu {
            stage: "create-completion-service",
        },
    )?;
    tracing::info!(provider = completion.id(), "completion service ready");

    let session = ChatSession::new(completion, persistence);
    let persona = persona.unwrap_or_else(|| settings.settings().persona.to_string());
    session.set_persona(&persona).await.context(ChatSnafu {
        stage: "initial-persona",
    })?;

    Repl::new(session, settings).run().await
}

async fn serve(settings: &SettingsStore, bind: Option<String>) -> AppResult<()> {
    let mut current = (*settings.settings()).clone();
    if let Some(bind) = bind {
        current.bind = bind;
    }
    let addr = current.bind_addr().context(SettingsSnafu {
        stage: "serve-bind-address",
    })?;

    let state = GatewayState::from_gemini(current.gemini_config()).context(GatewaySnafu {
        stage: "gateway-state",
    })?;
    vyoma_gateway::serve(addr, state).await.context(GatewaySnafu {
        stage: "gateway-serve",
    })
}

async fn sessions(settings: &SettingsStore) -> AppResult<()> {
    let persistence = open_persistence(settings).await?;
    let summaries = persistence.list_summaries().await;
    if summaries.is_empty() {
        println!("no saved conversations");
    }
    for summary in &summaries {
        println!("{}", format_summary(summary, None));
    }
    Ok(())
}
