use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use snafu::{OptionExt, ResultExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use vyoma_chat::suggestions::{DEFAULT_SUGGESTION_COUNT, random_suggestions};
use vyoma_chat::{
    Attachment, ChatError, ChatEvent, ChatSession, ConversationId, Extraction, Message,
    MessageDispatcher, NotificationLevel, Role, SessionRegistry, SessionSummary,
};

use crate::error::{AppResult, ChatSnafu, ReadFileSnafu, TerminalSnafu, UnsupportedImageSnafu};
use crate::settings::SettingsStore;

const HELP: &str = "\
commands:
  /new                 start a new conversation
  /list                list saved conversations
  /open <id>           open a conversation (id or unique prefix)
  /delete <id>         delete a conversation
  /persona <name>      professional | casual | sarcastic | motivational
  /image <path> [text] send an image with optional text
  /suggest             show prompt ideas
  /quit                save and exit
anything else is sent as a message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    New,
    List,
    Open(String),
    Delete(String),
    Persona(String),
    Image { path: PathBuf, text: String },
    Suggest,
    Help,
    Quit,
    Unknown(String),
    Empty,
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Send(line.to_string());
    };

    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };
    let required = |build: fn(String) -> Command| {
        if argument.is_empty() {
            Command::Unknown(line.to_string())
        } else {
            build(argument.to_string())
        }
    };

    match name {
        "new" => Command::New,
        "list" => Command::List,
        "open" => required(Command::Open),
        "delete" => required(Command::Delete),
        "persona" => required(Command::Persona),
        "image" if !argument.is_empty() => {
            let (path, text) = match argument.split_once(char::is_whitespace) {
                Some((path, text)) => (path, text.trim()),
                None => (argument, ""),
            };
            Command::Image {
                path: PathBuf::from(path),
                text: text.to_string(),
            }
        }
        "suggest" => Command::Suggest,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    }
}

pub fn image_mime(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Reads an image file into a `data:` URL attachment.
pub async fn load_image(path: &Path) -> AppResult<Attachment> {
    let mime = image_mime(path).context(UnsupportedImageSnafu {
        stage: "image-mime",
        path: path.to_path_buf(),
    })?;
    let bytes = tokio::fs::read(path).await.context(ReadFileSnafu {
        stage: "read-image",
        path: path.to_path_buf(),
    })?;

    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Attachment::image(
        name,
        format!("data:{mime};base64,{}", STANDARD.encode(bytes)),
    ))
}

pub fn render_message(message: &Message) -> String {
    match message.role {
        Role::User => {
            let attachment = message
                .attachment
                .as_ref()
                .map(|attachment| format!(" {}", attachment.description()))
                .unwrap_or_default();
            format!("you> {}{attachment}", message.content)
        }
        Role::Assistant => {
            let extraction =
                Extraction::from_parts(message.content.clone(), message.code_snippets.clone());
            format!("vyoma> {}", extraction.render_plain())
        }
    }
}

pub fn render_event(event: &ChatEvent) -> Option<String> {
    match event {
        ChatEvent::MessageAppended { message, .. } if message.role == Role::Assistant => {
            Some(render_message(message))
        }
        ChatEvent::SendingStarted { .. } => Some("vyoma is thinking...".to_string()),
        ChatEvent::Notify(notification) => {
            let tag = match notification.level {
                NotificationLevel::Success => "ok",
                NotificationLevel::Info => "info",
                NotificationLevel::Error => "error",
            };
            Some(format!("[{tag}] {}", notification.body))
        }
        ChatEvent::ConversationCleared => Some(render_message(&Message::greeting())),
        ChatEvent::MessageAppended { .. }
        | ChatEvent::ConversationStarted { .. }
        | ChatEvent::ConversationSelected { .. }
        | ChatEvent::SendingFinished { .. }
        | ChatEvent::PersonaChanged { .. } => None,
    }
}

pub fn format_summary(summary: &SessionSummary, active: Option<ConversationId>) -> String {
    let marker = if active == Some(summary.id) { '*' } else { ' ' };
    format!(
        "{marker} {}  {}  ({} messages) {}",
        summary.id, summary.title, summary.message_count, summary.last_message_preview
    )
}

async fn print_events(mut events: broadcast::Receiver<ChatEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(line) = render_event(&event) {
                    println!("{line}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "terminal fell behind chat events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Line-oriented chat front end over stdin/stdout.
pub struct Repl {
    session: ChatSession,
    dispatcher: Arc<MessageDispatcher>,
    registry: SessionRegistry,
    settings: Arc<SettingsStore>,
    sends: JoinSet<()>,
}

impl Repl {
    pub fn new(session: ChatSession, settings: Arc<SettingsStore>) -> Self {
        Self {
            dispatcher: Arc::new(MessageDispatcher::new(session.clone())),
            registry: SessionRegistry::new(session.clone()),
            session,
            settings,
            sends: JoinSet::new(),
        }
    }

    pub async fn run(mut self) -> AppResult<()> {
        let printer = tokio::spawn(print_events(self.session.subscribe()));

        for message in self.session.messages().await {
            println!("{}", render_message(&message));
        }
        self.print_suggestions();

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await.context(TerminalSnafu {
            stage: "read-stdin",
        })? {
            let command = parse_command(&line);
            if command == Command::Quit {
                break;
            }
            if let Err(error) = self.execute(command).await {
                eprintln!("error: {error}");
            }
        }

        // Let queued sends land so their replies are saved with the rest.
        while self.sends.join_next().await.is_some() {}
        let written = self.session.persistence().flush().await;
        tracing::debug!(written, "flushed conversations on exit");
        printer.abort();
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> AppResult<()> {
        match command {
            Command::Send(text) => self.send(text, None),
            Command::Image { path, text } => {
                let attachment = load_image(&path).await?;
                self.send(text, Some(attachment));
            }
            Command::New => self.registry.create().await,
            Command::List => {
                let active = self.session.active_id().await;
                let summaries = self.registry.summaries().await;
                if summaries.is_empty() {
                    println!("no saved conversations");
                }
                for summary in &summaries {
                    println!("{}", format_summary(summary, active));
                }
            }
            Command::Open(raw) => {
                let id = self.registry.resolve(&raw).await.context(ChatSnafu {
                    stage: "resolve-open",
                })?;
                self.registry
                    .select(&id.to_string())
                    .await
                    .context(ChatSnafu {
                        stage: "select-conversation",
                    })?;
                for message in self.session.messages().await {
                    println!("{}", render_message(&message));
                }
            }
            Command::Delete(raw) => {
                let id = self.registry.resolve(&raw).await.context(ChatSnafu {
                    stage: "resolve-delete",
                })?;
                self.registry
                    .remove(&id.to_string())
                    .await
                    .context(ChatSnafu {
                        stage: "delete-conversation",
                    })?;
                println!("deleted {id}");
            }
            Command::Persona(raw) => {
                let persona = self.session.set_persona(&raw).await.context(ChatSnafu {
                    stage: "set-persona",
                })?;
                if let Err(error) = self.settings.update(|settings| settings.persona = persona) {
                    tracing::warn!(error = %error, "failed to remember persona");
                }
            }
            Command::Suggest => self.print_suggestions(),
            Command::Help => println!("{HELP}"),
            Command::Unknown(line) => println!("unknown command: {line} (try /help)"),
            Command::Empty | Command::Quit => {}
        }
        Ok(())
    }

    /// Sends in the background so the next line can be typed right away; the
    /// dispatcher keeps the order.
    fn send(&mut self, text: String, attachment: Option<Attachment>) {
        let dispatcher = self.dispatcher.clone();
        self.sends.spawn(async move {
            match dispatcher.enqueue(&text, attachment).await {
                // Already shown through the error notification.
                Ok(_) | Err(ChatError::Upstream { .. }) => {}
                Err(error) => eprintln!("error: {error}"),
            }
        });
        // Reap finished sends so the set does not grow for the whole session.
        while self.sends.try_join_next().is_some() {}
    }

    fn print_suggestions(&self) {
        println!("try asking:");
        for (index, prompt) in random_suggestions(DEFAULT_SUGGESTION_COUNT)
            .into_iter()
            .enumerate()
        {
            println!("  {}. {prompt}", index + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use vyoma_chat::{AttachmentKind, CodeLanguage, CodeSnippet, DispatchTarget, Notification};

    use super::*;

    #[test]
    fn plain_lines_are_messages_and_slashes_are_commands() {
        assert_eq!(parse_command("  hello there "), Command::Send("hello there".to_string()));
        assert_eq!(parse_command(""), Command::Empty);
        assert_eq!(parse_command("/new"), Command::New);
        assert_eq!(parse_command("/open 0192"), Command::Open("0192".to_string()));
        assert_eq!(
            parse_command("/persona professional"),
            Command::Persona("professional".to_string())
        );
        assert_eq!(parse_command("/exit"), Command::Quit);
        assert_eq!(parse_command("/open"), Command::Unknown("/open".to_string()));
        assert_eq!(parse_command("/dance"), Command::Unknown("/dance".to_string()));
    }

    #[test]
    fn image_command_splits_path_from_text() {
        assert_eq!(
            parse_command("/image ./cat.png what breed is this?"),
            Command::Image {
                path: PathBuf::from("./cat.png"),
                text: "what breed is this?".to_string(),
            }
        );
        assert_eq!(
            parse_command("/image shot.jpg"),
            Command::Image {
                path: PathBuf::from("shot.jpg"),
                text: String::new(),
            }
        );
        assert_eq!(parse_command("/image"), Command::Unknown("/image".to_string()));
    }

    #[test]
    fn image_mime_follows_extension() {
        assert_eq!(image_mime(Path::new("a.PNG")), Some("image/png"));
        assert_eq!(image_mime(Path::new("a.jpeg")), Some("image/jpeg"));
        assert_eq!(image_mime(Path::new("a.txt")), None);
        assert_eq!(image_mime(Path::new("noext")), None);
    }

    #[tokio::test]
    async fn load_image_builds_a_data_url() {
        let path = std::env::temp_dir().join(format!("vyoma-{}.png", uuid::Uuid::now_v7()));
        std::fs::write(&path, [0x89, b'P', b'N', b'G']).unwrap();

        let attachment = load_image(&path).await.unwrap();

        assert_eq!(attachment.kind, AttachmentKind::Image);
        assert_eq!(attachment.uri, "data:image/png;base64,iVBORw==");
        assert!(attachment.inline_image().is_some());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn assistant_messages_render_with_code_restored() {
        let mut message = Message::new(Role::Assistant, "Run:\n[CODE_SNIPPET_0]");
        message.code_snippets = vec![CodeSnippet {
            code: "ls".to_string(),
            language: CodeLanguage::Javascript,
            title: None,
        }];

        let event = ChatEvent::MessageAppended {
            conversation_id: None,
            message,
        };
        assert_eq!(
            render_event(&event).unwrap(),
            "vyoma> Run:\n```javascript\nls\n```"
        );
    }

    #[test]
    fn quiet_events_render_nothing() {
        let target = DispatchTarget::new(ConversationId::new_v7(), 1);
        assert_eq!(render_event(&ChatEvent::SendingFinished { target }), None);
        assert_eq!(
            render_event(&ChatEvent::MessageAppended {
                conversation_id: None,
                message: Message::user("hi", None),
            }),
            None
        );
        assert_eq!(
            render_event(&ChatEvent::Notify(Notification::error("boom"))).unwrap(),
            "[error] boom"
        );
    }
}
