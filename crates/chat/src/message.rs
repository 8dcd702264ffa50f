use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use vyoma_llm::{InlineImage, Role, WireMessage};
use vyoma_storage::{ConversationId, MessageId};

use crate::snippets::Extraction;

pub const DEFAULT_GREETING: &str = "Hello! I'm your Vyoma AI assistant. How can I help you today?";

/// Languages a code snippet can be tagged with. Unknown tags become `Javascript`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeLanguage {
    Html,
    Css,
    #[default]
    Javascript,
    Typescript,
    Jsx,
    Tsx,
}

impl CodeLanguage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Html => "html",
            Self::Css => "css",
            Self::Javascript => "javascript",
            Self::Typescript => "typescript",
            Self::Jsx => "jsx",
            Self::Tsx => "tsx",
        }
    }

    /// Case-insensitive; absent or unrecognized tags (including `js`) fall back to
    /// the default.
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag.map(str::to_ascii_lowercase).as_deref() {
            Some("html") => Self::Html,
            Some("css") => Self::Css,
            Some("typescript") => Self::Typescript,
            Some("jsx") => Self::Jsx,
            Some("tsx") => Self::Tsx,
            _ => Self::Javascript,
        }
    }

    pub fn title(self) -> String {
        format!("{} Code", self.as_str().to_ascii_uppercase())
    }
}

/// One fenced code block lifted out of an assistant reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSnippet {
    pub code: String,
    pub language: CodeLanguage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    Document,
    Audio,
}

impl AttachmentKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Document => "document",
            Self::Audio => "audio",
        }
    }
}

/// Reference to a payload sent along with a user message. `uri` is either an
/// opaque URL or a `data:` URL carrying the bytes inline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub name: String,
    pub uri: String,
}

impl Attachment {
    pub fn new(kind: AttachmentKind, name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            uri: uri.into(),
        }
    }

    pub fn image(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self::new(AttachmentKind::Image, name, uri)
    }

    /// Infers the kind from a `data:` URL media type; anything that is not image
    /// or audio is treated as a document.
    pub fn from_data_url(name: impl Into<String>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let kind = if uri.starts_with("data:image/") {
            AttachmentKind::Image
        } else if uri.starts_with("data:audio/") {
            AttachmentKind::Audio
        } else {
            AttachmentKind::Document
        };
        Self::new(kind, name, uri)
    }

    pub fn inline_image(&self) -> Option<InlineImage> {
        match self.kind {
            AttachmentKind::Image => InlineImage::from_data_url(&self.uri),
            AttachmentKind::Document | AttachmentKind::Audio => None,
        }
    }

    /// Short marker used to tell the model about payloads it cannot see.
    pub fn description(&self) -> String {
        format!("[{}: {}]", self.kind.as_str(), self.name)
    }
}

/// One entry of a conversation log. Never mutated once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp_unix_millis: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_snippets: Vec<CodeSnippet>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new_v7(),
            role,
            content: content.into(),
            timestamp_unix_millis: now_unix_millis(),
            attachment: None,
            code_snippets: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>, attachment: Option<Attachment>) -> Self {
        let mut message = Self::new(Role::User, content);
        message.attachment = attachment;
        message
    }

    /// Assistant reply built from extractor output; content keeps the placeholders.
    pub fn assistant(extraction: Extraction) -> Self {
        let mut message = Self::new(Role::Assistant, extraction.display_text);
        message.code_snippets = extraction.snippets;
        message
    }

    pub fn greeting() -> Self {
        Self::new(Role::Assistant, DEFAULT_GREETING)
    }

    pub fn has_payload(&self) -> bool {
        !self.content.trim().is_empty() || self.attachment.is_some()
    }

    /// Shape sent to the completion service. Images travel as `imageUrl`; other
    /// attachments are named in the text.
    pub fn to_wire(&self) -> WireMessage {
        match &self.attachment {
            Some(attachment) if attachment.kind == AttachmentKind::Image => {
                WireMessage::new(self.role, self.content.clone()).with_image_url(&attachment.uri)
            }
            Some(attachment) => {
                let description = attachment.description();
                let content = if self.content.is_empty() {
                    description
                } else {
                    format!("{}\n\n{description}", self.content)
                };
                WireMessage::new(self.role, content)
            }
            None => WireMessage::new(self.role, self.content.clone()),
        }
    }
}

pub fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| {
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
        })
}

/// Identifies one outbound request so late results can be matched or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchTarget {
    pub conversation_id: ConversationId,
    pub request_seq: u64,
}

impl DispatchTarget {
    pub const fn new(conversation_id: ConversationId, request_seq: u64) -> Self {
        Self {
            conversation_id,
            request_seq,
        }
    }
}

/// Per-conversation send state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DispatchState {
    #[default]
    Idle,
    Sending(DispatchTarget),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchTransition {
    Start(DispatchTarget),
    Complete(DispatchTarget),
    Fail(DispatchTarget),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchTransitionRejection {
    AlreadySending {
        active: DispatchTarget,
        attempted: DispatchTarget,
    },
    NotSending,
    TargetMismatch {
        active: DispatchTarget,
        attempted: DispatchTarget,
    },
}

pub type DispatchTransitionResult = Result<DispatchState, DispatchTransitionRejection>;

impl DispatchState {
    pub fn active_target(&self) -> Option<DispatchTarget> {
        match self {
            Self::Sending(target) => Some(*target),
            Self::Idle => None,
        }
    }

    pub fn is_sending(&self) -> bool {
        matches!(self, Self::Sending(_))
    }

    /// Only `Idle` may start. Completion and failure must name the request that is
    /// actually in flight.
    pub fn apply(&self, transition: DispatchTransition) -> DispatchTransitionResult {
        match transition {
            DispatchTransition::Start(target) => match self {
                Self::Idle => Ok(Self::Sending(target)),
                Self::Sending(active) => Err(DispatchTransitionRejection::AlreadySending {
                    active: *active,
                    attempted: target,
                }),
            },
            DispatchTransition::Complete(target) | DispatchTransition::Fail(target) => {
                match self {
                    Self::Sending(active) if *active == target => Ok(Self::Idle),
                    Self::Sending(active) => Err(DispatchTransitionRejection::TargetMismatch {
                        active: *active,
                        attempted: target,
                    }),
                    Self::Idle => Err(DispatchTransitionRejection::NotSending),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_tags_normalize_to_known_set() {
        assert_eq!(CodeLanguage::from_tag(Some("HTML")), CodeLanguage::Html);
        assert_eq!(CodeLanguage::from_tag(Some("tsx")), CodeLanguage::Tsx);
        assert_eq!(CodeLanguage::from_tag(Some("js")), CodeLanguage::Javascript);
        assert_eq!(CodeLanguage::from_tag(Some("python")), CodeLanguage::Javascript);
        assert_eq!(CodeLanguage::from_tag(None), CodeLanguage::Javascript);
        assert_eq!(CodeLanguage::Typescript.title(), "TYPESCRIPT Code");
    }

    #[test]
    fn attachment_kind_follows_data_url_media_type() {
        let image = Attachment::from_data_url("cat.png", "data:image/png;base64,AAAA");
        assert_eq!(image.kind, AttachmentKind::Image);
        assert_eq!(image.inline_image().map(|inline| inline.mime_type), Some("image/png"));

        let audio = Attachment::from_data_url("memo.wav", "data:audio/wav;base64,UklG");
        assert_eq!(audio.kind, AttachmentKind::Audio);
        assert!(audio.inline_image().is_none());

        let document = Attachment::from_data_url("notes.pdf", "data:application/pdf;base64,JVBE");
        assert_eq!(document.kind, AttachmentKind::Document);
    }

    #[test]
    fn wire_form_carries_images_and_describes_other_payloads() {
        let with_image = Message::user(
            "what is this?",
            Some(Attachment::image("cat.jpg", "data:image/jpeg;base64,/9j/")),
        );
        let wire = with_image.to_wire();
        assert_eq!(wire.content, "what is this?");
        assert_eq!(wire.image_url.as_deref(), Some("data:image/jpeg;base64,/9j/"));

        let with_audio = Message::user(
            "transcribe",
            Some(Attachment::new(AttachmentKind::Audio, "memo.wav", "blob:memo")),
        );
        let wire = with_audio.to_wire();
        assert_eq!(wire.content, "transcribe\n\n[audio: memo.wav]");
        assert_eq!(wire.image_url, None);

        let only_document = Message::user(
            "",
            Some(Attachment::new(AttachmentKind::Document, "cv.pdf", "blob:cv")),
        );
        assert_eq!(only_document.to_wire().content, "[document: cv.pdf]");
    }

    #[test]
    fn dispatch_state_only_settles_the_request_in_flight() {
        let conversation_id = ConversationId::new_v7();
        let first = DispatchTarget::new(conversation_id, 1);
        let second = DispatchTarget::new(conversation_id, 2);

        let sending = DispatchState::Idle
            .apply(DispatchTransition::Start(first))
            .unwrap();
        assert_eq!(sending.active_target(), Some(first));

        assert_eq!(
            sending.apply(DispatchTransition::Start(second)),
            Err(DispatchTransitionRejection::AlreadySending {
                active: first,
                attempted: second,
            })
        );
        assert_eq!(
            sending.apply(DispatchTransition::Complete(second)),
            Err(DispatchTransitionRejection::TargetMismatch {
                active: first,
                attempted: second,
            })
        );
        assert_eq!(
            sending.apply(DispatchTransition::Fail(first)),
            Ok(DispatchState::Idle)
        );
        assert_eq!(
            DispatchState::Idle.apply(DispatchTransition::Complete(first)),
            Err(DispatchTransitionRejection::NotSending)
        );
    }
}
