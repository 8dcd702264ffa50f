use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{CaptureSnafu, ChatResult};
use crate::events::{Notification, NotificationLevel};
use crate::message::Attachment;

/// Recordings stop on their own after this long.
pub const MAX_RECORDING: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CaptureErrorKind {
    Unsupported,
    MicrophoneUnavailable,
    NoAudioRecorded,
    Recognition(String),
}

impl fmt::Display for CaptureErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => f.write_str("Audio capture is not supported on this platform"),
            Self::MicrophoneUnavailable => f.write_str("Could not access microphone"),
            Self::NoAudioRecorded => f.write_str("No audio recorded"),
            Self::Recognition(reason) => write!(f, "Speech recognition error: {reason}"),
        }
    }
}

/// What a capture adapter reports while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Result number `index` of the current utterance. Interim results are
    /// replaced by later events with the same index.
    Transcript {
        index: usize,
        text: String,
        is_final: bool,
    },
    AudioFinished(Attachment),
    Error(CaptureErrorKind),
}

/// Platform side of dictation and voice notes.
///
/// `start` hands over the event channel. After `stop` the adapter must either
/// send `AudioFinished` or drop its sender.
pub trait CaptureAdapter: Send {
    fn start(&mut self, events: mpsc::UnboundedSender<CaptureEvent>) -> ChatResult<()>;
    fn stop(&mut self);
}

/// Input box contents while dictating: whatever was typed before plus the
/// recognized text so far.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptDraft {
    prefix: String,
    results: BTreeMap<usize, (String, bool)>,
}

impl TranscriptDraft {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            results: BTreeMap::new(),
        }
    }

    pub fn apply(&mut self, index: usize, text: impl Into<String>, is_final: bool) {
        self.results.insert(index, (text.into(), is_final));
    }

    /// Everything recognized so far, interim results included.
    pub fn text(&self) -> String {
        self.join(|_| true)
    }

    /// Only results the recognizer will not revise.
    pub fn committed(&self) -> String {
        self.join(|is_final| is_final)
    }

    pub fn has_interim(&self) -> bool {
        self.results.values().any(|(_, is_final)| !is_final)
    }

    fn join(&self, keep: impl Fn(bool) -> bool) -> String {
        let recognized: String = self
            .results
            .values()
            .filter(|(_, is_final)| keep(*is_final))
            .map(|(text, _)| text.as_str())
            .collect();

        match (self.prefix.trim_end(), recognized.trim()) {
            (prefix, "") => prefix.to_string(),
            ("", recognized) => recognized.to_string(),
            (prefix, recognized) => format!("{prefix} {recognized}"),
        }
    }
}

/// Result of one recording run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub transcript: TranscriptDraft,
    pub audio: Option<Attachment>,
    pub hit_limit: bool,
}

impl CaptureOutcome {
    pub fn notification(&self) -> Option<Notification> {
        self.audio.as_ref().map(|_| {
            Notification::new(NotificationLevel::Success, "Audio", "Audio recording added")
        })
    }
}

/// Runs `adapter` until it finishes, `stop` resolves or `limit` elapses.
///
/// Adapter errors stop the capture and come back as `ChatError::Capture`.
pub async fn run_capture<A>(
    adapter: &mut A,
    draft: TranscriptDraft,
    limit: Duration,
    stop: impl Future<Output = ()>,
) -> ChatResult<CaptureOutcome>
where
    A: CaptureAdapter + ?Sized,
{
    let (sender, mut events) = mpsc::unbounded_channel();
    adapter.start(sender)?;

    let mut outcome = CaptureOutcome {
        transcript: draft,
        audio: None,
        hit_limit: false,
    };
    let mut stopping = false;
    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);
    tokio::pin!(stop);

    loop {
        tokio::select! {
            () = &mut stop, if !stopping => {
                adapter.stop();
                stopping = true;
            }
            () = &mut deadline, if !stopping => {
                tracing::info!(limit_secs = limit.as_secs(), "recording limit reached");
                adapter.stop();
                stopping = true;
                outcome.hit_limit = true;
            }
            event = events.recv() => match event {
                Some(CaptureEvent::Transcript { index, text, is_final }) => {
                    outcome.transcript.apply(index, text, is_final);
                }
                Some(CaptureEvent::AudioFinished(attachment)) => {
                    outcome.audio = Some(attachment);
                    break;
                }
                Some(CaptureEvent::Error(kind)) => {
                    adapter.stop();
                    tracing::warn!(error = %kind, "capture failed");
                    return CaptureSnafu {
                        stage: "run-capture",
                        details: kind.to_string(),
                    }
                    .fail();
                }
                None => break,
            },
        }
    }

    Ok(outcome)
}
