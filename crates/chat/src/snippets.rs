use std::sync::LazyLock;

use regex::Regex;

use crate::message::{CodeLanguage, CodeSnippet};

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(\w+)?\s*([\s\S]*?)```").expect("code fence regex"));

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[CODE_SNIPPET_(\d+)\]").expect("snippet placeholder regex"));

pub fn placeholder(index: usize) -> String {
    format!("[CODE_SNIPPET_{index}]")
}

/// Assistant text with fenced code lifted out. `display_text` holds one
/// placeholder per snippet, in the same order as `snippets`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Extraction {
    pub display_text: String,
    pub snippets: Vec<CodeSnippet>,
}

/// Piece of an extraction in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Snippet(&'a CodeSnippet),
}

/// Replaces every closed ```` ``` ```` region with `[CODE_SNIPPET_<i>]`.
/// An opening fence without a closing one stays in the text untouched.
pub fn extract(raw: &str) -> Extraction {
    let mut snippets = Vec::new();
    let display_text = FENCE.replace_all(raw, |captures: &regex::Captures<'_>| {
        let language = CodeLanguage::from_tag(captures.get(1).map(|tag| tag.as_str()));
        let code = captures.get(2).map_or("", |code| code.as_str()).trim();
        let index = snippets.len();
        snippets.push(CodeSnippet {
            code: code.to_string(),
            language,
            title: Some(language.title()),
        });
        placeholder(index)
    });

    Extraction {
        display_text: display_text.into_owned(),
        snippets,
    }
}

impl Extraction {
    /// Rebuilds an extraction from a stored assistant message.
    pub fn from_parts(display_text: impl Into<String>, snippets: Vec<CodeSnippet>) -> Self {
        Self {
            display_text: display_text.into(),
            snippets,
        }
    }

    /// Placeholders that point past `snippets` are kept as literal text.
    pub fn segments(&self) -> Vec<Segment<'_>> {
        let mut segments = Vec::new();
        let mut cursor = 0;

        for captures in PLACEHOLDER.captures_iter(&self.display_text) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let snippet = captures
                .get(1)
                .and_then(|index| index.as_str().parse::<usize>().ok())
                .and_then(|index| self.snippets.get(index));
            let Some(snippet) = snippet else {
                continue;
            };

            if whole.start() > cursor {
                segments.push(Segment::Text(&self.display_text[cursor..whole.start()]));
            }
            segments.push(Segment::Snippet(snippet));
            cursor = whole.end();
        }

        if cursor < self.display_text.len() {
            segments.push(Segment::Text(&self.display_text[cursor..]));
        }
        segments
    }

    /// Display text with each placeholder swapped back for a fenced block.
    pub fn render_plain(&self) -> String {
        let mut rendered = String::with_capacity(self.display_text.len());
        for segment in self.segments() {
            match segment {
                Segment::Text(text) => rendered.push_str(text),
                Segment::Snippet(snippet) => {
                    rendered.push_str("```");
                    rendered.push_str(snippet.language.as_str());
                    rendered.push('\n');
                    rendered.push_str(&snippet.code);
                    rendered.push_str("\n```");
                }
            }
        }
        rendered
    }
}
