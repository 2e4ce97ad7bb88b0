use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;

/// One decoded server message.
///
/// `TextDelta` only exists on the wire; the demuxer routes its content into the
/// visible or reasoning channel and never hands it back as an event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta {
        content: String,
    },
    CodeOutput {
        #[serde(default)]
        stdout: String,
        #[serde(default)]
        stderr: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    DisplayPlot {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alt: Option<String>,
    },
    LoadPdb {
        url: String,
        #[serde(default)]
        filename: String,
    },
    ToolStart {
        name: String,
    },
    ToolEnd {
        name: String,
    },
    Error {
        #[serde(alias = "error")]
        message: String,
    },
    Done,
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::TextDelta { .. } => "text_delta",
            StreamEvent::CodeOutput { .. } => "code_output",
            StreamEvent::DisplayPlot { .. } => "display_plot",
            StreamEvent::LoadPdb { .. } => "load_pdb",
            StreamEvent::ToolStart { .. } => "tool_start",
            StreamEvent::ToolEnd { .. } => "tool_end",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Done => "done",
        }
    }
}

/// Output channel a text character is routed to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    Visible,
    Reasoning,
}

impl Channel {
    pub fn toggled(self) -> Self {
        match self {
            Channel::Visible => Channel::Reasoning,
            Channel::Reasoning => Channel::Visible,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Visible => write!(f, "visible"),
            Channel::Reasoning => write!(f, "reasoning"),
        }
    }
}

/// What one `feed`/`flush` call produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DemuxOutput {
    pub visible_delta: String,
    pub reasoning_delta: String,
    pub events: Vec<StreamEvent>,
}

impl DemuxOutput {
    pub fn is_empty(&self) -> bool {
        self.visible_delta.is_empty() && self.reasoning_delta.is_empty() && self.events.is_empty()
    }

    pub fn push_text(&mut self, channel: Channel, text: &str) {
        match channel {
            Channel::Visible => self.visible_delta.push_str(text),
            Channel::Reasoning => self.reasoning_delta.push_str(text),
        }
    }

    /// Appends `other` after `self`, keeping event order.
    pub fn merge(&mut self, other: DemuxOutput) {
        self.visible_delta.push_str(&other.visible_delta);
        self.reasoning_delta.push_str(&other.reasoning_delta);
        self.events.extend(other.events);
    }

    pub fn has_done(&self) -> bool {
        self.events.iter().any(|e| matches!(e, StreamEvent::Done))
    }
}

/// Classification of a single SSE line.
#[derive(Debug, PartialEq, Eq)]
pub enum LineEvent {
    Message(StreamEvent),
    Done,
    /// Blank lines, comments and SSE fields we do not use.
    Ignored,
    /// Anything we could not decode. Carries a reason for the log.
    Malformed(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of the conversation sent to the chat backend.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ChatRequest<'a> {
    pub messages: &'a [ChatMessage],
    pub stream: bool,
}

#[derive(Error, Debug)]
pub enum GlycoError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upstream error (status {0}): {1}")]
    Upstream(reqwest::StatusCode, String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: GlycoError,
    pub span_trace: SpanTrace,
}

impl std::fmt::Display for ObservedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}\n\nSpan Trace:\n{}", self.inner, self.span_trace)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<GlycoError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;
