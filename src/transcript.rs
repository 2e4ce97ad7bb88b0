use crate::types::{ChatMessage, DemuxOutput, StreamEvent};
use reqwest::Url;
use serde::Serialize;

/// A generated file the reply points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Plot { url: String, alt: Option<String> },
    Structure { url: String, filename: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeRun {
    pub stdout: String,
    pub stderr: String,
    pub code: Option<String>,
}

/// Everything one assistant reply has produced so far.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    #[serde(skip)]
    base_url: Option<Url>,
    pub visible_text: String,
    pub reasoning_text: String,
    pub events: Vec<StreamEvent>,
    active_tools: Vec<String>,
    pub completed_tools: Vec<String>,
    pub errors: Vec<String>,
    pub artifacts: Vec<Artifact>,
    pub code_runs: Vec<CodeRun>,
    pub done: bool,
}

impl Transcript {
    /// `base_url` is used to resolve relative artifact links.
    pub fn new(base_url: Option<Url>) -> Self {
        Self {
            base_url,
            ..Self::default()
        }
    }

    pub fn active_tools(&self) -> &[String] {
        &self.active_tools
    }

    /// Done was received and no tool is still running.
    pub fn is_complete(&self) -> bool {
        self.done && self.active_tools.is_empty()
    }

    pub fn apply(&mut self, output: DemuxOutput) {
        self.visible_text.push_str(&output.visible_delta);
        self.reasoning_text.push_str(&output.reasoning_delta);

        for event in output.events {
            match &event {
                StreamEvent::ToolStart { name } => self.active_tools.push(name.clone()),
                StreamEvent::ToolEnd { name } => {
                    match self.active_tools.iter().rposition(|t| t == name) {
                        Some(idx) => {
                            let name = self.active_tools.remove(idx);
                            self.completed_tools.push(name);
                        }
                        None => tracing::warn!("[TRANSCRIPT] tool_end for {} without tool_start", name),
                    }
                }
                StreamEvent::Error { message } => self.errors.push(message.clone()),
                StreamEvent::DisplayPlot { url, alt } => {
                    let url = self.resolve_url(url);
                    self.artifacts.push(Artifact::Plot {
                        url,
                        alt: alt.clone(),
                    });
                }
                StreamEvent::LoadPdb { url, filename } => {
                    let filename = if filename.is_empty() {
                        file_name_from_url(url)
                    } else {
                        filename.clone()
                    };
                    let url = self.resolve_url(url);
                    self.artifacts.push(Artifact::Structure { url, filename });
                }
                StreamEvent::CodeOutput {
                    stdout,
                    stderr,
                    code,
                } => self.code_runs.push(CodeRun {
                    stdout: stdout.clone(),
                    stderr: stderr.clone(),
                    code: code.clone(),
                }),
                StreamEvent::Done => self.done = true,
                StreamEvent::TextDelta { content } => self.visible_text.push_str(content),
            }
            self.events.push(event);
        }
    }

    /// The visible answer as a history entry for the next request.
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::assistant(self.visible_text.trim())
    }

    fn resolve_url(&self, url: &str) -> String {
        if Url::parse(url).is_ok() {
            return url.to_string();
        }
        match self.base_url.as_ref().map(|base| base.join(url)) {
            Some(Ok(joined)) => joined.to_string(),
            Some(Err(e)) => {
                tracing::debug!("[TRANSCRIPT] could not resolve {}: {}", url, e);
                url.to_string()
            }
            None => url.to_string(),
        }
    }
}

fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => "structure.pdb".to_string(),
    }
}
