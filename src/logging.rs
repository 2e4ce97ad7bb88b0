use crate::types::{DemuxOutput, StreamEvent};
use std::panic;
use std::path::Path;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

pub const DEFAULT_LOG_FILTER: &str = "glycostream=info";
pub const LOG_FILE_PREFIX: &str = "glycostream.log";

/// Installs the global subscriber: env filter, stderr, optional rolling file, span traces.
///
/// The returned guard must be kept alive for the file writer to flush.
pub fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => DEFAULT_LOG_FILTER.into(),
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(tracing_error::ErrorLayer::default())
        .init();

    guard
}

/// Sets up a global panic hook that logs panics using tracing.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        original_hook(panic_info);
    }));
}

/// Per-stream counters, summarized once the stream ends.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamMetric {
    pub lines: usize,
    pub messages: usize,
    pub malformed_lines: usize,
    pub dropped_long_lines: usize,
    pub visible_chars: usize,
    pub reasoning_chars: usize,
    pub errors: usize,
    pub tool_names: Vec<String>,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_output(&mut self, output: &DemuxOutput) {
        self.visible_chars += output.visible_delta.chars().count();
        self.reasoning_chars += output.reasoning_delta.chars().count();
        for event in &output.events {
            match event {
                StreamEvent::ToolStart { name } => self.tool_names.push(name.clone()),
                StreamEvent::Error { .. } => self.errors += 1,
                _ => {}
            }
        }
    }

    pub fn log_summary(&self, stream_id: &str) {
        let tools_str = if self.tool_names.is_empty() {
            "0".to_string()
        } else {
            format!("{} ({})", self.tool_names.len(), self.tool_names.join(", "))
        };

        info!(
            target: "glycostream::stream",
            "[STREAM END] StreamID: {} | Lines: {} | Messages: {} | Malformed: {} | Tools: {} | Errors: {} | Text: {} visible / {} reasoning chars",
            stream_id,
            self.lines,
            self.messages,
            self.malformed_lines + self.dropped_long_lines,
            tools_str,
            self.errors,
            self.visible_chars,
            self.reasoning_chars
        );
    }
}
