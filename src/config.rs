use crate::constants::{
    DEFAULT_API_URL, DEFAULT_CHAT_PATH, MAX_LINE_BYTES, THINK_CLOSE_TAG, THINK_OPEN_TAG,
};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Replay a captured SSE stream from a file (`-` for stdin) instead of calling the backend.
    #[arg(long, conflicts_with = "message")]
    pub input: Option<String>,
    /// Question to send to the chat backend.
    #[arg(long, short)]
    pub message: Option<String>,
    #[arg(long, env = "GLYCOSHAPE_API_URL", default_value = DEFAULT_API_URL)]
    pub api_url: String,
    #[arg(long, env = "GLYCOSHAPE_CHAT_PATH", default_value = DEFAULT_CHAT_PATH)]
    pub chat_path: String,
    #[arg(long, default_value_t = 300)]
    pub request_timeout_secs: u64,
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,
    #[arg(long, default_value_t = MAX_LINE_BYTES)]
    pub max_line_bytes: usize,
    /// Treat a trailing partial marker tag as plain text instead of holding it back.
    #[arg(long, default_value_t = false)]
    pub no_hold_partial_tags: bool,
    #[arg(long, default_value_t = false)]
    pub hide_reasoning: bool,
    /// Print every demuxed output as one JSON line.
    #[arg(long, default_value_t = false)]
    pub json: bool,
    /// Also write logs to a daily-rolling file in this directory.
    #[arg(long, env = "GLYCOSTREAM_LOG_DIR")]
    pub log_dir: Option<PathBuf>,
}

/// Knobs for a single `StreamDemuxer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemuxConfig {
    pub open_tag: String,
    pub close_tag: String,
    pub hold_partial_tags: bool,
    pub max_line_bytes: usize,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            open_tag: THINK_OPEN_TAG.to_string(),
            close_tag: THINK_CLOSE_TAG.to_string(),
            hold_partial_tags: true,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }
}

impl From<&Args> for DemuxConfig {
    fn from(args: &Args) -> Self {
        Self {
            hold_partial_tags: !args.no_hold_partial_tags,
            max_line_bytes: args.max_line_bytes,
            ..Self::default()
        }
    }
}

impl Args {
    pub fn chat_url(&self) -> String {
        format!(
            "{}/{}",
            self.api_url.trim_end_matches('/'),
            self.chat_path.trim_start_matches('/')
        )
    }
}
