/// SSE field prefix carrying a payload. The space after the colon is optional on the wire.
pub const DATA_PREFIX: &str = "data:";

/// Payload value that terminates the stream normally.
pub const DONE_SENTINEL: &str = "[DONE]";

/// In-band markers delimiting reasoning spans inside `text_delta` content.
pub const THINK_OPEN_TAG: &str = "<think>";
pub const THINK_CLOSE_TAG: &str = "</think>";

/// SSE fields we accept and ignore.
pub const IGNORED_SSE_FIELDS: &[&str] = &["event:", "id:", "retry:"];

/// Lines longer than this are dropped rather than parsed.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Max characters of a bad line that end up in a log message.
pub const LOG_SNIPPET_CHARS: usize = 200;

/// Backend defaults
pub const DEFAULT_API_URL: &str = "https://glycoshape.org";
pub const DEFAULT_CHAT_PATH: &str = "/api/chat";
pub const EVENT_STREAM_MIME: &str = "text/event-stream";
