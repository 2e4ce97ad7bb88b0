use crate::config::DemuxConfig;
use crate::constants::{DATA_PREFIX, DONE_SENTINEL, IGNORED_SSE_FIELDS, LOG_SNIPPET_CHARS};
use crate::logging::StreamMetric;
use crate::splitter::TagSplitter;
use crate::str_utils::log_snippet;
use crate::types::*;
use uuid::Uuid;

/// Classifies one SSE line (without its terminator).
pub fn parse_sse_line(line: &str) -> LineEvent {
    if line.trim().is_empty() || line.starts_with(':') {
        return LineEvent::Ignored;
    }
    if IGNORED_SSE_FIELDS.iter().any(|f| line.starts_with(f)) {
        return LineEvent::Ignored;
    }

    let payload = match line.strip_prefix(DATA_PREFIX) {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
        None => return LineEvent::Malformed("missing data prefix".to_string()),
    };

    if payload.trim() == DONE_SENTINEL {
        return LineEvent::Done;
    }

    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(StreamEvent::Done) => LineEvent::Done,
        Ok(event) => LineEvent::Message(event),
        Err(e) => LineEvent::Malformed(e.to_string()),
    }
}

/// Incremental demultiplexer for one chat stream.
///
/// Feed chunks in arrival order, then call [`StreamDemuxer::flush`] once the
/// transport reports end of input. Each call returns only what it decoded;
/// running totals are kept in [`StreamDemuxer::visible_text`] and
/// [`StreamDemuxer::reasoning_text`].
#[derive(Debug)]
pub struct StreamDemuxer {
    config: DemuxConfig,
    stream_id: String,
    buffer: String,
    pending_bytes: Vec<u8>,
    discarding_line: bool,
    splitter: TagSplitter,
    visible_text: String,
    reasoning_text: String,
    finished: bool,
    summarized: bool,
    summary_pending: bool,
    metrics: StreamMetric,
}

impl Default for StreamDemuxer {
    fn default() -> Self {
        Self::new(DemuxConfig::default())
    }
}

impl StreamDemuxer {
    pub fn new(config: DemuxConfig) -> Self {
        let splitter = TagSplitter::new(
            &config.open_tag,
            &config.close_tag,
            config.hold_partial_tags,
        );
        Self {
            config,
            stream_id: Uuid::new_v4().to_string(),
            buffer: String::new(),
            pending_bytes: Vec::new(),
            discarding_line: false,
            splitter,
            visible_text: String::new(),
            reasoning_text: String::new(),
            finished: false,
            summarized: false,
            summary_pending: false,
            metrics: StreamMetric::new(),
        }
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn channel(&self) -> Channel {
        self.splitter.channel()
    }

    pub fn inside_reasoning_span(&self) -> bool {
        self.splitter.channel() == Channel::Reasoning
    }

    /// True once `Done` has been returned; further `feed` calls are rejected.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn visible_text(&self) -> &str {
        &self.visible_text
    }

    pub fn reasoning_text(&self) -> &str {
        &self.reasoning_text
    }

    pub fn metrics(&self) -> &StreamMetric {
        &self.metrics
    }

    /// Characters removed as marker tags so far.
    pub fn markers_removed(&self) -> usize {
        self.splitter.markers_removed()
    }

    pub fn feed(&mut self, chunk: &str) -> Result<DemuxOutput> {
        self.ensure_open()?;
        self.buffer.push_str(chunk);

        let mut out = DemuxOutput::default();
        self.drain_lines(&mut out);
        self.commit(&out);
        Ok(out)
    }

    /// Like [`StreamDemuxer::feed`], for raw transport bytes that may end mid UTF-8 sequence.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Result<DemuxOutput> {
        self.ensure_open()?;
        self.pending_bytes.extend_from_slice(chunk);
        let text = self.decode_pending();
        self.feed(&text)
    }

    /// Settles whatever is left: a final unterminated line, held marker text and
    /// stray bytes. Calling it again yields an empty output.
    pub fn flush(&mut self) -> Result<DemuxOutput> {
        let mut out = DemuxOutput::default();
        if self.finished {
            return Ok(out);
        }

        if !self.pending_bytes.is_empty() {
            tracing::warn!(
                "[STREAM] {} trailing bytes are not valid UTF-8; decoding lossily",
                self.pending_bytes.len()
            );
            let rest = String::from_utf8_lossy(&self.pending_bytes).into_owned();
            self.pending_bytes.clear();
            self.buffer.push_str(&rest);
            self.drain_lines(&mut out);
        }

        if !self.finished && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            if self.discarding_line {
                self.discarding_line = false;
            } else if line.len() > self.config.max_line_bytes {
                self.drop_long_line(&line);
            } else if self.process_line(&line, &mut out) {
                self.finished = true;
            }
        }
        self.discarding_line = false;

        self.settle(&mut out);
        self.commit(&out);
        Ok(out)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(GlycoError::Protocol(format!(
                "stream {} already reported done",
                self.stream_id
            ))
            .into());
        }
        Ok(())
    }

    fn drain_lines(&mut self, out: &mut DemuxOutput) {
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            if self.discarding_line {
                self.discarding_line = false;
                continue;
            }
            if line.len() > self.config.max_line_bytes {
                self.drop_long_line(&line);
                continue;
            }
            if self.process_line(&line, out) {
                let skipped = self.buffer.len();
                if skipped > 0 {
                    tracing::debug!("[STREAM] Discarding {} bytes after done marker", skipped);
                }
                self.buffer.clear();
                self.finished = true;
                self.settle(out);
                return;
            }
        }

        if self.buffer.len() > self.config.max_line_bytes {
            let partial = std::mem::take(&mut self.buffer);
            if !self.discarding_line {
                self.drop_long_line(&partial);
            }
            self.discarding_line = true;
        }
    }

    /// Returns true when the line ended the stream.
    fn process_line(&mut self, line: &str, out: &mut DemuxOutput) -> bool {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);
        self.metrics.lines += 1;

        match parse_sse_line(line) {
            LineEvent::Done => {
                tracing::debug!("[STREAM] Stream end marker received");
                out.events.push(StreamEvent::Done);
                true
            }
            LineEvent::Message(StreamEvent::TextDelta { content }) => {
                self.metrics.messages += 1;
                self.splitter.push(&content, out);
                false
            }
            LineEvent::Message(event) => {
                self.metrics.messages += 1;
                tracing::trace!("[STREAM] {} event", event.kind());
                out.events.push(event);
                false
            }
            LineEvent::Ignored => false,
            LineEvent::Malformed(reason) => {
                self.metrics.malformed_lines += 1;
                tracing::warn!(
                    "[STREAM] Skipping malformed line ({}): {}",
                    reason,
                    log_snippet(line, LOG_SNIPPET_CHARS)
                );
                false
            }
        }
    }

    fn drop_long_line(&mut self, line: &str) {
        self.metrics.dropped_long_lines += 1;
        tracing::warn!(
            "[STREAM] Dropping line over {} bytes: {}",
            self.config.max_line_bytes,
            log_snippet(line, LOG_SNIPPET_CHARS)
        );
    }

    fn decode_pending(&mut self) -> String {
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending_bytes) {
                Ok(s) => {
                    text.push_str(s);
                    self.pending_bytes.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending_bytes[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            tracing::warn!("[STREAM] Replacing {} invalid UTF-8 bytes", bad);
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending_bytes.drain(..valid + bad);
                        }
                        // Incomplete sequence at the end; wait for the next chunk.
                        None => {
                            self.pending_bytes.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        text
    }

    /// End-of-stream bookkeeping, run once.
    fn settle(&mut self, out: &mut DemuxOutput) {
        self.splitter.flush(out);
        if self.summarized {
            return;
        }
        self.summarized = true;
        self.summary_pending = true;
        if self.inside_reasoning_span() {
            tracing::warn!(
                "[STREAM] Stream {} ended inside a reasoning span",
                self.stream_id
            );
        }
    }

    fn commit(&mut self, out: &DemuxOutput) {
        self.visible_text.push_str(&out.visible_delta);
        self.reasoning_text.push_str(&out.reasoning_delta);
        self.metrics.record_output(out);
        if std::mem::take(&mut self.summary_pending) {
            self.metrics.log_summary(&self.stream_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = concat!(
        ": keep-alive\n",
        "data: {\"type\":\"tool_start\",\"name\":\"glycan_lookup\"}\n",
        "data: {\"type\":\"text_delta\",\"content\":\"<think>Look up G00028MO\"}\n",
        "data: {\"type\":\"text_delta\",\"content\":\" first</thi\"}\n",
        "data: {\"type\":\"text_delta\",\"content\":\"nk>Man5 is a high-mannose N-glycan ✓\"}\n",
        "data: {\"type\":\"tool_end\",\"name\":\"glycan_lookup\"}\n",
        "data: {\"type\":\"display_plot\",\"url\":\"/output/torsions.png\",\"alt\":\"phi/psi\"}\n",
        "data: {\"type\":\"load_pdb\",\"url\":\"/output/man5.pdb\",\"filename\":\"man5.pdb\"}\n",
        "data: {\"type\":\"code_output\",\"stdout\":\"42\\n\",\"stderr\":\"\"}\n",
        "data: [DONE]\n",
    );

    fn feed_all(chunks: &[&[u8]]) -> (DemuxOutput, StreamDemuxer) {
        let mut demux = StreamDemuxer::default();
        let mut total = DemuxOutput::default();
        for chunk in chunks {
            if demux.is_finished() {
                break;
            }
            total.merge(demux.feed_bytes(chunk).unwrap());
        }
        total.merge(demux.flush().unwrap());
        (total, demux)
    }

    #[test]
    fn test_parse_sse_line_kinds() {
        assert_eq!(parse_sse_line(""), LineEvent::Ignored);
        assert_eq!(parse_sse_line(": ping"), LineEvent::Ignored);
        assert_eq!(parse_sse_line("event: message"), LineEvent::Ignored);
        assert_eq!(parse_sse_line("data: [DONE]"), LineEvent::Done);
        assert_eq!(parse_sse_line("data:[DONE]"), LineEvent::Done);
        assert_eq!(parse_sse_line(r#"data: {"type":"done"}"#), LineEvent::Done);
        assert_eq!(
            parse_sse_line(r#"data:{"type":"tool_end","name":"x"}"#),
            LineEvent::Message(StreamEvent::ToolEnd {
                name: "x".to_string()
            })
        );
        assert!(matches!(
            parse_sse_line(r#"data: {"type":"mystery"}"#),
            LineEvent::Malformed(_)
        ));
        assert!(matches!(parse_sse_line("hello"), LineEvent::Malformed(_)));
    }

    #[test]
    fn test_simple_split_scenario() {
        let mut demux = StreamDemuxer::default();
        let first = demux
            .feed(r#"data: {"type":"text_delta","content":"Hello <th"#)
            .unwrap();
        assert!(first.is_empty());
        demux
            .feed("ink>reason</think> world\"}\n")
            .unwrap();
        demux.flush().unwrap();
        assert_eq!(demux.visible_text(), "Hello  world");
        assert_eq!(demux.reasoning_text(), "reason");
        assert!(!demux.inside_reasoning_span());
    }

    #[test]
    fn test_done_sentinel_stops_the_call() {
        let mut demux = StreamDemuxer::default();
        let out = demux
            .feed("data: [DONE]\ndata: {\"type\":\"tool_start\",\"name\":\"late\"}\n")
            .unwrap();
        assert_eq!(out.events, vec![StreamEvent::Done]);
        assert!(demux.is_finished());
        assert!(demux.feed("data: {}\n").is_err());
        assert!(demux.flush().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let mut demux = StreamDemuxer::default();
        let out = demux
            .feed("data: {not json\ndata: {\"type\":\"tool_start\",\"name\":\"sasa\"}\n")
            .unwrap();
        assert_eq!(
            out.events,
            vec![StreamEvent::ToolStart {
                name: "sasa".to_string()
            }]
        );
        assert_eq!(demux.metrics().malformed_lines, 1);
    }

    #[test]
    fn test_unterminated_final_message_is_flushed() {
        let mut demux = StreamDemuxer::default();
        let out = demux
            .feed(r#"data: {"type":"error","message":"GPU queue full"}"#)
            .unwrap();
        assert!(out.is_empty());
        let out = demux.flush().unwrap();
        assert_eq!(
            out.events,
            vec![StreamEvent::Error {
                message: "GPU queue full".to_string()
            }]
        );
    }

    #[test]
    fn test_flush_is_idempotent() {
        let mut demux = StreamDemuxer::default();
        assert!(demux.flush().unwrap().is_empty());
        demux
            .feed("data: {\"type\":\"text_delta\",\"content\":\"hi <\"}\n")
            .unwrap();
        let out = demux.flush().unwrap();
        assert_eq!(out.visible_delta, "<");
        assert!(demux.flush().unwrap().is_empty());
        assert_eq!(demux.visible_text(), "hi <");
    }

    #[test]
    fn test_crlf_lines() {
        let mut demux = StreamDemuxer::default();
        let out = demux
            .feed("data: {\"type\":\"text_delta\",\"content\":\"ok\"}\r\n")
            .unwrap();
        assert_eq!(out.visible_delta, "ok");
    }

    #[test]
    fn test_buffer_never_keeps_complete_lines() {
        let mut demux = StreamDemuxer::default();
        demux
            .feed("data: {\"type\":\"tool_start\",\"name\":\"a\"}\ndata: {\"ty")
            .unwrap();
        assert!(!demux.buffer.contains('\n'));
        assert_eq!(demux.buffer, "data: {\"ty");
    }

    #[test]
    fn test_long_line_dropped_and_stream_recovers() {
        let mut demux = StreamDemuxer::new(DemuxConfig {
            max_line_bytes: 32,
            ..DemuxConfig::default()
        });
        let long = format!("data: {{\"type\":\"text_delta\",\"content\":\"{}", "x".repeat(64));
        demux.feed(&long).unwrap();
        demux.feed("\"}\n").unwrap();
        let out = demux.feed("data: {\"type\":\"done\"}\n").unwrap();
        assert_eq!(out.events, vec![StreamEvent::Done]);
        assert!(demux.visible_text().is_empty());
        assert_eq!(demux.metrics().dropped_long_lines, 1);
    }

    #[test]
    fn test_error_inside_span_keeps_span_open() {
        let mut demux = StreamDemuxer::default();
        let out = demux
            .feed(concat!(
                "data: {\"type\":\"text_delta\",\"content\":\"<think>hmm\"}\n",
                "data: {\"type\":\"error\",\"message\":\"tool crashed\"}\n",
                "data: {\"type\":\"text_delta\",\"content\":\" more</think>answer\"}\n",
            ))
            .unwrap();
        assert_eq!(out.reasoning_delta, "hmm more");
        assert_eq!(out.visible_delta, "answer");
        assert_eq!(out.events.len(), 1);
    }

    #[test]
    fn test_unclosed_span_is_detectable() {
        let mut demux = StreamDemuxer::default();
        demux
            .feed("data: {\"type\":\"text_delta\",\"content\":\"<think>never closed\"}\n")
            .unwrap();
        demux.flush().unwrap();
        assert!(demux.inside_reasoning_span());
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut demux = StreamDemuxer::default();
        let mut bytes = b"data: {\"type\":\"text_delta\",\"content\":\"a".to_vec();
        bytes.push(0xff);
        bytes.extend_from_slice(b"b\"}\n");
        let out = demux.feed_bytes(&bytes).unwrap();
        assert_eq!(out.visible_delta, "a\u{FFFD}b");
    }

    #[test]
    fn test_chunk_boundary_invariance() {
        let bytes = STREAM.as_bytes();
        let (whole, _) = feed_all(&[bytes]);
        assert_eq!(whole.visible_delta, "Man5 is a high-mannose N-glycan ✓");
        assert_eq!(whole.reasoning_delta, "Look up G00028MO first");
        assert_eq!(whole.events.len(), 6);
        assert_eq!(whole.events.last(), Some(&StreamEvent::Done));

        for idx in 1..bytes.len() {
            let (split, _) = feed_all(&[&bytes[..idx], &bytes[idx..]]);
            assert_eq!(split, whole, "two-way split at byte {}", idx);
        }

        let singles: Vec<&[u8]> = bytes.chunks(1).collect();
        let (bytewise, demux) = feed_all(&singles);
        assert_eq!(bytewise, whole);
        assert!(!demux.inside_reasoning_span());
    }
}
