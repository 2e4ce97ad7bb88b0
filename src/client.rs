use crate::codec::SseDemuxCodec;
use crate::config::{Args, DemuxConfig};
use crate::constants::EVENT_STREAM_MIME;
use crate::transcript::Transcript;
use crate::types::*;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;
use tracing::Instrument;
use uuid::Uuid;

pub type DemuxStream = Pin<Box<dyn Stream<Item = Result<DemuxOutput>> + Send>>;

/// Talks to the chat endpoint of the GlycoShape backend.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    chat_url: String,
    config: DemuxConfig,
}

impl ChatClient {
    pub fn new(client: reqwest::Client, chat_url: impl Into<String>, config: DemuxConfig) -> Self {
        Self {
            client,
            chat_url: chat_url.into(),
            config,
        }
    }

    pub fn from_args(args: &Args) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(args.request_timeout_secs))
            .connect_timeout(Duration::from_secs(args.connect_timeout_secs))
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .build()
            .map_err(GlycoError::Network)?;
        Ok(Self::new(client, args.chat_url(), DemuxConfig::from(args)))
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    /// Sends the conversation and returns the demuxed reply stream.
    ///
    /// Non-2xx responses are returned as `Upstream` errors before any streaming starts.
    pub async fn ask(&self, messages: &[ChatMessage]) -> Result<DemuxStream> {
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("chat", request_id = %request_id);
        self.open_stream(messages).instrument(span).await
    }

    async fn open_stream(&self, messages: &[ChatMessage]) -> Result<DemuxStream> {
        tracing::info!(
            "[CHAT] POST {} ({} messages)",
            self.chat_url,
            messages.len()
        );
        let response = self
            .client
            .post(&self.chat_url)
            .header(reqwest::header::ACCEPT, EVENT_STREAM_MIME)
            .json(&ChatRequest {
                messages,
                stream: true,
            })
            .send()
            .await
            .map_err(GlycoError::Network)?;

        let status = response.status();
        if !status.is_success() {
            let err_body = match response.text().await {
                Ok(t) => t,
                Err(_) => "Unknown error (failed to read response text)".to_string(),
            };
            tracing::error!("[CHAT] Upstream returned {}: {}", status, err_body);
            return Err(GlycoError::Upstream(status, err_body).into());
        }

        let bytes_stream = response
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other));
        let framed = FramedRead::new(
            StreamReader::new(bytes_stream),
            SseDemuxCodec::new(self.config.clone()),
        );
        Ok(Box::pin(framed))
    }
}

/// Demuxes a captured stream, e.g. a saved response body or stdin.
pub fn replay<R>(reader: R, config: DemuxConfig) -> DemuxStream
where
    R: AsyncRead + Send + 'static,
{
    Box::pin(FramedRead::new(reader, SseDemuxCodec::new(config)))
}

/// Pulls the stream to completion, applying every output to `transcript`.
///
/// `on_output` sees each output before it is applied, for incremental display.
pub async fn drive<S, F>(mut stream: S, transcript: &mut Transcript, mut on_output: F) -> Result<()>
where
    S: Stream<Item = Result<DemuxOutput>> + Unpin,
    F: FnMut(&DemuxOutput),
{
    while let Some(item) = stream.next().await {
        let output = item?;
        on_output(&output);
        transcript.apply(output);
    }
    if !transcript.done {
        tracing::warn!("[CHAT] Stream closed without a done marker");
    }
    Ok(())
}
