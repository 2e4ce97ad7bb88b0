use crate::config::DemuxConfig;
use crate::demux::StreamDemuxer;
use crate::types::{DemuxOutput, ObservedError};
use bytes::BytesMut;
use tokio_util::codec::Decoder;

/// `Decoder` adapter so a streamed HTTP body (or any `AsyncRead`) can be driven
/// through `FramedRead` and come out as demuxed outputs.
///
/// Every call consumes the whole read buffer; line reassembly happens inside
/// the demuxer, not in the codec.
#[derive(Debug, Default)]
pub struct SseDemuxCodec {
    demux: StreamDemuxer,
    flushed: bool,
}

impl SseDemuxCodec {
    pub fn new(config: DemuxConfig) -> Self {
        Self {
            demux: StreamDemuxer::new(config),
            flushed: false,
        }
    }

    pub fn demuxer(&self) -> &StreamDemuxer {
        &self.demux
    }

    fn take_output(&mut self, buf: &mut BytesMut) -> Result<DemuxOutput, ObservedError> {
        let chunk = buf.split();
        if self.demux.is_finished() {
            if !chunk.is_empty() {
                tracing::debug!("[CODEC] Ignoring {} bytes after done", chunk.len());
            }
            return Ok(DemuxOutput::default());
        }
        if chunk.is_empty() {
            return Ok(DemuxOutput::default());
        }
        self.demux.feed_bytes(&chunk)
    }
}

impl Decoder for SseDemuxCodec {
    type Item = DemuxOutput;
    type Error = ObservedError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let out = self.take_output(buf)?;
        if out.is_empty() {
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.flushed {
            buf.clear();
            return Ok(None);
        }
        let mut out = self.take_output(buf)?;
        out.merge(self.demux.flush()?);
        self.flushed = true;
        if out.is_empty() {
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }
}
