pub mod client;
pub mod codec;
pub mod config;
pub mod constants;
pub mod demux;
pub mod logging;
pub mod splitter;
pub mod str_utils;
pub mod transcript;
pub mod types;

pub use types::*;

pub use client::{ChatClient, DemuxStream};
pub use codec::SseDemuxCodec;
pub use config::{Args, DemuxConfig};
pub use demux::StreamDemuxer;
pub use transcript::Transcript;
