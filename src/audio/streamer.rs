//! # Chunked Streaming
//!
//! Re-emits a fully synthesized sample sequence as a series of `Audio`
//! messages with a fixed delay between them, so the host sees audio arriving
//! the way a streaming backend would deliver it.

use crate::audio::transcoder::PcmBuffer;
use crate::config::AppConfig;
use crate::error::SinkClosed;
use crate::protocol::{MessageSink, ServerMessage};
use std::time::Duration;
use tracing::{debug, warn};

/// Sample rate the default window size is tuned for (1920 samples = 80 ms).
pub const NOMINAL_SAMPLE_RATE: u32 = 24_000;

/// Splits samples into fixed windows and paces their delivery.
#[derive(Debug, Clone)]
pub struct ChunkedStreamer {
    chunk_samples: usize,
    pacing: Duration,
}

impl ChunkedStreamer {
    pub fn new(chunk_samples: usize, pacing: Duration) -> Self {
        Self {
            chunk_samples: chunk_samples.max(1),
            pacing,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.streaming.chunk_samples, config.pacing())
    }

    /// Number of `Audio` messages `sample_count` samples produce.
    pub fn frame_count(&self, sample_count: usize) -> usize {
        sample_count.div_ceil(self.chunk_samples)
    }

    /// Send `pcm` as paced `Audio` messages, returning how many were sent.
    ///
    /// The last window may be shorter than the others. The delay sits between
    /// frames only, never before the first or after the last. A failed send
    /// aborts the remaining frames.
    pub async fn stream<S: MessageSink>(
        &self,
        sink: &mut S,
        pcm: &PcmBuffer,
    ) -> Result<usize, SinkClosed> {
        if pcm.sample_rate != NOMINAL_SAMPLE_RATE {
            // Window size is not adjusted to the upstream rate
            warn!(
                sample_rate = pcm.sample_rate,
                nominal = NOMINAL_SAMPLE_RATE,
                "Streaming audio at a rate the window size was not tuned for"
            );
        }

        debug!(
            frames = self.frame_count(pcm.samples.len()),
            samples = pcm.samples.len(),
            "Streaming audio"
        );

        let mut sent = 0;
        for (index, window) in pcm.samples.chunks(self.chunk_samples).enumerate() {
            if index > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }

            let pcm = window.iter().map(|&s| s as f64).collect();
            sink.send(ServerMessage::Audio { pcm }).await?;
            sent += 1;
        }

        debug!(frames = sent, "Audio streamed");
        Ok(sent)
    }
}
