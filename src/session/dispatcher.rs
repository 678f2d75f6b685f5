//! # Message Dispatch
//!
//! Reads frames from an admitted connection one at a time and routes them:
//!
//! - **Text**: synthesize → decode WAV → stream `Audio` messages
//! - **Eos**: nothing to do
//! - **Unknown**: `Error{"Invalid message format"}`
//!
//! Each frame is fully handled before the next one is read, so two requests
//! on one connection never interleave their audio. A failure while handling a
//! frame is reported and the loop moves on; only a closed socket ends it.

use crate::audio::{decode_wav, ChunkedStreamer};
use crate::error::{BridgeError, SessionError, SinkClosed};
use crate::protocol::{ClientMessage, InboundFrame, MessageSink, ServerMessage};
use crate::session::Connection;
use crate::synthesis::SynthesisClient;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

/// What a message handler needs besides the socket.
pub struct Dispatcher<'a> {
    connection: &'a Connection,
    synthesizer: &'a SynthesisClient,
    streamer: ChunkedStreamer,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        connection: &'a Connection,
        synthesizer: &'a SynthesisClient,
        streamer: ChunkedStreamer,
    ) -> Self {
        Self {
            connection,
            synthesizer,
            streamer,
        }
    }

    /// Handle frames until the inbound stream ends or a send fails.
    pub async fn run<F, S>(&self, frames: &mut F, sink: &mut S) -> Result<(), SinkClosed>
    where
        F: Stream<Item = InboundFrame> + Unpin,
        S: MessageSink,
    {
        while let Some(frame) = frames.next().await {
            let message = ClientMessage::decode(&frame);
            debug!(connection_id = self.connection.id, kind = message.kind(), "Frame received");

            let outcome = AssertUnwindSafe(self.handle(message, sink)).catch_unwind().await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(SessionError::Rejected(err))) => {
                    warn!(connection_id = self.connection.id, error = %err, "Message rejected");
                    sink.send(ServerMessage::error(err.client_message())).await?;
                }
                Ok(Err(SessionError::Disconnected(closed))) => return Err(closed),
                Err(_) => {
                    error!(connection_id = self.connection.id, "Message handler panicked");
                    let err = BridgeError::ProcessingFailed;
                    sink.send(ServerMessage::error(err.client_message())).await?;
                }
            }
        }

        Ok(())
    }

    async fn handle<S: MessageSink>(&self, message: ClientMessage, sink: &mut S) -> Result<(), SessionError> {
        match message {
            ClientMessage::Text { text } => self.synthesize_and_stream(&text, sink).await,
            ClientMessage::Eos => {
                debug!(connection_id = self.connection.id, "End of input stream");
                Ok(())
            }
            ClientMessage::Unknown => Err(BridgeError::InvalidFrame.into()),
        }
    }

    async fn synthesize_and_stream<S: MessageSink>(&self, text: &str, sink: &mut S) -> Result<(), SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(BridgeError::EmptyInput.into());
        }

        let audio = self
            .synthesizer
            .synthesize(text)
            .await
            .map_err(BridgeError::SynthesisFailure)?;

        let pcm = decode_wav(&audio).map_err(BridgeError::TranscodeFailure)?;
        debug!(
            connection_id = self.connection.id,
            samples = pcm.samples.len(),
            sample_rate = pcm.sample_rate,
            channels = pcm.channels,
            duration_ms = pcm.duration_ms(),
            "Decoded upstream audio"
        );

        let frames = self.streamer.stream(sink, &pcm).await?;
        info!(connection_id = self.connection.id, frames, "Streamed audio");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::transcoder::fixtures::wav_i16;
    use crate::config::AppConfig;
    use crate::protocol::testing::RecordingSink;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> SynthesisClient {
        let mut config = AppConfig::default();
        config.upstream.api_key = "gsk_test".to_string();
        config.upstream.url = format!("{}/v1/audio/speech", server.uri());
        SynthesisClient::new(&config)
    }

    fn text_frame(text: &str) -> InboundFrame {
        InboundFrame::Binary(
            rmp_serde::to_vec_named(&serde_json::json!({"type": "Text", "text": text})).unwrap(),
        )
    }

    fn eos_frame() -> InboundFrame {
        InboundFrame::Binary(rmp_serde::to_vec_named(&serde_json::json!({"type": "Eos"})).unwrap())
    }

    async fn dispatch(server: &MockServer, frames: Vec<InboundFrame>) -> (RecordingSink, Result<(), SinkClosed>) {
        let connection = Connection::new(7, None);
        let synthesizer = client_for(server);
        let dispatcher = Dispatcher::new(&connection, &synthesizer, ChunkedStreamer::new(1920, Duration::ZERO));
        let mut sink = RecordingSink::default();
        let mut frames = tokio_stream::iter(frames);
        let result = dispatcher.run(&mut frames, &mut sink).await;
        (sink, result)
    }

    async fn upstream_wav(samples: usize) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(wav_i16(&vec![1000; samples], 1, 16000)))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_hello_streams_two_frames() {
        let server = upstream_wav(3200).await;

        let (sink, result) = dispatch(&server, vec![text_frame("Hello")]).await;

        assert!(result.is_ok());
        assert_eq!(sink.audio_sizes(), vec![1920, 1280]);
        assert!(sink.errors().is_empty());
    }

    #[tokio::test]
    async fn test_text_is_trimmed_before_synthesis() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"input": "Hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(wav_i16(&[0; 10], 1, 16000)))
            .expect(1)
            .mount(&server)
            .await;

        let (sink, _) = dispatch(&server, vec![text_frame("  Hello \n")]).await;
        assert_eq!(sink.audio_sizes(), vec![10]);
    }

    #[tokio::test]
    async fn test_empty_text_reports_and_continues() {
        let server = upstream_wav(100).await;

        let (sink, result) = dispatch(&server, vec![text_frame(""), text_frame("   "), text_frame("Hi")]).await;

        assert!(result.is_ok());
        assert_eq!(sink.errors(), vec!["Empty text provided", "Empty text provided"]);
        assert_eq!(sink.audio_sizes(), vec![100]);
    }

    #[tokio::test]
    async fn test_unknown_frame_reports_and_continues() {
        let server = upstream_wav(100).await;
        let unknown = InboundFrame::Binary(
            rmp_serde::to_vec_named(&serde_json::json!({"type": "SetVoice", "voice": "x"})).unwrap(),
        );

        let (sink, _) = dispatch(&server, vec![unknown, text_frame("Hi")]).await;

        assert_eq!(sink.errors(), vec!["Invalid message format"]);
        assert_eq!(sink.audio_sizes(), vec![100]);
    }

    #[tokio::test]
    async fn test_eos_gets_no_reply() {
        let server = upstream_wav(100).await;

        let (sink, result) = dispatch(&server, vec![eos_frame()]).await;

        assert!(result.is_ok());
        assert!(sink.messages.is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failure_reports_generic_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let (sink, result) = dispatch(&server, vec![text_frame("Hello"), eos_frame()]).await;

        assert!(result.is_ok());
        assert_eq!(sink.messages, vec![ServerMessage::error("TTS synthesis failed")]);
    }

    #[tokio::test]
    async fn test_undecodable_audio_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ID3\x04 not a wav".to_vec()))
            .mount(&server)
            .await;

        let (sink, _) = dispatch(&server, vec![text_frame("Hello")]).await;

        assert_eq!(sink.errors(), vec!["Audio decoding failed"]);
        assert!(sink.audio_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_requests_are_handled_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"input": "first"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(wav_i16(&vec![0; 2000], 1, 16000))
                    .set_delay(Duration::from_millis(100)),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"input": "second"})))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(wav_i16(&vec![0; 5], 1, 16000)))
            .mount(&server)
            .await;

        let (sink, _) = dispatch(&server, vec![text_frame("first"), text_frame("second")]).await;

        assert_eq!(sink.audio_sizes(), vec![1920, 80, 5]);
    }

    #[tokio::test]
    async fn test_send_failure_ends_loop() {
        let server = upstream_wav(5000).await;
        let connection = Connection::new(1, None);
        let synthesizer = client_for(&server);
        let dispatcher = Dispatcher::new(&connection, &synthesizer, ChunkedStreamer::new(1920, Duration::ZERO));
        let mut sink = RecordingSink::failing_after(1);
        let mut frames = tokio_stream::iter(vec![text_frame("Hello"), text_frame("again")]);

        let result = dispatcher.run(&mut frames, &mut sink).await;

        assert_eq!(result, Err(SinkClosed));
        assert_eq!(sink.audio_sizes(), vec![1920]);
    }

    /// Records like `RecordingSink`, but the first audio frame blows up.
    #[derive(Default)]
    struct PanicOnFirstAudio {
        inner: RecordingSink,
        panicked: bool,
    }

    impl MessageSink for PanicOnFirstAudio {
        async fn send(&mut self, message: ServerMessage) -> Result<(), SinkClosed> {
            if !self.panicked && matches!(message, ServerMessage::Audio { .. }) {
                self.panicked = true;
                panic!("audio writer exploded");
            }
            self.inner.send(message).await
        }

        async fn close(&mut self) {
            self.inner.close().await;
        }
    }

    #[tokio::test]
    async fn test_handler_panic_reports_and_continues() {
        let server = upstream_wav(100).await;
        let connection = Connection::new(3, None);
        let synthesizer = client_for(&server);
        let dispatcher = Dispatcher::new(&connection, &synthesizer, ChunkedStreamer::new(1920, Duration::ZERO));
        let mut sink = PanicOnFirstAudio::default();
        let mut frames = tokio_stream::iter(vec![text_frame("Hello"), text_frame("Hi")]);

        let result = dispatcher.run(&mut frames, &mut sink).await;

        assert!(result.is_ok());
        assert!(sink.panicked);
        assert_eq!(sink.inner.errors(), vec!["Message processing failed"]);
        assert_eq!(sink.inner.audio_sizes(), vec![100]);
        assert_eq!(sink.inner.messages.len(), 2);
    }
}
