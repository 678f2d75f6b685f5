//! # Upstream Synthesis Client
//!
//! Calls the OpenAI-compatible `/audio/speech` endpoint of the TTS provider.
//! One request per synthesis, no streaming: the full WAV body comes back at once.
//!
//! ## Request Shape:
//! ```json
//! { "model": "playai-tts", "input": "Hello", "voice": "Ruby-PlayAI", "response_format": "wav" }
//! ```
//! with `Authorization: Bearer <api key>`.

use crate::config::AppConfig;
use crate::error::SynthesisError;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info};

/// Input used to check that the provider answers before admitting a session.
const PROBE_INPUT: &str = "test";

/// Container format requested from the provider; the transcoder only reads WAV.
const RESPONSE_FORMAT: &str = "wav";

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// HTTP client for the upstream TTS provider.
#[derive(Debug, Clone)]
pub struct SynthesisClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
    voice: String,
    request_timeout: Duration,
    probe_timeout: Duration,
}

impl SynthesisClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http: Client::new(),
            endpoint: config.upstream.url.clone(),
            api_key: config.upstream.api_key.clone(),
            model: config.upstream.model.clone(),
            voice: config.upstream.voice.clone(),
            request_timeout: config.request_timeout(),
            probe_timeout: config.startup_timeout(),
        }
    }

    /// Synthesize `text` and return the raw WAV bytes.
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
        info!(text = %preview(text), "Synthesizing text");

        match self.request(text, self.request_timeout).await {
            Ok(audio) => {
                info!(bytes = audio.len(), "TTS success");
                Ok(audio)
            }
            Err(err) => {
                error!(error = %err, "TTS API call failed");
                Err(err)
            }
        }
    }

    /// Minimal synthesis used by the handshake; the audio is discarded.
    pub async fn probe(&self) -> Result<(), SynthesisError> {
        debug!("Testing TTS API availability");
        self.request(PROBE_INPUT, self.probe_timeout).await?;
        debug!("TTS API probe successful");
        Ok(())
    }

    async fn request(&self, input: &str, timeout: Duration) -> Result<Vec<u8>, SynthesisError> {
        let body = SpeechRequest {
            model: &self.model,
            input,
            voice: &self.voice,
            response_format: RESPONSE_FORMAT,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Upstream { status: status.as_u16(), body });
        }

        Ok(response.bytes().await?.to_vec())
    }
}

/// First 50 characters of `text`, for log lines.
fn preview(text: &str) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(50).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}
