//! # Configuration Management
//!
//! This module loads the bridge configuration from multiple sources:
//! - Default values (built into the code)
//! - An optional TOML configuration file (config.toml)
//! - Environment variables with the APP_ prefix (APP_UPSTREAM__MODEL, ...)
//! - The bridge's own deployment variables (GROQ_API_KEY, WS_PORT, ...)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment variables (GROQ_API_KEY, GROQ_TTS_URL, WS_PORT, ...)
//! 2. APP_-prefixed environment variables
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nothing here is re-read after the process starts.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Deployment variables and the configuration key each one overrides.
///
/// The API key is handled separately because it has a fallback variable.
const DEPLOYMENT_VARS: &[(&str, &str)] = &[
    ("GROQ_TTS_URL", "upstream.url"),
    ("GROQ_TTS_MODEL", "upstream.model"),
    ("GROQ_TTS_VOICE", "upstream.voice"),
    ("WS_PORT", "server.port"),
    ("MAX_CONCURRENT_SESSIONS", "sessions.max_concurrent_sessions"),
    ("STARTUP_TIMEOUT", "sessions.startup_timeout_secs"),
];

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Each group maps to one collaborator: the listener, the upstream
/// TTS provider, the session gate and the audio streamer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub sessions: SessionConfig,
    pub streaming: StreamingConfig,
}

/// Listener settings.
///
/// ## Common values:
/// - `host = "0.0.0.0"`: Accept connections on every interface (the default, the
///   orchestration host reaches us over a container network)
/// - `port = 8080`: WebSocket and health endpoint share this port
/// - `service_name` / `service_version`: Identity reported by the build-info
///   endpoint, matched by the host's service discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub service_name: String,
    pub service_version: String,
}

/// Upstream text-to-speech provider settings.
///
/// ## Fields:
/// - `api_key`: Static bearer credential forwarded on every request (required)
/// - `url`: OpenAI-compatible `/audio/speech` endpoint
/// - `model` / `voice`: Fixed synthesis parameters sent with every request
/// - `request_timeout_secs`: Upper bound for one synthesis call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub api_key: String,
    pub url: String,
    pub model: String,
    pub voice: String,
    pub request_timeout_secs: u64,
}

/// Admission and connection keepalive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of admitted sessions at any moment
    pub max_concurrent_sessions: usize,
    /// Upper bound for the upstream probe run during the handshake (seconds, fractional)
    pub startup_timeout_secs: f64,
    /// How often the server pings an idle socket
    pub heartbeat_interval_secs: u64,
    /// Drop the socket when the peer has been silent this long
    pub client_timeout_secs: u64,
    /// Inbound frames a connection may queue while a request is being handled
    pub max_pending_frames: usize,
}

/// Re-streaming settings for synthesized audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Samples per `Audio` message (1920 ≈ 80 ms at 24 kHz)
    pub chunk_samples: usize,
    /// Delay between two successive `Audio` messages
    pub pacing_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
                service_name: "tts-ws-groq-proxy-v2".to_string(),
                service_version: "v2.0.0".to_string(),
            },
            upstream: UpstreamConfig {
                api_key: String::new(),  // Must come from the environment
                url: "https://api.groq.com/openai/v1/audio/speech".to_string(),
                model: "playai-tts".to_string(),
                voice: "Ruby-PlayAI".to_string(),
                request_timeout_secs: 30,
            },
            sessions: SessionConfig {
                max_concurrent_sessions: 10,
                startup_timeout_secs: 5.0,
                heartbeat_interval_secs: 20,
                client_timeout_secs: 30,
                max_pending_frames: 32,
            },
            streaming: StreamingConfig {
                chunk_samples: 1920,
                pacing_ms: 80,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from every source in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `GROQ_API_KEY=gsk_...`: Upstream credential (`OPENAI_API_KEY` is accepted too)
    /// - `WS_PORT=9000`: Override the listening port
    /// - `APP_STREAMING__PACING_MS=40`: Override any nested key
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let builder = apply_deployment_overrides(builder, |name| env::var(name).ok())?;

        let config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// A missing API key is fatal: without it every probe would fail and the
    /// bridge could never admit a session.
    pub fn validate(&self) -> Result<()> {
        if self.upstream.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "GROQ_API_KEY or OPENAI_API_KEY environment variable is required"
            ));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.sessions.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if !(self.sessions.startup_timeout_secs > 0.0) {
            return Err(anyhow::anyhow!("Startup timeout must be greater than 0"));
        }

        if self.upstream.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Request timeout must be greater than 0"));
        }

        if self.sessions.heartbeat_interval_secs == 0 || self.sessions.client_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval and client timeout must be greater than 0"));
        }

        if self.sessions.max_pending_frames == 0 {
            return Err(anyhow::anyhow!("Max pending frames must be greater than 0"));
        }

        if self.streaming.chunk_samples == 0 {
            return Err(anyhow::anyhow!("Chunk size must be greater than 0"));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.request_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.sessions.startup_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.sessions.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.sessions.client_timeout_secs)
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_millis(self.streaming.pacing_ms)
    }
}

/// Layer the bridge's deployment variables on top of a config builder.
///
/// `lookup` resolves a variable name to its value; `load` passes the process
/// environment, tests pass a map.
fn apply_deployment_overrides<F>(
    mut builder: config::ConfigBuilder<config::builder::DefaultState>,
    lookup: F,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(key) = lookup("GROQ_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
        builder = builder.set_override("upstream.api_key", key)?;
    }

    for (var, key) in DEPLOYMENT_VARS {
        if let Some(value) = lookup(var) {
            builder = builder.set_override(*key, value)?;
        }
    }

    Ok(builder)
}
