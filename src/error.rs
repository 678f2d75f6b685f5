//! # Error Handling
//!
//! Error types for the session protocol engine.
//!
//! ## Error Categories:
//! - **BridgeError**: Everything a client can be told about, each variant with
//!   a short, stable message string
//! - **SynthesisError**: Why an upstream TTS call failed (logged, never shown verbatim)
//! - **TranscodeError**: Why a returned audio container could not be decoded
//! - **SinkClosed**: The socket can no longer accept frames; ends the connection
//! - **SessionError**: What a handshake or message handler returns to its loop
//!
//! Admission failures close the connection. Every other `BridgeError` is
//! local to the message that caused it.

use std::fmt;

/// Client-visible failures of the bridge.
#[derive(Debug)]
pub enum BridgeError {
    /// The admitted-session counter already equals the configured capacity
    CapacityExceeded,

    /// The process is shutting down and no longer admits sessions
    ServiceUnavailable,

    /// The upstream provider did not answer the startup probe
    ProbeFailed(SynthesisError),

    /// A `Text` message whose text is empty after trimming
    EmptyInput,

    /// A frame that decodes to no known message
    InvalidFrame,

    /// The connection's inbound queue was full; the frame was dropped
    Backlogged,

    /// The upstream provider failed to synthesize the requested text
    SynthesisFailure(SynthesisError),

    /// The upstream audio could not be decoded into samples
    TranscodeFailure(TranscodeError),

    /// A handler panicked while processing a message
    ProcessingFailed,
}

impl BridgeError {
    /// The exact string sent to the client in an `Error` message.
    pub fn client_message(&self) -> &'static str {
        match self {
            BridgeError::CapacityExceeded => "Service at capacity",
            BridgeError::ServiceUnavailable => "Service unavailable",
            BridgeError::ProbeFailed(_) => "TTS API unavailable",
            BridgeError::EmptyInput => "Empty text provided",
            BridgeError::InvalidFrame => "Invalid message format",
            BridgeError::Backlogged => "Too many pending messages",
            BridgeError::SynthesisFailure(_) => "TTS synthesis failed",
            BridgeError::TranscodeFailure(_) => "Audio decoding failed",
            BridgeError::ProcessingFailed => "Message processing failed",
        }
    }

    /// Whether this failure ends the connection attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::CapacityExceeded
                | BridgeError::ServiceUnavailable
                | BridgeError::ProbeFailed(_)
        )
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::ProbeFailed(cause) | BridgeError::SynthesisFailure(cause) => {
                write!(f, "{}: {}", self.client_message(), cause)
            }
            BridgeError::TranscodeFailure(cause) => {
                write!(f, "{}: {}", self.client_message(), cause)
            }
            _ => f.write_str(self.client_message()),
        }
    }
}

impl std::error::Error for BridgeError {}

/// Failure of one call to the upstream TTS endpoint.
///
/// The three kinds are only distinguished in logs; the client always sees
/// the same generic message.
#[derive(Debug)]
pub enum SynthesisError {
    /// The request did not complete within its timeout
    Timeout,

    /// The provider answered with a non-success status
    Upstream { status: u16, body: String },

    /// Connection, TLS or body read failure
    Transport(String),
}

impl fmt::Display for SynthesisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthesisError::Timeout => write!(f, "upstream request timed out"),
            SynthesisError::Upstream { status, body } => {
                write!(f, "upstream returned {}: {}", status, body)
            }
            SynthesisError::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl std::error::Error for SynthesisError {}

impl From<reqwest::Error> for SynthesisError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SynthesisError::Timeout
        } else {
            SynthesisError::Transport(err.to_string())
        }
    }
}

/// Failure to decode a WAV container.
#[derive(Debug, PartialEq)]
pub enum TranscodeError {
    /// Missing `RIFF`/`WAVE` magic
    NotWav,

    /// The buffer ended inside a header
    Truncated,

    /// No `fmt ` chunk before the `data` chunk
    MissingFormat,

    /// No `data` chunk at all
    MissingData,

    /// Compressed or floating-point encodings (format tag)
    UnsupportedEncoding(u16),

    /// Header declares zero channels
    InvalidChannels,
}

impl fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscodeError::NotWav => write!(f, "not a RIFF/WAVE container"),
            TranscodeError::Truncated => write!(f, "container truncated inside a header"),
            TranscodeError::MissingFormat => write!(f, "data chunk precedes fmt chunk"),
            TranscodeError::MissingData => write!(f, "no data chunk"),
            TranscodeError::UnsupportedEncoding(tag) => {
                write!(f, "unsupported encoding (format tag {:#06x})", tag)
            }
            TranscodeError::InvalidChannels => write!(f, "container declares zero channels"),
        }
    }
}

impl std::error::Error for TranscodeError {}

/// Every header read that runs out of bytes is a truncated container.
impl From<std::io::Error> for TranscodeError {
    fn from(_: std::io::Error) -> Self {
        TranscodeError::Truncated
    }
}

/// The socket stopped accepting frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

impl fmt::Display for SinkClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "connection closed")
    }
}

impl std::error::Error for SinkClosed {}

/// Outcome of a handshake step or a message handler.
///
/// `Rejected` is reported to the client; `Disconnected` ends the loop
/// because there is nobody left to report to.
#[derive(Debug)]
pub enum SessionError {
    Rejected(BridgeError),
    Disconnected(SinkClosed),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Rejected(err) => write!(f, "{}", err),
            SessionError::Disconnected(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<BridgeError> for SessionError {
    fn from(err: BridgeError) -> Self {
        SessionError::Rejected(err)
    }
}

impl From<SinkClosed> for SessionError {
    fn from(err: SinkClosed) -> Self {
        SessionError::Disconnected(err)
    }
}
