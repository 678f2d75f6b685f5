//! # Audio Processing Module
//!
//! Everything between the upstream provider's response body and the `Audio`
//! messages on the socket.
//!
//! ## Key Components:
//! - **Transcoder**: WAV container → normalized mono f32 samples
//! - **Streamer**: Samples → paced, fixed-size `Audio` messages
//!
//! ## Audio Format:
//! - **Input**: Linear PCM WAV, 16-bit little-endian, any channel count
//! - **Output**: Mono samples in [-1.0, 1.0], upstream sample rate unchanged

pub mod streamer;     // Windowing and pacing
pub mod transcoder;   // WAV parsing and downmix

pub use streamer::ChunkedStreamer;
pub use transcoder::decode_wav;
