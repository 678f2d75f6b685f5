//! # WAV Transcoding
//!
//! Turns the WAV container returned by the TTS provider into normalized mono
//! float samples.
//!
//! ## Decoding Rules:
//! - **Header**: RIFF/WAVE, `fmt ` must precede `data`, unknown chunks are skipped
//! - **Encoding**: Linear PCM only (format tag 1, or WAVE_FORMAT_EXTENSIBLE)
//! - **Sample width**: 16-bit is the supported width; other widths are read
//!   best-effort as 16-bit little-endian
//! - **Channels**: Downmixed to mono by averaging every channel of a frame
//! - **Scale**: `sample / 32768`, so output lies in [-1.0, 1.0)
//! - **Rate**: Passed through, no resampling

use crate::error::TranscodeError;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use tracing::warn;

const WAVE_FORMAT_PCM: u16 = 0x0001;
const WAVE_FORMAT_EXTENSIBLE: u16 = 0xFFFE;

/// Decoded audio ready for streaming.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Always 1 after downmix
    pub channels: u16,
}

impl PcmBuffer {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Fields of the `fmt ` chunk the decoder needs.
#[derive(Debug, Clone, Copy)]
struct FormatChunk {
    format_tag: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

impl FormatChunk {
    fn sample_width(&self) -> usize {
        (self.bits_per_sample as usize).div_ceil(8).max(1)
    }
}

/// Decode a WAV container into mono samples.
pub fn decode_wav(bytes: &[u8]) -> Result<PcmBuffer, TranscodeError> {
    let mut cursor = Cursor::new(bytes);

    let mut riff = [0u8; 4];
    cursor.read_exact(&mut riff).map_err(|_| TranscodeError::NotWav)?;
    let _riff_size = cursor.read_u32::<LittleEndian>().map_err(|_| TranscodeError::NotWav)?;
    let mut wave = [0u8; 4];
    cursor.read_exact(&mut wave).map_err(|_| TranscodeError::NotWav)?;
    if &riff != b"RIFF" || &wave != b"WAVE" {
        return Err(TranscodeError::NotWav);
    }

    let mut format: Option<FormatChunk> = None;

    loop {
        let mut id = [0u8; 4];
        if cursor.read_exact(&mut id).is_err() {
            return Err(TranscodeError::MissingData);
        }
        let size = cursor.read_u32::<LittleEndian>()? as usize;
        let body_start = cursor.position() as usize;

        match &id {
            b"fmt " => {
                if size < 16 {
                    return Err(TranscodeError::Truncated);
                }
                format = Some(FormatChunk {
                    format_tag: cursor.read_u16::<LittleEndian>()?,
                    channels: cursor.read_u16::<LittleEndian>()?,
                    sample_rate: cursor.read_u32::<LittleEndian>()?,
                    bits_per_sample: {
                        let _byte_rate = cursor.read_u32::<LittleEndian>()?;
                        let _block_align = cursor.read_u16::<LittleEndian>()?;
                        cursor.read_u16::<LittleEndian>()?
                    },
                });
            }
            b"data" => {
                let format = format.ok_or(TranscodeError::MissingFormat)?;
                // Streaming writers leave the size at 0xFFFFFFFF
                let end = body_start.saturating_add(size).min(bytes.len());
                return samples_from_data(&bytes[body_start..end], format);
            }
            _ => {}
        }

        // Chunks are word aligned
        let next = body_start
            .saturating_add(size)
            .saturating_add(size & 1);
        if next > bytes.len() {
            return Err(TranscodeError::MissingData);
        }
        cursor.set_position(next as u64);
    }
}

fn samples_from_data(data: &[u8], format: FormatChunk) -> Result<PcmBuffer, TranscodeError> {
    if format.format_tag != WAVE_FORMAT_PCM && format.format_tag != WAVE_FORMAT_EXTENSIBLE {
        return Err(TranscodeError::UnsupportedEncoding(format.format_tag));
    }
    if format.channels == 0 {
        return Err(TranscodeError::InvalidChannels);
    }
    if format.bits_per_sample != 16 {
        warn!(
            bits_per_sample = format.bits_per_sample,
            "Non 16-bit PCM from upstream, reading samples as 16-bit"
        );
    }

    let channels = format.channels as usize;
    let frame_bytes = channels * format.sample_width();
    let whole_frames = data.len() / frame_bytes;
    let raw = &data[..whole_frames * frame_bytes];

    let mut cursor = Cursor::new(raw);
    let mut interleaved = Vec::with_capacity(raw.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        interleaved.push(sample);
    }

    let samples = interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            sum as f32 / channels as f32 / 32768.0
        })
        .collect();

    Ok(PcmBuffer {
        samples,
        sample_rate: format.sample_rate,
        channels: 1,
    })
}

#[cfg(test)]
pub mod fixtures {
    use byteorder::{LittleEndian, WriteBytesExt};

    /// Build a PCM WAV container around interleaved 16-bit samples.
    pub fn wav_i16(samples: &[i16], channels: u16, sample_rate: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            data.write_i16::<LittleEndian>(s).unwrap();
        }
        wav_raw(&data, 1, channels, sample_rate, 16, data.len() as u32, &[])
    }

    /// Build a container from raw parts; `extra_chunk` is inserted before `data`.
    pub fn wav_raw(
        data: &[u8],
        format_tag: u16,
        channels: u16,
        sample_rate: u32,
        bits: u16,
        declared_data_len: u32,
        extra_chunk: &[u8],
    ) -> Vec<u8> {
        let block_align = channels * bits.div_ceil(8);
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.write_u32::<LittleEndian>(36 + extra_chunk.len() as u32 + data.len() as u32).unwrap();
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.write_u32::<LittleEndian>(16).unwrap();
        out.write_u16::<LittleEndian>(format_tag).unwrap();
        out.write_u16::<LittleEndian>(channels).unwrap();
        out.write_u32::<LittleEndian>(sample_rate).unwrap();
        out.write_u32::<LittleEndian>(sample_rate * block_align as u32).unwrap();
        out.write_u16::<LittleEndian>(block_align).unwrap();
        out.write_u16::<LittleEndian>(bits).unwrap();
        out.extend_from_slice(extra_chunk);
        out.extend_from_slice(b"data");
        out.write_u32::<LittleEndian>(declared_data_len).unwrap();
        out.extend_from_slice(data);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn assert_close(actual: &[f32], expected: &[f32]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-6, "{} != {}", a, e);
        }
    }

    #[test]
    fn test_mono_16bit_normalization() {
        let wav = wav_i16(&[0, 16384, -16384, 32767], 1, 16000);
        let pcm = decode_wav(&wav).unwrap();

        assert_eq!(pcm.sample_rate, 16000);
        assert_eq!(pcm.channels, 1);
        assert_close(&pcm.samples, &[0.0, 0.5, -0.5, 0.999_969_5]);
    }

    #[test]
    fn test_stereo_is_averaged_to_mono() {
        // Frames: (16384, 0), (-32768, -16384), (1000, 1000)
        let wav = wav_i16(&[16384, 0, -32768, -16384, 1000, 1000], 2, 24000);
        let pcm = decode_wav(&wav).unwrap();

        assert_eq!(pcm.channels, 1);
        assert_eq!(pcm.sample_rate, 24000);
        assert_close(&pcm.samples, &[0.25, -0.75, 1000.0 / 32768.0]);
    }

    #[test]
    fn test_partial_trailing_frame_is_dropped() {
        let mut wav = wav_i16(&[100, 200, 300, 400], 2, 16000);
        // One stray byte after the last full frame, size field updated to match
        wav.push(0x7f);
        let data_len_offset = wav.len() - 9 - 4;
        wav[data_len_offset..data_len_offset + 4].copy_from_slice(&9u32.to_le_bytes());

        let pcm = decode_wav(&wav).unwrap();
        assert_eq!(pcm.samples.len(), 2);
    }

    #[test]
    fn test_streaming_data_size_is_clamped() {
        let data: Vec<u8> = [1000i16, -1000, 2000].iter().flat_map(|s| s.to_le_bytes()).collect();
        let wav = wav_raw(&data, 1, 1, 22050, 16, u32::MAX, &[]);

        let pcm = decode_wav(&wav).unwrap();
        assert_eq!(pcm.samples.len(), 3);
        assert_eq!(pcm.sample_rate, 22050);
    }

    #[test]
    fn test_unknown_chunks_are_skipped() {
        // Odd-sized LIST chunk followed by its pad byte
        let mut list = Vec::new();
        list.extend_from_slice(b"LIST");
        list.extend_from_slice(&3u32.to_le_bytes());
        list.extend_from_slice(b"abc\0");
        let data: Vec<u8> = [16384i16, -16384].iter().flat_map(|s| s.to_le_bytes()).collect();
        let wav = wav_raw(&data, 1, 1, 16000, 16, data.len() as u32, &list);

        let pcm = decode_wav(&wav).unwrap();
        assert_close(&pcm.samples, &[0.5, -0.5]);
    }

    #[test]
    fn test_other_widths_are_read_as_16bit() {
        // 8-bit mono: four one-byte frames become two 16-bit samples
        let wav = wav_raw(&[0x00, 0x40, 0x00, 0xC0], 1, 1, 8000, 8, 4, &[]);
        let pcm = decode_wav(&wav).unwrap();
        assert_close(&pcm.samples, &[0.5, -0.5]);
    }

    #[test]
    fn test_rejects_non_wav_and_non_pcm() {
        assert_eq!(decode_wav(b"ID3\x04mp3 data here").unwrap_err(), TranscodeError::NotWav);
        assert_eq!(decode_wav(b"RIF").unwrap_err(), TranscodeError::NotWav);

        let float_wav = wav_raw(&[0; 8], 3, 1, 16000, 32, 8, &[]);
        assert_eq!(decode_wav(&float_wav).unwrap_err(), TranscodeError::UnsupportedEncoding(3));

        let no_channels = wav_raw(&[0; 4], 1, 0, 16000, 16, 4, &[]);
        assert_eq!(decode_wav(&no_channels).unwrap_err(), TranscodeError::InvalidChannels);
    }

    #[test]
    fn test_missing_chunks() {
        let mut header_only = Vec::new();
        header_only.extend_from_slice(b"RIFF");
        header_only.extend_from_slice(&4u32.to_le_bytes());
        header_only.extend_from_slice(b"WAVE");
        assert_eq!(decode_wav(&header_only).unwrap_err(), TranscodeError::MissingData);

        let mut data_first = header_only.clone();
        data_first.extend_from_slice(b"data");
        data_first.extend_from_slice(&2u32.to_le_bytes());
        data_first.extend_from_slice(&[0, 0]);
        assert_eq!(decode_wav(&data_first).unwrap_err(), TranscodeError::MissingFormat);
    }

    #[test]
    fn test_duration() {
        let pcm = decode_wav(&wav_i16(&vec![0; 3200], 1, 16000)).unwrap();
        assert_eq!(pcm.duration_ms(), 200);
    }
}
