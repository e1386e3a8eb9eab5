//! Binary wire codec.
//!
//! Binary messages are length-delimited by the transport and begin with
//! a one-byte discriminator:
//!
//! - [`AUDIO_CHUNK`]: `[u8 1][i64 timestamp_us BE][u32 sample_count BE]`
//!   followed by interleaved int16 LE samples. The header is 13 bytes
//!   and the payload length must equal `sample_count * channels * 2`.
//! - [`MEDIA_ART`]: `[u8 2][u8 format][image bytes]`.
//!
//! Other discriminators are reserved; receivers log and drop them. The
//! codec does no I/O and round-trips exactly for all valid frames.

use bytes::Bytes;

use crate::types::ArtFormat;
use crate::{Error, Result};

/// Discriminator of a timestamped audio chunk.
pub const AUDIO_CHUNK: u8 = 0x01;
/// Discriminator of a media art blob.
pub const MEDIA_ART: u8 = 0x02;

/// Fixed header size of an audio chunk frame.
pub const AUDIO_HEADER_LEN: usize = 13;

/// A decoded binary frame.
#[derive(Debug, Clone, PartialEq)]
pub enum BinaryFrame {
    /// A run of interleaved int16 samples scheduled to start playing at
    /// `timestamp_us` on the server clock.
    AudioChunk {
        timestamp_us: i64,
        /// Interleaved samples, `sample_count * channels` entries.
        samples: Vec<i16>,
    },
    /// A media art image.
    MediaArt { format: ArtFormat, data: Bytes },
}

/// Encode an audio chunk frame.
///
/// `samples` are interleaved across channels; their count must divide
/// evenly by `channels`.
pub fn encode_audio_chunk(timestamp_us: i64, samples: &[i16], channels: u8) -> Result<Bytes> {
    let channels = channels as usize;
    if channels == 0 || samples.len() % channels != 0 {
        return Err(Error::ChannelMismatch {
            samples: samples.len(),
            channels,
        });
    }
    let sample_count = (samples.len() / channels) as u32;

    let mut buf = Vec::with_capacity(AUDIO_HEADER_LEN + samples.len() * 2);
    buf.push(AUDIO_CHUNK);
    buf.extend_from_slice(&timestamp_us.to_be_bytes());
    buf.extend_from_slice(&sample_count.to_be_bytes());
    for sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }
    Ok(Bytes::from(buf))
}

/// Encode a media art frame.
pub fn encode_media_art(format: ArtFormat, data: &[u8]) -> Bytes {
    let mut buf = Vec::with_capacity(2 + data.len());
    buf.push(MEDIA_ART);
    buf.push(format.tag());
    buf.extend_from_slice(data);
    Bytes::from(buf)
}

/// Decode a binary frame.
///
/// `channels` is the active session's channel count, used to validate
/// audio payload sizes; it is ignored for non-audio frames.
pub fn decode(data: Bytes, channels: u8) -> Result<BinaryFrame> {
    let Some(&frame_type) = data.first() else {
        return Err(Error::TruncatedHeader { got: 0, need: 1 });
    };

    match frame_type {
        AUDIO_CHUNK => decode_audio_chunk(&data, channels),
        MEDIA_ART => decode_media_art(data),
        other => Err(Error::UnknownType(other)),
    }
}

fn decode_audio_chunk(data: &Bytes, channels: u8) -> Result<BinaryFrame> {
    if data.len() < AUDIO_HEADER_LEN {
        return Err(Error::TruncatedHeader {
            got: data.len(),
            need: AUDIO_HEADER_LEN,
        });
    }

    let mut ts = [0u8; 8];
    ts.copy_from_slice(&data[1..9]);
    let timestamp_us = i64::from_be_bytes(ts);

    let mut count = [0u8; 4];
    count.copy_from_slice(&data[9..13]);
    let sample_count = u32::from_be_bytes(count) as usize;

    let payload = &data[AUDIO_HEADER_LEN..];
    let expected = sample_count * channels as usize * 2;
    if payload.len() != expected {
        return Err(Error::DataSizeMismatch {
            expected,
            got: payload.len(),
        });
    }

    let samples = payload
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(BinaryFrame::AudioChunk {
        timestamp_us,
        samples,
    })
}

fn decode_media_art(data: Bytes) -> Result<BinaryFrame> {
    if data.len() < 2 {
        return Err(Error::TruncatedHeader {
            got: data.len(),
            need: 2,
        });
    }
    let format = ArtFormat::from_tag(data[1]).ok_or(Error::UnknownFormat(data[1]))?;
    Ok(BinaryFrame::MediaArt {
        format,
        data: data.slice(2..),
    })
}
