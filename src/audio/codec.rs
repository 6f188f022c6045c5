use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;
/// Samples per capture callback. One frame = 256ms at 16kHz.
pub const CAPTURE_FRAME_SAMPLES: usize = 4096;

/// A transport-safe audio chunk: 16-bit little-endian PCM, base64 encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedBlob {
    pub data: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
}

/// Decoded multi-channel sample buffer ready for scheduling.
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn frame_count(&self) -> usize {
        self.channels.first().map_or(0, |c| c.len())
    }

    /// Duration in seconds on the output clock.
    pub fn duration(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

/// Quantize a frame of normalized f32 samples to 16-bit PCM and base64 it.
///
/// Samples outside [-1.0, 1.0] wrap through the i16 range rather than clamp,
/// matching the transport contract. An empty frame encodes to an empty payload.
pub fn encode_frame(samples: &[f32]) -> EncodedBlob {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // Cast through i32 so out-of-range input wraps instead of saturating.
        let quantized = (sample * 32768.0) as i32 as i16;
        bytes.extend_from_slice(&quantized.to_le_bytes());
    }
    EncodedBlob {
        data: STANDARD.encode(&bytes),
        mime_type: format!("audio/pcm;rate={}", CAPTURE_SAMPLE_RATE),
    }
}

/// Decode a base64 PCM payload into a playable buffer.
///
/// Trailing bytes that do not form a whole 16-bit sample, and trailing samples
/// that do not form a whole frame across `channel_count`, are dropped rather
/// than rejected. Only invalid base64 is an error.
pub fn decode_frames(
    data: &str,
    sample_rate: u32,
    channel_count: usize,
) -> Result<PlaybackBuffer, PipelineError> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| PipelineError::Decode(format!("invalid base64: {}", e)))?;

    let total_samples = bytes.len() / 2;
    let frame_count = if channel_count == 0 {
        0
    } else {
        total_samples / channel_count
    };

    let mut channels = vec![Vec::with_capacity(frame_count); channel_count.max(1)];
    for frame in 0..frame_count {
        for (ch, channel) in channels.iter_mut().enumerate() {
            let idx = (frame * channel_count + ch) * 2;
            let sample = i16::from_le_bytes([bytes[idx], bytes[idx + 1]]);
            channel.push(sample as f32 / 32768.0);
        }
    }

    Ok(PlaybackBuffer {
        channels,
        sample_rate,
    })
}
