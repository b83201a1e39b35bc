//! PCM audio format description
//!
//! The flow stream assembler works on raw interleaved signed little-endian
//! PCM; this module carries the format triple (rate / depth / channels) and
//! the byte arithmetic derived from it.

use serde::{Deserialize, Serialize};

/// Raw PCM stream format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Bits per sample (16 or 24 supported end to end, 32 accepted)
    pub bit_depth: u8,
    /// Channel count (2 for all current renderers)
    pub channels: u8,
}

impl PcmFormat {
    pub const fn new(sample_rate: u32, bit_depth: u8, channels: u8) -> Self {
        Self {
            sample_rate,
            bit_depth,
            channels,
        }
    }

    /// Bytes for one interleaved frame (one sample per channel)
    pub fn frame_size(&self) -> usize {
        (self.bit_depth as usize / 8) * self.channels as usize
    }

    /// Bytes for one second of audio
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.frame_size()
    }

    /// Seconds of audio represented by `bytes` of PCM data
    pub fn bytes_to_seconds(&self, bytes: usize) -> f64 {
        bytes as f64 / self.bytes_per_second() as f64
    }

    /// Content-type string used on the stream endpoints, e.g. `s16le;rate=44100;channels=2`
    pub fn content_type(&self) -> String {
        format!(
            "audio/pcm;codec=s{}le;rate={};channels={}",
            self.bit_depth, self.sample_rate, self.channels
        )
    }
}

impl Default for PcmFormat {
    /// CD-quality default used when a renderer does not negotiate a format
    fn default() -> Self {
        Self::new(44100, 16, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_arithmetic() {
        let fmt = PcmFormat::default();
        assert_eq!(fmt.frame_size(), 4);
        assert_eq!(fmt.bytes_per_second(), 176_400);
        assert!((fmt.bytes_to_seconds(176_400) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_content_type_string() {
        let fmt = PcmFormat::new(48000, 24, 2);
        assert_eq!(fmt.content_type(), "audio/pcm;codec=s24le;rate=48000;channels=2");
    }
}
