//! Frame and format model.
//!
//! An [`AudioDataFormat`] is shared by reference for the whole lifetime of a track; every
//! [`AudioFrame`] produced for that track points at it.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Codec of an encoded frame payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodec {
    /// Interleaved signed 16-bit little-endian PCM.
    PcmS16Le,
    /// Interleaved signed 16-bit big-endian PCM.
    PcmS16Be,
    /// Opus packets (requires the `opus` feature).
    Opus,
}

impl AudioCodec {
    pub fn name(self) -> &'static str {
        match self {
            AudioCodec::PcmS16Le => "pcm_s16le",
            AudioCodec::PcmS16Be => "pcm_s16be",
            AudioCodec::Opus => "opus",
        }
    }
}

/// Encoding description of the frames a track produces.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioDataFormat {
    pub codec: AudioCodec,
    pub channels: u16,
    pub sample_rate: u32,
    /// Samples per channel in one chunk.
    pub chunk_sample_count: usize,
}

impl Default for AudioDataFormat {
    /// 48 kHz stereo PCM in 20ms chunks.
    fn default() -> Self {
        Self::new(AudioCodec::PcmS16Le, 2, 48_000, 960)
    }
}

impl AudioDataFormat {
    pub fn new(codec: AudioCodec, channels: u16, sample_rate: u32, chunk_sample_count: usize) -> Self {
        Self {
            codec,
            channels,
            sample_rate,
            chunk_sample_count,
        }
    }

    /// The standard Opus voice-transport format: 48 kHz stereo, 20ms packets.
    pub fn opus() -> Self {
        Self::new(AudioCodec::Opus, 2, 48_000, 960)
    }

    /// Interleaved samples (all channels) in one chunk.
    pub fn samples_per_chunk(&self) -> usize {
        self.chunk_sample_count * self.channels as usize
    }

    /// Upper bound of one encoded chunk in bytes.
    pub fn maximum_chunk_size(&self) -> usize {
        match self.codec {
            AudioCodec::PcmS16Le | AudioCodec::PcmS16Be => self.samples_per_chunk() * 2,
            AudioCodec::Opus => 32 + 1536 * self.chunk_sample_count / 960,
        }
    }

    /// Duration of one chunk.
    pub fn frame_duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::from_millis(20);
        }
        Duration::from_micros(self.chunk_sample_count as u64 * 1_000_000 / self.sample_rate as u64)
    }

    /// Duration of one chunk in whole milliseconds (never zero).
    pub fn frame_duration_ms(&self) -> u64 {
        (self.frame_duration().as_millis() as u64).max(1)
    }

    /// Number of chunks needed to hold `duration_ms` of audio (at least one).
    pub fn frames_for_duration(&self, duration_ms: u64) -> usize {
        let frame_us = self.frame_duration().as_micros().max(1) as u64;
        duration_ms.saturating_mul(1000).div_ceil(frame_us).max(1) as usize
    }

    /// Milliseconds represented by `samples` samples per channel.
    pub fn samples_to_ms(&self, samples: u64) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        samples.saturating_mul(1000) / self.sample_rate as u64
    }
}

/// Layout of raw interleaved `f32` PCM flowing from a frame provider into the filter chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }
}

impl From<&AudioDataFormat> for PcmFormat {
    fn from(format: &AudioDataFormat) -> Self {
        Self::new(format.sample_rate, format.channels)
    }
}

/// One encoded chunk of audio.
///
/// Frames are immutable: rebuilding produces a new frame via [`AudioFrame::with_payload`].
#[derive(Clone, Debug)]
pub struct AudioFrame {
    timecode: u64,
    data: Bytes,
    volume: u16,
    format: Arc<AudioDataFormat>,
    terminal: bool,
    discontinuity: bool,
}

impl AudioFrame {
    pub fn new(timecode: u64, data: Bytes, volume: u16, format: Arc<AudioDataFormat>) -> Self {
        Self {
            timecode,
            data,
            volume,
            format,
            terminal: false,
            discontinuity: false,
        }
    }

    /// End-of-track marker returned by the frame buffer once it is drained.
    pub fn terminator(format: Arc<AudioDataFormat>) -> Self {
        Self {
            timecode: 0,
            data: Bytes::new(),
            volume: 0,
            format,
            terminal: true,
            discontinuity: false,
        }
    }

    pub fn timecode(&self) -> u64 {
        self.timecode
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Volume level baked into the payload.
    pub fn volume(&self) -> u16 {
        self.volume
    }

    pub fn format(&self) -> &Arc<AudioDataFormat> {
        &self.format
    }

    pub fn is_terminator(&self) -> bool {
        self.terminal
    }

    /// `true` for the first frame after a seek.
    pub fn is_discontinuity(&self) -> bool {
        self.discontinuity
    }

    /// Same frame with a re-encoded payload at another volume.
    pub fn with_payload(&self, data: Bytes, volume: u16) -> Self {
        Self {
            data,
            volume,
            ..self.clone()
        }
    }

    pub(crate) fn into_discontinuity(mut self) -> Self {
        self.discontinuity = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_format_is_twenty_ms() {
        let format = AudioDataFormat::default();
        assert_eq!(format.frame_duration_ms(), 20);
        assert_eq!(format.samples_per_chunk(), 1920);
        assert_eq!(format.maximum_chunk_size(), 3840);
    }

    #[test]
    fn frames_for_duration_rounds_up() {
        let format = AudioDataFormat::default();
        assert_eq!(format.frames_for_duration(1000), 50);
        assert_eq!(format.frames_for_duration(1010), 51);
        assert_eq!(format.frames_for_duration(0), 1);
    }

    #[test]
    fn opus_chunk_size_bound() {
        assert_eq!(AudioDataFormat::opus().maximum_chunk_size(), 32 + 1536);
    }

    #[test]
    fn samples_to_ms_handles_zero_rate() {
        let mut format = AudioDataFormat::default();
        assert_eq!(format.samples_to_ms(96_000), 2000);
        format.sample_rate = 0;
        assert_eq!(format.samples_to_ms(96_000), 0);
    }

    #[test]
    fn with_payload_keeps_timecode_and_flags() {
        let format = Arc::new(AudioDataFormat::default());
        let frame = AudioFrame::new(40, Bytes::from_static(&[1, 2]), 100, format).into_discontinuity();
        let rebuilt = frame.with_payload(Bytes::from_static(&[3, 4]), 50);
        assert_eq!(rebuilt.timecode(), 40);
        assert_eq!(rebuilt.volume(), 50);
        assert!(rebuilt.is_discontinuity());
        assert_eq!(rebuilt.data().as_ref(), &[3, 4]);
    }
}
