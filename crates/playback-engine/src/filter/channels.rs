//! Channel layout conversion.

use super::AudioFilter;
use crate::error::PlaybackError;

/// Maps interleaved frames between channel counts.
///
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average both channels
/// - other layouts: best-effort "clamp to available channels"
pub struct ChannelMapper {
    src_channels: usize,
    dst_channels: usize,
}

impl ChannelMapper {
    pub fn new(src_channels: u16, dst_channels: u16) -> Self {
        Self {
            src_channels: (src_channels as usize).max(1),
            dst_channels: (dst_channels as usize).max(1),
        }
    }

    fn map(&self, frame: &[f32], dst_ch: usize) -> f32 {
        match (self.src_channels, self.dst_channels) {
            (2, 1) => 0.5 * (frame[0] + frame[1]),
            (1, _) => frame[0],
            _ => frame[dst_ch.min(self.src_channels - 1)],
        }
    }
}

impl AudioFilter for ChannelMapper {
    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<(), PlaybackError> {
        let frames = input.len() / self.src_channels;
        output.reserve(frames * self.dst_channels);
        for frame in input.chunks_exact(self.src_channels) {
            for ch in 0..self.dst_channels {
                output.push(self.map(frame, ch));
            }
        }
        Ok(())
    }
}
