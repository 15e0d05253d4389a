//! Sample-rate conversion stage.
//!
//! Wraps Rubato's asynchronous sinc resampler with a fixed input chunk. Input is accumulated
//! until a whole chunk is available; `flush` pushes the remainder as a partial chunk.
//!
//! Output is aligned with the input: the sinc delay is dropped from the start, and `flush`
//! pumps silence through the delay line until exactly `input_frames * ratio` frames came out.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use super::AudioFilter;
use crate::config::ResamplingQuality;
use crate::error::PlaybackError;

/// Input chunk in frames per channel.
const CHUNK_FRAMES: usize = 1024;

pub struct ResampleFilter {
    resampler: Async<f32>,
    channels: usize,
    pending: Vec<f32>,
    scratch: Vec<f32>,
    indexing: Indexing,
    /// Source frames accepted since creation or the last reset.
    frames_in: u64,
    /// Frames handed downstream since creation or the last reset.
    frames_out: u64,
    /// Leading output frames still to drop.
    delay_left: usize,
}

fn sinc_parameters(quality: ResamplingQuality) -> SincInterpolationParameters {
    let (sinc_len, oversampling_factor, interpolation) = match quality {
        ResamplingQuality::Low => (32, 64, SincInterpolationType::Linear),
        ResamplingQuality::Medium => (64, 128, SincInterpolationType::Quadratic),
        ResamplingQuality::High => (128, 256, SincInterpolationType::Cubic),
    };
    let window = WindowFunction::BlackmanHarris2;
    SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation,
        oversampling_factor,
        window,
    }
}

impl ResampleFilter {
    pub fn new(
        src_rate: u32,
        dst_rate: u32,
        channels: u16,
        quality: ResamplingQuality,
    ) -> Result<Self, PlaybackError> {
        let channels = (channels as usize).max(1);
        let f_ratio = dst_rate as f64 / src_rate.max(1) as f64;
        let params = sinc_parameters(quality);

        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            CHUNK_FRAMES,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| PlaybackError::Filter(format!("resampler init: {e}")))?;

        let out_frames = resampler.output_frames_max();
        let delay = resampler.output_delay();

        tracing::debug!(src_rate, dst_rate, channels, ?quality, delay, "resampler created");

        Ok(Self {
            resampler,
            channels,
            pending: Vec::with_capacity(CHUNK_FRAMES * channels * 2),
            scratch: vec![0.0; out_frames * channels],
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
            frames_in: 0,
            frames_out: 0,
            delay_left: delay,
        })
    }

    fn reset_stream(&mut self) {
        self.pending.clear();
        self.resampler.reset();
        self.frames_in = 0;
        self.frames_out = 0;
        self.delay_left = self.resampler.output_delay();
    }

    /// Run one chunk; `partial` is the number of valid frames when fewer than a chunk.
    ///
    /// Returns the number of frames the resampler produced, before delay trimming.
    fn run_chunk(
        &mut self,
        input: &[f32],
        partial: Option<usize>,
        output: &mut Vec<f32>,
    ) -> Result<usize, PlaybackError> {
        let input_adapter = InterleavedSlice::new(input, self.channels, CHUNK_FRAMES)
            .map_err(|e| PlaybackError::Filter(format!("interleaved slice (input): {e}")))?;

        let out_capacity_frames = self.scratch.len() / self.channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.scratch, self.channels, out_capacity_frames)
                .map_err(|e| PlaybackError::Filter(format!("interleaved slice (output): {e}")))?;

        self.indexing.input_offset = 0;
        self.indexing.output_offset = 0;
        self.indexing.partial_len = partial;

        let (_nbr_in, nbr_out) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&self.indexing))
            .map_err(|e| PlaybackError::Filter(format!("resampler process: {e}")))?;

        let skip = self.delay_left.min(nbr_out);
        self.delay_left -= skip;
        output.extend_from_slice(&self.scratch[skip * self.channels..nbr_out * self.channels]);
        self.frames_out += (nbr_out - skip) as u64;
        Ok(nbr_out)
    }
}

impl AudioFilter for ResampleFilter {
    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<(), PlaybackError> {
        self.pending.extend_from_slice(input);
        self.frames_in += (input.len() / self.channels) as u64;
        let chunk_samples = CHUNK_FRAMES * self.channels;
        let mut consumed = 0;
        while self.pending.len() - consumed >= chunk_samples {
            let chunk = self.pending[consumed..consumed + chunk_samples].to_vec();
            self.run_chunk(&chunk, None, output)?;
            consumed += chunk_samples;
        }
        self.pending.drain(..consumed);
        Ok(())
    }

    fn flush(&mut self, output: &mut Vec<f32>) -> Result<(), PlaybackError> {
        if self.frames_in == 0 {
            self.reset_stream();
            return Ok(());
        }
        let expected =
            (self.frames_in as f64 * self.resampler.resample_ratio()).round() as u64;
        let start = output.len();

        // The resampler still reads a full chunk; only `partial` frames of it are valid.
        let mut partial = self.pending.len() / self.channels;
        let mut tail = std::mem::take(&mut self.pending);
        tail.truncate(partial * self.channels);
        tail.resize(CHUNK_FRAMES * self.channels, 0.0);
        while self.frames_out < expected {
            let produced = self.run_chunk(&tail, Some(partial), output)?;
            if produced == 0 {
                break;
            }
            if partial > 0 {
                partial = 0;
                tail.fill(0.0);
            }
        }

        let excess = self.frames_out.saturating_sub(expected) as usize;
        let removable = (output.len() - start) / self.channels;
        output.truncate(output.len() - excess.min(removable) * self.channels);

        self.reset_stream();
        Ok(())
    }

    fn seek_performed(&mut self, _requested_ms: u64, _actual_ms: u64) {
        self.reset_stream();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(rate: u32, channels: usize, frames: usize) -> Vec<f32> {
        let mut out = Vec::with_capacity(frames * channels);
        for i in 0..frames {
            let v = (2.0 * std::f32::consts::PI * 440.0 * i as f32 / rate as f32).sin() * 0.5;
            for _ in 0..channels {
                out.push(v);
            }
        }
        out
    }

    fn resample_all(src_rate: u32, channels: usize, input: &[f32]) -> Vec<f32> {
        let mut filter =
            ResampleFilter::new(src_rate, 48_000, channels as u16, ResamplingQuality::Low).unwrap();
        let mut out = Vec::new();
        // Uneven pushes, as a decoder delivers them.
        for block in input.chunks(441 * channels) {
            filter.process(block, &mut out).unwrap();
        }
        filter.flush(&mut out).unwrap();
        out
    }

    #[test]
    fn one_second_in_is_one_second_out() {
        let out = resample_all(44_100, 2, &sine(44_100, 2, 44_100));
        assert_eq!(out.len() / 2, 48_000);
        assert!(out.iter().all(|s| s.is_finite() && s.abs() <= 1.0));

        assert_eq!(resample_all(8_000, 1, &sine(8_000, 1, 8_000)).len(), 48_000);
        assert_eq!(resample_all(22_050, 1, &sine(22_050, 1, 22_050)).len(), 48_000);
    }

    #[test]
    fn output_is_not_delayed() {
        // A click at 100 ms must come out at 100 ms.
        let mut input = vec![0.0f32; 24_000];
        input[2_400] = 1.0;
        let out = resample_all(24_000, 1, &input);

        let peak = out
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .unwrap();
        assert!(peak.abs_diff(4_800) <= 2, "peak at {peak}");
    }

    #[test]
    fn seek_restarts_alignment() {
        let mut filter = ResampleFilter::new(24_000, 48_000, 1, ResamplingQuality::Low).unwrap();
        let mut out = Vec::new();
        filter.process(&vec![0.3; 5_000], &mut out).unwrap();

        filter.seek_performed(0, 1000);
        out.clear();
        filter.process(&vec![0.3; 2_400], &mut out).unwrap();
        filter.flush(&mut out).unwrap();
        assert_eq!(out.len(), 4_800);
    }

    #[test]
    fn holds_input_below_one_chunk() {
        let mut filter = ResampleFilter::new(32_000, 48_000, 1, ResamplingQuality::Medium).unwrap();
        let mut out = Vec::new();
        filter.process(&vec![0.0; CHUNK_FRAMES - 1], &mut out).unwrap();
        assert!(out.is_empty());
        filter.seek_performed(0, 0);
        filter.flush(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
