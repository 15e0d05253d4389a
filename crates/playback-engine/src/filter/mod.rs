//! Filter chain: PCM transforms applied between a frame provider and the encoder.
//!
//! Samples are interleaved `f32`. The chain is built once per track from the provider's
//! [`PcmFormat`] and the player's output format:
//!
//! ```text
//! provider ─▶ channel mapping ─▶ resampler ─▶ user filters ─▶ (volume + encode)
//! ```
//!
//! Volume is not a chain stage: it is applied on the 16-bit samples right before encoding so
//! that the multiplier stamped on each frame can later be undone (see [`volume`]).

mod channels;
pub mod equalizer;
mod resample;
pub mod volume;

use std::sync::Arc;

use crate::config::ResamplingQuality;
use crate::error::PlaybackError;
use crate::format::PcmFormat;

pub use channels::ChannelMapper;
pub use equalizer::{Equalizer, EqualizerFactory, EqualizerGains};
pub use resample::ResampleFilter;

/// One PCM transform stage.
///
/// Filters keep internal state (resampler phase, equalizer history); an instance belongs to one
/// track and one worker thread.
pub trait AudioFilter: Send {
    /// Transform `input`, appending the produced samples to `output`.
    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<(), PlaybackError>;

    /// End of stream: append anything still held internally.
    fn flush(&mut self, _output: &mut Vec<f32>) -> Result<(), PlaybackError> {
        Ok(())
    }

    /// The source jumped; drop internal history.
    fn seek_performed(&mut self, _requested_ms: u64, _actual_ms: u64) {}

    fn close(&mut self) {}
}

/// Builds the user-defined part of a chain for a track.
///
/// The factory sees the output PCM layout, i.e. after channel mapping and resampling.
pub trait FilterFactory: Send + Sync {
    fn build_chain(&self, format: &PcmFormat) -> Vec<Box<dyn AudioFilter>>;
}

/// Ordered filter stages owned by one track worker.
pub struct FilterChain {
    stages: Vec<Box<dyn AudioFilter>>,
    /// Index of the first user-provided stage.
    user_start: usize,
    output: PcmFormat,
    current: Vec<f32>,
    next: Vec<f32>,
}

impl FilterChain {
    /// Assemble the fixed stages needed to go from `input` to `output`, followed by the user
    /// filters from `factory`.
    pub fn build(
        input: PcmFormat,
        output: PcmFormat,
        quality: ResamplingQuality,
        factory: Option<&Arc<dyn FilterFactory>>,
    ) -> Result<Self, PlaybackError> {
        let mut stages: Vec<Box<dyn AudioFilter>> = Vec::new();
        if input.channels != output.channels {
            stages.push(Box::new(ChannelMapper::new(input.channels, output.channels)));
        }
        if input.sample_rate != output.sample_rate {
            stages.push(Box::new(ResampleFilter::new(
                input.sample_rate,
                output.sample_rate,
                output.channels,
                quality,
            )?));
        }
        let user_start = stages.len();
        if let Some(factory) = factory {
            stages.extend(factory.build_chain(&output));
        }

        tracing::debug!(
            in_rate = input.sample_rate,
            in_channels = input.channels,
            out_rate = output.sample_rate,
            out_channels = output.channels,
            stages = stages.len(),
            user_filters = stages.len() - user_start,
            "filter chain built"
        );

        Ok(Self {
            stages,
            user_start,
            output,
            current: Vec::new(),
            next: Vec::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn output_format(&self) -> PcmFormat {
        self.output
    }

    /// Run `input` through every stage, appending the result to `output`.
    pub fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<(), PlaybackError> {
        if self.stages.is_empty() {
            output.extend_from_slice(input);
            return Ok(());
        }
        self.current.clear();
        self.current.extend_from_slice(input);
        for stage in self.stages.iter_mut() {
            self.next.clear();
            stage.process(&self.current, &mut self.next)?;
            std::mem::swap(&mut self.current, &mut self.next);
        }
        output.extend_from_slice(&self.current);
        Ok(())
    }

    /// Drain every stage in order, pushing each stage's tail through the stages after it.
    pub fn flush(&mut self, output: &mut Vec<f32>) -> Result<(), PlaybackError> {
        for i in 0..self.stages.len() {
            let mut tail = Vec::new();
            self.stages[i].flush(&mut tail)?;
            for stage in self.stages[i + 1..].iter_mut() {
                if tail.is_empty() {
                    break;
                }
                let mut next = Vec::new();
                stage.process(&tail, &mut next)?;
                tail = next;
            }
            output.extend_from_slice(&tail);
        }
        Ok(())
    }

    pub fn seek_performed(&mut self, requested_ms: u64, actual_ms: u64) {
        for stage in self.stages.iter_mut() {
            stage.seek_performed(requested_ms, actual_ms);
        }
    }

    /// Replace the user stages with a fresh set from `factory`; the fixed stages keep their state.
    pub fn swap_user_filters(&mut self, factory: Option<&Arc<dyn FilterFactory>>) {
        for mut stage in self.stages.drain(self.user_start..) {
            stage.close();
        }
        if let Some(factory) = factory {
            self.stages.extend(factory.build_chain(&self.output));
        }
        tracing::debug!(user_filters = self.stages.len() - self.user_start, "user filters swapped");
    }

    pub fn close(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.close();
        }
        self.stages.clear();
    }
}

impl Drop for FilterChain {
    fn drop(&mut self) {
        self.close();
    }
}
