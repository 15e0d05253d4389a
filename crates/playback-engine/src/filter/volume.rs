//! Volume curve, ramping and in-buffer rebuilds.
//!
//! Volume is an integer level in `0..=1000` where 100 is unity. It is applied to 16-bit samples
//! through a fixed-point multiplier (`10000` = unity):
//!
//! - `level <= 150`: `tan(level * 0.0079) * 10000`, giving a perceptually smooth low end
//! - `level > 150`: linear continuation, `24621 * level / 150`
//!
//! Every frame is stamped with the level it was encoded at, which lets a [`VolumeRebuilder`]
//! undo it and re-apply another level to already buffered frames. A [`RampedRebuild`] walks the
//! buffered frames along the same ramp fresh frames continue on, so a change fades in from the
//! next frame played instead of stepping.

use crate::buffer::FrameRebuilder;
use crate::codec::{self, AudioDecoder, AudioEncoder};
use crate::error::PlaybackError;
use crate::format::{AudioDataFormat, AudioFrame};

pub const UNITY_VOLUME: u16 = 100;
pub const MAX_VOLUME: u16 = 1000;

const UNITY_MULTIPLIER: i32 = 10_000;

/// Fixed-point multiplier for `volume`.
pub fn integer_multiplier(volume: u16) -> i32 {
    let volume = volume.min(MAX_VOLUME);
    if volume == UNITY_VOLUME {
        UNITY_MULTIPLIER
    } else if volume <= 150 {
        ((volume as f64 * 0.0079).tan() * 10_000.0) as i32
    } else {
        24_621 * volume as i32 / 150
    }
}

/// Scale samples by `multiplier`, clamping to the 16-bit range.
pub fn apply_volume(samples: &mut [i16], multiplier: i32) {
    if multiplier == UNITY_MULTIPLIER {
        return;
    }
    for s in samples.iter_mut() {
        let v = (*s as i64 * multiplier as i64) / UNITY_MULTIPLIER as i64;
        *s = v.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
    }
}

/// Undo [`apply_volume`] as far as the fixed-point math allows.
///
/// Samples stamped with a zero multiplier carry no information and stay silent.
pub fn unapply_volume(samples: &mut [i16], multiplier: i32) {
    if multiplier == UNITY_MULTIPLIER {
        return;
    }
    if multiplier == 0 {
        samples.fill(0);
        return;
    }
    for s in samples.iter_mut() {
        let v = (*s as i64 * UNITY_MULTIPLIER as i64) / multiplier as i64;
        *s = v.clamp(i16::MIN as i64, i16::MAX as i64) as i16;
    }
}

/// Linear ramp of the per-frame volume towards a target.
#[derive(Clone, Debug)]
pub struct VolumeRamp {
    current: u16,
    start: u16,
    target: u16,
    step: usize,
    frames: usize,
}

impl VolumeRamp {
    pub fn new(volume: u16, frames: usize) -> Self {
        Self {
            current: volume,
            start: volume,
            target: volume,
            step: 0,
            frames,
        }
    }

    pub fn target(&self) -> u16 {
        self.target
    }

    pub fn current(&self) -> u16 {
        self.current
    }

    pub fn is_ramping(&self) -> bool {
        self.current != self.target
    }

    /// Start ramping from the current level to `target`.
    pub fn set_target(&mut self, target: u16) {
        if target == self.target {
            return;
        }
        self.start = self.current;
        self.target = target;
        self.step = 0;
    }

    /// Start a new ramp from `from` to `target`, regardless of the current state.
    pub fn restart(&mut self, from: u16, target: u16) {
        self.current = from;
        self.start = from;
        self.target = target;
        self.step = 0;
    }

    /// Volume for the next produced frame.
    pub fn next_frame_volume(&mut self) -> u16 {
        if self.current != self.target {
            self.step += 1;
            if self.step >= self.frames {
                self.current = self.target;
            } else {
                let start = self.start as i64;
                let delta = self.target as i64 - start;
                self.current = (start + delta * self.step as i64 / self.frames as i64) as u16;
            }
        }
        self.current
    }
}

/// Re-encodes buffered frames at a new volume.
///
/// Owns its own codec instances; the worker's encoder is stateful and must not be shared.
pub struct VolumeRebuilder {
    decoder: Box<dyn AudioDecoder>,
    encoder: Box<dyn AudioEncoder>,
    target: u16,
    failures: usize,
}

impl VolumeRebuilder {
    pub fn new(format: &AudioDataFormat, target: u16) -> Result<Self, PlaybackError> {
        Ok(Self {
            decoder: codec::create_decoder(format)?,
            encoder: codec::create_encoder(format)?,
            target,
            failures: 0,
        })
    }

    /// Frames kept unchanged because they could not be re-encoded.
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Re-encode `frame` at `volume`; an undecodable frame is returned unchanged.
    pub fn rebuild_at(&mut self, frame: AudioFrame, volume: u16) -> AudioFrame {
        if frame.volume() == volume || frame.is_terminator() {
            return frame;
        }
        match self.try_rebuild(&frame, volume) {
            Ok(rebuilt) => rebuilt,
            Err(e) => {
                self.failures += 1;
                tracing::warn!(
                    timecode_ms = frame.timecode(),
                    error = %e,
                    "volume rebuild failed; keeping frame"
                );
                frame
            }
        }
    }

    fn try_rebuild(&mut self, frame: &AudioFrame, volume: u16) -> Result<AudioFrame, PlaybackError> {
        let mut pcm = self.decoder.decode(frame.data())?;
        unapply_volume(&mut pcm, integer_multiplier(frame.volume()));
        apply_volume(&mut pcm, integer_multiplier(volume));
        let data = self.encoder.encode(&pcm)?;
        Ok(frame.with_payload(data, volume))
    }
}

impl FrameRebuilder for VolumeRebuilder {
    fn rebuild(&mut self, frame: AudioFrame) -> AudioFrame {
        let target = self.target;
        self.rebuild_at(frame, target)
    }
}

/// Rebuilds frames in playback order along a ramp towards `target`.
///
/// The ramp restarts from the level of the first frame it sees, so the fade begins at the
/// next frame to be played and fresh frames pick up where the buffered ones left off.
pub struct RampedRebuild<'a> {
    rebuilder: &'a mut VolumeRebuilder,
    ramp: &'a mut VolumeRamp,
    target: u16,
    started: bool,
}

impl<'a> RampedRebuild<'a> {
    pub fn new(rebuilder: &'a mut VolumeRebuilder, ramp: &'a mut VolumeRamp, target: u16) -> Self {
        Self {
            rebuilder,
            ramp,
            target,
            started: false,
        }
    }

    /// Hand the ramp back; with nothing rebuilt it simply retargets.
    pub fn finish(self) {
        if !self.started {
            self.ramp.set_target(self.target);
        }
    }
}

impl FrameRebuilder for RampedRebuild<'_> {
    fn rebuild(&mut self, frame: AudioFrame) -> AudioFrame {
        if frame.is_terminator() {
            return frame;
        }
        if !self.started {
            self.ramp.restart(frame.volume(), self.target);
            self.started = true;
        }
        let volume = self.ramp.next_frame_volume();
        self.rebuilder.rebuild_at(frame, volume)
    }
}

impl Drop for VolumeRebuilder {
    fn drop(&mut self) {
        self.decoder.close();
        self.encoder.close();
    }
}
