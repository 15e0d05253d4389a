//! 15-band equalizer.
//!
//! Each band is a constant-gain bandpass biquad; the output is the dry signal plus every band's
//! bandpass output scaled by that band's gain. A gain of `0.0` leaves the band untouched,
//! `-0.25` attenuates it and `1.0` roughly doubles it.
//!
//! Gains live in an [`EqualizerGains`] shared between the factory and every filter it built, so
//! changing a gain applies to the running chain on its next block.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{AudioFilter, FilterFactory};
use crate::error::PlaybackError;
use crate::format::PcmFormat;

pub const BAND_COUNT: usize = 15;

/// Center frequency of every band, in Hz.
pub const BAND_FREQUENCIES: [f32; BAND_COUNT] = [
    25.0, 40.0, 63.0, 100.0, 160.0, 250.0, 400.0, 630.0, 1000.0, 1600.0, 2500.0, 4000.0, 6300.0,
    10000.0, 16000.0,
];

pub const MIN_GAIN: f32 = -0.25;
pub const MAX_GAIN: f32 = 1.0;

const BAND_Q: f32 = 1.4;

/// Band gains readable without locking.
#[derive(Debug, Default)]
pub struct EqualizerGains {
    bits: [AtomicU32; BAND_COUNT],
}

impl EqualizerGains {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one band's gain, clamped to `[MIN_GAIN, MAX_GAIN]`. Out-of-range bands are ignored.
    pub fn set_gain(&self, band: usize, gain: f32) {
        if let Some(slot) = self.bits.get(band) {
            let gain = if gain.is_finite() { gain.clamp(MIN_GAIN, MAX_GAIN) } else { 0.0 };
            slot.store(gain.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn gain(&self, band: usize) -> f32 {
        self.bits
            .get(band)
            .map(|b| f32::from_bits(b.load(Ordering::Relaxed)))
            .unwrap_or(0.0)
    }

    /// Apply a preset; band `i` gets `gains[i]`, missing entries are left as they are.
    pub fn set_gains(&self, gains: &[f32]) {
        for (band, &gain) in gains.iter().enumerate().take(BAND_COUNT) {
            self.set_gain(band, gain);
        }
    }

    pub fn snapshot(&self) -> [f32; BAND_COUNT] {
        std::array::from_fn(|band| self.gain(band))
    }

    pub fn is_flat(&self) -> bool {
        self.snapshot().iter().all(|g| *g == 0.0)
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Biquad {
    b0: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Biquad {
    /// RBJ bandpass with 0 dB peak gain.
    fn bandpass(center: f32, sample_rate: f32) -> Self {
        let w0 = 2.0 * std::f32::consts::PI * center / sample_rate;
        let alpha = w0.sin() / (2.0 * BAND_Q);
        let a0 = 1.0 + alpha;
        Self {
            b0: alpha / a0,
            b2: -alpha / a0,
            a1: -2.0 * w0.cos() / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct BandState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BandState {
    fn step(&mut self, q: &Biquad, x: f32) -> f32 {
        let y = q.b0 * x + q.b2 * self.x2 - q.a1 * self.y1 - q.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

pub struct Equalizer {
    gains: Arc<EqualizerGains>,
    channels: usize,
    /// Bands below the Nyquist guard, with their coefficients.
    bands: Vec<(usize, Biquad)>,
    /// `state[channel * bands.len() + i]`
    state: Vec<BandState>,
    /// All gains were flat on the last call, so `state` is stale.
    bypassed: bool,
}

impl Equalizer {
    pub fn new(format: &PcmFormat, gains: Arc<EqualizerGains>) -> Self {
        let rate = format.sample_rate.max(1) as f32;
        let bands: Vec<(usize, Biquad)> = BAND_FREQUENCIES
            .iter()
            .enumerate()
            .filter(|(_, f)| **f < rate * 0.5 * 0.95)
            .map(|(i, f)| (i, Biquad::bandpass(*f, rate)))
            .collect();
        let channels = (format.channels as usize).max(1);
        Self {
            gains,
            channels,
            state: vec![BandState::default(); channels * bands.len()],
            bands,
            bypassed: true,
        }
    }

    fn reset(&mut self) {
        self.state.fill(BandState::default());
    }
}

impl AudioFilter for Equalizer {
    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<(), PlaybackError> {
        let gains = self.gains.snapshot();
        if gains.iter().all(|g| *g == 0.0) {
            self.bypassed = true;
            output.extend_from_slice(input);
            return Ok(());
        }
        if self.bypassed {
            self.reset();
            self.bypassed = false;
        }

        let band_count = self.bands.len();
        output.reserve(input.len());
        for (i, &x) in input.iter().enumerate() {
            let ch = i % self.channels;
            let mut y = x;
            for (b, (band, coeffs)) in self.bands.iter().enumerate() {
                let wet = self.state[ch * band_count + b].step(coeffs, x);
                y += gains[*band] * wet;
            }
            output.push(y);
        }
        Ok(())
    }

    fn seek_performed(&mut self, _requested_ms: u64, _actual_ms: u64) {
        self.reset();
    }
}

/// Builds equalizers sharing one set of gains.
#[derive(Clone, Debug, Default)]
pub struct EqualizerFactory {
    gains: Arc<EqualizerGains>,
}

impl EqualizerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gains(&self) -> &Arc<EqualizerGains> {
        &self.gains
    }

    pub fn set_gain(&self, band: usize, gain: f32) {
        self.gains.set_gain(band, gain);
    }

    pub fn gain(&self, band: usize) -> f32 {
        self.gains.gain(band)
    }

    pub fn set_gains(&self, gains: &[f32]) {
        self.gains.set_gains(gains);
    }
}

impl FilterFactory for EqualizerFactory {
    fn build_chain(&self, format: &PcmFormat) -> Vec<Box<dyn AudioFilter>> {
        vec![Box::new(Equalizer::new(format, self.gains.clone()))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, rate: u32, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin() * 0.25)
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    fn run(eq: &mut Equalizer, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        eq.process(input, &mut out).unwrap();
        out
    }

    #[test]
    fn gains_are_clamped() {
        let gains = EqualizerGains::new();
        gains.set_gain(0, 5.0);
        gains.set_gain(1, -5.0);
        gains.set_gain(2, f32::NAN);
        gains.set_gain(BAND_COUNT, 1.0);
        assert_eq!(gains.gain(0), MAX_GAIN);
        assert_eq!(gains.gain(1), MIN_GAIN);
        assert_eq!(gains.gain(2), 0.0);
        assert_eq!(gains.gain(BAND_COUNT), 0.0);
    }

    #[test]
    fn flat_equalizer_is_transparent() {
        let format = PcmFormat::new(48_000, 1);
        let mut eq = Equalizer::new(&format, Arc::new(EqualizerGains::new()));
        let input = tone(1000.0, 48_000, 480);
        assert_eq!(run(&mut eq, &input), input);
    }

    #[test]
    fn leaving_bypass_starts_from_clean_history() {
        let format = PcmFormat::new(48_000, 1);
        let gains = Arc::new(EqualizerGains::new());
        let mut eq = Equalizer::new(&format, gains.clone());

        gains.set_gain(8, 1.0);
        run(&mut eq, &tone(1000.0, 48_000, 4800));
        gains.set_gain(8, 0.0);
        run(&mut eq, &tone(1000.0, 48_000, 480));
        gains.set_gain(8, 0.5);
        let input = tone(440.0, 48_000, 480);
        let resumed = run(&mut eq, &input);

        let mut fresh = Equalizer::new(&format, gains);
        assert_eq!(resumed, run(&mut fresh, &input));
    }

    #[test]
    fn boost_affects_its_band_only() {
        let format = PcmFormat::new(48_000, 1);
        let gains = Arc::new(EqualizerGains::new());
        gains.set_gain(8, 1.0); // 1 kHz
        let mut eq = Equalizer::new(&format, gains);

        let in_band = tone(1000.0, 48_000, 9600);
        let boosted = run(&mut eq, &in_band);
        let ratio = rms(&boosted[4800..]) / rms(&in_band[4800..]);
        assert!(ratio > 1.8, "in-band ratio {ratio}");

        eq.reset();
        let off_band = tone(63.0, 48_000, 9600);
        let passed = run(&mut eq, &off_band);
        let ratio = rms(&passed[4800..]) / rms(&off_band[4800..]);
        assert!(ratio < 1.1, "off-band ratio {ratio}");
    }

    #[test]
    fn cut_attenuates_band() {
        let format = PcmFormat::new(48_000, 2);
        let factory = EqualizerFactory::new();
        factory.set_gains(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, MIN_GAIN]);
        let mut chain = factory.build_chain(&format);

        let mono = tone(1000.0, 48_000, 9600);
        let stereo: Vec<f32> = mono.iter().flat_map(|s| [*s, *s]).collect();
        let mut out = Vec::new();
        chain[0].process(&stereo, &mut out).unwrap();
        let ratio = rms(&out[9600..]) / rms(&stereo[9600..]);
        assert!(ratio < 0.8 && ratio > 0.7, "cut ratio {ratio}");
    }

    #[test]
    fn factory_gain_updates_reach_built_filters() {
        let format = PcmFormat::new(48_000, 1);
        let factory = EqualizerFactory::new();
        let mut chain = factory.build_chain(&format);
        let input = tone(1000.0, 48_000, 4800);

        let mut flat = Vec::new();
        chain[0].process(&input, &mut flat).unwrap();
        assert_eq!(flat, input);

        factory.set_gain(8, 0.5);
        let mut shaped = Vec::new();
        chain[0].process(&input, &mut shaped).unwrap();
        assert_ne!(shaped, input);
    }

    #[test]
    fn bands_above_nyquist_are_skipped() {
        let eq = Equalizer::new(&PcmFormat::new(22_050, 1), Arc::new(EqualizerGains::new()));
        assert_eq!(eq.bands.len(), BAND_COUNT - 1);
    }
}
