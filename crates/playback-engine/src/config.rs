//! Player configuration.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::format::AudioDataFormat;

/// CPU/quality tradeoff of the sinc resampler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingQuality {
    #[default]
    Low,
    Medium,
    High,
}

impl std::str::FromStr for ResamplingQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown resampling quality '{other}'")),
        }
    }
}

/// Settings fixed for the lifetime of a [`Player`](crate::Player).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Encoding of every frame the player delivers.
    pub output_format: AudioDataFormat,
    /// Frame buffer size, as milliseconds of audio.
    pub frame_buffer_duration_ms: u64,
    /// Report a stuck track after this long without a produced frame.
    pub stuck_threshold_ms: u64,
    pub resampling_quality: ResamplingQuality,
    /// Rebuild the user filters mid-track when the filter factory changes.
    ///
    /// Off by default: stateful filters lose their history on a swap.
    pub filter_hot_swap: bool,
    /// Re-encode already buffered frames when the volume changes.
    pub volume_rebuild: bool,
    /// Number of freshly produced frames over which a volume change ramps.
    pub volume_ramp_frames: usize,
    /// How long `destroy` waits for the worker to release its resources.
    pub worker_join_timeout_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            output_format: AudioDataFormat::default(),
            frame_buffer_duration_ms: 1000,
            stuck_threshold_ms: 10_000,
            resampling_quality: ResamplingQuality::Low,
            filter_hot_swap: false,
            volume_rebuild: true,
            volume_ramp_frames: 50,
            worker_join_timeout_ms: 2000,
        }
    }
}

impl PlayerConfig {
    /// Load a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config {:?}", path))?;
        Self::from_toml_str(&raw).with_context(|| format!("parse config {:?}", path))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: PlayerConfig = toml::from_str(raw).context("invalid player config")?;
        config.validate()?;
        Ok(config)
    }

    /// Copy with unusable output format fields replaced by their defaults.
    pub fn normalized(mut self) -> Self {
        let defaults = AudioDataFormat::default();
        let format = &mut self.output_format;
        if format.channels == 0 || format.sample_rate == 0 || format.chunk_sample_count == 0 {
            tracing::warn!(
                channels = format.channels,
                sample_rate = format.sample_rate,
                chunk_sample_count = format.chunk_sample_count,
                "zero output format field replaced by default"
            );
        }
        if format.channels == 0 {
            format.channels = defaults.channels;
        }
        if format.sample_rate == 0 {
            format.sample_rate = defaults.sample_rate;
        }
        if format.chunk_sample_count == 0 {
            format.chunk_sample_count = defaults.chunk_sample_count;
        }
        self
    }

    fn validate(&self) -> Result<()> {
        let format = &self.output_format;
        if format.channels == 0 || format.sample_rate == 0 || format.chunk_sample_count == 0 {
            anyhow::bail!(
                "output_format needs non-zero channels, sample_rate and chunk_sample_count"
            );
        }
        Ok(())
    }
}
