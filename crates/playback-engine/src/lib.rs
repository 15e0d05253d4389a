//! Real-time audio playback engine.
//!
//! A [`Player`] drives one track at a time. Each track runs on its own worker thread
//! ([`TrackExecutor`]) which pulls PCM from a [`FrameProvider`], runs it through a
//! [`FilterChain`], encodes it and stores it in a bounded [`FrameBuffer`]. The player side pulls
//! frames out of the buffer at real-time pace, directly via [`Player::provide`] or through an
//! [`OutputLoop`].
//!
//! ```text
//! provider ─▶ filter chain ─▶ volume/encode ─▶ FrameBuffer ─▶ Player::provide ─▶ consumer
//!            (worker thread)                  (bounded)       (output loop)
//! ```

pub mod buffer;
pub mod cancel;
pub mod codec;
pub mod config;
pub mod decode;
pub mod error;
pub mod event;
pub mod executor;
pub mod filter;
pub mod format;
pub mod options;
pub mod output;
pub mod player;
pub mod provider;
mod status;
pub mod track;

pub use buffer::{FrameBuffer, FrameRebuilder};
pub use cancel::CancelToken;
pub use config::{PlayerConfig, ResamplingQuality};
pub use decode::SymphoniaProvider;
pub use error::{CodecError, FormatError, Interruption, PlaybackError, TrackException};
pub use event::PlayerEvent;
pub use executor::{ExecutorOutcome, ExecutorSettings, SeekReport, TrackExecutor};
pub use filter::{AudioFilter, EqualizerFactory, FilterChain, FilterFactory};
pub use format::{AudioCodec, AudioDataFormat, AudioFrame, PcmFormat};
pub use options::PlayerOptions;
pub use output::{FrameConsumer, OutputLoop};
pub use player::Player;
pub use playback_types::{AudioTrackInfo, PlayerStatus, Severity, TrackEndReason, TrackState};
pub use provider::{FrameProvider, PcmSink, ProviderFactory, SourceStart};
pub use track::AudioTrack;
