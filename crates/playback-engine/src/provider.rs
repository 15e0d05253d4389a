//! Frame provider capability: the boundary to format-specific readers.
//!
//! A provider decodes one source into interleaved `f32` PCM and pushes it into a [`PcmSink`]
//! owned by the track executor. The sink performs filtering, encoding and buffering; it also
//! reports cooperative interruptions (stop, seek) as `Err(PlaybackError::Interrupted)`, which the
//! provider must propagate with `?`.

use std::ops::{Deref, DerefMut};

use crate::error::PlaybackError;
use crate::format::{AudioDataFormat, PcmFormat};

/// Receives decoded PCM from a provider.
pub trait PcmSink {
    /// Push interleaved samples in the provider's declared [`PcmFormat`].
    ///
    /// Blocks while the frame buffer is full.
    fn push(&mut self, samples: &[f32]) -> Result<(), PlaybackError>;

    /// Cheap check for providers doing long work between pushes.
    fn check_interrupted(&self) -> Result<(), PlaybackError>;
}

/// Result of a successful [`FrameProvider::initialise`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SourceStart {
    /// Layout of the PCM the provider will push.
    pub format: PcmFormat,
    /// Timecode of the first sample the provider will push.
    pub timecode_ms: u64,
}

/// Reader for one source, driven on the track's worker thread.
pub trait FrameProvider: Send {
    /// Open the source and position it at `start_timecode_ms`.
    fn initialise(
        &mut self,
        output: &AudioDataFormat,
        start_timecode_ms: u64,
    ) -> Result<SourceStart, PlaybackError>;

    /// Decode until the source is exhausted (`Ok`) or the sink reports an interruption.
    fn provide_frames(&mut self, sink: &mut dyn PcmSink) -> Result<(), PlaybackError>;

    /// Reposition the read cursor; returns the timecode actually reached.
    fn seek_to_timecode(&mut self, timecode_ms: u64) -> Result<u64, PlaybackError>;

    fn is_seekable(&self) -> bool {
        true
    }

    /// Release source resources. Must be idempotent and safe after a failed `initialise`.
    fn close(&mut self) {}
}

/// Creates a fresh provider each time a track is played.
pub trait ProviderFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn FrameProvider>, PlaybackError>;
}

impl<F> ProviderFactory for F
where
    F: Fn() -> Result<Box<dyn FrameProvider>, PlaybackError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn FrameProvider>, PlaybackError> {
        self()
    }
}

/// Closes the wrapped provider on every exit path, including unwinding.
pub(crate) struct ProviderGuard {
    provider: Box<dyn FrameProvider>,
}

impl ProviderGuard {
    pub(crate) fn new(provider: Box<dyn FrameProvider>) -> Self {
        Self { provider }
    }
}

impl Deref for ProviderGuard {
    type Target = dyn FrameProvider;

    fn deref(&self) -> &Self::Target {
        self.provider.as_ref()
    }
}

impl DerefMut for ProviderGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.provider.as_mut()
    }
}

impl Drop for ProviderGuard {
    fn drop(&mut self) {
        self.provider.close();
    }
}
