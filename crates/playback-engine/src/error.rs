//! Error taxonomy of the playback pipeline.
//!
//! Every per-track failure ends up as a [`PlaybackError`] at the executor boundary, where it is
//! classified into a [`TrackException`] (or swallowed, for cooperative interruptions).

use std::fmt;

use playback_types::Severity;
use thiserror::Error;

/// Encode/decode failures raised by a codec implementation.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    #[error("decoding failed: {0}")]
    DecodingFailed(String),

    #[error("invalid chunk size: got {got} samples, expected {expected}")]
    InvalidChunkSize { got: usize, expected: usize },

    #[error("unsupported codec: {0}")]
    Unsupported(&'static str),
}

/// A frame provider could not parse or keep reading its source.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct FormatError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FormatError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Why a worker was asked to unwind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interruption {
    /// Stop or replace: the worker must exit.
    Stopped,
    /// A seek is pending: the worker must reposition and continue.
    Seek,
}

impl fmt::Display for Interruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interruption::Stopped => f.write_str("stopped"),
            Interruption::Seek => f.write_str("seek requested"),
        }
    }
}

/// Errors surfaced by the pipeline and the player controls.
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("interrupted: {0}")]
    Interrupted(Interruption),

    #[error("track is not seekable")]
    NotSeekable,

    #[error("no active track")]
    NoActiveTrack,

    #[error("track executor is no longer running")]
    NotRunning,

    #[error("track instance was already played; use make_clone()")]
    AlreadyPlayed,

    #[error("filter error: {0}")]
    Filter(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected failure in track {identifier} ({codec}) at {position_ms}ms: {message}")]
    Unexpected {
        identifier: String,
        codec: String,
        position_ms: u64,
        message: String,
    },
}

impl PlaybackError {
    pub fn is_interruption(&self) -> bool {
        matches!(self, PlaybackError::Interrupted(_))
    }

    /// Severity used when this error terminates a track.
    pub fn severity(&self) -> Severity {
        match self {
            PlaybackError::Format(_) => Severity::Common,
            PlaybackError::Codec(_) | PlaybackError::Io(_) => Severity::Suspicious,
            _ => Severity::Fault,
        }
    }
}

/// Terminal failure of one track, as delivered to event subscribers.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{message}")]
pub struct TrackException {
    pub message: String,
    pub severity: Severity,
    pub cause: Option<String>,
}

impl TrackException {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
            cause: None,
        }
    }

    /// Classify a pipeline error into the user-facing exception.
    pub fn from_error(err: &PlaybackError) -> Self {
        let cause = std::error::Error::source(err).map(|s| s.to_string());
        let message = match err {
            PlaybackError::Format(e) => format!("Something broke when playing the track: {}", e.message()),
            PlaybackError::Codec(_) => "The track could not be transcoded".to_string(),
            _ => "Something went wrong when playing the track".to_string(),
        };
        Self {
            message,
            severity: err.severity(),
            cause: cause.or_else(|| Some(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_errors_are_common() {
        let err = PlaybackError::from(FormatError::new("bad header"));
        let ex = TrackException::from_error(&err);
        assert_eq!(ex.severity, Severity::Common);
        assert!(ex.message.contains("bad header"));
    }

    #[test]
    fn codec_errors_are_suspicious() {
        let err = PlaybackError::from(CodecError::EncodingFailed("boom".into()));
        let ex = TrackException::from_error(&err);
        assert_eq!(ex.severity, Severity::Suspicious);
        assert_eq!(ex.cause.as_deref(), Some("encoding failed: boom"));
    }

    #[test]
    fn unexpected_errors_carry_context() {
        let err = PlaybackError::Unexpected {
            identifier: "song.flac".into(),
            codec: "pcm_s16le".into(),
            position_ms: 1200,
            message: "panic".into(),
        };
        let text = err.to_string();
        assert!(text.contains("song.flac"));
        assert!(text.contains("1200ms"));
        assert_eq!(err.severity(), Severity::Fault);
    }

    #[test]
    fn interruption_is_not_reported_as_failure_kind() {
        assert!(PlaybackError::Interrupted(Interruption::Seek).is_interruption());
        assert!(!PlaybackError::NotSeekable.is_interruption());
    }
}
