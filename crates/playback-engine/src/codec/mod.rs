//! Codec boundary.
//!
//! Encoders and decoders are synchronous, stateful-per-instance transforms between interleaved
//! 16-bit PCM chunks and encoded payloads. The pipeline never looks inside a payload.

mod pcm;
#[cfg(feature = "opus")]
mod libopus;

use bytes::Bytes;

use crate::error::CodecError;
use crate::format::{AudioCodec, AudioDataFormat};

pub use pcm::{PcmDecoder, PcmEncoder};
#[cfg(feature = "opus")]
pub use libopus::{OpusDecoder, OpusEncoder};

/// PCM chunk → encoded payload.
pub trait AudioEncoder: Send {
    /// Encode exactly one chunk of interleaved samples.
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError>;

    /// Release native resources. Called once; dropping has the same effect.
    fn close(&mut self) {}
}

/// Encoded payload → PCM chunk.
pub trait AudioDecoder: Send {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>, CodecError>;

    fn close(&mut self) {}
}

/// Create an encoder producing `format`.
pub fn create_encoder(format: &AudioDataFormat) -> Result<Box<dyn AudioEncoder>, CodecError> {
    match format.codec {
        AudioCodec::PcmS16Le => Ok(Box::new(PcmEncoder::new(format, false))),
        AudioCodec::PcmS16Be => Ok(Box::new(PcmEncoder::new(format, true))),
        #[cfg(feature = "opus")]
        AudioCodec::Opus => Ok(Box::new(OpusEncoder::new(format)?)),
        #[cfg(not(feature = "opus"))]
        AudioCodec::Opus => Err(CodecError::Unsupported("opus")),
    }
}

/// Create a decoder for payloads in `format`.
pub fn create_decoder(format: &AudioDataFormat) -> Result<Box<dyn AudioDecoder>, CodecError> {
    match format.codec {
        AudioCodec::PcmS16Le => Ok(Box::new(PcmDecoder::new(false))),
        AudioCodec::PcmS16Be => Ok(Box::new(PcmDecoder::new(true))),
        #[cfg(feature = "opus")]
        AudioCodec::Opus => Ok(Box::new(OpusDecoder::new(format)?)),
        #[cfg(not(feature = "opus"))]
        AudioCodec::Opus => Err(CodecError::Unsupported("opus")),
    }
}

/// Convert a float sample in `[-1.0, 1.0]` to 16-bit, clamping out-of-range values.
pub fn f32_to_i16(sample: f32) -> i16 {
    let scaled = (sample * 32767.0).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}
