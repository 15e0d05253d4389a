//! Opus encoder/decoder wrappers over libopus.

use bytes::Bytes;
use opus::{Application, Channels, Decoder, Encoder};

use super::{AudioDecoder, AudioEncoder};
use crate::error::CodecError;
use crate::format::AudioDataFormat;

const DEFAULT_BITRATE: i32 = 128_000;

fn opus_channels(channels: u16) -> Result<Channels, String> {
    match channels {
        1 => Ok(Channels::Mono),
        2 => Ok(Channels::Stereo),
        n => Err(format!("unsupported channel count: {n}")),
    }
}

pub struct OpusEncoder {
    encoder: Encoder,
    samples_per_chunk: usize,
    /// Reused output buffer.
    encode_buffer: Vec<u8>,
}

impl OpusEncoder {
    pub fn new(format: &AudioDataFormat) -> Result<Self, CodecError> {
        let channels = opus_channels(format.channels).map_err(CodecError::EncoderInit)?;
        let mut encoder = Encoder::new(format.sample_rate, channels, Application::Audio)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;
        encoder
            .set_bitrate(opus::Bitrate::Bits(DEFAULT_BITRATE))
            .map_err(|e| CodecError::EncoderInit(format!("failed to set bitrate: {e}")))?;

        Ok(Self {
            encoder,
            samples_per_chunk: format.samples_per_chunk(),
            encode_buffer: vec![0u8; format.maximum_chunk_size().max(4000)],
        })
    }
}

impl AudioEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError> {
        if pcm.len() != self.samples_per_chunk {
            return Err(CodecError::InvalidChunkSize {
                got: pcm.len(),
                expected: self.samples_per_chunk,
            });
        }
        let size = self
            .encoder
            .encode(pcm, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;
        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }
}

pub struct OpusDecoder {
    decoder: Decoder,
    channels: usize,
    decode_buffer: Vec<i16>,
}

impl OpusDecoder {
    pub fn new(format: &AudioDataFormat) -> Result<Self, CodecError> {
        let channels = opus_channels(format.channels).map_err(CodecError::DecoderInit)?;
        let decoder = Decoder::new(format.sample_rate, channels)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        // 120ms is the longest Opus packet.
        let max_samples = format.sample_rate as usize * 120 / 1000 * format.channels as usize;
        Ok(Self {
            decoder,
            channels: format.channels as usize,
            decode_buffer: vec![0i16; max_samples],
        })
    }
}

impl AudioDecoder for OpusDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>, CodecError> {
        let per_channel = self
            .decoder
            .decode(data, &mut self.decode_buffer, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;
        Ok(self.decode_buffer[..per_channel * self.channels].to_vec())
    }
}
