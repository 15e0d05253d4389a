//! Raw 16-bit PCM "codec": a byte-order aware pass-through.

use bytes::{BufMut, Bytes, BytesMut};

use super::{AudioDecoder, AudioEncoder};
use crate::error::CodecError;
use crate::format::AudioDataFormat;

pub struct PcmEncoder {
    samples_per_chunk: usize,
    big_endian: bool,
}

impl PcmEncoder {
    pub fn new(format: &AudioDataFormat, big_endian: bool) -> Self {
        Self {
            samples_per_chunk: format.samples_per_chunk(),
            big_endian,
        }
    }
}

impl AudioEncoder for PcmEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError> {
        if pcm.len() != self.samples_per_chunk {
            return Err(CodecError::InvalidChunkSize {
                got: pcm.len(),
                expected: self.samples_per_chunk,
            });
        }
        let mut out = BytesMut::with_capacity(pcm.len() * 2);
        for &sample in pcm {
            if self.big_endian {
                out.put_i16(sample);
            } else {
                out.put_i16_le(sample);
            }
        }
        Ok(out.freeze())
    }
}

pub struct PcmDecoder {
    big_endian: bool,
}

impl PcmDecoder {
    pub fn new(big_endian: bool) -> Self {
        Self { big_endian }
    }
}

impl AudioDecoder for PcmDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>, CodecError> {
        if data.len() % 2 != 0 {
            return Err(CodecError::DecodingFailed(format!(
                "odd payload length {}",
                data.len()
            )));
        }
        let samples = data
            .chunks_exact(2)
            .map(|pair| {
                let bytes = [pair[0], pair[1]];
                if self.big_endian {
                    i16::from_be_bytes(bytes)
                } else {
                    i16::from_le_bytes(bytes)
                }
            })
            .collect();
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AudioCodec;

    fn tiny_format() -> AudioDataFormat {
        AudioDataFormat::new(AudioCodec::PcmS16Le, 1, 8_000, 4)
    }

    #[test]
    fn little_endian_layout() {
        let mut enc = PcmEncoder::new(&tiny_format(), false);
        let bytes = enc.encode(&[1, -1, 256, 0]).unwrap();
        assert_eq!(bytes.as_ref(), &[1, 0, 0xff, 0xff, 0, 1, 0, 0]);
    }

    #[test]
    fn big_endian_decodes_back() {
        let mut enc = PcmEncoder::new(&tiny_format(), true);
        let mut dec = PcmDecoder::new(true);
        let bytes = enc.encode(&[1000, -1000, 7, i16::MIN]).unwrap();
        assert_eq!(bytes[0..2], [0x03, 0xe8]);
        assert_eq!(dec.decode(&bytes).unwrap(), vec![1000, -1000, 7, i16::MIN]);
    }

    #[test]
    fn rejects_wrong_chunk_length() {
        let mut enc = PcmEncoder::new(&tiny_format(), false);
        let err = enc.encode(&[0; 3]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidChunkSize { got: 3, expected: 4 }));
    }

    #[test]
    fn rejects_odd_payload() {
        let mut dec = PcmDecoder::new(false);
        assert!(dec.decode(&[1, 2, 3]).is_err());
    }
}
