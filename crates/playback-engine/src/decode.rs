//! Symphonia-backed frame provider.
//!
//! Uses Symphonia to:
//! - probe the input container/codec
//! - decode packets into interleaved `f32` samples
//! - seek accurately, trimming decoded audio up to the requested timestamp

use std::fs::File;
use std::path::{Path, PathBuf};

use playback_types::AudioTrackInfo;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::{MetadataOptions, StandardTagKey, Tag};
use symphonia::core::probe::{Hint, ProbeResult};
use symphonia::core::units::{Time, TimeBase};

use crate::error::{FormatError, PlaybackError};
use crate::format::{AudioDataFormat, PcmFormat};
use crate::provider::{FrameProvider, PcmSink, ProviderFactory, SourceStart};

/// Decodes any container/codec Symphonia supports.
pub struct SymphoniaProvider {
    source: Option<(Box<dyn MediaSource>, Hint)>,
    reader: Option<Box<dyn FormatReader>>,
    decoder: Option<Box<dyn Decoder>>,
    track_id: u32,
    time_base: Option<TimeBase>,
    /// After an accurate seek: drop decoded audio before this timestamp.
    skip_until_ts: Option<u64>,
}

impl SymphoniaProvider {
    pub fn new(source: Box<dyn MediaSource>, hint: Hint) -> Self {
        Self {
            source: Some((source, hint)),
            reader: None,
            decoder: None,
            track_id: 0,
            time_base: None,
            skip_until_ts: None,
        }
    }

    /// Provider reading a local file; the extension is used as a probe hint.
    pub fn open(path: &Path) -> Result<Self, PlaybackError> {
        let file = File::open(path)?;
        Ok(Self::new(Box::new(file), hint_for_path(path)))
    }

    /// Factory opening `path` anew for every play of the track.
    pub fn file_factory(path: PathBuf) -> impl ProviderFactory {
        move || -> Result<Box<dyn FrameProvider>, PlaybackError> {
            Ok(Box::new(SymphoniaProvider::open(&path)?))
        }
    }

    fn ts_to_ms(&self, ts: u64) -> Option<u64> {
        let time = self.time_base?.calc_time(ts);
        Some(time.seconds * 1000 + (time.frac * 1000.0).round() as u64)
    }

    fn seek_reader(&mut self, timecode_ms: u64) -> Result<u64, PlaybackError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| FormatError::new("seek before initialise"))?;
        let time = Time::new(timecode_ms / 1000, (timecode_ms % 1000) as f64 / 1000.0);
        let seeked = reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| FormatError::with_source(format!("seek to {timecode_ms}ms failed"), e))?;

        if let Some(decoder) = self.decoder.as_mut() {
            decoder.reset();
        }
        self.skip_until_ts = (seeked.actual_ts < seeked.required_ts).then_some(seeked.required_ts);

        let actual = self.ts_to_ms(seeked.required_ts).unwrap_or(timecode_ms);
        tracing::debug!(
            requested_ms = timecode_ms,
            actual_ms = actual,
            required_ts = seeked.required_ts,
            actual_ts = seeked.actual_ts,
            "symphonia seek"
        );
        Ok(actual)
    }
}

impl FrameProvider for SymphoniaProvider {
    fn initialise(
        &mut self,
        _output: &AudioDataFormat,
        start_timecode_ms: u64,
    ) -> Result<SourceStart, PlaybackError> {
        let (source, hint) = self
            .source
            .take()
            .ok_or_else(|| FormatError::new("provider already initialised"))?;

        let probed = probe(source, &hint)?;
        let reader = probed.format;
        let track = reader
            .default_track()
            .ok_or_else(|| FormatError::new("no default audio track"))?;

        let params: CodecParameters = track.codec_params.clone();
        let channels = params
            .channels
            .ok_or_else(|| FormatError::new("unknown channel layout"))?
            .count();
        let rate = params
            .sample_rate
            .ok_or_else(|| FormatError::new("unknown sample rate"))?;

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| FormatError::with_source("unsupported codec", e))?;

        self.track_id = track.id;
        self.time_base = params.time_base.or_else(|| Some(TimeBase::new(1, rate)));
        self.reader = Some(reader);
        self.decoder = Some(decoder);

        tracing::info!(
            codec = codec_name_from_params(&params).as_deref().unwrap_or("unknown"),
            rate,
            channels,
            duration_ms = ?duration_ms_from_codec_params(&params),
            "source opened"
        );

        let timecode_ms = if start_timecode_ms > 0 {
            self.seek_reader(start_timecode_ms)?
        } else {
            0
        };

        Ok(SourceStart {
            format: PcmFormat::new(rate, channels as u16),
            timecode_ms,
        })
    }

    fn provide_frames(&mut self, sink: &mut dyn PcmSink) -> Result<(), PlaybackError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| FormatError::new("provider not initialised"))?;
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| FormatError::new("provider not initialised"))?;

        loop {
            sink.check_interrupted()?;

            let packet = match reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok(());
                }
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(e) => return Err(FormatError::with_source("reading packet failed", e).into()),
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(msg)) => {
                    tracing::warn!(ts = packet.ts(), "skipping undecodable packet: {msg}");
                    continue;
                }
                Err(e) => return Err(FormatError::with_source("decoding packet failed", e).into()),
            };

            let spec = *decoded.spec();
            let channels = spec.channels.count().max(1);
            let frames = decoded.frames();
            if frames == 0 {
                continue;
            }
            let mut sample_buf = SampleBuffer::<f32>::new(frames as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);
            let mut samples = sample_buf.samples();

            if let Some(required) = self.skip_until_ts {
                let end_ts = packet.ts() + frames as u64;
                if end_ts <= required {
                    continue;
                }
                let skip = required.saturating_sub(packet.ts()) as usize;
                samples = &samples[(skip * channels).min(samples.len())..];
                self.skip_until_ts = None;
            }

            if !samples.is_empty() {
                sink.push(samples)?;
            }
        }
    }

    fn seek_to_timecode(&mut self, timecode_ms: u64) -> Result<u64, PlaybackError> {
        self.seek_reader(timecode_ms)
    }

    fn close(&mut self) {
        self.source = None;
        self.decoder = None;
        self.reader = None;
    }
}

fn hint_for_path(path: &Path) -> Hint {
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }
    hint
}

fn probe(source: Box<dyn MediaSource>, hint: &Hint) -> Result<ProbeResult, PlaybackError> {
    let mss = MediaSourceStream::new(source, Default::default());
    symphonia::default::get_probe()
        .format(hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| FormatError::with_source("unrecognised media format", e).into())
}

/// Probe `source` and describe it; used by loaders to build an [`AudioTrackInfo`].
pub fn probe_track_info(
    source: Box<dyn MediaSource>,
    hint: &Hint,
    identifier: &str,
) -> Result<AudioTrackInfo, PlaybackError> {
    let mut probed = probe(source, hint)?;

    let mut tags: Vec<Tag> = Vec::new();
    if let Some(meta) = probed.metadata.get() {
        if let Some(rev) = meta.current() {
            tags.extend(rev.tags().iter().cloned());
        }
    }
    if let Some(rev) = probed.format.metadata().current() {
        tags.extend(rev.tags().iter().cloned());
    }
    let tag_value = |key: StandardTagKey| {
        tags.iter()
            .find(|t| t.std_key == Some(key))
            .map(|t| t.value.to_string())
    };

    let track = probed
        .format
        .default_track()
        .ok_or_else(|| FormatError::new("no default audio track"))?;

    let title = tag_value(StandardTagKey::TrackTitle).unwrap_or_else(|| identifier.to_string());
    Ok(AudioTrackInfo {
        title,
        author: tag_value(StandardTagKey::Artist).unwrap_or_default(),
        length_ms: duration_ms_from_codec_params(&track.codec_params),
        identifier: identifier.to_string(),
        is_stream: false,
        uri: None,
        artwork_url: None,
    })
}

/// [`probe_track_info`] for a local file.
pub fn probe_file_info(path: &Path) -> Result<AudioTrackInfo, PlaybackError> {
    let file = File::open(path)?;
    probe_track_info(
        Box::new(file),
        &hint_for_path(path),
        &path.display().to_string(),
    )
}

/// Best-effort duration in milliseconds from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label for logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
