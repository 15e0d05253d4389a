//! Device side: decodes delivered frames and feeds a CPAL output stream.
//!
//! The player's output loop hands frames to a [`FrameSink`], which decodes them to `f32` and
//! pushes them into a small bounded channel. The CPAL callback drains that channel without
//! blocking and writes silence on underrun.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;
use crossbeam_channel::{Receiver, Sender};
use playback_engine::codec::{self, AudioDecoder, i16_to_f32};
use playback_engine::{AudioDataFormat, AudioFrame, FrameConsumer};

/// Frames held between the output loop and the device callback.
pub const DEVICE_QUEUE_FRAMES: usize = 8;

/// Counters shared with the callback.
#[derive(Debug, Default)]
pub struct DeviceStats {
    pub played_frames: AtomicU64,
    pub underrun_events: AtomicU64,
}

/// Decodes player frames into the device queue.
pub struct FrameSink {
    decoder: Box<dyn AudioDecoder>,
    tx: Sender<Vec<f32>>,
}

impl FrameSink {
    pub fn new(format: &AudioDataFormat, tx: Sender<Vec<f32>>) -> Result<Self> {
        Ok(Self {
            decoder: codec::create_decoder(format)?,
            tx,
        })
    }
}

impl FrameConsumer for FrameSink {
    fn consume(&mut self, frame: AudioFrame) {
        let pcm = match self.decoder.decode(frame.data()) {
            Ok(pcm) => pcm,
            Err(e) => {
                tracing::warn!(timecode_ms = frame.timecode(), error = %e, "dropping undecodable frame");
                return;
            }
        };
        let samples: Vec<f32> = pcm.into_iter().map(i16_to_f32).collect();
        // Blocking here paces the output loop to the device clock.
        if self.tx.send(samples).is_err() {
            tracing::debug!("device queue closed");
        }
    }
}

/// Drop whatever the device has not played yet (after a seek or stop).
pub fn drain_queue(rx: &Receiver<Vec<f32>>) -> usize {
    rx.try_iter().count()
}

/// Build a CPAL output stream that plays interleaved `f32` chunks from `rx`.
///
/// Chunks must be laid out with `config.channels` channels.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    rx: Receiver<Vec<f32>>,
    stats: Arc<DeviceStats>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, rx, stats),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, rx, stats),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, rx, stats),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, rx, stats),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    rx: Receiver<Vec<f32>>,
    stats: Arc<DeviceStats>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = (config.channels as usize).max(1);
    let mut reader = ChunkReader::new(rx);
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let written = reader.fill(data, |s| <T as cpal::Sample>::from_sample::<f32>(s));
            let frames = written / channels;
            stats.played_frames.fetch_add(frames as u64, Ordering::Relaxed);
            if written < data.len() {
                stats.underrun_events.fetch_add(1, Ordering::Relaxed);
                data[written..].fill(<T as cpal::Sample>::from_sample::<f32>(0.0));
            }
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Callback-local cursor over queued chunks.
struct ChunkReader {
    rx: Receiver<Vec<f32>>,
    current: Vec<f32>,
    pos: usize,
}

impl ChunkReader {
    fn new(rx: Receiver<Vec<f32>>) -> Self {
        Self {
            rx,
            current: Vec::new(),
            pos: 0,
        }
    }

    /// Copy as many samples as are ready into `out`; returns how many were written.
    fn fill<T>(&mut self, out: &mut [T], convert: impl Fn(f32) -> T) -> usize {
        let mut written = 0;
        while written < out.len() {
            if self.pos >= self.current.len() {
                match self.rx.try_recv() {
                    Ok(chunk) => {
                        self.current = chunk;
                        self.pos = 0;
                        continue;
                    }
                    Err(_) => break,
                }
            }
            let n = (self.current.len() - self.pos).min(out.len() - written);
            for (dst, &src) in out[written..written + n]
                .iter_mut()
                .zip(&self.current[self.pos..self.pos + n])
            {
                *dst = convert(src);
            }
            self.pos += n;
            written += n;
        }
        written
    }
}
