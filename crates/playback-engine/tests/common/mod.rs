//! Synthetic providers and helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use playback_engine::{
    AudioDataFormat, AudioFrame, AudioTrack, AudioTrackInfo, FormatError, FrameProvider, PcmFormat,
    PcmSink, PlaybackError, Player, PlayerConfig, PlayerEvent, SourceStart,
};

/// Constant-level tone; finite, endless, or failing after a while.
#[derive(Clone)]
pub struct Tone {
    pub rate: u32,
    pub channels: u16,
    pub level: f32,
    pub length_ms: Option<u64>,
    pub fail_at_ms: Option<u64>,
    pub closed: Arc<AtomicUsize>,
}

impl Tone {
    pub fn finite(length_ms: u64) -> Self {
        Self {
            rate: 48_000,
            channels: 2,
            level: 0.25,
            length_ms: Some(length_ms),
            fail_at_ms: None,
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn endless() -> Self {
        Self {
            length_ms: None,
            ..Self::finite(0)
        }
    }

    pub fn track(&self, identifier: &str) -> AudioTrack {
        self.track_with_info(AudioTrackInfo::new(identifier, identifier))
    }

    pub fn track_with_info(&self, info: AudioTrackInfo) -> AudioTrack {
        let template = self.clone();
        AudioTrack::new(
            info,
            move || -> Result<Box<dyn FrameProvider>, PlaybackError> {
                Ok(Box::new(ToneProvider {
                    tone: template.clone(),
                    pos: 0,
                }))
            },
        )
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ToneProvider {
    tone: Tone,
    pos: u64,
}

impl ToneProvider {
    fn frames_for(&self, ms: u64) -> u64 {
        ms * self.tone.rate as u64 / 1000
    }
}

impl FrameProvider for ToneProvider {
    fn initialise(
        &mut self,
        _output: &AudioDataFormat,
        start_timecode_ms: u64,
    ) -> Result<SourceStart, PlaybackError> {
        self.pos = self.frames_for(start_timecode_ms);
        Ok(SourceStart {
            format: PcmFormat::new(self.tone.rate, self.tone.channels),
            timecode_ms: start_timecode_ms,
        })
    }

    fn provide_frames(&mut self, sink: &mut dyn PcmSink) -> Result<(), PlaybackError> {
        let block = (self.tone.rate / 100) as u64;
        loop {
            if let Some(length) = self.tone.length_ms {
                if self.pos >= self.frames_for(length) {
                    return Ok(());
                }
            }
            if let Some(fail) = self.tone.fail_at_ms {
                if self.pos >= self.frames_for(fail) {
                    return Err(FormatError::new("stream truncated").into());
                }
            }
            let n = match self.tone.length_ms {
                Some(length) => block.min(self.frames_for(length) - self.pos),
                None => block,
            };
            let samples = vec![self.tone.level; (n * self.tone.channels as u64) as usize];
            sink.push(&samples)?;
            self.pos += n;
        }
    }

    fn seek_to_timecode(&mut self, timecode_ms: u64) -> Result<u64, PlaybackError> {
        self.pos = self.frames_for(timecode_ms);
        Ok(timecode_ms)
    }

    fn close(&mut self) {
        self.tone.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Pushes `chunks` blocks of 10ms, then hangs (still honouring interruptions).
pub fn stalling_track(identifier: &str, chunks: usize) -> AudioTrack {
    AudioTrack::new(
        AudioTrackInfo::new(identifier, identifier),
        move || -> Result<Box<dyn FrameProvider>, PlaybackError> {
            Ok(Box::new(Stalling { chunks }))
        },
    )
}

struct Stalling {
    chunks: usize,
}

impl FrameProvider for Stalling {
    fn initialise(
        &mut self,
        _output: &AudioDataFormat,
        start_timecode_ms: u64,
    ) -> Result<SourceStart, PlaybackError> {
        Ok(SourceStart {
            format: PcmFormat::new(48_000, 2),
            timecode_ms: start_timecode_ms,
        })
    }

    fn provide_frames(&mut self, sink: &mut dyn PcmSink) -> Result<(), PlaybackError> {
        for _ in 0..self.chunks {
            sink.push(&[0.1; 960])?;
        }
        loop {
            sink.check_interrupted()?;
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn seek_to_timecode(&mut self, timecode_ms: u64) -> Result<u64, PlaybackError> {
        Ok(timecode_ms)
    }
}

/// Small buffer and short stuck threshold keep the tests fast.
pub fn test_config() -> PlayerConfig {
    PlayerConfig {
        frame_buffer_duration_ms: 200,
        stuck_threshold_ms: 150,
        ..PlayerConfig::default()
    }
}

/// Pull frames until `done` returns true or `timeout` elapses; returns the delivered frames.
pub fn pump_until(
    player: &Player,
    timeout: Duration,
    mut done: impl FnMut(&[AudioFrame]) -> bool,
) -> Vec<AudioFrame> {
    let deadline = Instant::now() + timeout;
    let mut frames = Vec::new();
    while Instant::now() < deadline {
        if let Some(frame) = player.provide_timeout(Duration::from_millis(10)) {
            frames.push(frame);
        }
        if done(&frames) {
            break;
        }
    }
    frames
}

/// Pull frames for `duration` regardless of what happens.
pub fn pump_for(player: &Player, duration: Duration) -> Vec<AudioFrame> {
    pump_until(player, duration, |_| false)
}

pub fn events(rx: &Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    rx.try_iter().collect()
}

pub fn kinds(events: &[PlayerEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind()).collect()
}

pub fn end_events(events: &[PlayerEvent], track: &AudioTrack) -> Vec<playback_engine::TrackEndReason> {
    events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::TrackEnd { track: t, reason } if t == track => Some(*reason),
            _ => None,
        })
        .collect()
}

/// First little-endian 16-bit sample of a PCM frame.
pub fn first_sample(frame: &AudioFrame) -> i16 {
    let data = frame.data();
    i16::from_le_bytes([data[0], data[1]])
}

pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
