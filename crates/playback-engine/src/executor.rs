//! Track executor: the worker thread driving one track.
//!
//! The worker owns the provider, the filter chain and the encoder; nothing else touches them.
//! The only state shared with the player is:
//! - the frame buffer (worker puts, player takes)
//! - a [`CancelToken`] plus the pending seek slot (player writes, worker reads)
//! - the outcome and seek report (worker writes, player reads)
//!
//! Every exit path (completion, failure, stop, panic) records an outcome *before* marking the
//! buffer terminal, so whoever takes the terminator can read it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use playback_types::{Severity, TrackState};

use crate::buffer::{FrameBuffer, FrameRebuilder};
use crate::cancel::CancelToken;
use crate::codec::{self, AudioEncoder, f32_to_i16};
use crate::config::{PlayerConfig, ResamplingQuality};
use crate::error::{Interruption, PlaybackError, TrackException};
use crate::filter::FilterChain;
use crate::filter::volume::{
    RampedRebuild, VolumeRamp, VolumeRebuilder, apply_volume, integer_multiplier,
};
use crate::format::{AudioDataFormat, AudioFrame, PcmFormat};
use crate::options::PlayerOptions;
use crate::provider::{PcmSink, ProviderGuard, SourceStart};
use crate::track::AudioTrack;

/// Per-track settings derived from the player config.
#[derive(Clone, Debug)]
pub struct ExecutorSettings {
    pub buffer_duration_ms: u64,
    pub resampling_quality: ResamplingQuality,
    pub filter_hot_swap: bool,
    pub volume_rebuild: bool,
    pub volume_ramp_frames: usize,
}

impl ExecutorSettings {
    pub fn from_config(config: &PlayerConfig, buffer_duration_ms: u64) -> Self {
        Self {
            buffer_duration_ms,
            resampling_quality: config.resampling_quality,
            filter_hot_swap: config.filter_hot_swap,
            volume_rebuild: config.volume_rebuild,
            volume_ramp_frames: config.volume_ramp_frames,
        }
    }
}

/// How the worker exited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutorOutcome {
    /// The source ran out and every frame was buffered.
    Finished,
    /// Stopped or replaced.
    Stopped,
    Failed(TrackException),
}

/// Requested vs. reached position of the last completed seek.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SeekReport {
    pub requested_ms: u64,
    pub actual_ms: u64,
}

struct ExecutorShared {
    track: AudioTrack,
    format: Arc<AudioDataFormat>,
    buffer: Arc<FrameBuffer>,
    token: CancelToken,
    pending_seek: Mutex<Option<u64>>,
    seek_report: Mutex<Option<SeekReport>>,
    outcome: Mutex<Option<ExecutorOutcome>>,
    seekable: AtomicBool,
    running: AtomicBool,
    epoch: Instant,
    last_frame_us: AtomicU64,
    frames_produced: AtomicU64,
}

impl ExecutorShared {
    /// Restart the stuck clock.
    fn touch_activity(&self) {
        self.last_frame_us
            .store(self.epoch.elapsed().as_micros() as u64, Ordering::Relaxed);
    }

    fn frame_produced(&self) {
        self.touch_activity();
        self.frames_produced.fetch_add(1, Ordering::Relaxed);
    }

    /// Wrap errors without a classification of their own with the track's context.
    fn contextualise(&self, err: PlaybackError) -> PlaybackError {
        match err {
            PlaybackError::Format(_)
            | PlaybackError::Codec(_)
            | PlaybackError::Io(_)
            | PlaybackError::Unexpected { .. } => err,
            other => self.unexpected(other.to_string()),
        }
    }

    fn unexpected(&self, message: String) -> PlaybackError {
        PlaybackError::Unexpected {
            identifier: self.track.identifier().to_string(),
            codec: self.format.codec.name().to_string(),
            position_ms: self.track.position(),
            message,
        }
    }

    fn finish(&self, outcome: ExecutorOutcome) {
        let state = match outcome {
            ExecutorOutcome::Failed(_) => TrackState::Errored,
            _ => TrackState::Finished,
        };
        self.track.set_state(state);
        *self.outcome.lock() = Some(outcome);
        {
            // Under the seek lock so that no seek is accepted after this point.
            let _pending = self.pending_seek.lock();
            self.running.store(false, Ordering::Release);
        }
        self.buffer.set_terminal();
    }
}

/// Handle to a running (or finished) track worker.
pub struct TrackExecutor {
    shared: Arc<ExecutorShared>,
    done: Receiver<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TrackExecutor {
    /// Spawn the worker thread for `track`.
    pub fn start(
        track: AudioTrack,
        format: Arc<AudioDataFormat>,
        options: Arc<PlayerOptions>,
        settings: ExecutorSettings,
    ) -> Result<Arc<Self>, PlaybackError> {
        let buffer = Arc::new(FrameBuffer::with_duration(
            format.clone(),
            settings.buffer_duration_ms,
        ));
        let shared = Arc::new(ExecutorShared {
            seekable: AtomicBool::new(track.is_seekable()),
            track: track.clone(),
            format,
            buffer,
            token: CancelToken::new(),
            pending_seek: Mutex::new(None),
            seek_report: Mutex::new(None),
            outcome: Mutex::new(None),
            running: AtomicBool::new(true),
            epoch: Instant::now(),
            last_frame_us: AtomicU64::new(0),
            frames_produced: AtomicU64::new(0),
        });

        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name(format!("track-executor-{}", track.id()))
            .spawn(move || {
                let _done = done_tx;
                run_worker(&worker, &options, &settings);
            })?;

        let executor = Arc::new(Self {
            shared,
            done: done_rx,
            handle: Mutex::new(Some(handle)),
        });
        track.attach_executor(&executor);
        Ok(executor)
    }

    pub fn track(&self) -> &AudioTrack {
        &self.shared.track
    }

    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.shared.buffer
    }

    pub fn format(&self) -> &Arc<AudioDataFormat> {
        &self.shared.format
    }

    pub fn is_seekable(&self) -> bool {
        self.shared.seekable.load(Ordering::Acquire)
    }

    /// Request a seek. The buffer is cleared immediately; the worker repositions the provider
    /// the next time it reaches a blocking point.
    pub fn seek(&self, timecode_ms: u64) -> Result<(), PlaybackError> {
        if !self.is_seekable() {
            return Err(PlaybackError::NotSeekable);
        }
        {
            let mut pending = self.shared.pending_seek.lock();
            if !self.shared.running.load(Ordering::Acquire) || self.shared.token.is_stopped() {
                return Err(PlaybackError::NotRunning);
            }
            *pending = Some(timecode_ms);
            self.shared.token.raise_seek();
            self.shared.buffer.clear_for_seek();
        }
        self.shared.buffer.wake_waiters();
        tracing::debug!(
            track = %self.shared.track.identifier(),
            requested_ms = timecode_ms,
            "seek requested"
        );
        Ok(())
    }

    /// Ask the worker to exit and drop everything buffered. Does not wait for the worker.
    pub fn stop(&self) {
        if self.shared.token.is_stopped() {
            return;
        }
        self.shared.token.stop();
        if self.shared.running.load(Ordering::Acquire) {
            self.shared.track.set_state(TrackState::Stopping);
        }
        self.shared.buffer.clear();
        self.shared.buffer.set_terminal();
        self.shared.buffer.wake_waiters();
        tracing::debug!(track = %self.shared.track.identifier(), "track stop requested");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.token.is_stopped()
    }

    /// `true` once the worker recorded its outcome.
    pub fn is_finished(&self) -> bool {
        !self.shared.running.load(Ordering::Acquire)
    }

    /// Wait until the worker thread released every resource. Returns `false` on timeout.
    pub fn wait_for_exit(&self, timeout: Duration) -> bool {
        let exited = match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        };
        if exited {
            if let Some(handle) = self.handle.lock().take() {
                let _ = handle.join();
            }
        }
        exited
    }

    pub fn outcome(&self) -> Option<ExecutorOutcome> {
        self.shared.outcome.lock().clone()
    }

    /// Report of the most recent seek, handed out once.
    pub fn take_seek_report(&self) -> Option<SeekReport> {
        self.shared.seek_report.lock().take()
    }

    pub fn frames_produced(&self) -> u64 {
        self.shared.frames_produced.load(Ordering::Relaxed)
    }

    /// Wake the worker so that a volume change reaches a full buffer without waiting for space.
    pub fn volume_changed(&self) {
        self.shared.buffer.wake_waiters();
    }

    /// Restart the stuck clock; time spent paused does not count as a stall.
    pub fn restart_stuck_clock(&self) {
        self.shared.touch_activity();
    }

    /// Time since the worker last put a frame (or started, sought, or the player resumed).
    pub fn millis_since_last_frame(&self) -> u64 {
        let now = self.shared.epoch.elapsed().as_micros() as u64;
        now.saturating_sub(self.shared.last_frame_us.load(Ordering::Relaxed)) / 1000
    }

    /// Human-readable worker snapshot for stuck-track reports.
    pub fn diagnostics(&self) -> String {
        let shared = &self.shared;
        format!(
            "state={:?} position_ms={} buffered={}/{} last_input_timecode={:?} \
             frames_produced={} since_last_frame_ms={} stopped={}",
            shared.track.state(),
            shared.track.position(),
            shared.buffer.buffered_frames(),
            shared.buffer.full_capacity(),
            shared.buffer.last_input_timecode(),
            self.frames_produced(),
            self.millis_since_last_frame(),
            shared.token.is_stopped(),
        )
    }
}

impl Drop for TrackExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(shared: &ExecutorShared, options: &PlayerOptions, settings: &ExecutorSettings) {
    let identifier = shared.track.identifier().to_string();
    tracing::info!(track = %identifier, "track worker started");

    let result = panic::catch_unwind(AssertUnwindSafe(|| execute(shared, options, settings)));
    let outcome = match result {
        Ok(Ok(())) if shared.token.is_stopped() => ExecutorOutcome::Stopped,
        Ok(Ok(())) => ExecutorOutcome::Finished,
        Ok(Err(e)) if e.is_interruption() => ExecutorOutcome::Stopped,
        Ok(Err(e)) => {
            let err = shared.contextualise(e);
            let exception = TrackException::from_error(&err);
            tracing::error!(
                track = %identifier,
                severity = ?exception.severity,
                error = %err,
                "track failed"
            );
            ExecutorOutcome::Failed(exception)
        }
        Err(payload) => {
            let err = shared.unexpected(panic_message(payload.as_ref()));
            tracing::error!(track = %identifier, error = %err, "track worker panicked");
            ExecutorOutcome::Failed(TrackException {
                message: "Something went wrong when playing the track".to_string(),
                severity: Severity::Fault,
                cause: Some(err.to_string()),
            })
        }
    };

    tracing::info!(
        track = %identifier,
        outcome = ?outcome,
        frames = shared.frames_produced.load(Ordering::Relaxed),
        "track worker exiting"
    );
    shared.finish(outcome);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

fn execute(
    shared: &ExecutorShared,
    options: &PlayerOptions,
    settings: &ExecutorSettings,
) -> Result<(), PlaybackError> {
    shared.token.ensure_running()?;
    shared.track.set_state(TrackState::Initializing);

    let mut provider = ProviderGuard::new(shared.track.factory().create()?);
    let start = provider.initialise(&shared.format, shared.track.position())?;
    shared.seekable.store(
        shared.track.is_seekable() && provider.is_seekable(),
        Ordering::Release,
    );
    shared.track.set_position_internal(start.timecode_ms);

    let mut pipeline = Pipeline::new(shared, options, settings, start)?;
    shared.touch_activity();
    shared.track.set_state(TrackState::Playing);
    tracing::info!(
        track = %shared.track.identifier(),
        source_rate = start.format.sample_rate,
        source_channels = start.format.channels,
        start_ms = start.timecode_ms,
        "track playing"
    );

    loop {
        let result = provider.provide_frames(&mut pipeline).and_then(|()| {
            // A seek may have arrived just as the source ran out.
            shared.token.ensure_running()?;
            pipeline.finish()
        });
        match result {
            Ok(()) => return Ok(()),
            Err(PlaybackError::Interrupted(Interruption::Seek)) => {
                perform_seek(shared, &mut provider, &mut pipeline)?;
            }
            Err(e) => return Err(e),
        }
    }
}

fn perform_seek(
    shared: &ExecutorShared,
    provider: &mut ProviderGuard,
    pipeline: &mut Pipeline<'_>,
) -> Result<(), PlaybackError> {
    let requested = {
        let mut pending = shared.pending_seek.lock();
        shared.token.clear_seek();
        pending.take()
    };
    let Some(requested) = requested else {
        return Ok(());
    };

    shared.track.set_state(TrackState::Seeking);
    shared.buffer.set_clear_on_insert();

    let actual = provider.seek_to_timecode(requested)?;
    pipeline.seek_performed(requested, actual);
    shared.track.set_position_internal(actual);
    *shared.seek_report.lock() = Some(SeekReport {
        requested_ms: requested,
        actual_ms: actual,
    });
    shared.touch_activity();
    shared.track.set_state(TrackState::Playing);

    tracing::info!(
        track = %shared.track.identifier(),
        requested_ms = requested,
        actual_ms = actual,
        "seek performed"
    );
    Ok(())
}

/// The sink handed to the provider: chain → volume → encode → buffer.
struct Pipeline<'a> {
    shared: &'a ExecutorShared,
    options: &'a PlayerOptions,
    settings: &'a ExecutorSettings,
    chain: FilterChain,
    filter_generation: u64,
    processed: Vec<f32>,
    writer: FrameWriter,
}

impl<'a> Pipeline<'a> {
    fn new(
        shared: &'a ExecutorShared,
        options: &'a PlayerOptions,
        settings: &'a ExecutorSettings,
        start: SourceStart,
    ) -> Result<Self, PlaybackError> {
        let (filter_generation, factory) = options.filter_snapshot();
        let chain = FilterChain::build(
            start.format,
            PcmFormat::from(shared.format.as_ref()),
            settings.resampling_quality,
            factory.as_ref(),
        )?;
        let writer = FrameWriter::new(
            shared.format.clone(),
            start.timecode_ms,
            options.volume(),
            settings,
        )?;
        Ok(Self {
            shared,
            options,
            settings,
            chain,
            filter_generation,
            processed: Vec::new(),
            writer,
        })
    }

    fn refresh_filters(&mut self) {
        if !self.settings.filter_hot_swap
            || self.options.filter_generation() == self.filter_generation
        {
            return;
        }
        let (generation, factory) = self.options.filter_snapshot();
        self.chain.swap_user_filters(factory.as_ref());
        self.filter_generation = generation;
    }

    fn finish(&mut self) -> Result<(), PlaybackError> {
        self.processed.clear();
        self.chain.flush(&mut self.processed)?;
        self.writer
            .write(&self.processed, self.shared, self.options)?;
        self.writer.finish(self.shared, self.options)
    }

    fn seek_performed(&mut self, requested_ms: u64, actual_ms: u64) {
        self.chain.seek_performed(requested_ms, actual_ms);
        self.writer.reset(actual_ms);
    }
}

impl PcmSink for Pipeline<'_> {
    fn push(&mut self, samples: &[f32]) -> Result<(), PlaybackError> {
        self.shared.token.ensure_running()?;
        self.refresh_filters();
        self.processed.clear();
        self.chain.process(samples, &mut self.processed)?;
        self.writer
            .write(&self.processed, self.shared, self.options)
    }

    fn check_interrupted(&self) -> Result<(), PlaybackError> {
        self.shared.token.ensure_running()
    }
}

/// Cuts processed PCM into chunks, applies volume, encodes and buffers frames.
struct FrameWriter {
    format: Arc<AudioDataFormat>,
    encoder: Box<dyn AudioEncoder>,
    pending: Vec<i16>,
    samples_per_chunk: usize,
    base_timecode: u64,
    chunks_written: u64,
    ramp: VolumeRamp,
    volume_rebuild: bool,
    rebuilder: Option<VolumeRebuilder>,
}

impl FrameWriter {
    fn new(
        format: Arc<AudioDataFormat>,
        start_timecode: u64,
        volume: u16,
        settings: &ExecutorSettings,
    ) -> Result<Self, PlaybackError> {
        let encoder = codec::create_encoder(&format)?;
        let samples_per_chunk = format.samples_per_chunk();
        Ok(Self {
            format,
            encoder,
            pending: Vec::with_capacity(samples_per_chunk),
            samples_per_chunk,
            base_timecode: start_timecode,
            chunks_written: 0,
            ramp: VolumeRamp::new(volume, settings.volume_ramp_frames),
            volume_rebuild: settings.volume_rebuild,
            rebuilder: None,
        })
    }

    fn write(
        &mut self,
        samples: &[f32],
        shared: &ExecutorShared,
        options: &PlayerOptions,
    ) -> Result<(), PlaybackError> {
        for &s in samples {
            self.pending.push(f32_to_i16(s));
            if self.pending.len() == self.samples_per_chunk {
                self.emit(shared, options)?;
            }
        }
        Ok(())
    }

    /// Pad and emit the last partial chunk.
    fn finish(&mut self, shared: &ExecutorShared, options: &PlayerOptions) -> Result<(), PlaybackError> {
        if !self.pending.is_empty() {
            self.pending.resize(self.samples_per_chunk, 0);
            self.emit(shared, options)?;
        }
        Ok(())
    }

    fn reset(&mut self, timecode_ms: u64) {
        self.pending.clear();
        self.base_timecode = timecode_ms;
        self.chunks_written = 0;
    }

    fn emit(&mut self, shared: &ExecutorShared, options: &PlayerOptions) -> Result<(), PlaybackError> {
        self.observe_volume(shared, options.volume(), None);
        let volume = self.ramp.next_frame_volume();
        apply_volume(&mut self.pending, integer_multiplier(volume));

        let data = self.encoder.encode(&self.pending)?;
        self.pending.clear();

        let offset = self.chunks_written * self.format.chunk_sample_count as u64;
        let timecode = self.base_timecode + self.format.samples_to_ms(offset);
        self.chunks_written += 1;

        let mut frame = AudioFrame::new(timecode, data, volume, self.format.clone());
        loop {
            // A volume change while waiting for space is applied to the full buffer right away.
            let applied = self.ramp.target();
            let rebuild = self.volume_rebuild;
            let give_back = || rebuild && options.volume() != applied;
            match shared.buffer.put_unless(frame, &shared.token, give_back)? {
                None => break,
                Some(mut held) => {
                    self.observe_volume(shared, options.volume(), Some(&mut held));
                    frame = held;
                }
            }
        }
        shared.frame_produced();
        tracing::trace!(timecode_ms = timecode, "frame buffered");
        Ok(())
    }

    /// Pick up a volume change.
    ///
    /// With rebuilds on, buffered frames (followed by `held`, a frame not yet buffered) are
    /// re-encoded along the new ramp.
    fn observe_volume(&mut self, shared: &ExecutorShared, target: u16, held: Option<&mut AudioFrame>) {
        if target == self.ramp.target() {
            return;
        }
        tracing::debug!(from = self.ramp.target(), to = target, "volume change observed");
        if !self.volume_rebuild || !self.ensure_rebuilder(target) {
            self.ramp.set_target(target);
            return;
        }
        let Some(rebuilder) = self.rebuilder.as_mut() else {
            self.ramp.set_target(target);
            return;
        };

        let mut pass = RampedRebuild::new(rebuilder, &mut self.ramp, target);
        let frames = shared.buffer.rebuild(&mut pass);
        if let Some(frame) = held {
            *frame = pass.rebuild(frame.clone());
        }
        pass.finish();
        tracing::debug!(frames, volume = target, "buffered frames rebuilt");
    }

    fn ensure_rebuilder(&mut self, target: u16) -> bool {
        if self.rebuilder.is_some() {
            return true;
        }
        match VolumeRebuilder::new(&self.format, target) {
            Ok(r) => {
                self.rebuilder = Some(r);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot rebuild buffered frames");
                false
            }
        }
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        self.encoder.close();
    }
}
