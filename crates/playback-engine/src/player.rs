//! User-facing player.
//!
//! A [`Player`] holds at most one active track. Frames are pulled from the active track's buffer
//! with [`Player::provide`] / [`Player::provide_timeout`], either directly by the caller or by
//! an [`OutputLoop`](crate::OutputLoop) ticking at the frame duration.
//!
//! Track end events are guarded twice: the active slot is only ever emptied under its lock, and
//! each track instance lets exactly one caller claim its end event.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use playback_types::TrackEndReason;

use crate::config::PlayerConfig;
use crate::error::PlaybackError;
use crate::event::{EventBus, PlayerEvent};
use crate::executor::{ExecutorOutcome, ExecutorSettings, TrackExecutor};
use crate::filter::FilterFactory;
use crate::format::{AudioDataFormat, AudioFrame};
use crate::options::PlayerOptions;
use crate::track::AudioTrack;

/// Cheaply cloneable handle; clones control the same player.
#[derive(Clone)]
pub struct Player {
    inner: Arc<PlayerInner>,
}

pub(crate) struct PlayerInner {
    pub(crate) config: PlayerConfig,
    pub(crate) format: Arc<AudioDataFormat>,
    pub(crate) options: Arc<PlayerOptions>,
    pub(crate) active: Mutex<Option<ActiveTrack>>,
    pub(crate) paused: AtomicBool,
    events: EventBus,
    stuck_reported: AtomicBool,
    pub(crate) last_end_reason: Mutex<Option<TrackEndReason>>,
    destroyed: AtomicBool,
}

pub(crate) struct ActiveTrack {
    pub(crate) track: AudioTrack,
    pub(crate) executor: Arc<TrackExecutor>,
}

impl Player {
    pub fn new(config: PlayerConfig) -> Self {
        let config = config.normalized();
        let format = Arc::new(config.output_format.clone());
        let options = Arc::new(PlayerOptions::new(config.frame_buffer_duration_ms));
        Self {
            inner: Arc::new(PlayerInner {
                config,
                format,
                options,
                active: Mutex::new(None),
                paused: AtomicBool::new(false),
                events: EventBus::default(),
                stuck_reported: AtomicBool::new(false),
                last_end_reason: Mutex::new(None),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn inner(&self) -> &PlayerInner {
        &self.inner
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.inner.config
    }

    /// Encoding of every delivered frame.
    pub fn format(&self) -> &Arc<AudioDataFormat> {
        &self.inner.format
    }

    pub fn options(&self) -> &Arc<PlayerOptions> {
        &self.inner.options
    }

    /// New event receiver; sees every event published from now on.
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    /// Play `track`, replacing (and ending with `Replaced`) whatever is playing.
    pub fn play_track(&self, track: AudioTrack) -> Result<(), PlaybackError> {
        self.start_track(track, false).map(|_| ())
    }

    /// Like [`play_track`](Self::play_track); with `no_interrupt` it refuses to replace an
    /// active track and returns `Ok(false)`.
    pub fn start_track(&self, track: AudioTrack, no_interrupt: bool) -> Result<bool, PlaybackError> {
        if self.inner.destroyed.load(Ordering::Acquire) {
            return Err(PlaybackError::NotRunning);
        }

        let mut active = self.inner.active.lock();
        if no_interrupt && active.is_some() {
            return Ok(false);
        }
        track.mark_started()?;

        if let Some(previous) = active.take() {
            self.end_track(previous, TrackEndReason::Replaced);
        }

        let settings = ExecutorSettings::from_config(
            &self.inner.config,
            self.inner.options.frame_buffer_duration_ms(),
        );
        let executor = match TrackExecutor::start(
            track.clone(),
            self.inner.format.clone(),
            self.inner.options.clone(),
            settings,
        ) {
            Ok(executor) => executor,
            Err(e) => {
                tracing::error!(track = %track.identifier(), error = %e, "cannot start track worker");
                self.inner.events.publish(PlayerEvent::TrackException {
                    track: track.clone(),
                    exception: crate::error::TrackException::from_error(&e),
                });
                self.publish_end(&track, TrackEndReason::LoadFailed);
                return Err(e);
            }
        };

        *active = Some(ActiveTrack {
            track: track.clone(),
            executor,
        });
        self.inner.stuck_reported.store(false, Ordering::Release);
        tracing::info!(
            track = %track.identifier(),
            title = %track.info().title,
            "track started"
        );
        self.inner.events.publish(PlayerEvent::TrackStart { track });
        Ok(true)
    }

    /// Stop the active track with reason `Stopped`. No-op when idle.
    pub fn stop_track(&self) {
        let mut active = self.inner.active.lock();
        if let Some(previous) = active.take() {
            self.end_track(previous, TrackEndReason::Stopped);
        }
    }

    /// Alias of [`stop_track`](Self::stop_track).
    pub fn stop(&self) {
        self.stop_track();
    }

    pub fn playing_track(&self) -> Option<AudioTrack> {
        self.inner.active.lock().as_ref().map(|a| a.track.clone())
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Toggle whether frames are delivered. The worker keeps filling the buffer while paused.
    pub fn set_paused(&self, paused: bool) {
        if self.inner.paused.swap(paused, Ordering::AcqRel) == paused {
            return;
        }
        if let Some(active) = self.inner.active.lock().as_ref() {
            let state = if paused {
                playback_types::TrackState::Paused
            } else {
                playback_types::TrackState::Playing
            };
            if active.track.state() == playback_types::TrackState::Playing
                || active.track.state() == playback_types::TrackState::Paused
            {
                active.track.set_state(state);
            }
            if !paused {
                active.executor.restart_stuck_clock();
            }
        }
        tracing::info!(paused, "player paused state changed");
        self.inner.events.publish(if paused {
            PlayerEvent::PlayerPause
        } else {
            PlayerEvent::PlayerResume
        });
    }

    pub fn pause(&self) {
        self.set_paused(true);
    }

    pub fn resume(&self) {
        self.set_paused(false);
    }

    /// Seek the active track.
    pub fn seek_to(&self, timecode_ms: u64) -> Result<(), PlaybackError> {
        let executor = self
            .active_executor()
            .ok_or(PlaybackError::NoActiveTrack)?;
        executor.seek(timecode_ms)
    }

    pub fn volume(&self) -> u16 {
        self.inner.options.volume()
    }

    /// Set the volume (`0..=1000`, 100 = unity). Applies from the next produced frame; buffered
    /// frames are rebuilt when `volume_rebuild` is on.
    pub fn set_volume(&self, volume: u16) {
        let stored = self.inner.options.set_volume(volume);
        tracing::debug!(volume = stored, "volume set");
        if let Some(executor) = self.active_executor() {
            executor.volume_changed();
        }
    }

    /// Replace the user filter factory. Applies to the next track, or mid-track with
    /// `filter_hot_swap`.
    pub fn set_filter_factory(&self, factory: Option<Arc<dyn FilterFactory>>) {
        self.inner.options.set_filter_factory(factory);
    }

    /// Frame buffer size for tracks started from now on.
    pub fn set_frame_buffer_duration(&self, duration_ms: u64) {
        self.inner.options.set_frame_buffer_duration_ms(duration_ms);
    }

    /// Next frame if one is ready right now.
    pub fn provide(&self) -> Option<AudioFrame> {
        self.provide_timeout(Duration::ZERO)
    }

    /// Next frame, waiting up to `timeout` for the worker.
    ///
    /// Returns `None` while paused, when idle, on timeout and when the active track just ended
    /// (after publishing its end events).
    pub fn provide_timeout(&self, timeout: Duration) -> Option<AudioFrame> {
        if self.is_paused() {
            return None;
        }
        let executor = self.active_executor()?;
        let track = executor.track().clone();

        match executor.buffer().take_timeout(timeout) {
            None => {
                self.check_stuck(&track, &executor);
                None
            }
            Some(frame) if frame.is_terminator() => {
                self.handle_track_exit(&track, &executor);
                None
            }
            Some(frame) => {
                if !self.is_active(&track) {
                    return None;
                }
                self.inner.stuck_reported.store(false, Ordering::Release);
                track.set_position_internal(frame.timecode());
                if frame.is_discontinuity() {
                    if let Some(report) = executor.take_seek_report() {
                        self.inner.events.publish(PlayerEvent::TrackSeeked {
                            track: track.clone(),
                            requested_ms: report.requested_ms,
                            actual_ms: report.actual_ms,
                        });
                    }
                }
                Some(frame)
            }
        }
    }

    /// End the active track with `Cleanup` and refuse further tracks.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut active = self.inner.active.lock();
        if let Some(previous) = active.take() {
            let executor = previous.executor.clone();
            self.end_track(previous, TrackEndReason::Cleanup);
            drop(active);
            let timeout = Duration::from_millis(self.inner.config.worker_join_timeout_ms);
            if !executor.wait_for_exit(timeout) {
                tracing::warn!(
                    track = %executor.track().identifier(),
                    timeout_ms = timeout.as_millis() as u64,
                    "track worker did not exit in time"
                );
            }
        }
        tracing::info!("player destroyed");
    }

    pub fn last_end_reason(&self) -> Option<TrackEndReason> {
        *self.inner.last_end_reason.lock()
    }

    fn active_executor(&self) -> Option<Arc<TrackExecutor>> {
        self.inner
            .active
            .lock()
            .as_ref()
            .map(|a| a.executor.clone())
    }

    fn is_active(&self, track: &AudioTrack) -> bool {
        self.inner
            .active
            .lock()
            .as_ref()
            .is_some_and(|a| &a.track == track)
    }

    /// Stop a track that was removed from the active slot and publish its end.
    fn end_track(&self, previous: ActiveTrack, reason: TrackEndReason) {
        previous.executor.stop();
        previous.track.detach_executor();
        tracing::info!(track = %previous.track.identifier(), ?reason, "track ended");
        self.publish_end(&previous.track, reason);
    }

    fn publish_end(&self, track: &AudioTrack, reason: TrackEndReason) {
        if track.mark_end_emitted() {
            *self.inner.last_end_reason.lock() = Some(reason);
            self.inner.events.publish(PlayerEvent::TrackEnd {
                track: track.clone(),
                reason,
            });
        }
    }

    /// The worker exited and its buffer drained.
    fn handle_track_exit(&self, track: &AudioTrack, executor: &Arc<TrackExecutor>) {
        let mut active = self.inner.active.lock();
        if !active.as_ref().is_some_and(|a| &a.track == track) {
            return;
        }
        *active = None;
        track.detach_executor();

        match executor.outcome() {
            Some(ExecutorOutcome::Failed(exception)) => {
                tracing::warn!(track = %track.identifier(), error = %exception, "track ended with failure");
                self.inner.events.publish(PlayerEvent::TrackException {
                    track: track.clone(),
                    exception,
                });
                self.publish_end(track, TrackEndReason::LoadFailed);
            }
            Some(ExecutorOutcome::Stopped) => self.publish_end(track, TrackEndReason::Stopped),
            Some(ExecutorOutcome::Finished) | None => {
                tracing::info!(track = %track.identifier(), "track finished");
                self.publish_end(track, TrackEndReason::Finished);
            }
        }
    }

    fn check_stuck(&self, track: &AudioTrack, executor: &TrackExecutor) {
        if self.is_paused() || executor.is_finished() {
            return;
        }
        let threshold_ms = self.inner.config.stuck_threshold_ms;
        let idle_ms = executor.millis_since_last_frame();
        if idle_ms <= threshold_ms {
            return;
        }
        if self
            .inner
            .stuck_reported
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        if !self.is_active(track) {
            return;
        }
        let diagnostics = executor.diagnostics();
        tracing::warn!(
            track = %track.identifier(),
            threshold_ms,
            idle_ms,
            diagnostics = %diagnostics,
            "track appears stuck"
        );
        self.inner.events.publish(PlayerEvent::TrackStuck {
            track: track.clone(),
            threshold_ms,
            diagnostics: Some(diagnostics),
        });
    }
}
