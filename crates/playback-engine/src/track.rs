//! Playable track handle.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use playback_types::{AudioTrackInfo, TrackState};

use crate::error::PlaybackError;
use crate::executor::TrackExecutor;
use crate::provider::ProviderFactory;

static NEXT_TRACK_ID: AtomicU64 = AtomicU64::new(1);

type UserData = Arc<dyn Any + Send + Sync>;

/// One playable instance of a source.
///
/// Cloning the handle refers to the same instance; an instance plays at most once, use
/// [`make_clone`](Self::make_clone) to play the same source again.
#[derive(Clone)]
pub struct AudioTrack {
    inner: Arc<TrackInner>,
}

struct TrackInner {
    id: u64,
    info: AudioTrackInfo,
    factory: Arc<dyn ProviderFactory>,
    state: AtomicU8,
    position_ms: AtomicU64,
    started: AtomicBool,
    end_emitted: AtomicBool,
    executor: Mutex<Weak<TrackExecutor>>,
    user_data: Mutex<Option<UserData>>,
}

impl AudioTrack {
    pub fn new(info: AudioTrackInfo, factory: impl ProviderFactory + 'static) -> Self {
        Self::with_factory(info, Arc::new(factory))
    }

    pub fn with_factory(info: AudioTrackInfo, factory: Arc<dyn ProviderFactory>) -> Self {
        Self {
            inner: Arc::new(TrackInner {
                id: NEXT_TRACK_ID.fetch_add(1, Ordering::Relaxed),
                info,
                factory,
                state: AtomicU8::new(state_to_u8(TrackState::Idle)),
                position_ms: AtomicU64::new(0),
                started: AtomicBool::new(false),
                end_emitted: AtomicBool::new(false),
                executor: Mutex::new(Weak::new()),
                user_data: Mutex::new(None),
            }),
        }
    }

    /// Process-unique instance id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn info(&self) -> &AudioTrackInfo {
        &self.inner.info
    }

    pub fn identifier(&self) -> &str {
        &self.inner.info.identifier
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.inner.info.length_ms
    }

    pub fn state(&self) -> TrackState {
        state_from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Live streams cannot be seeked.
    pub fn is_seekable(&self) -> bool {
        !self.inner.info.is_stream
    }

    /// Timecode of the last delivered frame, or the start position before playback.
    pub fn position(&self) -> u64 {
        self.inner.position_ms.load(Ordering::Acquire)
    }

    /// Before playback: set the start position. While playing: seek.
    pub fn set_position(&self, position_ms: u64) -> Result<(), PlaybackError> {
        if let Some(executor) = self.inner.executor.lock().upgrade() {
            return executor.seek(position_ms);
        }
        if self.inner.started.load(Ordering::Acquire) {
            return Err(PlaybackError::NotRunning);
        }
        self.inner.position_ms.store(position_ms, Ordering::Release);
        Ok(())
    }

    /// Fresh, unplayed instance of the same source, carrying the same user data.
    pub fn make_clone(&self) -> AudioTrack {
        let clone = AudioTrack::with_factory(self.inner.info.clone(), self.inner.factory.clone());
        *clone.inner.user_data.lock() = self.inner.user_data.lock().clone();
        clone
    }

    pub fn set_user_data(&self, data: Option<UserData>) {
        *self.inner.user_data.lock() = data;
    }

    pub fn user_data(&self) -> Option<UserData> {
        self.inner.user_data.lock().clone()
    }

    /// Typed access to the user data slot.
    pub fn user_data_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.user_data().and_then(|d| d.downcast::<T>().ok())
    }

    pub fn has_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    pub(crate) fn factory(&self) -> &Arc<dyn ProviderFactory> {
        &self.inner.factory
    }

    pub(crate) fn set_state(&self, state: TrackState) {
        self.inner.state.store(state_to_u8(state), Ordering::Release);
    }

    pub(crate) fn set_position_internal(&self, position_ms: u64) {
        self.inner.position_ms.store(position_ms, Ordering::Release);
    }

    /// Claim this instance for playback. Fails if it was claimed before.
    pub(crate) fn mark_started(&self) -> Result<(), PlaybackError> {
        self.inner
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| PlaybackError::AlreadyPlayed)
    }

    /// `true` for exactly one caller: the one allowed to emit the end event.
    pub(crate) fn mark_end_emitted(&self) -> bool {
        self.inner
            .end_emitted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn attach_executor(&self, executor: &Arc<TrackExecutor>) {
        *self.inner.executor.lock() = Arc::downgrade(executor);
    }

    pub(crate) fn detach_executor(&self) {
        *self.inner.executor.lock() = Weak::new();
    }
}

impl PartialEq for AudioTrack {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for AudioTrack {}

impl fmt::Debug for AudioTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioTrack")
            .field("id", &self.inner.id)
            .field("identifier", &self.inner.info.identifier)
            .field("state", &self.state())
            .field("position_ms", &self.position())
            .finish()
    }
}

fn state_to_u8(state: TrackState) -> u8 {
    match state {
        TrackState::Idle => 0,
        TrackState::Initializing => 1,
        TrackState::Playing => 2,
        TrackState::Paused => 3,
        TrackState::Seeking => 4,
        TrackState::Stopping => 5,
        TrackState::Finished => 6,
        TrackState::Errored => 7,
    }
}

fn state_from_u8(raw: u8) -> TrackState {
    match raw {
        1 => TrackState::Initializing,
        2 => TrackState::Playing,
        3 => TrackState::Paused,
        4 => TrackState::Seeking,
        5 => TrackState::Stopping,
        6 => TrackState::Finished,
        7 => TrackState::Errored,
        _ => TrackState::Idle,
    }
}
