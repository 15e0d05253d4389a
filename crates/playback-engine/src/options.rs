//! Live-mutable player options read by track workers.
//!
//! Workers read these once per processing cycle. Volume and the filter generation are plain
//! atomics; the filter factory itself is only locked when the generation moved.

use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::filter::FilterFactory;
use crate::filter::volume::{MAX_VOLUME, UNITY_VOLUME};

pub struct PlayerOptions {
    volume: AtomicU16,
    filter_factory: Mutex<Option<Arc<dyn FilterFactory>>>,
    filter_generation: AtomicU64,
    frame_buffer_duration_ms: AtomicU64,
}

impl PlayerOptions {
    pub fn new(frame_buffer_duration_ms: u64) -> Self {
        Self {
            volume: AtomicU16::new(UNITY_VOLUME),
            filter_factory: Mutex::new(None),
            filter_generation: AtomicU64::new(0),
            frame_buffer_duration_ms: AtomicU64::new(frame_buffer_duration_ms),
        }
    }

    pub fn volume(&self) -> u16 {
        self.volume.load(Ordering::Relaxed)
    }

    /// Set the volume, clamped to `0..=1000`. Returns the stored value.
    pub fn set_volume(&self, volume: u16) -> u16 {
        let volume = volume.min(MAX_VOLUME);
        self.volume.store(volume, Ordering::Relaxed);
        volume
    }

    pub fn filter_factory(&self) -> Option<Arc<dyn FilterFactory>> {
        self.filter_factory.lock().clone()
    }

    pub fn set_filter_factory(&self, factory: Option<Arc<dyn FilterFactory>>) {
        let mut slot = self.filter_factory.lock();
        *slot = factory;
        self.filter_generation.fetch_add(1, Ordering::Release);
    }

    /// Bumped on every filter factory change.
    pub fn filter_generation(&self) -> u64 {
        self.filter_generation.load(Ordering::Acquire)
    }

    /// Factory together with the generation it belongs to.
    pub(crate) fn filter_snapshot(&self) -> (u64, Option<Arc<dyn FilterFactory>>) {
        let slot = self.filter_factory.lock();
        (self.filter_generation.load(Ordering::Acquire), slot.clone())
    }

    pub fn frame_buffer_duration_ms(&self) -> u64 {
        self.frame_buffer_duration_ms.load(Ordering::Relaxed)
    }

    pub fn set_frame_buffer_duration_ms(&self, duration_ms: u64) {
        self.frame_buffer_duration_ms
            .store(duration_ms.max(1), Ordering::Relaxed);
    }
}
