//! Player lifecycle events.
//!
//! Subscribers receive events on their own unbounded channel; a dropped receiver is pruned on
//! the next publish.

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use playback_types::TrackEndReason;

use crate::error::TrackException;
use crate::track::AudioTrack;

#[derive(Clone, Debug)]
pub enum PlayerEvent {
    TrackStart {
        track: AudioTrack,
    },
    /// Fires exactly once per started track.
    TrackEnd {
        track: AudioTrack,
        reason: TrackEndReason,
    },
    /// Precedes the `TrackEnd` of a failed track.
    TrackException {
        track: AudioTrack,
        exception: TrackException,
    },
    /// No frame was produced for longer than `threshold_ms` while not paused.
    TrackStuck {
        track: AudioTrack,
        threshold_ms: u64,
        diagnostics: Option<String>,
    },
    /// The first frame after a seek was delivered.
    TrackSeeked {
        track: AudioTrack,
        requested_ms: u64,
        actual_ms: u64,
    },
    PlayerPause,
    PlayerResume,
}

impl PlayerEvent {
    pub fn track(&self) -> Option<&AudioTrack> {
        match self {
            PlayerEvent::TrackStart { track }
            | PlayerEvent::TrackEnd { track, .. }
            | PlayerEvent::TrackException { track, .. }
            | PlayerEvent::TrackStuck { track, .. }
            | PlayerEvent::TrackSeeked { track, .. } => Some(track),
            PlayerEvent::PlayerPause | PlayerEvent::PlayerResume => None,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PlayerEvent::TrackStart { .. } => "track_start",
            PlayerEvent::TrackEnd { .. } => "track_end",
            PlayerEvent::TrackException { .. } => "track_exception",
            PlayerEvent::TrackStuck { .. } => "track_stuck",
            PlayerEvent::TrackSeeked { .. } => "track_seeked",
            PlayerEvent::PlayerPause => "player_pause",
            PlayerEvent::PlayerResume => "player_resume",
        }
    }
}

#[derive(Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<Sender<PlayerEvent>>>,
}

impl EventBus {
    pub(crate) fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub(crate) fn publish(&self, event: PlayerEvent) {
        tracing::trace!(event = event.kind(), "player event");
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::default();
        let keep = bus.subscribe();
        let gone = bus.subscribe();
        drop(gone);

        bus.publish(PlayerEvent::PlayerPause);
        assert_eq!(bus.subscribers.lock().len(), 1);
        assert!(matches!(keep.try_recv(), Ok(PlayerEvent::PlayerPause)));
    }

    #[test]
    fn every_subscriber_sees_every_event() {
        let bus = EventBus::default();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.publish(PlayerEvent::PlayerPause);
        bus.publish(PlayerEvent::PlayerResume);
        assert_eq!(a.try_iter().count(), 2);
        assert_eq!(b.try_iter().map(|e| e.kind()).collect::<Vec<_>>(), ["player_pause", "player_resume"]);
    }
}
