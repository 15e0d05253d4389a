//! Player status snapshot.

use std::sync::atomic::Ordering;

use playback_types::PlayerStatus;

use crate::player::Player;

impl Player {
    /// Point-in-time view of the player; fields may be mutually slightly stale.
    pub fn status(&self) -> PlayerStatus {
        let inner = self.inner();
        let mut status = PlayerStatus {
            paused: inner.paused.load(Ordering::Acquire),
            volume: inner.options.volume(),
            end_reason: *inner.last_end_reason.lock(),
            ..PlayerStatus::default()
        };

        if let Some(active) = inner.active.lock().as_ref() {
            let track = &active.track;
            let buffer = active.executor.buffer();
            status.now_playing = Some(track.identifier().to_string());
            status.title = Some(track.info().title.clone());
            status.track_state = Some(track.state());
            status.position_ms = Some(track.position());
            status.duration_ms = track.duration_ms();
            status.buffered_frames = Some(buffer.buffered_frames());
            status.buffer_capacity_frames = Some(buffer.full_capacity() as u64);
        }
        status
    }
}
