//! Real-time output loop.
//!
//! Pulls one frame per frame duration from a [`Player`] and hands it to a [`FrameConsumer`].
//! Runs on its own thread and stops when dropped.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, bounded, select, tick};

use crate::error::PlaybackError;
use crate::format::AudioFrame;
use crate::player::Player;

/// Receives every delivered frame, on the output loop's thread.
pub trait FrameConsumer: Send {
    fn consume(&mut self, frame: AudioFrame);
}

impl<F> FrameConsumer for F
where
    F: FnMut(AudioFrame) + Send,
{
    fn consume(&mut self, frame: AudioFrame) {
        self(frame)
    }
}

pub struct OutputLoop {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl OutputLoop {
    /// Start delivering frames from `player` to `consumer`.
    pub fn spawn<C>(player: Player, mut consumer: C) -> Result<Self, PlaybackError>
    where
        C: FrameConsumer + 'static,
    {
        let interval = player.format().frame_duration();
        // Block at most half a tick for a starved buffer so that ticks are not skipped.
        let poll = interval / 2;
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let handle = thread::Builder::new()
            .name("player-output".to_string())
            .spawn(move || {
                tracing::debug!(interval_ms = interval.as_millis() as u64, "output loop started");
                let ticker = tick(interval);
                let mut delivered: u64 = 0;
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            if let Some(frame) = player.provide_timeout(poll) {
                                consumer.consume(frame);
                                delivered += 1;
                            }
                        }
                    }
                }
                tracing::debug!(delivered, "output loop stopped");
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the loop and wait for its thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("output loop thread panicked");
            }
        }
    }
}

impl Drop for OutputLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
