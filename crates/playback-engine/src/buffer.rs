//! Bounded frame buffer between a track worker and the player's output side.
//!
//! The buffer is the only object both threads touch:
//! - the track worker `put`s encoded frames (blocking while full: backpressure)
//! - the output loop `take`s them in insertion order (blocking while empty)
//!
//! All state lives under one mutex with a single [`Condvar`] used as a general "state changed"
//! signal. Blocking waits are cancellable through a [`CancelToken`]; whoever raises the token
//! calls [`FrameBuffer::wake_waiters`] afterwards.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};

use crate::cancel::CancelToken;
use crate::error::PlaybackError;
use crate::format::{AudioDataFormat, AudioFrame};

/// Rewrites a buffered frame in place (volume rebuilds).
///
/// Implementations must always return a frame; on failure they return the input unchanged so
/// that a rebuild never drops audio.
pub trait FrameRebuilder {
    fn rebuild(&mut self, frame: AudioFrame) -> AudioFrame;
}

pub struct FrameBuffer {
    format: Arc<AudioDataFormat>,
    capacity: usize,
    inner: Mutex<BufferInner>,
    cv: Condvar,
    buffered: AtomicU64,
    low_watermark_ms: AtomicU64,
}

struct BufferInner {
    frames: VecDeque<AudioFrame>,
    /// No more frames will be produced.
    terminal: bool,
    /// Pending clear marker: the next insert discards everything older.
    clear_on_insert: bool,
    received_frames: bool,
    last_input_timecode: Option<u64>,
}

impl FrameBuffer {
    /// Buffer holding at most `capacity` frames (at least one).
    pub fn new(format: Arc<AudioDataFormat>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            format,
            capacity,
            inner: Mutex::new(BufferInner {
                frames: VecDeque::with_capacity(capacity),
                terminal: false,
                clear_on_insert: false,
                received_frames: false,
                last_input_timecode: None,
            }),
            cv: Condvar::new(),
            buffered: AtomicU64::new(0),
            low_watermark_ms: AtomicU64::new(0),
        }
    }

    /// Buffer sized to hold `duration_ms` of audio in `format`.
    pub fn with_duration(format: Arc<AudioDataFormat>, duration_ms: u64) -> Self {
        let capacity = format.frames_for_duration(duration_ms);
        Self::new(format, capacity)
    }

    pub fn format(&self) -> &Arc<AudioDataFormat> {
        &self.format
    }

    pub fn full_capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.len()
    }

    /// Lock-free gauge of buffered frames (best-effort snapshot).
    pub fn buffered_frames(&self) -> u64 {
        self.buffered.load(Ordering::Relaxed)
    }

    pub fn has_received_frames(&self) -> bool {
        self.inner.lock().received_frames
    }

    pub fn last_input_timecode(&self) -> Option<u64> {
        self.inner.lock().last_input_timecode
    }

    pub fn is_terminal(&self) -> bool {
        self.inner.lock().terminal
    }

    /// Append a frame, blocking while the buffer is full.
    ///
    /// Returns `Err(Interrupted)` without touching the buffer if `token` is raised before or
    /// while waiting. A pending clear marker is honoured here: older frames are dropped and the
    /// inserted frame is tagged as a discontinuity.
    pub fn put(&self, frame: AudioFrame, token: &CancelToken) -> Result<(), PlaybackError> {
        self.put_unless(frame, token, || false).map(|_| ())
    }

    /// Like [`put`](Self::put), but while waiting for space the frame is handed back as soon as
    /// `give_back` returns `true`. Whoever makes it true calls [`wake_waiters`](Self::wake_waiters).
    ///
    /// Returns `Ok(None)` once the frame is buffered.
    pub fn put_unless(
        &self,
        frame: AudioFrame,
        token: &CancelToken,
        give_back: impl Fn() -> bool,
    ) -> Result<Option<AudioFrame>, PlaybackError> {
        let mut g = self.inner.lock();
        loop {
            token.ensure_running()?;
            if g.clear_on_insert || g.frames.len() < self.capacity {
                break;
            }
            if give_back() {
                return Ok(Some(frame));
            }
            self.cv.wait(&mut g);
        }

        let frame = if g.clear_on_insert {
            g.frames.clear();
            g.clear_on_insert = false;
            frame.into_discontinuity()
        } else {
            frame
        };

        assert!(
            g.frames.len() < self.capacity,
            "frame buffer over capacity: {} frames, capacity {}",
            g.frames.len(),
            self.capacity
        );
        g.last_input_timecode = Some(frame.timecode());
        g.received_frames = true;
        g.frames.push_back(frame);
        self.buffered.store(g.frames.len() as u64, Ordering::Relaxed);

        drop(g);
        self.cv.notify_all();
        Ok(None)
    }

    /// Next frame in order, blocking while empty.
    ///
    /// Once the buffer is terminal and drained this returns a terminator frame, repeatedly.
    pub fn take(&self) -> AudioFrame {
        let mut g = self.inner.lock();
        loop {
            if let Some(frame) = self.pop_locked(&mut g) {
                drop(g);
                self.after_pop();
                return frame;
            }
            if g.terminal {
                return AudioFrame::terminator(self.format.clone());
            }
            self.cv.wait(&mut g);
        }
    }

    /// Like [`take`](Self::take) but gives up after `timeout`.
    pub fn take_timeout(&self, timeout: Duration) -> Option<AudioFrame> {
        let deadline = Instant::now() + timeout;
        let mut g = self.inner.lock();
        loop {
            if let Some(frame) = self.pop_locked(&mut g) {
                drop(g);
                self.after_pop();
                return Some(frame);
            }
            if g.terminal {
                return Some(AudioFrame::terminator(self.format.clone()));
            }
            if self.cv.wait_until(&mut g, deadline).timed_out() {
                return None;
            }
        }
    }

    /// Non-blocking variant; `None` when nothing is buffered and the buffer is not terminal.
    pub fn try_take(&self) -> Option<AudioFrame> {
        self.take_timeout(Duration::ZERO)
    }

    /// Discard every buffered frame. Safe while a `put` is blocked; it will proceed.
    pub fn clear(&self) {
        let mut g = self.inner.lock();
        g.frames.clear();
        self.buffered.store(0, Ordering::Relaxed);
        drop(g);
        self.cv.notify_all();
    }

    /// Set the pending clear marker without dropping anything yet.
    pub fn set_clear_on_insert(&self) {
        self.inner.lock().clear_on_insert = true;
    }

    /// Clear now and set the clear marker, so that frames from before a seek can never be
    /// observed after it.
    pub fn clear_for_seek(&self) {
        let mut g = self.inner.lock();
        g.frames.clear();
        g.clear_on_insert = true;
        self.buffered.store(0, Ordering::Relaxed);
        drop(g);
        self.cv.notify_all();
    }

    /// Mark that no further frames will be produced.
    pub fn set_terminal(&self) {
        self.inner.lock().terminal = true;
        self.cv.notify_all();
    }

    /// Wake every blocked `put`/`take` so they re-check their conditions.
    pub fn wake_waiters(&self) {
        // Taking the lock orders this wake-up after any in-progress condition check.
        let _g = self.inner.lock();
        self.cv.notify_all();
    }

    /// Replace every buffered frame with `rebuilder(frame)`, atomically with respect to `take`.
    ///
    /// Returns the number of frames rebuilt.
    pub fn rebuild(&self, rebuilder: &mut dyn FrameRebuilder) -> usize {
        let mut g = self.inner.lock();
        let frames = std::mem::take(&mut g.frames);
        let count = frames.len();
        g.frames = frames.into_iter().map(|f| rebuilder.rebuild(f)).collect();
        count
    }

    /// Block until the buffer is terminal and drained, or `timeout` elapses.
    ///
    /// Returns `true` if the buffer terminated.
    pub fn wait_for_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut g = self.inner.lock();
        loop {
            if g.terminal && g.frames.is_empty() {
                return true;
            }
            if self.cv.wait_until(&mut g, deadline).timed_out() {
                return g.terminal && g.frames.is_empty();
            }
        }
    }

    fn pop_locked(&self, g: &mut BufferInner) -> Option<AudioFrame> {
        let frame = g.frames.pop_front()?;
        self.buffered.store(g.frames.len() as u64, Ordering::Relaxed);
        Some(frame)
    }

    fn after_pop(&self) {
        self.cv.notify_all();
        self.log_low_watermark();
    }

    fn log_low_watermark(&self) {
        let threshold = (self.capacity / 8).max(1) as u64;
        let queued = self.buffered.load(Ordering::Relaxed);
        if queued > 0 && queued < threshold {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_else(|_| Duration::from_millis(0))
                .as_millis() as u64;
            let last = self.low_watermark_ms.load(Ordering::Relaxed);
            if now.saturating_sub(last) > 1000 {
                self.low_watermark_ms.store(now, Ordering::Relaxed);
                tracing::debug!(
                    queued_frames = queued,
                    threshold_frames = threshold,
                    "frame buffer low watermark"
                );
            }
        }
    }
}
