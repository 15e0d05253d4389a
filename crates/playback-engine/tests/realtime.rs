mod common;

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{
    Tone, events, first_sample, kinds, pump_for, pump_until, stalling_track, test_config,
    wait_until,
};
use playback_engine::codec::f32_to_i16;
use playback_engine::filter::volume::integer_multiplier;
use playback_engine::{
    AudioFilter, AudioFrame, AudioTrackInfo, FilterFactory, OutputLoop, PcmFormat, PlaybackError, Player,
    PlayerConfig, PlayerEvent,
};

fn scaled(base: i16, volume: u16) -> i16 {
    (base as i64 * integer_multiplier(volume) as i64 / 10_000) as i16
}

#[test]
fn resume_delivers_buffered_frame_immediately() {
    let player = Player::new(test_config());
    player.pause();
    player.play_track(Tone::endless().track("paused")).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        player.status().buffered_frames == Some(10)
    }));
    assert!(player.provide().is_none());

    player.resume();
    let started = Instant::now();
    let frame = player.provide();
    assert!(frame.is_some());
    assert!(started.elapsed() < player.format().frame_duration());
    player.destroy();
}

#[test]
fn stalled_source_is_reported_once() {
    let player = Player::new(test_config());
    let rx = player.subscribe();
    let track = stalling_track("stall", 4);

    player.play_track(track.clone()).unwrap();
    let frames = pump_for(&player, Duration::from_millis(600));
    assert_eq!(frames.len(), 2);

    let stuck: Vec<_> = events(&rx)
        .into_iter()
        .filter_map(|e| match e {
            PlayerEvent::TrackStuck {
                track: t,
                threshold_ms,
                diagnostics,
            } => Some((t, threshold_ms, diagnostics)),
            _ => None,
        })
        .collect();
    assert_eq!(stuck.len(), 1);
    let (t, threshold_ms, diagnostics) = &stuck[0];
    assert_eq!(t, &track);
    assert_eq!(*threshold_ms, 150);
    assert!(diagnostics.as_deref().unwrap_or("").contains("frames_produced=2"));
    player.destroy();
}

#[test]
fn paused_player_never_reports_stuck() {
    let player = Player::new(test_config());
    let rx = player.subscribe();
    player.pause();
    player.play_track(stalling_track("stall", 0)).unwrap();

    pump_for(&player, Duration::from_millis(400));
    assert!(!kinds(&events(&rx)).contains(&"track_stuck"));

    player.resume();
    pump_for(&player, Duration::from_millis(400));
    assert_eq!(kinds(&events(&rx)), ["player_resume", "track_stuck"]);
    player.destroy();
}

#[test]
fn time_spent_paused_does_not_count_towards_stuck() {
    let player = Player::new(test_config());
    let rx = player.subscribe();
    player.pause();
    player.play_track(stalling_track("slow", 0)).unwrap();
    thread::sleep(Duration::from_millis(400));

    player.resume();
    pump_for(&player, Duration::from_millis(60));
    assert!(!kinds(&events(&rx)).contains(&"track_stuck"));

    pump_for(&player, Duration::from_millis(400));
    assert!(kinds(&events(&rx)).contains(&"track_stuck"));
    player.destroy();
}

#[test]
fn seek_delivers_discontinuity_without_stale_frames() {
    let player = Player::new(test_config());
    let rx = player.subscribe();
    let track = Tone::endless().track("seekable");

    player.play_track(track.clone()).unwrap();
    pump_until(&player, Duration::from_secs(5), |f| f.len() >= 3);
    player.seek_to(30_000).unwrap();

    let frames = pump_until(&player, Duration::from_secs(5), |f| f.len() >= 4);
    assert_eq!(frames.len(), 4);
    assert!(frames[0].is_discontinuity());
    let timecodes: Vec<u64> = frames.iter().map(AudioFrame::timecode).collect();
    assert_eq!(timecodes, [30_000, 30_020, 30_040, 30_060]);
    assert!(frames[1..].iter().all(|f| !f.is_discontinuity()));
    assert_eq!(track.position(), 30_060);

    let seeked: Vec<_> = events(&rx)
        .into_iter()
        .filter_map(|e| match e {
            PlayerEvent::TrackSeeked {
                requested_ms,
                actual_ms,
                ..
            } => Some((requested_ms, actual_ms)),
            _ => None,
        })
        .collect();
    assert_eq!(seeked, [(30_000, 30_000)]);
    player.destroy();
}

#[test]
fn back_to_back_seeks_land_on_the_last_one() {
    let player = Player::new(test_config());
    let track = Tone::endless().track("seekable");

    player.play_track(track.clone()).unwrap();
    pump_until(&player, Duration::from_secs(5), |f| !f.is_empty());
    player.seek_to(10_000).unwrap();
    track.set_position(20_000).unwrap();

    let frames = pump_until(&player, Duration::from_secs(5), |f| f.len() >= 2);
    assert_eq!(frames[0].timecode(), 20_000);
    assert!(frames[0].is_discontinuity());
    assert_eq!(frames[1].timecode(), 20_020);
    player.destroy();
}

#[test]
fn unseekable_stream_rejects_seek() {
    let player = Player::new(test_config());
    let mut info = AudioTrackInfo::new("live", "Live");
    info.is_stream = true;
    let track = Tone::endless().track_with_info(info);

    player.play_track(track).unwrap();
    assert!(matches!(player.seek_to(1000), Err(PlaybackError::NotSeekable)));
    player.destroy();
}

#[test]
fn volume_change_fades_through_buffered_frames() {
    let player = Player::new(test_config());
    player.pause();
    player.play_track(Tone::endless().track("loud")).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        player.status().buffered_frames == Some(10)
    }));

    // The worker is blocked on the full buffer; it must rebuild without waiting for space.
    player.set_volume(50);
    thread::sleep(Duration::from_millis(200));
    player.resume();

    let frames = pump_until(&player, Duration::from_secs(5), |f| f.len() >= 52);
    let volumes: Vec<u16> = frames.iter().map(AudioFrame::volume).collect();
    let expected: Vec<u16> = (50..=99).rev().chain([50, 50]).collect();
    assert_eq!(volumes, expected);

    let base = f32_to_i16(0.25);
    for frame in &frames {
        assert_eq!(first_sample(frame), scaled(base, frame.volume()));
    }
    player.destroy();
}

#[test]
fn without_rebuild_only_new_frames_change_volume() {
    let player = Player::new(PlayerConfig {
        volume_rebuild: false,
        ..test_config()
    });
    player.pause();
    player.play_track(Tone::endless().track("loud")).unwrap();
    assert!(wait_until(Duration::from_secs(2), || {
        player.status().buffered_frames == Some(10)
    }));

    player.set_volume(50);
    player.resume();
    let frames = pump_until(&player, Duration::from_secs(5), |f| f.len() >= 13);
    // Ten buffered frames plus the one blocked in the put.
    assert!(frames[..11].iter().all(|f| f.volume() == 100));
    assert_eq!(frames[11].volume(), 99);
    assert_eq!(frames[12].volume(), 98);
    player.destroy();
}

struct Halve;

impl AudioFilter for Halve {
    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<(), PlaybackError> {
        output.extend(input.iter().map(|s| s * 0.5));
        Ok(())
    }
}

struct HalveFactory;

impl FilterFactory for HalveFactory {
    fn build_chain(&self, _format: &PcmFormat) -> Vec<Box<dyn AudioFilter>> {
        vec![Box::new(Halve)]
    }
}

#[test]
fn filter_factory_hot_swaps_mid_track() {
    let player = Player::new(PlayerConfig {
        filter_hot_swap: true,
        ..test_config()
    });
    player.play_track(Tone::endless().track("eq")).unwrap();
    let before = pump_until(&player, Duration::from_secs(5), |f| f.len() >= 2);
    let base = first_sample(&before[0]);

    player.set_filter_factory(Some(Arc::new(HalveFactory)));
    let after = pump_until(&player, Duration::from_secs(5), |f| {
        f.last().is_some_and(|frame| (first_sample(frame) - base / 2).abs() <= 1)
    });
    assert!(after.last().is_some_and(|frame| (first_sample(frame) - base / 2).abs() <= 1));
    player.destroy();
}

#[test]
fn filter_factory_applies_to_next_track_without_hot_swap() {
    let player = Player::new(test_config());
    player.play_track(Tone::endless().track("first")).unwrap();
    let before = pump_until(&player, Duration::from_secs(5), |f| f.len() >= 2);
    let base = first_sample(&before[0]);

    player.set_filter_factory(Some(Arc::new(HalveFactory)));
    let during = pump_until(&player, Duration::from_secs(5), |f| f.len() >= 20);
    assert!(during.iter().all(|f| first_sample(f) == base));

    player.play_track(Tone::endless().track("second")).unwrap();
    let next = pump_until(&player, Duration::from_secs(5), |f| !f.is_empty());
    assert!((first_sample(&next[0]) - base / 2).abs() <= 1);
    player.destroy();
}

#[test]
fn mono_source_is_resampled_to_output_format() {
    let player = Player::new(test_config());
    let tone = Tone {
        rate: 44_100,
        channels: 1,
        ..Tone::finite(1000)
    };
    player.play_track(tone.track("mono")).unwrap();
    let frames = pump_until(&player, Duration::from_secs(10), |_| player.playing_track().is_none());

    // Exactly 48000 samples per channel: 50 frames of 960.
    assert_eq!(frames.len(), 50);
    let middle = &frames[25];
    let data = middle.data();
    let left = i16::from_le_bytes([data[400], data[401]]);
    let right = i16::from_le_bytes([data[402], data[403]]);
    assert_eq!(left, right);
    assert!((left - 8192).abs() < 300, "left sample {left}");
}

#[test]
fn output_loop_paces_frames_in_real_time() {
    let player = Player::new(test_config());
    let rx = player.subscribe();
    let (tx, delivered) = crossbeam_channel::unbounded();
    let output = OutputLoop::spawn(player.clone(), move |frame: AudioFrame| {
        let _ = tx.send(frame);
    })
    .unwrap();

    let started = Instant::now();
    player.play_track(Tone::finite(200).track("paced")).unwrap();
    let frames: Vec<AudioFrame> = (0..10)
        .filter_map(|_| delivered.recv_timeout(Duration::from_secs(2)).ok())
        .collect();
    let elapsed = started.elapsed();

    assert_eq!(frames.len(), 10);
    let timecodes: Vec<u64> = frames.iter().map(AudioFrame::timecode).collect();
    assert_eq!(timecodes, (0..10).map(|i| i * 20).collect::<Vec<_>>());
    assert!(elapsed >= Duration::from_millis(150), "delivered too fast: {elapsed:?}");

    assert!(wait_until(Duration::from_secs(2), || player.playing_track().is_none()));
    output.stop();
    assert_eq!(kinds(&events(&rx)), ["track_start", "track_end"]);
}
