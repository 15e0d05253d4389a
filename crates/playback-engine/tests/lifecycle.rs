mod common;

use std::time::Duration;

use common::{Tone, end_events, events, kinds, pump_for, pump_until, test_config, wait_until};
use playback_engine::{Player, PlayerEvent, Severity, TrackEndReason, TrackState};

#[test]
fn finished_track_ends_exactly_once() {
    let player = Player::new(test_config());
    let rx = player.subscribe();
    let tone = Tone::finite(200);
    let track = tone.track("finite");

    player.play_track(track.clone()).unwrap();
    let frames = pump_until(&player, Duration::from_secs(5), |_| player.playing_track().is_none());
    pump_for(&player, Duration::from_millis(100));

    assert_eq!(frames.len(), 10);
    assert_eq!(frames.first().map(|f| f.timecode()), Some(0));
    assert_eq!(frames.last().map(|f| f.timecode()), Some(180));

    let seen = events(&rx);
    assert_eq!(kinds(&seen), ["track_start", "track_end"]);
    assert_eq!(end_events(&seen, &track), [TrackEndReason::Finished]);
    assert_eq!(player.last_end_reason(), Some(TrackEndReason::Finished));
    assert_eq!(track.state(), TrackState::Finished);
    assert!(wait_until(Duration::from_secs(1), || tone.close_count() == 1));
}

#[test]
fn stopped_track_ends_exactly_once() {
    let player = Player::new(test_config());
    let rx = player.subscribe();
    let tone = Tone::endless();
    let track = tone.track("endless");

    player.play_track(track.clone()).unwrap();
    let frames = pump_until(&player, Duration::from_secs(5), |f| f.len() >= 3);
    assert_eq!(frames.len(), 3);

    player.stop_track();
    player.stop_track();
    assert!(player.provide_timeout(Duration::from_millis(50)).is_none());
    pump_for(&player, Duration::from_millis(100));

    let seen = events(&rx);
    assert_eq!(end_events(&seen, &track), [TrackEndReason::Stopped]);
    assert!(player.playing_track().is_none());
    assert!(wait_until(Duration::from_secs(2), || tone.close_count() == 1));
}

#[test]
fn format_error_reports_exception_before_end() {
    let player = Player::new(test_config());
    let rx = player.subscribe();
    let tone = Tone {
        fail_at_ms: Some(100),
        ..Tone::endless()
    };
    let track = tone.track("truncated");

    player.play_track(track.clone()).unwrap();
    let frames = pump_until(&player, Duration::from_secs(5), |_| player.playing_track().is_none());
    pump_for(&player, Duration::from_millis(100));

    // Everything produced before the failure is still delivered.
    assert_eq!(frames.len(), 5);

    let seen = events(&rx);
    assert_eq!(kinds(&seen), ["track_start", "track_exception", "track_end"]);
    match &seen[1] {
        PlayerEvent::TrackException { track: t, exception } => {
            assert_eq!(t, &track);
            assert_eq!(exception.severity, Severity::Common);
            assert!(exception.message.contains("stream truncated"));
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(end_events(&seen, &track), [TrackEndReason::LoadFailed]);
    assert_eq!(track.state(), TrackState::Errored);
}

#[test]
fn replacing_a_track_ends_it_with_replaced() {
    let player = Player::new(test_config());
    let rx = player.subscribe();
    let first = Tone::endless().track("first");
    let second = Tone::endless().track("second");

    player.play_track(first.clone()).unwrap();
    pump_until(&player, Duration::from_secs(5), |f| f.len() >= 2);
    player.play_track(second.clone()).unwrap();
    pump_until(&player, Duration::from_secs(5), |f| f.len() >= 2);
    player.stop_track();

    let seen = events(&rx);
    assert_eq!(
        kinds(&seen),
        ["track_start", "track_end", "track_start", "track_end"]
    );
    assert_eq!(end_events(&seen, &first), [TrackEndReason::Replaced]);
    assert_eq!(end_events(&seen, &second), [TrackEndReason::Stopped]);
    assert!(!TrackEndReason::Replaced.may_start_next());
}

#[test]
fn no_interrupt_leaves_active_track_alone() {
    let player = Player::new(test_config());
    let playing = Tone::endless().track("playing");
    let waiting = Tone::endless().track("waiting");

    assert!(player.start_track(playing.clone(), true).unwrap());
    assert!(!player.start_track(waiting.clone(), true).unwrap());
    assert_eq!(player.playing_track(), Some(playing));
    assert!(!waiting.has_started());
    player.destroy();
}

#[test]
fn load_failure_ends_track_with_load_failed() {
    let player = Player::new(test_config());
    let rx = player.subscribe();
    let track = playback_engine::AudioTrack::new(
        playback_engine::AudioTrackInfo::new("missing", "Missing"),
        || -> Result<Box<dyn playback_engine::FrameProvider>, playback_engine::PlaybackError> {
            Err(playback_engine::FormatError::new("no such stream").into())
        },
    );

    player.play_track(track.clone()).unwrap();
    pump_until(&player, Duration::from_secs(5), |_| player.playing_track().is_none());

    let seen = events(&rx);
    assert_eq!(kinds(&seen), ["track_start", "track_exception", "track_end"]);
    assert_eq!(end_events(&seen, &track), [TrackEndReason::LoadFailed]);
}

#[test]
fn destroy_ends_with_cleanup_and_releases_provider() {
    let player = Player::new(test_config());
    let rx = player.subscribe();
    let tone = Tone::endless();
    let track = tone.track("endless");

    player.play_track(track.clone()).unwrap();
    pump_until(&player, Duration::from_secs(5), |f| !f.is_empty());
    player.destroy();
    player.destroy();

    // The worker is joined by destroy, so the provider is already closed.
    assert_eq!(tone.close_count(), 1);
    assert_eq!(end_events(&events(&rx), &track), [TrackEndReason::Cleanup]);
    assert!(player.play_track(Tone::endless().track("late")).is_err());
}

#[test]
fn clone_of_played_track_can_be_played_again() {
    let player = Player::new(test_config());
    let track = Tone::finite(40).track("short");
    track.set_user_data(Some(std::sync::Arc::new(7u32)));

    player.play_track(track.clone()).unwrap();
    pump_until(&player, Duration::from_secs(5), |_| player.playing_track().is_none());

    let again = track.make_clone();
    assert_ne!(again, track);
    assert_eq!(again.user_data_as::<u32>().as_deref(), Some(&7));
    player.play_track(again).unwrap();
    let frames = pump_until(&player, Duration::from_secs(5), |_| player.playing_track().is_none());
    assert_eq!(frames.len(), 2);
}

#[test]
fn zero_chunk_size_falls_back_to_default_frames() {
    let mut config = test_config();
    config.output_format.chunk_sample_count = 0;
    let player = Player::new(config);
    assert_eq!(player.format().chunk_sample_count, 960);

    player.play_track(Tone::finite(100).track("short")).unwrap();
    let frames = pump_until(&player, Duration::from_secs(5), |_| player.playing_track().is_none());
    assert_eq!(frames.len(), 5);
    assert_eq!(player.last_end_reason(), Some(TrackEndReason::Finished));
}
