//! playback-cli: plays a local file through the playback engine on a CPAL output device.
//!
//! ## Pipeline
//! 1. **Track worker**: the engine decodes the file with symphonia, maps channels, resamples to
//!    the device rate, applies volume and the equalizer, and buffers encoded frames.
//! 2. **Output loop**: pulls one frame per frame duration from the player and decodes it back to
//!    `f32` into a small bounded queue.
//! 3. **Device**: the CPAL callback drains that queue without blocking.
//!
//! While playing, line commands on stdin control the player (`help` lists them).

mod cli;
mod commands;
mod device;
mod playback;

use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};
use playback_engine::decode::probe_file_info;
use playback_engine::filter::equalizer::BAND_COUNT;
use playback_engine::{
    AudioCodec, AudioTrack, EqualizerFactory, FilterFactory, OutputLoop, Player, PlayerConfig,
    PlayerEvent, SymphoniaProvider,
};
use tracing_subscriber::EnvFilter;

use commands::{Command, EqualizerCommand};
use playback::{DEVICE_QUEUE_FRAMES, DeviceStats, FrameSink};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,playback_engine=info")
        }))
        .init();
    let host = cpal::default_host();

    if args.list_devices {
        device::list_devices(&host)?;
        return Ok(());
    }
    let path = args.path.clone().context("no input file given")?;

    let mut config = match &args.config {
        Some(config_path) => PlayerConfig::load(config_path)?,
        None => PlayerConfig::default(),
    };
    if let Some(buffer_ms) = args.buffer_ms {
        config.frame_buffer_duration_ms = buffer_ms;
    }
    if let Some(quality) = args.quality {
        config.resampling_quality = quality;
    }

    let device = device::pick_device(&host, args.device.as_deref())?;
    tracing::info!(device = %device.description()?, "output device");
    let supported = device::pick_output_config(&device, Some(config.output_format.sample_rate))?;
    let mut stream_config: cpal::StreamConfig = supported.config();
    if let Some(buffer_size) = device::pick_buffer_size(&supported) {
        stream_config.buffer_size = buffer_size;
    }
    fit_output_format(&mut config, stream_config.sample_rate, stream_config.channels);
    tracing::info!(
        sample_rate = stream_config.sample_rate,
        channels = stream_config.channels,
        sample_format = ?supported.sample_format(),
        codec = config.output_format.codec.name(),
        "output config"
    );

    let player = Player::new(config);
    if let Some(volume) = args.volume {
        player.set_volume(volume);
    }
    let equalizer = Arc::new(EqualizerFactory::new());
    player.set_filter_factory(Some(equalizer.clone() as Arc<dyn FilterFactory>));

    let info = probe_file_info(&path).with_context(|| format!("probe {:?}", path))?;
    tracing::info!(
        title = %info.title,
        author = %info.author,
        duration_ms = ?info.length_ms,
        "loaded track"
    );
    let track = AudioTrack::new(info, SymphoniaProvider::file_factory(path));
    if args.start_ms > 0 {
        track.set_position(args.start_ms)?;
    }

    let (pcm_tx, pcm_rx) = bounded(DEVICE_QUEUE_FRAMES);
    let stats = Arc::new(DeviceStats::default());
    let stream = playback::build_output_stream(
        &device,
        &stream_config,
        supported.sample_format(),
        pcm_rx.clone(),
        stats.clone(),
    )?;
    stream.play()?;

    let output = OutputLoop::spawn(player.clone(), FrameSink::new(player.format(), pcm_tx)?)?;

    let (quit_tx, quit_rx) = bounded::<()>(1);
    spawn_event_logger(player.subscribe(), quit_tx.clone())?;
    let ctrlc_tx = quit_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = ctrlc_tx.try_send(());
    }) {
        tracing::warn!("cannot install ctrl-c handler: {e}");
    }
    let command_rx = spawn_stdin_reader()?;

    player.play_track(track)?;
    eprintln!("{}", commands::HELP);

    loop {
        select! {
            recv(quit_rx) -> _ => break,
            recv(command_rx) -> line => {
                let Ok(line) = line else {
                    // stdin closed; keep playing until the track ends.
                    let _ = quit_rx.recv();
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(Command::Quit) => break,
                    Ok(command) => run_command(&player, &equalizer, &pcm_rx, &stats, command),
                    Err(e) => eprintln!("{e:#}"),
                }
            }
        }
    }

    output.stop();
    player.destroy();
    drop(stream);
    tracing::info!(
        played_frames = stats.played_frames.load(Ordering::Relaxed),
        underruns = stats.underrun_events.load(Ordering::Relaxed),
        "playback finished"
    );
    Ok(())
}

/// Match the player's output to the device stream: device rate and channel count, 20ms frames.
fn fit_output_format(config: &mut PlayerConfig, sample_rate: u32, channels: u16) {
    let format = &mut config.output_format;
    if format.codec == AudioCodec::Opus && (sample_rate != 48_000 || channels > 2) {
        tracing::warn!(sample_rate, channels, "opus needs 48 kHz mono/stereo; using pcm");
        format.codec = AudioCodec::PcmS16Le;
    }
    format.sample_rate = sample_rate;
    format.channels = channels;
    format.chunk_sample_count = (sample_rate / 50) as usize;
}

fn run_command(
    player: &Player,
    equalizer: &EqualizerFactory,
    device_queue: &Receiver<Vec<f32>>,
    stats: &DeviceStats,
    command: Command,
) {
    match command {
        Command::Pause => player.pause(),
        Command::Resume => player.resume(),
        Command::Seek(position_ms) => match player.seek_to(position_ms) {
            Ok(()) => {
                let dropped = playback::drain_queue(device_queue);
                tracing::debug!(dropped, "device queue flushed for seek");
            }
            Err(e) => eprintln!("seek failed: {e}"),
        },
        Command::Volume(volume) => player.set_volume(volume),
        Command::Equalizer(EqualizerCommand::Band { band, gain }) => {
            equalizer.set_gain(band, gain);
            eprintln!("band {band} gain {:.2}", equalizer.gain(band));
        }
        Command::Equalizer(EqualizerCommand::Reset) => {
            equalizer.set_gains(&[0.0; BAND_COUNT]);
            eprintln!("equalizer reset");
        }
        Command::Status => print_status(player, stats),
        Command::Stop => player.stop_track(),
        Command::Help => eprintln!("{}", commands::HELP),
        Command::Quit => {}
    }
}

fn print_status(player: &Player, stats: &DeviceStats) {
    let status = player.status();
    eprintln!(
        "{} [{:?}] {}/{} ms, volume {}, buffered {}/{}{}, underruns {}",
        status.title.as_deref().unwrap_or("-"),
        status.track_state,
        status.position_ms.unwrap_or(0),
        status
            .duration_ms
            .map_or_else(|| "?".to_string(), |d| d.to_string()),
        status.volume,
        status.buffered_frames.unwrap_or(0),
        status.buffer_capacity_frames.unwrap_or(0),
        if status.paused { " (paused)" } else { "" },
        stats.underrun_events.load(Ordering::Relaxed),
    );
}

/// Log player events; quit once the track ended.
fn spawn_event_logger(events: Receiver<PlayerEvent>, quit_tx: Sender<()>) -> Result<()> {
    thread::Builder::new()
        .name("player-events".to_string())
        .spawn(move || {
            for event in events {
                match &event {
                    PlayerEvent::TrackEnd { track, reason } => {
                        tracing::info!(track = %track.identifier(), ?reason, "track end");
                        let _ = quit_tx.try_send(());
                    }
                    PlayerEvent::TrackException { exception, .. } => {
                        tracing::error!(
                            severity = ?exception.severity,
                            cause = ?exception.cause,
                            "{exception}"
                        );
                    }
                    PlayerEvent::TrackStuck { threshold_ms, diagnostics, .. } => {
                        tracing::warn!(threshold_ms, diagnostics = ?diagnostics, "track stuck");
                    }
                    PlayerEvent::TrackSeeked { requested_ms, actual_ms, .. } => {
                        tracing::info!(requested_ms, actual_ms, "seeked");
                    }
                    other => tracing::debug!(event = other.kind(), "player event"),
                }
            }
        })
        .context("spawn event thread")?;
    Ok(())
}

fn spawn_stdin_reader() -> Result<Receiver<String>> {
    let (tx, rx) = unbounded();
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("spawn stdin thread")?;
    Ok(rx)
}
