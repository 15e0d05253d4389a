use std::path::PathBuf;

use clap::Parser;
use playback_engine::ResamplingQuality;

#[derive(Parser, Debug)]
#[command(name = "playback-cli", version)]
pub struct Args {
    /// Path to an audio file (anything symphonia can probe)
    #[arg(required_unless_present = "list_devices")]
    pub path: Option<PathBuf>,

    /// TOML player config; flags below override it
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Initial volume, 0..=1000 (100 = unity)
    #[arg(long, value_parser = clap::value_parser!(u16).range(0..=1000))]
    pub volume: Option<u16>,

    /// Frame buffer size in milliseconds
    #[arg(long)]
    pub buffer_ms: Option<u64>,

    /// Resampler quality: low, medium or high
    #[arg(long)]
    pub quality: Option<ResamplingQuality>,

    /// Start playback at this position
    #[arg(long, default_value_t = 0)]
    pub start_ms: u64,
}
