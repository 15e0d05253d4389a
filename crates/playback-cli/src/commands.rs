//! Line commands read from stdin while playing.

use std::str::FromStr;

use anyhow::{Context, Result, anyhow, bail};
use playback_engine::filter::equalizer::BAND_COUNT;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Pause,
    Resume,
    /// Absolute position in milliseconds.
    Seek(u64),
    Volume(u16),
    /// Set one band, or reset every band with `eq reset`.
    Equalizer(EqualizerCommand),
    Status,
    Stop,
    Quit,
    Help,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EqualizerCommand {
    Band { band: usize, gain: f32 },
    Reset,
}

pub const HELP: &str = "\
commands:
  pause | resume
  seek <ms> | seek <mm:ss>
  volume <0-1000>
  eq <band 0-14> <gain -0.25..1.0> | eq reset
  status | stop | quit";

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let Some(word) = parts.next() else {
            bail!("empty command");
        };
        let arg = parts.next();

        let command = match word.to_ascii_lowercase().as_str() {
            "pause" | "p" => Command::Pause,
            "resume" | "r" | "play" => Command::Resume,
            "seek" => Command::Seek(parse_position(required(arg, "seek")?)?),
            "volume" | "vol" => {
                let volume: u16 = required(arg, "volume")?
                    .parse()
                    .context("volume must be an integer")?;
                if volume > 1000 {
                    bail!("volume must be between 0 and 1000");
                }
                Command::Volume(volume)
            }
            "eq" => match required(arg, "eq")? {
                "reset" => Command::Equalizer(EqualizerCommand::Reset),
                band => {
                    let band: usize = band.parse().context("band must be an integer")?;
                    if band >= BAND_COUNT {
                        bail!("band must be below {BAND_COUNT}");
                    }
                    let gain: f32 = required(parts.next(), "eq <band>")?
                        .parse()
                        .context("gain must be a number")?;
                    Command::Equalizer(EqualizerCommand::Band { band, gain })
                }
            },
            "status" | "s" => Command::Status,
            "stop" => Command::Stop,
            "quit" | "q" | "exit" => Command::Quit,
            "help" | "?" => Command::Help,
            other => return Err(anyhow!("unknown command '{other}'")),
        };
        Ok(command)
    }
}

fn required<'a>(arg: Option<&'a str>, command: &str) -> Result<&'a str> {
    arg.ok_or_else(|| anyhow!("'{command}' needs an argument"))
}

/// `90000`, `1:30` or `1:30.5` to milliseconds.
fn parse_position(raw: &str) -> Result<u64> {
    match raw.split_once(':') {
        None => raw.parse().context("position must be milliseconds or mm:ss"),
        Some((minutes, seconds)) => {
            let minutes: u64 = minutes.parse().context("invalid minutes")?;
            let seconds: f64 = seconds.parse().context("invalid seconds")?;
            if !(0.0..60.0).contains(&seconds) {
                bail!("seconds must be below 60");
            }
            Ok(minutes * 60_000 + (seconds * 1000.0).round() as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_commands() {
        assert_eq!("pause".parse::<Command>().unwrap(), Command::Pause);
        assert_eq!(" Resume ".parse::<Command>().unwrap(), Command::Resume);
        assert_eq!("q".parse::<Command>().unwrap(), Command::Quit);
        assert_eq!("volume 40".parse::<Command>().unwrap(), Command::Volume(40));
    }

    #[test]
    fn parses_seek_positions() {
        assert_eq!("seek 90000".parse::<Command>().unwrap(), Command::Seek(90_000));
        assert_eq!("seek 1:30".parse::<Command>().unwrap(), Command::Seek(90_000));
        assert_eq!("seek 0:02.5".parse::<Command>().unwrap(), Command::Seek(2_500));
        assert!("seek 1:75".parse::<Command>().is_err());
        assert!("seek".parse::<Command>().is_err());
    }

    #[test]
    fn parses_equalizer_commands() {
        assert_eq!(
            "eq 3 0.5".parse::<Command>().unwrap(),
            Command::Equalizer(EqualizerCommand::Band { band: 3, gain: 0.5 })
        );
        assert_eq!(
            "eq reset".parse::<Command>().unwrap(),
            Command::Equalizer(EqualizerCommand::Reset)
        );
        assert!("eq 15 0.1".parse::<Command>().is_err());
        assert!("eq 2".parse::<Command>().is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
        assert!("volume 1001".parse::<Command>().is_err());
        assert!("volume loud".parse::<Command>().is_err());
    }
}
