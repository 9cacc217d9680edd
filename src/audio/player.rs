//! Playback through an external audio player process.
//!
//! Each utterance is written to a scratch WAV file and handed to the player.
//! The child is polled so a stop signal can kill it mid-sentence.

use crate::audio::buffer::AudioBuffer;
use crate::defaults;
use crate::error::{Result, TtsError};
use crate::pipeline::sink::{PlaybackSink, StopSignal};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Supported audio players.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Player {
    Paplay,
    Aplay,
    Ffplay,
    Mpv,
    /// Any other program taking the WAV path as its only argument.
    Custom(String),
}

impl Player {
    pub fn from_name(name: &str) -> Self {
        match name {
            "paplay" => Player::Paplay,
            "aplay" => Player::Aplay,
            "ffplay" => Player::Ffplay,
            "mpv" => Player::Mpv,
            other => Player::Custom(other.to_string()),
        }
    }

    pub fn program(&self) -> &str {
        match self {
            Player::Paplay => "paplay",
            Player::Aplay => "aplay",
            Player::Ffplay => "ffplay",
            Player::Mpv => "mpv",
            Player::Custom(program) => program,
        }
    }

    fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(self.program());
        match self {
            Player::Ffplay => {
                cmd.args(["-nodisp", "-autoexit"]);
            }
            Player::Mpv => {
                cmd.arg("--no-video");
            }
            _ => {}
        }
        cmd.arg(path);
        cmd
    }
}

impl fmt::Display for Player {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// First known player found on `PATH`, in preference order.
pub fn find_player() -> Option<Player> {
    let path_var = std::env::var_os("PATH")?;
    defaults::PLAYERS
        .iter()
        .find(|name| command_in_path(name, &path_var).is_some())
        .map(|name| Player::from_name(name))
}

/// Resolve `command` against a `PATH`-style search list.
pub fn command_in_path(command: &str, path_var: &OsStr) -> Option<PathBuf> {
    if command.contains('/') {
        let path = PathBuf::from(command);
        return is_executable(&path).then_some(path);
    }
    std::env::split_paths(path_var)
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Sink that plays each buffer with an external player.
pub struct PlayerSink {
    player: Player,
    scratch_dir: PathBuf,
}

impl PlayerSink {
    /// Use an explicit player, or auto-detect one.
    ///
    /// # Errors
    /// `TtsError::PlayerNotFound` when nothing usable is installed.
    pub fn new(player: Option<&str>) -> Result<Self> {
        let player = match player {
            Some(name) => {
                let path_var = std::env::var_os("PATH").unwrap_or_default();
                if command_in_path(name, &path_var).is_none() {
                    return Err(TtsError::PlayerNotFound {
                        player: name.to_string(),
                    });
                }
                Player::from_name(name)
            }
            None => find_player().ok_or_else(|| TtsError::PlayerNotFound {
                player: defaults::PLAYERS.join("/"),
            })?,
        };
        Ok(Self::with_player(player))
    }

    /// Use `player` without checking that it exists.
    pub fn with_player(player: Player) -> Self {
        Self {
            player,
            scratch_dir: std::env::temp_dir(),
        }
    }

    /// Directory for the scratch WAV files.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    fn scratch_path(&self, index: u64) -> PathBuf {
        self.scratch_dir
            .join(format!("tts_{}_{}.wav", std::process::id(), index))
    }

    fn run_player(&self, path: &Path, stop: &StopSignal) -> Result<()> {
        let mut child = self
            .player
            .command(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TtsError::PlayerNotFound {
                        player: self.player.to_string(),
                    }
                } else {
                    TtsError::Playback {
                        message: format!("Failed to start {}: {}", self.player, e),
                    }
                }
            })?;

        loop {
            if stop.is_triggered() {
                kill_child(&mut child);
                return Ok(());
            }
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(()),
                Ok(Some(status)) => {
                    return Err(TtsError::Playback {
                        message: format!("{} exited with {}", self.player, status),
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    kill_child(&mut child);
                    return Err(TtsError::Playback {
                        message: format!("Failed to wait for {}: {}", self.player, e),
                    });
                }
            }
        }
    }
}

fn kill_child(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!("player already exited: {e}");
    }
    if let Err(e) = child.wait() {
        tracing::warn!("failed to reap player process: {e}");
    }
}

impl PlaybackSink for PlayerSink {
    fn play(&mut self, index: u64, audio: &AudioBuffer, stop: &StopSignal) -> Result<()> {
        if audio.is_empty() || stop.is_triggered() {
            return Ok(());
        }

        let path = self.scratch_path(index);
        audio.write_wav_file(&path)?;
        let result = self.run_player(&path, stop);
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!("failed to remove {}: {e}", path.display());
        }
        result
    }

    fn name(&self) -> &'static str {
        "player"
    }
}
