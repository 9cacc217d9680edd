//! Command-line interface for xvatts
//!
//! Provides argument parsing using clap derive macros.

use crate::voice::Device;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Text-to-speech with xVA-Synth voices
#[derive(Parser, Debug)]
#[command(
    name = "xvatts",
    version,
    about = "Text-to-speech with xVA-Synth voices",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Text to speak (reads stdin when omitted and stdin is piped)
    #[arg(value_name = "TEXT")]
    pub text: Vec<String>,

    #[command(flatten)]
    pub speech: SpeechArgs,

    /// List available voices and exit
    #[arg(short, long)]
    pub list_voices: bool,

    /// Write WAV files instead of playing them, printing each path
    #[arg(long)]
    pub no_play: bool,

    /// Directory for --no-play output (default: current directory)
    #[arg(long, value_name = "DIR", requires = "no_play")]
    pub output_dir: Option<PathBuf>,

    /// Audio player command (default: auto-detect paplay, aplay, ffplay, mpv)
    #[arg(long, value_name = "PROGRAM")]
    pub player: Option<String>,

    /// Synthesis worker threads
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Sentences synthesized ahead of playback
    #[arg(long, value_name = "N")]
    pub max_in_flight: Option<usize>,

    /// xVA-Synth server URL
    #[arg(long, value_name = "URL")]
    pub server: Option<String>,

    /// Per-sentence synthesis timeout (e.g. 30s, 2m)
    #[arg(long, value_name = "DURATION", value_parser = parse_duration_secs)]
    pub synth_timeout: Option<u64>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: progress, -vv: debug logging)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Voice, device and streaming flags shared by direct speech and `say`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SpeechArgs {
    /// Voice to use (e.g. edi, garrus)
    #[arg(long, value_name = "NAME")]
    pub voice: Option<String>,

    /// Run the model on the GPU
    #[arg(long, conflicts_with_all = ["cpu", "device"])]
    pub gpu: bool,

    /// Run the model on the CPU
    #[arg(long, conflicts_with = "device")]
    pub cpu: bool,

    /// Compute device (cpu or gpu)
    #[arg(long, value_name = "DEVICE")]
    pub device: Option<Device>,

    /// Start speaking after the first sentence instead of the whole text
    #[arg(short, long)]
    pub stream: bool,
}

impl SpeechArgs {
    /// Device chosen on the command line, if any.
    pub fn device_override(&self) -> Option<Device> {
        if self.gpu {
            Some(Device::Gpu)
        } else if self.cpu {
            Some(Device::Cpu)
        } else {
            self.device
        }
    }
}

/// Parse a duration string into whole seconds, rounding partial seconds up.
///
/// Supports any duration format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`), and compound (`1m30s`). Zero is rejected.
fn parse_duration_secs(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let secs = match s.parse::<u64>() {
        Ok(secs) => secs,
        Err(_) => {
            let duration = humantime::parse_duration(s).map_err(|e| e.to_string())?;
            duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
        }
    };
    if secs == 0 {
        return Err("duration must be greater than zero".to_string());
    }
    Ok(secs)
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available voices
    Voices,

    /// Start the daemon (foreground process for systemd)
    Daemon {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/xvatts.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Speak text through the running daemon
    Say {
        /// Text to speak (reads stdin when omitted)
        #[arg(value_name = "TEXT")]
        text: Vec<String>,

        #[command(flatten)]
        speech: SpeechArgs,

        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/xvatts.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Stop the daemon's current speech
    Stop {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/xvatts.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Get daemon status via IPC
    Status {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/xvatts.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Ask the daemon to exit
    Shutdown {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/xvatts.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (file + environment)
    Show,
    /// Dump a commented configuration template
    Dump,
}
