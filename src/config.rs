use crate::defaults;
use crate::error::TtsError;
use crate::voice::Device;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub voice: VoiceConfig,
    pub stream: StreamConfig,
    pub playback: PlaybackConfig,
}

/// xVA-Synth server connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    /// Where synthesized files appear locally.
    pub output_dir: PathBuf,
    /// The same directory as the server sees it.
    pub server_output_dir: String,
    pub base_lang: String,
    pub pace: f32,
    pub request_timeout_secs: u64,
    pub synth_timeout_secs: u64,
}

/// Voice selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VoiceConfig {
    pub name: String,
    pub device: Device,
    pub models_dir: PathBuf,
    /// Retry on CPU when the GPU is unavailable.
    pub gpu_fallback: bool,
}

/// Streaming pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    pub workers: usize,
    pub max_in_flight: usize,
    pub split_on_newlines: bool,
    pub abbreviations: bool,
}

/// Audio output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Player command; auto-detected when unset.
    pub player: Option<String>,
    /// Directory for WAV files written in --no-play mode.
    pub output_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: defaults::SERVER_URL.to_string(),
            output_dir: PathBuf::from(defaults::OUTPUT_DIR),
            server_output_dir: defaults::SERVER_OUTPUT_DIR.to_string(),
            base_lang: defaults::BASE_LANG.to_string(),
            pace: defaults::PACE,
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            synth_timeout_secs: defaults::SYNTH_TIMEOUT_SECS,
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            name: defaults::DEFAULT_VOICE.to_string(),
            device: Device::Cpu,
            models_dir: PathBuf::from(defaults::MODELS_DIR),
            gpu_fallback: true,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            workers: defaults::WORKERS,
            max_in_flight: defaults::MAX_IN_FLIGHT,
            split_on_newlines: true,
            abbreviations: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e) => {
                if e.downcast_ref::<std::io::Error>()
                    .map(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
                    .unwrap_or(false)
                {
                    Ok(Self::default())
                } else {
                    Err(e.context(format!("Failed to load config from {}", path.display())))
                }
            }
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), TtsError> {
        if self.stream.workers == 0 {
            return Err(TtsError::ConfigInvalidValue {
                key: "stream.workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.stream.max_in_flight == 0 {
            return Err(TtsError::ConfigInvalidValue {
                key: "stream.max_in_flight".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.server.pace <= 0.0 {
            return Err(TtsError::ConfigInvalidValue {
                key: "server.pace".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.server.synth_timeout_secs == 0 {
            return Err(TtsError::ConfigInvalidValue {
                key: "server.synth_timeout_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.server.request_timeout_secs == 0 {
            return Err(TtsError::ConfigInvalidValue {
                key: "server.request_timeout_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - XVATTS_VOICE → voice.name
    /// - XVATTS_DEVICE → voice.device ("cpu" or "gpu"; other values ignored)
    /// - XVATTS_SERVER_URL → server.url
    /// - XVATTS_MODELS_DIR → voice.models_dir
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(voice) = std::env::var("XVATTS_VOICE")
            && !voice.is_empty()
        {
            self.voice.name = voice;
        }

        if let Ok(device) = std::env::var("XVATTS_DEVICE")
            && let Ok(device) = device.parse::<Device>()
        {
            self.voice.device = device;
        }

        if let Ok(url) = std::env::var("XVATTS_SERVER_URL")
            && !url.is_empty()
        {
            self.server.url = url;
        }

        if let Ok(dir) = std::env::var("XVATTS_MODELS_DIR")
            && !dir.is_empty()
        {
            self.voice.models_dir = PathBuf::from(dir);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/xvatts/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("xvatts")
            .join("config.toml")
    }

    /// Render the effective configuration as TOML.
    pub fn to_display_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// A commented configuration template with every default spelled out.
    pub fn dump_template() -> String {
        format!(
            r#"# xvatts configuration
# Location: ~/.config/xvatts/config.toml

[server]
# xVA-Synth HTTP server
url = "{url}"
# Directory where synthesized files appear on this machine
output_dir = "{output_dir}"
# The same directory as the server sees it (e.g. a container mount)
server_output_dir = "{server_output_dir}"
base_lang = "{base_lang}"
pace = {pace:.1}
request_timeout_secs = {request_timeout}
# How long to wait for the server to write each utterance
synth_timeout_secs = {synth_timeout}

[voice]
name = "{voice}"
# "cpu" or "gpu"
device = "cpu"
models_dir = "{models_dir}"
# Retry on CPU when no GPU is available
gpu_fallback = true

[stream]
# Parallel synthesis workers (GPU synthesis rarely benefits from more than 1-2)
workers = {workers}
# Utterances synthesized ahead of playback
max_in_flight = {max_in_flight}
split_on_newlines = true
# Keep "Dr. Smith" and "e.g. this" in one sentence
abbreviations = true

[playback]
# player = "paplay"     # auto-detected from paplay, aplay, ffplay, mpv
# output_dir = "/tmp"   # where --no-play writes WAV files
"#,
            url = defaults::SERVER_URL,
            output_dir = defaults::OUTPUT_DIR,
            server_output_dir = defaults::SERVER_OUTPUT_DIR,
            base_lang = defaults::BASE_LANG,
            pace = defaults::PACE,
            request_timeout = defaults::REQUEST_TIMEOUT_SECS,
            synth_timeout = defaults::SYNTH_TIMEOUT_SECS,
            voice = defaults::DEFAULT_VOICE,
            models_dir = defaults::MODELS_DIR,
            workers = defaults::WORKERS,
            max_in_flight = defaults::MAX_IN_FLIGHT,
        )
    }
}
