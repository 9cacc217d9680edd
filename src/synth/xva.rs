//! xVA-Synth HTTP backend.
//!
//! The server keeps one active device and one loaded model. Every call that
//! depends on that state runs under the client's lock, so sessions using
//! different voices never interleave a model switch with a synthesis.
//! Audio comes back as a WAV file the server writes into a shared directory.

use crate::audio::buffer::AudioBuffer;
use crate::config::ServerConfig;
use crate::defaults;
use crate::error::{Result, TtsError};
use crate::synth::{SynthBackend, Synthesizer};
use crate::voice::{Device, ModelMetadata, VoiceModel};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Connection settings for the synthesis server.
#[derive(Debug, Clone)]
pub struct XvaSettings {
    pub url: String,
    /// Where synthesized files appear locally.
    pub output_dir: PathBuf,
    /// The same directory as the server sees it.
    pub server_output_dir: String,
    pub base_lang: String,
    pub pace: f32,
    pub request_timeout: Duration,
    pub synth_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for XvaSettings {
    fn default() -> Self {
        Self {
            url: defaults::SERVER_URL.to_string(),
            output_dir: PathBuf::from(defaults::OUTPUT_DIR),
            server_output_dir: defaults::SERVER_OUTPUT_DIR.to_string(),
            base_lang: defaults::BASE_LANG.to_string(),
            pace: defaults::PACE,
            request_timeout: Duration::from_secs(defaults::REQUEST_TIMEOUT_SECS),
            synth_timeout: Duration::from_secs(defaults::SYNTH_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(defaults::OUTPUT_POLL_MS),
        }
    }
}

impl XvaSettings {
    pub fn from_config(server: &ServerConfig) -> Self {
        Self {
            url: server.url.trim_end_matches('/').to_string(),
            output_dir: server.output_dir.clone(),
            server_output_dir: server.server_output_dir.clone(),
            base_lang: server.base_lang.clone(),
            pace: server.pace,
            request_timeout: Duration::from_secs(server.request_timeout_secs),
            synth_timeout: Duration::from_secs(server.synth_timeout_secs),
            ..Self::default()
        }
    }
}

#[derive(Debug, Serialize)]
struct SetDeviceRequest<'a> {
    device: &'a str,
}

#[derive(Debug, Serialize)]
struct LoadModelRequest<'a> {
    outputs: Option<()>,
    model: &'a str,
    #[serde(rename = "modelType")]
    model_type: &'a str,
    base_lang: &'a str,
    #[serde(rename = "pluginsContext")]
    plugins_context: &'a str,
}

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    sequence: &'a str,
    pace: f32,
    outfile: &'a str,
    vocoder: &'a str,
    base_lang: &'a str,
    base_emb: &'a str,
    #[serde(rename = "useSR")]
    use_sr: bool,
    #[serde(rename = "useCleanup")]
    use_cleanup: bool,
    #[serde(rename = "modelType")]
    model_type: &'a str,
    device: &'a str,
    #[serde(rename = "pluginsContext")]
    plugins_context: &'a str,
}

/// Model and device the server currently has active.
#[derive(Debug, Default)]
struct ServerState {
    device: Option<Device>,
    model: Option<PathBuf>,
}

/// Blocking client for the xVA-Synth server.
///
/// Uses `reqwest::blocking`; call it from worker threads or
/// `spawn_blocking`, never directly on an async runtime thread.
pub struct XvaClient {
    http: reqwest::blocking::Client,
    settings: XvaSettings,
    state: Mutex<ServerState>,
    next_file: AtomicU64,
}

impl XvaClient {
    pub fn new(settings: XvaSettings) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| TtsError::Backend {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            http,
            settings,
            state: Mutex::new(ServerState::default()),
            next_file: AtomicU64::new(0),
        })
    }

    pub fn settings(&self) -> &XvaSettings {
        &self.settings
    }

    fn post<T: Serialize>(&self, endpoint: &str, body: &T) -> Result<PostOutcome> {
        let url = format!("{}/{}", self.settings.url, endpoint);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .map_err(|e| TtsError::Backend {
                message: format!("POST {url} failed: {e}"),
            })?;

        let status = response.status();
        let text = response.text().unwrap_or_default();
        if status.is_success() {
            Ok(PostOutcome::Ok)
        } else {
            Ok(PostOutcome::Rejected(format!("{endpoint} returned {status}: {}", text.trim())))
        }
    }

    /// Make `device` and `weights` the server's active device and model.
    fn activate(&self, state: &mut ServerState, voice: &str, device: Device, weights: &Path) -> Result<()> {
        if state.device != Some(device) {
            match self.post("setDevice", &SetDeviceRequest { device: device.as_str() })? {
                PostOutcome::Ok => state.device = Some(device),
                PostOutcome::Rejected(message) if device == Device::Gpu => {
                    tracing::debug!("setDevice rejected: {message}");
                    return Err(TtsError::DeviceUnavailable {
                        device: device.to_string(),
                    });
                }
                PostOutcome::Rejected(message) => return Err(TtsError::Backend { message }),
            }
        }

        if state.model.as_deref() != Some(weights) {
            // Forget the old model first so a failed load is retried next time.
            state.model = None;
            let model = weights.to_string_lossy();
            let request = LoadModelRequest {
                outputs: None,
                model: &model,
                model_type: defaults::MODEL_TYPE,
                base_lang: &self.settings.base_lang,
                plugins_context: "{}",
            };
            match self.post("loadModel", &request)? {
                PostOutcome::Ok => state.model = Some(weights.to_path_buf()),
                PostOutcome::Rejected(message) => {
                    return Err(TtsError::ModelLoad {
                        voice: voice.to_string(),
                        message,
                    });
                }
            }
        }
        Ok(())
    }

    /// Prepare the server for `voice` (device + model).
    pub fn load_voice(&self, voice: &str, device: Device, weights: &Path) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.activate(&mut state, voice, device, weights)
    }

    /// Synthesize `text` with the given voice and return the decoded audio.
    pub fn synthesize(&self, voice: &XvaVoice, text: &str) -> Result<AudioBuffer> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.activate(&mut state, &voice.name, voice.device, &voice.weights)?;

        let file_name = format!(
            "tts_{}_{}.wav",
            std::process::id(),
            self.next_file.fetch_add(1, Ordering::Relaxed)
        );
        let local_path = self.settings.output_dir.join(&file_name);
        let server_path = format!(
            "{}/{}",
            self.settings.server_output_dir.trim_end_matches('/'),
            file_name
        );
        if local_path.exists()
            && let Err(e) = std::fs::remove_file(&local_path)
        {
            tracing::warn!("failed to remove stale {}: {e}", local_path.display());
        }

        let request = SynthesizeRequest {
            sequence: text,
            pace: self.settings.pace,
            outfile: &server_path,
            vocoder: "n/a",
            base_lang: &self.settings.base_lang,
            base_emb: &voice.embedding,
            use_sr: false,
            use_cleanup: false,
            model_type: defaults::MODEL_TYPE,
            device: voice.device.as_str(),
            plugins_context: "{}",
        };
        if let PostOutcome::Rejected(message) = self.post("synthesize", &request)? {
            return Err(TtsError::Synthesis { message });
        }
        drop(state);

        let audio = self.wait_for_output(&local_path, text);
        if local_path.exists()
            && let Err(e) = std::fs::remove_file(&local_path)
        {
            tracing::warn!("failed to remove {}: {e}", local_path.display());
        }
        audio
    }

    /// Poll until the server's output file exists and decodes.
    fn wait_for_output(&self, path: &Path, text: &str) -> Result<AudioBuffer> {
        let deadline = Instant::now() + self.settings.synth_timeout;
        loop {
            if path.exists() {
                match AudioBuffer::from_wav_file(path) {
                    Ok(audio) => return Ok(audio),
                    // Still being written.
                    Err(e) if Instant::now() < deadline => {
                        tracing::trace!("output not ready yet: {e}");
                    }
                    Err(e) => return Err(e),
                }
            }
            if Instant::now() >= deadline {
                return Err(TtsError::Synthesis {
                    message: format!("audio file was not created for {text:?}"),
                });
            }
            thread::sleep(self.settings.poll_interval);
        }
    }
}

enum PostOutcome {
    Ok,
    /// Non-success HTTP status, with a description.
    Rejected(String),
}

/// Per-voice data the server needs on every request.
#[derive(Debug, Clone)]
pub struct XvaVoice {
    pub name: String,
    pub device: Device,
    pub weights: PathBuf,
    /// Comma-separated base speaker embedding.
    pub embedding: String,
}

/// One voice bound to the shared client.
pub struct XvaSynthesizer {
    client: Arc<XvaClient>,
    voice: XvaVoice,
}

impl Synthesizer for XvaSynthesizer {
    fn synthesize(&self, text: &str) -> Result<AudioBuffer> {
        self.client.synthesize(&self.voice, text)
    }
}

/// Backend loading voices into an xVA-Synth server.
pub struct XvaBackend {
    client: Arc<XvaClient>,
}

impl XvaBackend {
    pub fn new(settings: XvaSettings) -> Result<Self> {
        Ok(Self {
            client: Arc::new(XvaClient::new(settings)?),
        })
    }

    pub fn client(&self) -> &Arc<XvaClient> {
        &self.client
    }
}

impl SynthBackend for XvaBackend {
    fn load(
        &self,
        model: &VoiceModel,
        metadata: &ModelMetadata,
        device: Device,
    ) -> Result<Arc<dyn Synthesizer>> {
        self.client
            .load_voice(&model.name, device, &model.weights_path)?;
        let voice = XvaVoice {
            name: model.name.clone(),
            device,
            weights: model.weights_path.clone(),
            embedding: metadata.base_embedding_csv(),
        };
        Ok(Arc::new(XvaSynthesizer {
            client: self.client.clone(),
            voice,
        }))
    }

    fn name(&self) -> &str {
        "xva"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use tempfile::TempDir;

    #[derive(Debug, Clone)]
    struct Recorded {
        endpoint: String,
        body: serde_json::Value,
    }

    /// Minimal stand-in for the synthesis server. Writes a WAV for every
    /// `synthesize` call and rejects endpoints listed in `reject`.
    fn fake_server(reject: &'static [&'static str]) -> (String, Arc<Mutex<Vec<Recorded>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let log = Arc::new(Mutex::new(Vec::new()));
        let server_log = log.clone();

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };
                let mut reader = BufReader::new(stream.try_clone().unwrap());

                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                let endpoint = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or("/")
                    .trim_start_matches('/')
                    .to_string();

                let mut content_length = 0usize;
                loop {
                    let mut header = String::new();
                    reader.read_line(&mut header).unwrap();
                    if header == "\r\n" || header.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = header.split_once(':')
                        && name.eq_ignore_ascii_case("content-length")
                    {
                        content_length = value.trim().parse().unwrap();
                    }
                }
                let mut body = vec![0u8; content_length];
                reader.read_exact(&mut body).unwrap();
                let body: serde_json::Value = serde_json::from_slice(&body).unwrap();

                if endpoint == "synthesize" && !reject.contains(&"synthesize") {
                    let outfile = body["outfile"].as_str().unwrap();
                    AudioBuffer::mono(vec![1, 2, 3, 4], 22050)
                        .write_wav_file(Path::new(outfile))
                        .unwrap();
                }
                let status = if reject.contains(&endpoint.as_str()) {
                    "500 Internal Server Error"
                } else {
                    "200 OK"
                };
                server_log.lock().unwrap().push(Recorded { endpoint, body });

                let response =
                    format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        (url, log)
    }

    fn settings(url: String, dir: &Path) -> XvaSettings {
        XvaSettings {
            url,
            output_dir: dir.to_path_buf(),
            server_output_dir: dir.display().to_string(),
            synth_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
            ..XvaSettings::default()
        }
    }

    fn endpoints(log: &Arc<Mutex<Vec<Recorded>>>) -> Vec<String> {
        log.lock().unwrap().iter().map(|r| r.endpoint.clone()).collect()
    }

    fn voice(name: &str, device: Device) -> XvaVoice {
        XvaVoice {
            name: name.to_string(),
            device,
            weights: PathBuf::from(format!("models/masseffect/me3_{name}")),
            embedding: "0.5,-1.25".to_string(),
        }
    }

    #[test]
    fn test_synthesize_request_shape() {
        let request = SynthesizeRequest {
            sequence: "Hello there.",
            pace: 1.0,
            outfile: "/app/resources/tts_1_0.wav",
            vocoder: "n/a",
            base_lang: "en",
            base_emb: "0.5,-1.25",
            use_sr: false,
            use_cleanup: false,
            model_type: "xVAPitch",
            device: "cpu",
            plugins_context: "{}",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["sequence"], "Hello there.");
        assert_eq!(json["useSR"], false);
        assert_eq!(json["modelType"], "xVAPitch");
        assert_eq!(json["pluginsContext"], "{}");
    }

    #[test]
    fn test_load_model_request_has_null_outputs() {
        let request = LoadModelRequest {
            outputs: None,
            model: "models/me3_edi",
            model_type: "xVAPitch",
            base_lang: "en",
            plugins_context: "{}",
        };
        let json = serde_json::to_value(&request).unwrap();
        assert!(json["outputs"].is_null());
        assert_eq!(json["model"], "models/me3_edi");
    }

    #[test]
    fn test_synthesize_round_trip_through_server() {
        let tmp = TempDir::new().unwrap();
        let (url, log) = fake_server(&[]);
        let client = XvaClient::new(settings(url, tmp.path())).unwrap();

        let audio = client.synthesize(&voice("edi", Device::Cpu), "Hello there.").unwrap();
        assert_eq!(audio.samples, vec![1, 2, 3, 4]);
        assert_eq!(endpoints(&log), vec!["setDevice", "loadModel", "synthesize"]);

        let recorded = log.lock().unwrap().clone();
        assert_eq!(recorded[2].body["sequence"], "Hello there.");
        assert_eq!(recorded[2].body["base_emb"], "0.5,-1.25");
        // Output file is cleaned up after reading.
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_model_reloaded_only_on_voice_change() {
        let tmp = TempDir::new().unwrap();
        let (url, log) = fake_server(&[]);
        let client = XvaClient::new(settings(url, tmp.path())).unwrap();

        client.synthesize(&voice("edi", Device::Cpu), "One.").unwrap();
        client.synthesize(&voice("edi", Device::Cpu), "Two.").unwrap();
        client.synthesize(&voice("garrus", Device::Cpu), "Three.").unwrap();

        assert_eq!(
            endpoints(&log),
            vec![
                "setDevice",
                "loadModel",
                "synthesize",
                "synthesize",
                "loadModel",
                "synthesize"
            ]
        );
    }

    #[test]
    fn test_gpu_rejection_is_device_unavailable() {
        let tmp = TempDir::new().unwrap();
        let (url, _log) = fake_server(&["setDevice"]);
        let client = XvaClient::new(settings(url, tmp.path())).unwrap();

        let result = client.load_voice("edi", Device::Gpu, Path::new("models/me3_edi"));
        assert!(matches!(result, Err(TtsError::DeviceUnavailable { .. })));
    }

    #[test]
    fn test_rejected_load_is_model_load_error() {
        let tmp = TempDir::new().unwrap();
        let (url, _log) = fake_server(&["loadModel"]);
        let client = XvaClient::new(settings(url, tmp.path())).unwrap();

        match client.load_voice("edi", Device::Cpu, Path::new("models/me3_edi")) {
            Err(TtsError::ModelLoad { voice, .. }) => assert_eq!(voice, "edi"),
            other => panic!("Expected ModelLoad, got {:?}", other),
        }
    }

    #[test]
    fn test_rejected_synthesis_is_per_utterance_error() {
        let tmp = TempDir::new().unwrap();
        let (url, _log) = fake_server(&["synthesize"]);
        let client = XvaClient::new(settings(url, tmp.path())).unwrap();

        let result = client.synthesize(&voice("edi", Device::Cpu), "¿¿¿");
        assert!(matches!(result, Err(TtsError::Synthesis { .. })));
    }

    #[test]
    fn test_unreachable_server_is_backend_error() {
        let tmp = TempDir::new().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let client = XvaClient::new(settings(url, tmp.path())).unwrap();
        let result = client.load_voice("edi", Device::Cpu, Path::new("models/me3_edi"));
        assert!(matches!(result, Err(TtsError::Backend { .. })));
    }

    #[test]
    fn test_settings_from_config_trims_url() {
        let server = ServerConfig {
            url: "http://localhost:9000/".to_string(),
            ..ServerConfig::default()
        };
        let settings = XvaSettings::from_config(&server);
        assert_eq!(settings.url, "http://localhost:9000");
    }
}
