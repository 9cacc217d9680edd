//! Command handler implementation for the daemon.

use crate::daemon::DaemonState;
use crate::ipc::protocol::{Command, Response};
use crate::ipc::server::CommandHandler;
use crate::pipeline::orchestrator::{PipelineHandle, StreamingPipeline};
use crate::text::source::StaticText;
use crate::voice::Device;
use std::sync::Arc;
use tokio::sync::Notify;

/// Cancel a session and wait for its threads off the async runtime.
pub(crate) async fn reap(handle: PipelineHandle) {
    let joined = tokio::task::spawn_blocking(move || handle.stop()).await;
    match joined {
        Ok(Ok(report)) => tracing::debug!(
            played = report.played,
            failures = report.failures.len(),
            cancelled = report.cancelled,
            "previous session closed"
        ),
        Ok(Err(e)) => tracing::warn!("previous session ended with error: {e}"),
        Err(e) => tracing::warn!("failed to join previous session: {e}"),
    }
}

/// Command handler for daemon IPC commands.
pub struct DaemonCommandHandler {
    state: Arc<DaemonState>,
    shutdown: Arc<Notify>,
}

impl DaemonCommandHandler {
    pub fn new(state: Arc<DaemonState>, shutdown: Arc<Notify>) -> Self {
        Self { state, shutdown }
    }

    /// Resolve the voice, interrupt the current session and start a new one.
    async fn speak(
        &self,
        text: String,
        voice: Option<String>,
        device: Option<Device>,
        stream: bool,
    ) -> Response {
        if text.trim().is_empty() {
            return Response::Error {
                message: "No text to speak".to_string(),
            };
        }

        let voice = voice.unwrap_or_else(|| self.state.default_voice().to_string());
        let device = device.unwrap_or(self.state.config.voice.device);
        let fallback = self.state.config.voice.gpu_fallback;
        let registry = Arc::clone(&self.state.registry);
        let resolved = tokio::task::spawn_blocking(move || {
            registry.resolve_with_fallback(&voice, device, fallback)
        })
        .await;
        let handle = match resolved {
            Ok(Ok(handle)) => handle,
            Ok(Err(e)) => {
                return Response::Error {
                    message: e.to_string(),
                };
            }
            Err(e) => {
                return Response::Error {
                    message: format!("Voice resolution task failed: {}", e),
                };
            }
        };

        let sink = match self.state.new_sink() {
            Ok(sink) => sink,
            Err(e) => {
                return Response::Error {
                    message: e.to_string(),
                };
            }
        };

        let pipeline = StreamingPipeline::new(self.state.pipeline_config(stream));
        let mut session = self.state.session.lock().await;
        if let Some(previous) = session.take() {
            reap(previous).await;
        }

        match pipeline.start(handle, Box::new(StaticText::new(text)), sink) {
            Ok(started) => {
                *session = Some(started);
                Response::Ok
            }
            Err(e) => Response::Error {
                message: format!("Failed to start session: {}", e),
            },
        }
    }

    /// Stop the current session. Idle is not an error.
    async fn stop_speaking(&self) -> Response {
        let previous = self.state.session.lock().await.take();
        if let Some(handle) = previous {
            reap(handle).await;
        }
        Response::Ok
    }

    async fn get_status(&self) -> Response {
        Response::Status {
            speaking: self.state.is_speaking().await,
            voice: self.state.default_voice().to_string(),
            loaded: self.state.registry.loaded(),
            version: crate::version_string(),
        }
    }

    async fn list_voices(&self) -> Response {
        let registry = Arc::clone(&self.state.registry);
        match tokio::task::spawn_blocking(move || registry.list()).await {
            Ok(Ok(voices)) => Response::Voices { voices },
            Ok(Err(e)) => Response::Error {
                message: e.to_string(),
            },
            Err(e) => Response::Error {
                message: format!("Voice listing task failed: {}", e),
            },
        }
    }
}

#[async_trait::async_trait]
impl CommandHandler for DaemonCommandHandler {
    async fn handle(&self, command: Command) -> Response {
        match command {
            Command::Speak {
                text,
                voice,
                device,
                stream,
            } => self.speak(text, voice, device, stream).await,
            Command::Stop => self.stop_speaking().await,
            Command::Status => self.get_status().await,
            Command::Voices => self.list_voices().await,
            Command::Shutdown => {
                let response = self.stop_speaking().await;
                self.shutdown.notify_one();
                response
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::daemon::SinkFactory;
    use crate::pipeline::sink::{CollectorSink, PlaybackSink};
    use crate::synth::{MockBackend, MockSynthesizer};
    use crate::voice::catalog::ModelCatalog;
    use crate::voice::registry::VoiceRegistry;
    use std::path::Path;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn write_model(root: &Path, game: &str, stem: &str) {
        let dir = root.join(game);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(format!("{stem}.json")),
            r#"{"games": [{"base_speaker_emb": [0.1, 0.2]}]}"#,
        )
        .unwrap();
        std::fs::write(dir.join(stem), b"weights").unwrap();
    }

    struct Fixture {
        _models: TempDir,
        handler: DaemonCommandHandler,
        sink: CollectorSink,
        shutdown: Arc<Notify>,
    }

    fn fixture(synth: MockSynthesizer) -> Fixture {
        let models = TempDir::new().unwrap();
        write_model(models.path(), "masseffect", "me3_edi");
        write_model(models.path(), "masseffect", "me2_garrus");

        let registry = Arc::new(VoiceRegistry::new(
            ModelCatalog::new(models.path()),
            Arc::new(MockBackend::new(synth)),
        ));
        let sink = CollectorSink::new();
        let factory: SinkFactory = {
            let sink = sink.clone();
            Arc::new(move || Ok(Box::new(sink.clone()) as Box<dyn PlaybackSink>))
        };
        let mut config = Config::default();
        config.stream.max_in_flight = 2;
        let state = Arc::new(DaemonState::new(config, registry, factory));
        let shutdown = Arc::new(Notify::new());
        Fixture {
            _models: models,
            handler: DaemonCommandHandler::new(state, Arc::clone(&shutdown)),
            sink,
            shutdown,
        }
    }

    fn speak(text: &str, stream: bool) -> Command {
        Command::Speak {
            text: text.to_string(),
            voice: None,
            device: None,
            stream,
        }
    }

    async fn wait_for_played(sink: &CollectorSink, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while sink.indices().len() < count {
            assert!(Instant::now() < deadline, "timed out waiting for playback");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn played_texts(sink: &CollectorSink) -> Vec<String> {
        sink.played()
            .iter()
            .map(|(_, audio)| MockSynthesizer::decode(audio))
            .collect()
    }

    #[tokio::test]
    async fn test_speak_streams_sentences_in_order() {
        let f = fixture(MockSynthesizer::new());
        let response = f
            .handler
            .handle(speak("Hello there. How are you? Great!", true))
            .await;
        assert_eq!(response, Response::Ok);

        wait_for_played(&f.sink, 3).await;
        assert_eq!(
            played_texts(&f.sink),
            vec!["Hello there.", "How are you?", "Great!"]
        );
    }

    #[tokio::test]
    async fn test_speak_without_stream_plays_one_buffer() {
        let f = fixture(MockSynthesizer::new());
        let text = "Hello there. How are you? Great!";
        assert_eq!(f.handler.handle(speak(text, false)).await, Response::Ok);

        wait_for_played(&f.sink, 1).await;
        f.handler.handle(Command::Stop).await;
        assert_eq!(played_texts(&f.sink), vec![text]);
    }

    #[tokio::test]
    async fn test_speak_unknown_voice_is_error() {
        let f = fixture(MockSynthesizer::new());
        let response = f
            .handler
            .handle(Command::Speak {
                text: "Hello.".to_string(),
                voice: Some("doesnotexist".to_string()),
                device: None,
                stream: true,
            })
            .await;
        match response {
            Response::Error { message } => assert!(message.contains("doesnotexist")),
            other => panic!("Expected Error response, got {:?}", other),
        }
        assert!(f.sink.indices().is_empty());
    }

    #[tokio::test]
    async fn test_speak_empty_text_is_error() {
        let f = fixture(MockSynthesizer::new());
        let response = f.handler.handle(speak("   ", true)).await;
        assert!(matches!(response, Response::Error { .. }));
    }

    #[tokio::test]
    async fn test_new_speak_interrupts_current_session() {
        let synth = MockSynthesizer::new().with_delay(Duration::from_millis(100));
        let f = fixture(synth);

        let long = "One. Two. Three. Four. Five. Six. Seven. Eight.";
        assert_eq!(f.handler.handle(speak(long, true)).await, Response::Ok);
        wait_for_played(&f.sink, 1).await;

        assert_eq!(f.handler.handle(speak("Replacement.", true)).await, Response::Ok);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !played_texts(&f.sink).contains(&"Replacement.".to_string()) {
            assert!(Instant::now() < deadline, "replacement never played");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let texts = played_texts(&f.sink);
        assert!(!texts.contains(&"Eight.".to_string()), "got {:?}", texts);
        assert_eq!(texts.last().map(String::as_str), Some("Replacement."));
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_ok() {
        let f = fixture(MockSynthesizer::new());
        assert_eq!(f.handler.handle(Command::Stop).await, Response::Ok);
    }

    #[tokio::test]
    async fn test_stop_cancels_speaking_session() {
        let synth = MockSynthesizer::new().with_delay(Duration::from_millis(100));
        let f = fixture(synth);
        f.handler
            .handle(speak("One. Two. Three. Four. Five.", true))
            .await;
        assert!(f.handler.state.is_speaking().await);

        assert_eq!(f.handler.handle(Command::Stop).await, Response::Ok);
        assert!(!f.handler.state.is_speaking().await);
        assert!(f.sink.indices().len() < 5);
    }

    #[tokio::test]
    async fn test_status_reports_loaded_voices() {
        let f = fixture(MockSynthesizer::new());
        f.handler.handle(speak("Hi.", true)).await;
        wait_for_played(&f.sink, 1).await;

        match f.handler.handle(Command::Status).await {
            Response::Status {
                voice,
                loaded,
                version,
                ..
            } => {
                assert_eq!(voice, "edi");
                assert_eq!(loaded, vec!["edi".to_string()]);
                assert_eq!(version, crate::version_string());
            }
            other => panic!("Expected Status response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_voices_lists_catalog() {
        let f = fixture(MockSynthesizer::new());
        match f.handler.handle(Command::Voices).await {
            Response::Voices { voices } => {
                assert_eq!(voices, vec!["edi".to_string(), "garrus".to_string()]);
            }
            other => panic!("Expected Voices response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_notifies_daemon() {
        let f = fixture(MockSynthesizer::new());
        let notified = {
            let shutdown = Arc::clone(&f.shutdown);
            tokio::spawn(async move { shutdown.notified().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(f.handler.handle(Command::Shutdown).await, Response::Ok);
        tokio::time::timeout(Duration::from_secs(1), notified)
            .await
            .expect("shutdown should be signalled")
            .unwrap();
    }
}
