//! Text-to-speech application entry point.
//!
//! Wires the pieces together for one CLI invocation:
//! text source → streaming pipeline → player or WAV files

use crate::audio::player::PlayerSink;
use crate::config::Config;
use crate::error::{Result, TtsError};
use crate::pipeline::orchestrator::{PipelineConfig, StreamingPipeline};
use crate::pipeline::sink::{PlaybackSink, WavFileSink};
use crate::pipeline::types::{SessionEvent, SessionReport};
use crate::synth::xva::{XvaBackend, XvaSettings};
use crate::text::segmenter::SegmentMode;
use crate::text::source::{ReaderSource, StaticText, TextSource};
use crate::voice::Device;
use crate::voice::catalog::ModelCatalog;
use crate::voice::registry::VoiceRegistry;
use owo_colors::OwoColorize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

/// Options for one speak invocation, already merged with the CLI.
#[derive(Debug, Clone, Default)]
pub struct SpeakOptions {
    /// Text from the command line; `None` reads stdin.
    pub text: Option<String>,
    pub voice: Option<String>,
    pub device: Option<Device>,
    /// Speak sentence by sentence instead of the whole text at once.
    pub stream: bool,
    /// Write WAV files instead of playing.
    pub no_play: bool,
    pub output_dir: Option<PathBuf>,
    pub quiet: bool,
    pub verbosity: u8,
}

/// Registry backed by the xVA-Synth server and the configured models directory.
pub fn build_registry(config: &Config) -> Result<Arc<VoiceRegistry>> {
    let backend = XvaBackend::new(XvaSettings::from_config(&config.server))?;
    Ok(Arc::new(VoiceRegistry::new(
        ModelCatalog::new(&config.voice.models_dir),
        Arc::new(backend),
    )))
}

/// Print available voices, one per line.
pub fn run_list_voices(registry: &VoiceRegistry) -> Result<()> {
    let voices = registry.list()?;
    if voices.is_empty() {
        eprintln!(
            "No voices found in {}",
            registry.catalog().root().display()
        );
        return Ok(());
    }
    for voice in voices {
        println!("{}", voice);
    }
    Ok(())
}

/// Print "Available voices: a, b, c" to stderr, for error messages.
pub fn print_available_voices(registry: &VoiceRegistry) {
    match registry.list() {
        Ok(voices) if !voices.is_empty() => {
            eprintln!("Available voices: {}", voices.join(", "));
        }
        Ok(_) => eprintln!(
            "No voices found in {}",
            registry.catalog().root().display()
        ),
        Err(e) => eprintln!("Could not list voices: {}", e),
    }
}

/// Pick the text source: explicit text, streamed stdin, or all of stdin.
///
/// Reading all of stdin blocks, so it runs off the async runtime.
async fn text_source(text: Option<String>, stream: bool) -> Result<Box<dyn TextSource>> {
    match text {
        Some(text) => Ok(Box::new(StaticText::new(text))),
        None if stream => Ok(Box::new(ReaderSource::stdin())),
        None => {
            let text = tokio::task::spawn_blocking(|| read_all_text(std::io::stdin()))
                .await
                .map_err(|e| TtsError::Other(format!("stdin reader task failed: {}", e)))??;
            Ok(Box::new(StaticText::new(text)))
        }
    }
}

fn read_all_text(mut reader: impl Read) -> Result<String> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| TtsError::Segmentation {
        message: format!("stdin is not valid UTF-8: {}", e.utf8_error()),
    })
}

/// Playback sink, or a WAV writer in --no-play mode.
fn playback_sink(config: &Config, options: &SpeakOptions) -> Result<Box<dyn PlaybackSink>> {
    if options.no_play {
        let dir = options
            .output_dir
            .clone()
            .or_else(|| config.playback.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."));
        return Ok(Box::new(WavFileSink::new(dir).with_print_paths(true)));
    }
    Ok(Box::new(PlayerSink::new(config.playback.player.as_deref())?))
}

/// Print progress and failures as the session runs.
fn spawn_status_printer(
    events: crossbeam_channel::Receiver<SessionEvent>,
    verbosity: u8,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in events {
            match event {
                SessionEvent::Failed(failure) => eprintln!(
                    "{} sentence {} ({:?}): {}",
                    "Skipped".yellow(),
                    failure.index + 1,
                    failure.text,
                    failure.message
                ),
                SessionEvent::Synthesized { index, synth_time } if verbosity >= 1 => eprintln!(
                    "  {} sentence {} in {:.1}s",
                    "synthesized".dimmed(),
                    index + 1,
                    synth_time.as_secs_f32()
                ),
                SessionEvent::Played { index } if verbosity >= 1 => {
                    eprintln!("  {} sentence {}", "played".dimmed(), index + 1)
                }
                _ => {}
            }
        }
    })
}

/// Run the speak command: resolve voice → synthesize → play.
///
/// Per-sentence failures are reported and skipped. Ctrl-C cancels the
/// session cleanly.
///
/// # Errors
/// Session-fatal errors: unknown voice (after listing the available ones),
/// model load failure, missing player, device faults.
pub async fn run_speak_command(
    config: Config,
    registry: Arc<VoiceRegistry>,
    options: SpeakOptions,
) -> Result<SessionReport> {
    config.validate()?;

    let sink = playback_sink(&config, &options)?;
    let voice = options
        .voice
        .clone()
        .unwrap_or_else(|| config.voice.name.clone());
    let device = options.device.unwrap_or(config.voice.device);
    let fallback = config.voice.gpu_fallback;

    if !options.quiet {
        eprintln!("Loading voice '{}' on {}...", voice, device);
    }
    let handle = {
        let registry = Arc::clone(&registry);
        let voice = voice.clone();
        tokio::task::spawn_blocking(move || {
            registry.resolve_with_fallback(&voice, device, fallback)
        })
        .await
        .map_err(|e| TtsError::Other(format!("Voice loading task failed: {}", e)))?
    };
    let handle = match handle {
        Ok(handle) => handle,
        Err(e @ TtsError::VoiceNotFound { .. }) => {
            print_available_voices(&registry);
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    let mode = if options.stream {
        SegmentMode::Sentences
    } else {
        SegmentMode::Whole
    };
    let source = text_source(options.text.clone(), options.stream).await?;

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let pipeline_config = PipelineConfig {
        event_tx: (!options.quiet).then_some(event_tx),
        ..PipelineConfig::from_stream_config(&config.stream, mode)
    };
    let printer = spawn_status_printer(event_rx, options.verbosity);

    let session = StreamingPipeline::new(pipeline_config).start(handle, source, sink)?;
    let canceller = session.canceller();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel();
        }
    });

    let outcome = tokio::task::spawn_blocking(move || {
        let outcome = session.wait();
        if printer.join().is_err() {
            tracing::warn!("status printer panicked");
        }
        outcome
    })
    .await
    .map_err(|e| TtsError::Other(format!("Session task failed: {}", e)))?;
    interrupt.abort();

    let report = outcome?;
    if !options.quiet {
        if report.cancelled {
            eprintln!("{}", "Stopped.".yellow());
        }
        if let Some(error) = &report.input_error {
            eprintln!("{} {}", "Input ended early:".yellow(), error);
        }
        if options.verbosity >= 1 {
            eprintln!(
                "Spoke {}/{} sentences in {:.1}s",
                report.played,
                report.utterances,
                report.elapsed.as_secs_f32()
            );
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{MockBackend, MockSynthesizer};
    use std::path::Path;
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

    fn mock_registry(models: &Path, backend: MockBackend) -> Arc<VoiceRegistry> {
        write_model(models, "masseffect", "me3_edi");
        Arc::new(VoiceRegistry::new(
            ModelCatalog::new(models),
            Arc::new(backend),
        ))
    }

    fn no_play_options(text: &str, stream: bool, out: &Path) -> SpeakOptions {
        SpeakOptions {
            text: Some(text.to_string()),
            stream,
            no_play: true,
            output_dir: Some(out.to_path_buf()),
            quiet: true,
            ..SpeakOptions::default()
        }
    }

    fn written_wavs(dir: &Path) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "wav"))
            .collect();
        paths.sort();
        paths
    }

    #[tokio::test]
    async fn test_stream_writes_one_file_per_sentence() {
        let models = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let registry = mock_registry(models.path(), MockBackend::default());

        let report = run_speak_command(
            Config::default(),
            registry,
            no_play_options("Hello there. How are you? Great!", true, out.path()),
        )
        .await
        .unwrap();

        assert_eq!(report.utterances, 3);
        assert_eq!(report.played, 3);
        assert!(report.is_clean());

        let texts: Vec<String> = written_wavs(out.path())
            .iter()
            .map(|p| MockSynthesizer::decode(&crate::audio::AudioBuffer::from_wav_file(p).unwrap()))
            .collect();
        assert_eq!(texts, vec!["Hello there.", "How are you?", "Great!"]);
    }

    #[tokio::test]
    async fn test_whole_text_writes_single_file() {
        let models = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let registry = mock_registry(models.path(), MockBackend::default());

        let report = run_speak_command(
            Config::default(),
            registry,
            no_play_options("Hello there. How are you? Great!", false, out.path()),
        )
        .await
        .unwrap();

        assert_eq!(report.played, 1);
        assert_eq!(written_wavs(out.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_voice_is_fatal() {
        let models = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let registry = mock_registry(models.path(), MockBackend::default());

        let options = SpeakOptions {
            voice: Some("doesnotexist".to_string()),
            ..no_play_options("Hello.", true, out.path())
        };
        let result = run_speak_command(Config::default(), registry, options).await;
        assert!(matches!(result, Err(TtsError::VoiceNotFound { .. })));
        assert!(written_wavs(out.path()).is_empty());
    }

    #[tokio::test]
    async fn test_gpu_falls_back_to_cpu_when_enabled() {
        let models = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let registry = mock_registry(models.path(), MockBackend::default().without_gpu());

        let options = SpeakOptions {
            device: Some(Device::Gpu),
            ..no_play_options("Hello.", true, out.path())
        };
        let report = run_speak_command(Config::default(), registry, options)
            .await
            .unwrap();
        assert_eq!(report.played, 1);
    }

    #[tokio::test]
    async fn test_gpu_unavailable_without_fallback_is_fatal() {
        let models = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let registry = mock_registry(models.path(), MockBackend::default().without_gpu());

        let mut config = Config::default();
        config.voice.gpu_fallback = false;
        let options = SpeakOptions {
            device: Some(Device::Gpu),
            ..no_play_options("Hello.", true, out.path())
        };
        let result = run_speak_command(config, registry, options).await;
        assert!(matches!(result, Err(TtsError::DeviceUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_failed_sentence_is_skipped_not_fatal() {
        let models = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let synth = MockSynthesizer::new().with_failure_on("Broken");
        let registry = mock_registry(models.path(), MockBackend::new(synth));

        let report = run_speak_command(
            Config::default(),
            registry,
            no_play_options("One. Broken two. Three.", true, out.path()),
        )
        .await
        .unwrap();

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 1);
        assert_eq!(written_wavs(out.path()).len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_loading() {
        let models = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let backend = Arc::new(MockBackend::default());
        write_model(models.path(), "masseffect", "me3_edi");
        let registry = Arc::new(VoiceRegistry::new(
            ModelCatalog::new(models.path()),
            backend.clone(),
        ));

        let mut config = Config::default();
        config.stream.workers = 0;
        let result =
            run_speak_command(config, registry, no_play_options("Hi.", true, out.path())).await;
        assert!(matches!(result, Err(TtsError::ConfigInvalidValue { .. })));
        assert_eq!(backend.loads(), 0);
    }

    #[tokio::test]
    async fn test_text_source_prefers_explicit_text() {
        let mut source = text_source(Some("Hello.".to_string()), true).await.unwrap();
        assert_eq!(source.next_chunk().unwrap().as_deref(), Some("Hello."));
        assert!(source.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_read_all_text_rejects_invalid_utf8() {
        let ok = read_all_text(std::io::Cursor::new(b"One. Two.".to_vec())).unwrap();
        assert_eq!(ok, "One. Two.");

        let result = read_all_text(std::io::Cursor::new(b"One.\xff\xfe".to_vec()));
        assert!(matches!(result, Err(TtsError::Segmentation { .. })));
    }

    #[test]
    fn test_list_voices_on_empty_dir() {
        let models = TempDir::new().unwrap();
        let registry = VoiceRegistry::new(
            ModelCatalog::new(models.path()),
            Arc::new(MockBackend::default()),
        );
        assert!(run_list_voices(&registry).is_ok());
    }
}
