//! xvatts - Streaming text-to-speech for xVA-Synth voices
//!
//! Splits text into sentences and plays each one as soon as it is
//! synthesized, in order, while later sentences are still being generated.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod daemon;
pub mod defaults;
pub mod error;
pub mod ipc;
pub mod pipeline;
pub mod synth;
pub mod text;
pub mod voice;

// Composition root - needs the CLI stack and the real backend
#[cfg(all(feature = "cli", feature = "xva"))]
pub mod app;

// Core traits (source → synthesize → sink)
pub use pipeline::sink::{CollectorSink, PlaybackSink, StopSignal, WavFileSink};
pub use synth::{SynthBackend, Synthesizer};
pub use text::source::TextSource;

// Pipeline
pub use pipeline::orchestrator::{
    CancelHandle, PipelineConfig, PipelineHandle, StreamingPipeline,
};
pub use pipeline::types::{SessionEvent, SessionReport, SessionState, Utterance};
pub use text::segmenter::{SegmentMode, Segmenter, SegmenterConfig};

// Voices
pub use voice::{Device, ModelCatalog, VoiceHandle, VoiceRegistry};

// Error handling
pub use error::{Result, TtsError};

// Config
pub use config::Config;

// Stage error reporting
pub use pipeline::error::{ErrorReporter, StageError};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
