//! Default configuration constants for xvatts.
//!
//! This module provides shared constants used across different configuration types
//! to ensure consistency and eliminate duplication.

/// Default xVA-Synth server address.
pub const SERVER_URL: &str = "http://localhost:8008";

/// Default voice name.
pub const DEFAULT_VOICE: &str = "edi";

/// Directory scanned for `<game>/<prefix>_<voice>.json` model metadata.
pub const MODELS_DIR: &str = "resources/app/models";

/// Local directory where the server's output files become visible.
pub const OUTPUT_DIR: &str = "./resources";

/// The same directory as seen by the synthesis server (container mount).
pub const SERVER_OUTPUT_DIR: &str = "/app/resources";

/// Base language passed to the synthesis server.
pub const BASE_LANG: &str = "en";

/// Model type understood by the xVA-Synth server.
pub const MODEL_TYPE: &str = "xVAPitch";

/// Speaking pace multiplier (1.0 = normal speed).
pub const PACE: f32 = 1.0;

/// HTTP request timeout in seconds for control calls.
pub const REQUEST_TIMEOUT_SECS: u64 = 120;

/// How long to wait for a synthesized file to appear, in seconds.
pub const SYNTH_TIMEOUT_SECS: u64 = 30;

/// Interval at which the output file is polled while waiting.
pub const OUTPUT_POLL_MS: u64 = 100;

/// Default number of synthesis workers.
///
/// GPU synthesis is the bottleneck and is generally not parallel-safe, so one
/// worker overlapping with playback is usually the best choice.
pub const WORKERS: usize = 1;

/// Maximum utterances claimed but not yet played (backpressure bound).
pub const MAX_IN_FLIGHT: usize = 2;

/// Capacity of the segmenter → worker utterance channel.
pub const UTTERANCE_BUFFER: usize = 16;

/// Polling interval for cooperative cancellation checks.
pub const CANCEL_POLL_MS: u64 = 50;

/// Sample rate assumed for empty markers and the mock backend.
pub const SAMPLE_RATE: u32 = 22050;

/// External players tried in order when none is configured.
pub const PLAYERS: &[&str] = &["paplay", "aplay", "ffplay", "mpv"];

/// Abbreviations whose trailing period does not end a sentence (lowercase, no final dot).
pub const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "mt", "vs", "e.g", "i.e", "approx",
    "fig", "gen", "col", "capt", "lt", "sgt", "rev", "hon",
];

/// Capitalised abbreviations that only hold when a number follows ("No. 5").
pub const NUMBER_PREFIXES: &[&str] = &["No", "Nos", "Vol"];
