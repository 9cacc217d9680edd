//! Data types for the streaming speech pipeline.

use crate::audio::buffer::AudioBuffer;
use crate::error::TtsError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// One sentence-sized unit of text, synthesized independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// Position in the input, from 0 with no gaps.
    pub index: u64,
    /// Non-empty, trimmed text.
    pub text: String,
}

impl Utterance {
    pub fn new(index: u64, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }
}

/// Synthesis outcome for one utterance.
///
/// A failed utterance carries a zero-length marker buffer plus its error, so
/// the coordinator can advance past it in order.
#[derive(Debug)]
pub struct AudioResult {
    pub index: u64,
    pub text: String,
    pub audio: AudioBuffer,
    pub error: Option<TtsError>,
    /// Time spent inside the synthesizer.
    pub synth_time: Duration,
}

impl AudioResult {
    pub fn success(utterance: Utterance, audio: AudioBuffer, synth_time: Duration) -> Self {
        Self {
            index: utterance.index,
            text: utterance.text,
            audio,
            error: None,
            synth_time,
        }
    }

    pub fn failure(
        utterance: Utterance,
        error: TtsError,
        sample_rate: u32,
        synth_time: Duration,
    ) -> Self {
        Self {
            index: utterance.index,
            text: utterance.text,
            audio: AudioBuffer::silent_marker(sample_rate),
            error: Some(error),
            synth_time,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Lifecycle of one pipeline session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
    /// Input exhausted, finishing dispatched utterances.
    Draining,
    Cancelled,
    Closed,
}

impl SessionState {
    /// Whether `self → next` is a legal transition.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Running, Draining)
                | (Running, Cancelled)
                | (Draining, Cancelled)
                | (Running, Closed)
                | (Draining, Closed)
                | (Cancelled, Closed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Draining => "draining",
            SessionState::Cancelled => "cancelled",
            SessionState::Closed => "closed",
        }
    }

    /// Still producing audio.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Running | SessionState::Draining)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A non-fatal per-utterance failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtteranceFailure {
    pub index: u64,
    pub text: String,
    pub message: String,
}

/// Progress notifications, sent without blocking the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// The segmenter produced an utterance.
    Queued { index: u64, text: String },
    Synthesized { index: u64, synth_time: Duration },
    Played { index: u64 },
    Failed(UtteranceFailure),
}

/// Summary returned when a session ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionReport {
    /// Utterances produced by the segmenter.
    pub utterances: u64,
    /// Utterances handed to the sink.
    pub played: u64,
    pub failures: Vec<UtteranceFailure>,
    pub cancelled: bool,
    /// Highest number of utterances claimed but not yet played.
    pub peak_in_flight: usize,
    /// Input that ended the session early (undecodable text).
    pub input_error: Option<String>,
    /// Time from start until the first buffer reached the sink.
    pub first_audio: Option<Duration>,
    pub elapsed: Duration,
}

impl SessionReport {
    /// Completed without failures, cancellation or input errors.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled && self.input_error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(Idle.can_advance_to(Running));
        assert!(Running.can_advance_to(Draining));
        assert!(Running.can_advance_to(Cancelled));
        assert!(Draining.can_advance_to(Closed));
        assert!(Cancelled.can_advance_to(Closed));

        assert!(!Idle.can_advance_to(Closed));
        assert!(!Closed.can_advance_to(Running));
        assert!(!Cancelled.can_advance_to(Draining));
        assert!(!Draining.can_advance_to(Running));
    }

    #[test]
    fn test_failure_result_carries_marker() {
        let result = AudioResult::failure(
            Utterance::new(2, "bad"),
            TtsError::Synthesis {
                message: "unsupported character".to_string(),
            },
            22050,
            Duration::ZERO,
        );
        assert!(result.is_failure());
        assert!(result.audio.is_empty());
        assert_eq!(result.index, 2);
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&SessionState::Draining).unwrap();
        assert_eq!(json, "\"draining\"");
        assert_eq!(SessionState::Cancelled.to_string(), "cancelled");
    }
}
