//! Error classification and reporting for pipeline stages.

use std::fmt;

/// Errors raised inside a pipeline stage.
#[derive(Debug, Clone)]
pub enum StageError {
    /// Affects one utterance; the session carries on.
    Recoverable(String),
    /// Ends the session.
    Fatal(String),
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StageError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StageError {}

impl From<&crate::error::TtsError> for StageError {
    fn from(error: &crate::error::TtsError) -> Self {
        if error.is_session_fatal() {
            StageError::Fatal(error.to_string())
        } else {
            StageError::Recoverable(error.to_string())
        }
    }
}

/// Trait for reporting stage errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a stage.
    fn report(&self, stage: &str, error: &StageError);
}

/// Default reporter: recoverable errors at warn, fatal ones at error.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, stage: &str, error: &StageError) {
        match error {
            StageError::Recoverable(msg) => tracing::warn!(stage, "{msg}"),
            StageError::Fatal(msg) => tracing::error!(stage, "{msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TtsError;

    #[test]
    fn test_stage_error_display() {
        let recoverable = StageError::Recoverable("temporary failure".to_string());
        assert_eq!(
            recoverable.to_string(),
            "Recoverable error: temporary failure"
        );

        let fatal = StageError::Fatal("critical failure".to_string());
        assert_eq!(fatal.to_string(), "Fatal error: critical failure");
    }

    #[test]
    fn test_classification_from_tts_error() {
        let synthesis = TtsError::Synthesis {
            message: "bad glyph".to_string(),
        };
        assert!(matches!(
            StageError::from(&synthesis),
            StageError::Recoverable(_)
        ));

        let device = TtsError::Device {
            message: "CUDA fault".to_string(),
        };
        assert!(matches!(StageError::from(&device), StageError::Fatal(_)));
    }

    #[test]
    fn test_log_reporter() {
        let reporter = LogReporter;
        let error = StageError::Recoverable("test error".to_string());
        // Just ensure it doesn't panic
        reporter.report("TestStage", &error);
    }
}
