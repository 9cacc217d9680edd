//! Streaming speech pipeline.
//!
//! A segmentation producer, a pool of synthesis workers and one ordered
//! playback coordinator, each on its own thread, connected by bounded
//! crossbeam channels plus an in-flight gate for backpressure.

pub mod coordinator;
pub mod error;
pub mod orchestrator;
pub mod sink;
pub mod types;

pub use coordinator::{InFlightGate, ReorderBuffer};
pub use error::{ErrorReporter, LogReporter, StageError};
pub use orchestrator::{CancelHandle, PipelineConfig, PipelineHandle, StreamingPipeline};
pub use sink::{CollectorSink, PlaybackSink, StopSignal, WavFileSink};
pub use types::{
    AudioResult, SessionEvent, SessionReport, SessionState, Utterance, UtteranceFailure,
};
