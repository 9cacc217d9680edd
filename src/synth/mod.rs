//! Synthesis backends.
//!
//! A `SynthBackend` turns a located voice model into a loaded `Synthesizer`.
//! Synthesis itself is an opaque, blocking, all-or-nothing call.

pub mod mock;
#[cfg(feature = "xva")]
pub mod xva;

pub use mock::{MockBackend, MockSynthesizer};

use crate::audio::buffer::AudioBuffer;
use crate::error::Result;
use crate::voice::{Device, ModelMetadata, VoiceModel};
use std::sync::Arc;

/// One loaded voice model.
pub trait Synthesizer: Send + Sync {
    /// Synthesize one utterance.
    ///
    /// # Errors
    /// `TtsError::Synthesis` for model-internal failures (no audio produced),
    /// `TtsError::Device` when the accelerator faults mid-call.
    fn synthesize(&self, text: &str) -> Result<AudioBuffer>;

    /// Whether concurrent `synthesize` calls on this instance are safe.
    fn is_reentrant(&self) -> bool {
        false
    }
}

/// Implement Synthesizer for Arc<T> to allow sharing across sessions.
impl<T: Synthesizer> Synthesizer for Arc<T> {
    fn synthesize(&self, text: &str) -> Result<AudioBuffer> {
        (**self).synthesize(text)
    }

    fn is_reentrant(&self) -> bool {
        (**self).is_reentrant()
    }
}

/// Loads voice models onto a compute device.
pub trait SynthBackend: Send + Sync {
    /// Load `model` on `device`.
    ///
    /// # Errors
    /// `TtsError::DeviceUnavailable` when the device cannot be used,
    /// `TtsError::ModelLoad` when the model is rejected.
    fn load(
        &self,
        model: &VoiceModel,
        metadata: &ModelMetadata,
        device: Device,
    ) -> Result<Arc<dyn Synthesizer>>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}
