//! Process-scoped cache of loaded voices.
//!
//! Each voice name owns a slot. The map lock is held only to find or create
//! the slot; loading happens under the slot's own lock, so concurrent first
//! use of one name loads once while different names load in parallel.

use crate::audio::buffer::AudioBuffer;
use crate::error::{Result, TtsError};
use crate::synth::{SynthBackend, Synthesizer};
use crate::voice::catalog::{ModelCatalog, VoiceModel};
use crate::voice::Device;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// A loaded voice, shared by every session that uses it.
pub struct VoiceHandle {
    name: String,
    device: Device,
    model: VoiceModel,
    synthesizer: Arc<dyn Synthesizer>,
    call_lock: Mutex<()>,
}

impl std::fmt::Debug for VoiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceHandle")
            .field("name", &self.name)
            .field("device", &self.device)
            .field("model", &self.model.metadata_path)
            .finish()
    }
}

impl VoiceHandle {
    pub fn new(
        name: impl Into<String>,
        device: Device,
        model: VoiceModel,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        Self {
            name: name.into(),
            device,
            model,
            synthesizer,
            call_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn model(&self) -> &VoiceModel {
        &self.model
    }

    /// Synthesize one utterance.
    ///
    /// Calls into a non-re-entrant synthesizer are serialised, so workers
    /// sharing this handle never overlap inside the backend.
    pub fn synthesize(&self, text: &str) -> Result<AudioBuffer> {
        if self.synthesizer.is_reentrant() {
            return self.synthesizer.synthesize(text);
        }
        let _guard = self
            .call_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.synthesizer.synthesize(text)
    }
}

type Slot = Arc<Mutex<Option<Arc<VoiceHandle>>>>;

/// Resolves voice names to loaded handles. Nothing is ever evicted.
pub struct VoiceRegistry {
    catalog: ModelCatalog,
    backend: Arc<dyn SynthBackend>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl VoiceRegistry {
    pub fn new(catalog: ModelCatalog, backend: Arc<dyn SynthBackend>) -> Self {
        Self {
            catalog,
            backend,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Return the cached handle for `voice`, loading it on first use.
    ///
    /// The cache is keyed by name only. A cached voice requested for another
    /// device is returned as-is.
    ///
    /// # Errors
    /// `VoiceNotFound`, `ModelLoad` or `DeviceUnavailable`. Failed loads are
    /// not cached.
    pub fn resolve(&self, voice: &str, device: Device) -> Result<Arc<VoiceHandle>> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(voice.to_string()).or_default().clone()
        };

        let mut loaded = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = loaded.as_ref() {
            if handle.device() != device {
                tracing::debug!(
                    voice,
                    requested = %device,
                    loaded = %handle.device(),
                    "voice already loaded on another device, reusing it"
                );
            }
            return Ok(Arc::clone(handle));
        }

        let model = self.catalog.locate(voice)?;
        let metadata = model.load_metadata()?;
        tracing::info!(
            voice,
            %device,
            backend = self.backend.name(),
            model = %model.weights_path.display(),
            "loading voice model"
        );
        let synthesizer = self.backend.load(&model, &metadata, device)?;
        let handle = Arc::new(VoiceHandle::new(voice, device, model, synthesizer));
        *loaded = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Resolve, retrying on CPU when the GPU is unavailable and `gpu_fallback` is set.
    pub fn resolve_with_fallback(
        &self,
        voice: &str,
        device: Device,
        gpu_fallback: bool,
    ) -> Result<Arc<VoiceHandle>> {
        match self.resolve(voice, device) {
            Err(TtsError::DeviceUnavailable { device: dev }) if gpu_fallback && device == Device::Gpu => {
                tracing::warn!(voice, "{dev} unavailable, falling back to cpu");
                self.resolve(voice, Device::Cpu)
            }
            other => other,
        }
    }

    /// Voice names available on disk. Loads nothing.
    pub fn list(&self) -> Result<Vec<String>> {
        self.catalog.list()
    }

    /// Names of voices currently loaded, sorted. Voices mid-load are omitted.
    pub fn loaded(&self) -> Vec<String> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = slots
            .iter()
            .filter(|(_, slot)| slot.try_lock().map(|s| s.is_some()).unwrap_or(false))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}
