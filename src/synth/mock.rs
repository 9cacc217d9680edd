//! In-memory backends for tests and dry runs.
//!
//! `MockSynthesizer` encodes the utterance text into the sample buffer so a
//! sink can tell which sentence it received (see [`MockSynthesizer::decode`]).

use crate::audio::buffer::AudioBuffer;
use crate::defaults;
use crate::error::{Result, TtsError};
use crate::synth::{SynthBackend, Synthesizer};
use crate::voice::{Device, ModelMetadata, VoiceModel};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

type DelayFn = Arc<dyn Fn(&str) -> Duration + Send + Sync>;

/// Mock synthesizer with configurable latency and failures.
#[derive(Clone)]
pub struct MockSynthesizer {
    delay: DelayFn,
    fail_on: Vec<String>,
    device_fault_on: Vec<String>,
    reentrant: bool,
    calls: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    peak_active: Arc<AtomicUsize>,
}

impl std::fmt::Debug for MockSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSynthesizer")
            .field("fail_on", &self.fail_on)
            .field("device_fault_on", &self.device_fault_on)
            .field("reentrant", &self.reentrant)
            .field("calls", &self.calls.load(Ordering::SeqCst))
            .finish()
    }
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSynthesizer {
    /// Instant, always-succeeding synthesizer.
    pub fn new() -> Self {
        Self {
            delay: Arc::new(|_| Duration::ZERO),
            fail_on: Vec::new(),
            device_fault_on: Vec::new(),
            reentrant: false,
            calls: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            peak_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sleep for a fixed time in every call.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_delay_fn(move |_| delay)
    }

    /// Sleep for a text-dependent time in every call.
    pub fn with_delay_fn<F>(mut self, delay: F) -> Self
    where
        F: Fn(&str) -> Duration + Send + Sync + 'static,
    {
        self.delay = Arc::new(delay);
        self
    }

    /// Fail with `TtsError::Synthesis` when the text contains `needle`.
    pub fn with_failure_on(mut self, needle: &str) -> Self {
        self.fail_on.push(needle.to_string());
        self
    }

    /// Fail with `TtsError::Device` when the text contains `needle`.
    pub fn with_device_fault_on(mut self, needle: &str) -> Self {
        self.device_fault_on.push(needle.to_string());
        self
    }

    /// Declare the mock safe for concurrent calls.
    pub fn with_reentrant(mut self, reentrant: bool) -> Self {
        self.reentrant = reentrant;
        self
    }

    /// Number of synthesize calls so far (shared between clones).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping synthesize calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    /// Audio the mock produces for `text`.
    pub fn encode(text: &str) -> AudioBuffer {
        AudioBuffer::mono(text.bytes().map(i16::from).collect(), defaults::SAMPLE_RATE)
    }

    /// Recover the text a mock buffer was produced from.
    pub fn decode(audio: &AudioBuffer) -> String {
        let bytes: Vec<u8> = audio
            .samples
            .iter()
            .map(|&s| u8::try_from(s).unwrap_or(b'?'))
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Synthesizer for MockSynthesizer {
    fn synthesize(&self, text: &str) -> Result<AudioBuffer> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now_active, Ordering::SeqCst);

        let delay = (self.delay)(text);
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let result = if self.device_fault_on.iter().any(|n| text.contains(n.as_str())) {
            Err(TtsError::Device {
                message: format!("mock device fault on {:?}", text),
            })
        } else if self.fail_on.iter().any(|n| text.contains(n.as_str())) {
            Err(TtsError::Synthesis {
                message: format!("mock synthesis failure on {:?}", text),
            })
        } else {
            Ok(Self::encode(text))
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn is_reentrant(&self) -> bool {
        self.reentrant
    }
}

/// Mock backend that counts loads and hands out a shared `MockSynthesizer`.
pub struct MockBackend {
    synthesizer: MockSynthesizer,
    load_delay: Duration,
    gpu_available: bool,
    fail_load: bool,
    loads: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(MockSynthesizer::new())
    }
}

impl MockBackend {
    pub fn new(synthesizer: MockSynthesizer) -> Self {
        Self {
            synthesizer,
            load_delay: Duration::ZERO,
            gpu_available: true,
            fail_load: false,
            loads: AtomicUsize::new(0),
        }
    }

    /// Sleep while loading, widening the window for concurrent first use.
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    /// Report GPU loads as `DeviceUnavailable`.
    pub fn without_gpu(mut self) -> Self {
        self.gpu_available = false;
        self
    }

    /// Reject every model.
    pub fn with_load_failure(mut self) -> Self {
        self.fail_load = true;
        self
    }

    /// Number of successful loads.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl SynthBackend for MockBackend {
    fn load(
        &self,
        model: &VoiceModel,
        _metadata: &ModelMetadata,
        device: Device,
    ) -> Result<Arc<dyn Synthesizer>> {
        if !self.load_delay.is_zero() {
            thread::sleep(self.load_delay);
        }
        if device == Device::Gpu && !self.gpu_available {
            return Err(TtsError::DeviceUnavailable {
                device: device.to_string(),
            });
        }
        if self.fail_load {
            return Err(TtsError::ModelLoad {
                voice: model.name.clone(),
                message: "mock load failure".to_string(),
            });
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.synthesizer.clone()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
