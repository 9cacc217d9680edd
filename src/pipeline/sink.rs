use crate::audio::buffer::AudioBuffer;
use crate::error::{Result, TtsError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Shared stop flag handed to playback sinks.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless the signal fires first.
    /// Returns true if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let slice = Duration::from_millis(5);
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }
}

/// Pluggable audio output for the pipeline.
/// Pairs with TextSource for input - this handles synthesized audio.
pub trait PlaybackSink: Send + 'static {
    /// Play one buffer to completion, or until `stop` fires.
    /// Called with strictly increasing `index`, never concurrently.
    fn play(&mut self, index: u64, audio: &AudioBuffer, stop: &StopSignal) -> Result<()>;

    /// Called once the session is over.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "sink"
    }
}

/// Sink that records what it was given. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct CollectorSink {
    played: Arc<Mutex<Vec<(u64, AudioBuffer)>>>,
    play_delay: Duration,
    fail_on: Option<u64>,
    finished: Arc<AtomicBool>,
}

impl CollectorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate playback time for each buffer.
    pub fn with_play_delay(mut self, delay: Duration) -> Self {
        self.play_delay = delay;
        self
    }

    /// Fail playback of `index` with `TtsError::Playback`.
    pub fn with_failure_on(mut self, index: u64) -> Self {
        self.fail_on = Some(index);
        self
    }

    /// Everything played so far, in playback order.
    pub fn played(&self) -> Vec<(u64, AudioBuffer)> {
        self.played
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Indices played so far, in playback order.
    pub fn indices(&self) -> Vec<u64> {
        self.played().into_iter().map(|(i, _)| i).collect()
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

impl PlaybackSink for CollectorSink {
    fn play(&mut self, index: u64, audio: &AudioBuffer, stop: &StopSignal) -> Result<()> {
        if self.fail_on == Some(index) {
            return Err(TtsError::Playback {
                message: format!("collector refused utterance {index}"),
            });
        }
        if let Ok(mut played) = self.played.lock() {
            played.push((index, audio.clone()));
        }
        if !self.play_delay.is_zero() {
            stop.sleep(self.play_delay);
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

/// Sink that writes `tts_<pid>_<index>.wav` files instead of playing them.
pub struct WavFileSink {
    dir: PathBuf,
    print_paths: bool,
    written: Vec<PathBuf>,
}

impl WavFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            print_paths: false,
            written: Vec::new(),
        }
    }

    /// Print each written path to stdout.
    pub fn with_print_paths(mut self, print: bool) -> Self {
        self.print_paths = print;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl PlaybackSink for WavFileSink {
    fn play(&mut self, index: u64, audio: &AudioBuffer, _stop: &StopSignal) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self
            .dir
            .join(format!("tts_{}_{}.wav", std::process::id(), index));
        audio.write_wav_file(&path)?;
        if self.print_paths {
            println!("{}", path.display());
        }
        self.written.push(path);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "wav-file"
    }
}
