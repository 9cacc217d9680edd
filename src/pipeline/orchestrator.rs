//! Streaming speech pipeline: TextSource → Segmenter → synthesis workers → ordered playback.
//!
//! One producer thread segments input, a fixed pool of workers synthesizes
//! utterances, and one coordinator thread plays results strictly by index.
//! Cancellation is cooperative: threads poll the stop signal between
//! utterances and never interrupt a synthesis call.

use crate::config::StreamConfig;
use crate::defaults;
use crate::error::{Result, TtsError};
use crate::pipeline::coordinator::{InFlightGate, ReorderBuffer};
use crate::pipeline::error::{ErrorReporter, LogReporter, StageError};
use crate::pipeline::sink::{PlaybackSink, StopSignal};
use crate::pipeline::types::{
    AudioResult, SessionEvent, SessionReport, SessionState, Utterance, UtteranceFailure,
};
use crate::text::segmenter::{SegmentMode, Segmenter, SegmenterConfig};
use crate::text::source::TextSource;
use crate::voice::registry::VoiceHandle;
use crossbeam_channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded,
};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Configuration for a streaming session.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Synthesis worker threads
    pub workers: usize,
    /// Utterances allowed between claim and playback (backpressure bound)
    pub max_in_flight: usize,
    /// Capacity of the segmented-utterance queue
    pub utterance_buffer: usize,
    pub segmenter: SegmenterConfig,
    /// How often blocked threads re-check the stop signal
    pub cancel_poll: Duration,
    /// Optional event sender (crossbeam, non-blocking)
    pub event_tx: Option<Sender<SessionEvent>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: defaults::WORKERS,
            max_in_flight: defaults::MAX_IN_FLIGHT,
            utterance_buffer: defaults::UTTERANCE_BUFFER,
            segmenter: SegmenterConfig::default(),
            cancel_poll: Duration::from_millis(defaults::CANCEL_POLL_MS),
            event_tx: None,
        }
    }
}

impl PipelineConfig {
    /// Build a session config from the `[stream]` settings.
    pub fn from_stream_config(stream: &StreamConfig, mode: SegmentMode) -> Self {
        Self {
            workers: stream.workers,
            max_in_flight: stream.max_in_flight,
            segmenter: SegmenterConfig {
                mode,
                split_on_newlines: stream.split_on_newlines,
                abbreviations: stream.abbreviations,
            },
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(TtsError::ConfigInvalidValue {
                key: "stream.workers".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_in_flight == 0 {
            return Err(TtsError::ConfigInvalidValue {
                key: "stream.max_in_flight".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// State shared by every thread of one session.
struct Session {
    state: Mutex<SessionState>,
    state_changed: Condvar,
    stop: StopSignal,
    gate: InFlightGate,
    fatal: Mutex<Option<TtsError>>,
    input_error: Mutex<Option<String>>,
    utterances: AtomicU64,
    live_workers: AtomicUsize,
    live_threads: AtomicUsize,
    /// Dropped on close so receivers disconnect even if the producer is
    /// still blocked on input.
    event_tx: Mutex<Option<Sender<SessionEvent>>>,
    started: Instant,
}

impl Session {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            state_changed: Condvar::new(),
            stop: StopSignal::new(),
            gate: InFlightGate::new(config.max_in_flight),
            fatal: Mutex::new(None),
            input_error: Mutex::new(None),
            utterances: AtomicU64::new(0),
            live_workers: AtomicUsize::new(0),
            live_threads: AtomicUsize::new(0),
            event_tx: Mutex::new(config.event_tx.clone()),
            started: Instant::now(),
        }
    }

    fn state(&self) -> SessionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, next: SessionState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.can_advance_to(next) {
            return false;
        }
        tracing::debug!(from = %*state, to = %next, "session state");
        *state = next;
        drop(state);
        self.state_changed.notify_all();
        self.emit(SessionEvent::StateChanged(next));
        true
    }

    fn cancel(&self) {
        self.stop.trigger();
        self.advance(SessionState::Cancelled);
        self.gate.wake_all();
    }

    /// Record a session-fatal error (first one wins) and cancel.
    fn fail(&self, error: TtsError) {
        {
            let mut fatal = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
            if fatal.is_none() {
                *fatal = Some(error);
            }
        }
        self.cancel();
    }

    fn emit(&self, event: SessionEvent) {
        let event_tx = self.event_tx.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = event_tx.as_ref()
            && tx.try_send(event).is_err()
        {
            tracing::trace!("session event dropped");
        }
    }

    fn close_events(&self) {
        self.event_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Tracks thread exit; the last thread out closes the session.
struct ExitGuard {
    session: Arc<Session>,
    worker: bool,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.session.fail(TtsError::Other(format!(
                "{} thread panicked",
                if self.worker { "synthesis" } else { "playback" }
            )));
        }
        if self.worker {
            self.session.live_workers.fetch_sub(1, Ordering::SeqCst);
        }
        if self.session.live_threads.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.session.advance(SessionState::Closed);
            self.session.close_events();
        }
    }
}

/// What the coordinator saw while playing.
#[derive(Debug, Default)]
struct PlaybackOutcome {
    played: u64,
    failures: Vec<UtteranceFailure>,
    first_audio: Option<Duration>,
}

/// Cancels a session from anywhere without owning its handle.
#[derive(Clone)]
pub struct CancelHandle(Arc<Session>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.stop.is_triggered()
    }
}

/// Handle to a running session.
pub struct PipelineHandle {
    session: Arc<Session>,
    producer: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    coordinator: Option<JoinHandle<PlaybackOutcome>>,
}

impl PipelineHandle {
    /// Request cancellation. Workers finish their current synthesis call,
    /// then exit; playback is told to stop.
    pub fn cancel(&self) {
        if self.session.state().is_active() {
            tracing::debug!("cancelling session");
        }
        self.session.cancel();
    }

    /// Cloneable cancel switch for other threads (signal handlers, IPC).
    pub fn canceller(&self) -> CancelHandle {
        CancelHandle(self.session.clone())
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// True while the session is Running or Draining.
    pub fn is_running(&self) -> bool {
        self.session.state().is_active()
    }

    /// Synthesis workers that have not exited yet.
    pub fn live_workers(&self) -> usize {
        self.session.live_workers.load(Ordering::SeqCst)
    }

    /// Utterances claimed but not yet played.
    pub fn in_flight(&self) -> usize {
        self.session.gate.in_flight()
    }

    /// Block until the session is Closed or `timeout` elapses.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let state = self
            .session
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let (state, _) = self
            .session
            .state_changed
            .wait_timeout_while(state, timeout, |s| *s != SessionState::Closed)
            .unwrap_or_else(PoisonError::into_inner);
        *state == SessionState::Closed
    }

    /// Wait for the session to end and summarise it.
    ///
    /// # Errors
    /// The session-fatal error that ended the session, after every worker
    /// has been drained.
    pub fn wait(mut self) -> Result<SessionReport> {
        for worker in self.workers.drain(..) {
            join_logged(worker, "synthesis worker");
        }
        let outcome = match self.coordinator.take() {
            Some(handle) => match handle.join() {
                Ok(outcome) => outcome,
                Err(panic_info) => {
                    tracing::error!("playback thread panicked: {}", panic_message(&*panic_info));
                    PlaybackOutcome::default()
                }
            },
            None => PlaybackOutcome::default(),
        };
        if let Some(producer) = self.producer.take() {
            join_with_deadline(producer, Duration::from_secs(1));
        }

        let session = &self.session;
        session.close_events();
        if let Some(error) = session
            .fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(error);
        }

        Ok(SessionReport {
            utterances: session.utterances.load(Ordering::SeqCst),
            played: outcome.played,
            failures: outcome.failures,
            cancelled: session.stop.is_triggered(),
            peak_in_flight: session.gate.peak(),
            input_error: session
                .input_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
            first_audio: outcome.first_audio,
            elapsed: session.started.elapsed(),
        })
    }

    /// Cancel, then wait.
    pub fn stop(self) -> Result<SessionReport> {
        self.cancel();
        self.wait()
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        // A dropped handle must not leave a session speaking.
        if self.session.state().is_active() {
            self.session.cancel();
        }
    }
}

fn panic_message(panic_info: &(dyn std::any::Any + Send)) -> &str {
    panic_info
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
}

fn join_logged(handle: JoinHandle<()>, what: &str) {
    if let Err(panic_info) = handle.join() {
        tracing::error!("{what} panicked: {}", panic_message(&*panic_info));
    }
}

/// Join a thread that may be blocked on input; detach it after `timeout`.
fn join_with_deadline(handle: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            tracing::debug!("text producer still blocked on input, detaching");
            // Dropping the JoinHandle detaches the thread; it dies with the process.
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    join_logged(handle, "text producer");
}

/// Streaming text-to-speech pipeline.
pub struct StreamingPipeline {
    config: PipelineConfig,
    error_reporter: Arc<dyn ErrorReporter>,
}

impl StreamingPipeline {
    /// Creates a new pipeline with the default error reporter.
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            error_reporter: Arc::new(LogReporter),
        }
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = reporter;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Starts a session.
    ///
    /// # Arguments
    /// * `voice` - Resolved voice; resolution errors never reach the pipeline
    /// * `source` - Text input, read on the producer thread
    /// * `sink` - Playback target, driven by the coordinator thread
    ///
    /// # Returns
    /// Handle to control and wait for the session
    pub fn start(
        self,
        voice: Arc<VoiceHandle>,
        source: Box<dyn TextSource>,
        sink: Box<dyn PlaybackSink>,
    ) -> Result<PipelineHandle> {
        self.config.validate()?;
        let config = self.config;
        let poll = config.cancel_poll;

        let session = Arc::new(Session::new(&config));
        session
            .live_workers
            .store(config.workers, Ordering::SeqCst);
        session
            .live_threads
            .store(config.workers + 1, Ordering::SeqCst);
        session.advance(SessionState::Running);

        tracing::debug!(
            voice = voice.name(),
            workers = config.workers,
            max_in_flight = config.max_in_flight,
            source = source.name(),
            sink = sink.name(),
            "starting speech session"
        );

        let (utterance_tx, utterance_rx) = bounded::<Utterance>(config.utterance_buffer.max(1));
        let (result_tx, result_rx) = bounded::<AudioResult>(config.max_in_flight);

        let coordinator = {
            let session = session.clone();
            let reporter = self.error_reporter.clone();
            thread::spawn(move || run_coordinator(session, result_rx, sink, reporter, poll))
        };

        let workers = (0..config.workers)
            .map(|_| {
                let session = session.clone();
                let voice = voice.clone();
                let rx = utterance_rx.clone();
                let tx = result_tx.clone();
                let reporter = self.error_reporter.clone();
                thread::spawn(move || run_worker(session, voice, rx, tx, reporter, poll))
            })
            .collect();
        drop(utterance_rx);
        drop(result_tx);

        let producer = {
            let session = session.clone();
            let reporter = self.error_reporter.clone();
            let segmenter = Segmenter::new(config.segmenter.clone());
            thread::spawn(move || {
                run_producer(session, source, segmenter, utterance_tx, reporter, poll)
            })
        };

        Ok(PipelineHandle {
            session,
            producer: Some(producer),
            workers,
            coordinator: Some(coordinator),
        })
    }

    /// Start a session and wait for it to finish.
    pub fn run(
        self,
        voice: Arc<VoiceHandle>,
        source: Box<dyn TextSource>,
        sink: Box<dyn PlaybackSink>,
    ) -> Result<SessionReport> {
        self.start(voice, source, sink)?.wait()
    }
}

fn run_producer(
    session: Arc<Session>,
    mut source: Box<dyn TextSource>,
    mut segmenter: Segmenter,
    tx: Sender<Utterance>,
    reporter: Arc<dyn ErrorReporter>,
    poll: Duration,
) {
    loop {
        if session.stop.is_triggered() {
            return;
        }
        match source.next_chunk() {
            Ok(Some(chunk)) => {
                for utterance in segmenter.push(&chunk) {
                    if !dispatch(&session, &tx, utterance, poll) {
                        return;
                    }
                }
            }
            Ok(None) => {
                if let Some(utterance) = segmenter.finish()
                    && !dispatch(&session, &tx, utterance, poll)
                {
                    return;
                }
                break;
            }
            Err(e) => {
                reporter.report(source.name(), &StageError::Recoverable(e.to_string()));
                *session
                    .input_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(e.to_string());
                break;
            }
        }
    }

    // Draining before the queue closes, so Closed always follows it.
    session.advance(SessionState::Draining);
    drop(tx);
}

/// Queue one utterance, giving up if the session stops.
fn dispatch(session: &Session, tx: &Sender<Utterance>, utterance: Utterance, poll: Duration) -> bool {
    let (index, text) = (utterance.index, utterance.text.clone());
    let mut pending = utterance;
    loop {
        match tx.send_timeout(pending, poll) {
            Ok(()) => break,
            Err(SendTimeoutError::Timeout(back)) => {
                if session.stop.is_triggered() {
                    return false;
                }
                pending = back;
            }
            Err(SendTimeoutError::Disconnected(_)) => return false,
        }
    }
    session.utterances.fetch_add(1, Ordering::SeqCst);
    session.emit(SessionEvent::Queued { index, text });
    true
}

/// Take the next unclaimed utterance, or `None` on end of input or stop.
fn claim(session: &Session, rx: &Receiver<Utterance>, poll: Duration) -> Option<Utterance> {
    loop {
        match rx.recv_timeout(poll) {
            Ok(utterance) => return Some(utterance),
            Err(RecvTimeoutError::Timeout) => {
                if session.stop.is_triggered() {
                    return None;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return None,
        }
    }
}

fn run_worker(
    session: Arc<Session>,
    voice: Arc<VoiceHandle>,
    rx: Receiver<Utterance>,
    tx: Sender<AudioResult>,
    reporter: Arc<dyn ErrorReporter>,
    poll: Duration,
) {
    let _exit = ExitGuard {
        session: session.clone(),
        worker: true,
    };

    loop {
        if !session.gate.acquire(&session.stop, poll) {
            break;
        }
        let Some(utterance) = claim(&session, &rx, poll) else {
            session.gate.release();
            break;
        };
        if session.stop.is_triggered() {
            session.gate.release();
            break;
        }

        let started = Instant::now();
        let outcome = voice.synthesize(&utterance.text);
        let synth_time = started.elapsed();

        if session.stop.is_triggered() {
            tracing::debug!(index = utterance.index, "abandoning utterance after cancel");
            session.gate.release();
            break;
        }

        let result = match outcome {
            Ok(audio) => {
                session.emit(SessionEvent::Synthesized {
                    index: utterance.index,
                    synth_time,
                });
                AudioResult::success(utterance, audio, synth_time)
            }
            Err(e) if e.is_session_fatal() => {
                reporter.report("synthesizer", &StageError::from(&e));
                session.gate.release();
                session.fail(e);
                break;
            }
            Err(e) => AudioResult::failure(utterance, e, defaults::SAMPLE_RATE, synth_time),
        };

        if tx.send(result).is_err() {
            session.gate.release();
            break;
        }
    }
}

fn run_coordinator(
    session: Arc<Session>,
    rx: Receiver<AudioResult>,
    mut sink: Box<dyn PlaybackSink>,
    reporter: Arc<dyn ErrorReporter>,
    poll: Duration,
) -> PlaybackOutcome {
    let _exit = ExitGuard {
        session: session.clone(),
        worker: false,
    };
    let mut reorder = ReorderBuffer::new();
    let mut outcome = PlaybackOutcome::default();

    'session: loop {
        while let Some(result) = reorder.pop_ready() {
            if session.stop.is_triggered() {
                break 'session;
            }
            deliver(&session, sink.as_mut(), reporter.as_ref(), result, &mut outcome);
            session.gate.release();
        }
        if session.stop.is_triggered() {
            break;
        }

        match rx.recv_timeout(poll) {
            Ok(result) => reorder.insert(result),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                if reorder.buffered() > 0 {
                    tracing::warn!(
                        next = reorder.next_index(),
                        buffered = reorder.buffered(),
                        "workers exited before the next utterance arrived"
                    );
                }
                break;
            }
        }
    }

    if let Err(e) = sink.finish() {
        reporter.report(sink.name(), &StageError::Recoverable(e.to_string()));
    }
    outcome
}

/// Hand one in-order result to the sink, or skip it if it failed.
fn deliver(
    session: &Session,
    sink: &mut dyn PlaybackSink,
    reporter: &dyn ErrorReporter,
    result: AudioResult,
    outcome: &mut PlaybackOutcome,
) {
    if let Some(error) = result.error {
        reporter.report("synthesizer", &StageError::from(&error));
        record_failure(session, outcome, result.index, result.text, error.to_string());
        return;
    }
    if result.audio.is_empty() {
        tracing::debug!(index = result.index, "synthesizer returned no samples, skipping");
        return;
    }

    let first_audio = session.started.elapsed();
    match sink.play(result.index, &result.audio, &session.stop) {
        Ok(()) => {
            outcome.first_audio.get_or_insert(first_audio);
            outcome.played += 1;
            session.emit(SessionEvent::Played {
                index: result.index,
            });
        }
        Err(e) if e.is_session_fatal() => {
            reporter.report(sink.name(), &StageError::from(&e));
            session.fail(e);
        }
        Err(e) => {
            reporter.report(sink.name(), &StageError::from(&e));
            record_failure(session, outcome, result.index, result.text, e.to_string());
        }
    }
}

fn record_failure(
    session: &Session,
    outcome: &mut PlaybackOutcome,
    index: u64,
    text: String,
    message: String,
) {
    let failure = UtteranceFailure {
        index,
        text,
        message,
    };
    session.emit(SessionEvent::Failed(failure.clone()));
    outcome.failures.push(failure);
}
