//! Daemon mode: keeps voices loaded and speaks on request over IPC.

pub mod handler;

use crate::audio::player::PlayerSink;
use crate::config::Config;
use crate::error::{Result, TtsError};
use crate::ipc::server::IpcServer;
use crate::pipeline::orchestrator::{PipelineConfig, PipelineHandle};
use crate::pipeline::sink::PlaybackSink;
use crate::text::segmenter::SegmentMode;
use crate::voice::registry::VoiceRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// Creates the playback sink for each new session.
pub type SinkFactory = Arc<dyn Fn() -> Result<Box<dyn PlaybackSink>> + Send + Sync>;

/// Daemon state: loaded voices and the session currently speaking.
pub struct DaemonState {
    pub config: Config,
    /// Process-wide voice cache shared by every session
    pub registry: Arc<VoiceRegistry>,
    /// Most recent session (finished sessions are reaped on the next command)
    pub session: Mutex<Option<PipelineHandle>>,
    sink_factory: SinkFactory,
}

impl DaemonState {
    pub fn new(config: Config, registry: Arc<VoiceRegistry>, sink_factory: SinkFactory) -> Self {
        Self {
            config,
            registry,
            session: Mutex::new(None),
            sink_factory,
        }
    }

    /// Returns true while a session is Running or Draining.
    pub async fn is_speaking(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| handle.is_running())
    }

    pub fn default_voice(&self) -> &str {
        &self.config.voice.name
    }

    pub(crate) fn new_sink(&self) -> Result<Box<dyn PlaybackSink>> {
        (self.sink_factory)()
    }

    pub(crate) fn pipeline_config(&self, stream: bool) -> PipelineConfig {
        let mode = if stream {
            SegmentMode::Sentences
        } else {
            SegmentMode::Whole
        };
        PipelineConfig::from_stream_config(&self.config.stream, mode)
    }
}

/// Sink factory playing through the configured (or auto-detected) player.
///
/// # Errors
/// `PlayerNotFound` when no player is available.
pub fn player_sink_factory(config: &Config) -> Result<SinkFactory> {
    let player = PlayerSink::new(config.playback.player.as_deref())?
        .player()
        .clone();
    Ok(Arc::new(move || {
        Ok(Box::new(PlayerSink::with_player(player.clone())) as Box<dyn PlaybackSink>)
    }))
}

/// Run the daemon: preload the default voice, serve IPC, wait for shutdown.
///
/// Returns Ok(()) on SIGINT, SIGTERM or a `shutdown` command.
pub async fn run_daemon(
    config: Config,
    registry: Arc<VoiceRegistry>,
    sink_factory: SinkFactory,
    socket_path: Option<PathBuf>,
    quiet: bool,
) -> Result<()> {
    let voice = config.voice.name.clone();
    let device = config.voice.device;
    let fallback = config.voice.gpu_fallback;

    if !quiet {
        eprintln!("Loading voice '{}' on {}...", voice, device);
    }
    let preload = {
        let registry = Arc::clone(&registry);
        tokio::task::spawn_blocking(move || {
            registry.resolve_with_fallback(&voice, device, fallback)
        })
        .await
    };
    match preload {
        Ok(Ok(handle)) => {
            if !quiet {
                eprintln!("Voice '{}' loaded on {}.", handle.name(), handle.device());
            }
        }
        // Not fatal: the synthesis server may come up later.
        Ok(Err(e)) => eprintln!("xvatts: could not preload voice: {e}"),
        Err(e) => eprintln!("xvatts: voice preload task failed: {e}"),
    }

    let socket_path = socket_path.unwrap_or_else(IpcServer::default_socket_path);
    let server = Arc::new(IpcServer::new(socket_path)?);
    let shutdown = Arc::new(Notify::new());

    if !quiet {
        eprintln!(
            "IPC server listening at: {}",
            server.socket_path().display()
        );
        eprintln!("Daemon ready.");
    }

    let state = Arc::new(DaemonState::new(config, registry, sink_factory));
    let handler = handler::DaemonCommandHandler::new(Arc::clone(&state), Arc::clone(&shutdown));

    let server_clone = Arc::clone(&server);
    let server_handle = tokio::spawn(async move { server_clone.start(handler).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            if !quiet {
                eprintln!("\nReceived SIGINT, shutting down...");
            }
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                eprintln!("Error setting up signal handler: {}", e);
            }
            if !quiet {
                eprintln!("\nReceived SIGTERM, shutting down...");
            }
        }
        _ = shutdown.notified() => {
            if !quiet {
                eprintln!("Shutdown requested, shutting down...");
            }
        }
    }

    if let Some(handle) = state.session.lock().await.take() {
        handler::reap(handle).await;
    }

    server.stop().await?;

    match server_handle.await {
        Ok(Err(e)) => eprintln!("xvatts: daemon server failed: {e}"),
        Err(e) => eprintln!("xvatts: daemon server task failed: {e}"),
        Ok(Ok(())) => {}
    }

    if !quiet {
        eprintln!("Daemon stopped.");
    }

    Ok(())
}

/// Wait for SIGTERM signal (used by systemd).
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| TtsError::Other(format!("Failed to register SIGTERM handler: {}", e)))?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await
}
