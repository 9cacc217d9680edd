use anyhow::Result;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use xvatts::app::{
    SpeakOptions, build_registry, print_available_voices, run_list_voices, run_speak_command,
};
use xvatts::cli::{Cli, Commands, ConfigAction, SpeechArgs};
use xvatts::config::Config;
use xvatts::daemon::{player_sink_factory, run_daemon};
use xvatts::ipc::client::send_command;
use xvatts::ipc::protocol::{Command, Response};
use xvatts::ipc::server::IpcServer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match cli.command {
        None => {
            let config = load_config(&cli)?;
            let registry = build_registry(&config)?;

            if cli.list_voices {
                run_list_voices(&registry)?;
                return Ok(());
            }

            let text = joined_text(&cli.text);
            if text.is_none() && std::io::stdin().is_terminal() {
                // Nothing to say and nobody piping: show usage
                let mut command = Cli::command();
                command.print_help()?;
                eprintln!();
                print_available_voices(&registry);
                std::process::exit(1);
            }

            let options = SpeakOptions {
                text,
                voice: cli.speech.voice.clone(),
                device: cli.speech.device_override(),
                stream: cli.speech.stream,
                no_play: cli.no_play,
                output_dir: cli.output_dir.clone(),
                quiet: cli.quiet,
                verbosity: cli.verbose,
            };
            if let Err(e) = run_speak_command(config, registry, options).await {
                eprintln!("{}", format!("Error: {}", e).red());
                std::process::exit(1);
            }
        }
        Some(Commands::Voices) => {
            let config = load_config(&cli)?;
            let registry = build_registry(&config)?;
            run_list_voices(&registry)?;
        }
        Some(Commands::Daemon { ref socket }) => {
            let config = load_config(&cli)?;
            let registry = build_registry(&config)?;
            let sink_factory = match player_sink_factory(&config) {
                Ok(factory) => factory,
                Err(e) => {
                    eprintln!("{}", format!("Error: {}", e).red());
                    std::process::exit(1);
                }
            };
            run_daemon(config, registry, sink_factory, socket.clone(), cli.quiet).await?;
        }
        Some(Commands::Say {
            ref text,
            ref speech,
            ref socket,
        }) => {
            let text = match joined_text(text) {
                Some(text) => text,
                None => read_stdin_text()?,
            };
            let command = speak_command(text, speech);
            handle_ipc_command(socket.clone(), command).await?;
        }
        Some(Commands::Stop { ref socket }) => {
            handle_ipc_command(socket.clone(), Command::Stop).await?;
        }
        Some(Commands::Status { ref socket }) => {
            handle_ipc_command(socket.clone(), Command::Status).await?;
        }
        Some(Commands::Shutdown { ref socket }) => {
            handle_ipc_command(socket.clone(), Command::Shutdown).await?;
        }
        Some(Commands::Config { ref action }) => {
            handle_config_command(action, &cli)?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "xvatts", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Diagnostic logging to stderr. `RUST_LOG` wins over -v/-q.
fn init_tracing(verbosity: u8, quiet: bool) {
    let default_level = match (quiet, verbosity) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("xvatts={}", default_level).into());

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load config: file (or defaults) → environment → CLI flags.
fn load_config(cli: &Cli) -> Result<Config> {
    let config = if let Some(path) = cli.config.as_deref() {
        Config::load(path)?
    } else {
        Config::load_or_default(&Config::default_path())?
    };
    let mut config = config.with_env_overrides();
    apply_cli_overrides(&mut config, cli);
    config.validate()?;
    Ok(config)
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(voice) = &cli.speech.voice {
        config.voice.name = voice.clone();
    }
    if let Some(device) = cli.speech.device_override() {
        config.voice.device = device;
    }
    if let Some(workers) = cli.workers {
        config.stream.workers = workers;
    }
    if let Some(max_in_flight) = cli.max_in_flight {
        config.stream.max_in_flight = max_in_flight;
    }
    if let Some(player) = &cli.player {
        config.playback.player = Some(player.clone());
    }
    if let Some(url) = &cli.server {
        config.server.url = url.clone();
    }
    if let Some(secs) = cli.synth_timeout {
        config.server.synth_timeout_secs = secs;
    }
}

fn joined_text(words: &[String]) -> Option<String> {
    let text = words.join(" ");
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn read_stdin_text() -> Result<String> {
    if std::io::stdin().is_terminal() {
        anyhow::bail!("No text given. Pass text as an argument or pipe it to stdin.");
    }
    let mut text = String::new();
    std::io::stdin().read_to_string(&mut text)?;
    Ok(text)
}

fn speak_command(text: String, speech: &SpeechArgs) -> Command {
    Command::Speak {
        text,
        voice: speech.voice.clone(),
        device: speech.device_override(),
        stream: speech.stream,
    }
}

fn handle_config_command(action: &ConfigAction, cli: &Cli) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(cli)?;
            match config.to_display_toml() {
                Ok(toml) => print!("{}", toml),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        ConfigAction::Dump => {
            print!("{}", Config::dump_template());
        }
    }
    Ok(())
}

/// Send IPC command to daemon and print the response.
async fn handle_ipc_command(socket: Option<PathBuf>, command: Command) -> Result<()> {
    let socket_path = socket.unwrap_or_else(IpcServer::default_socket_path);

    match send_command(&socket_path, command).await {
        Ok(response) => print_response(response, &socket_path),
        Err(e) => {
            eprintln!(
                "{}",
                format!("Failed to communicate with daemon: {}", e).red()
            );
            eprintln!("Is the daemon running? Start it with: xvatts daemon");
            std::process::exit(1);
        }
    }
    Ok(())
}

fn print_response(response: Response, socket_path: &Path) {
    match response {
        Response::Ok => {}
        Response::Status {
            speaking,
            voice,
            loaded,
            version,
        } => {
            let client_version = xvatts::version_string();

            println!("Status:");
            println!("  {}   {}", "Client:".dimmed(), client_version);
            print!("  {}   {}", "Daemon:".dimmed(), version);
            if client_version != version {
                print!(" {}", "(version mismatch!)".yellow());
            }
            println!();
            println!("  {}   {}", "Socket:".dimmed(), socket_path.display());
            println!(
                "  {} {}",
                "Speaking:".dimmed(),
                if speaking { "yes" } else { "no" }
            );
            println!("  {}    {}", "Voice:".dimmed(), voice);
            if !loaded.is_empty() {
                println!("  {}   {}", "Loaded:".dimmed(), loaded.join(", "));
            }
        }
        Response::Voices { voices } => {
            for voice in voices {
                println!("{}", voice);
            }
        }
        Response::Error { message } => {
            eprintln!("{}", format!("Error: {}", message).red());
            std::process::exit(1);
        }
    }
}
