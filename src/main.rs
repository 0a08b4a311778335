use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use vocalis::audio::backend::CpalBackend;
use vocalis::audio::capture::{list_devices, suppress_audio_warnings};
use vocalis::cli::{Cli, Commands, ConfigAction, SESSION_HELP, SessionCommand};
use vocalis::config::Config;
use vocalis::output::{render_event, render_status};
use vocalis::session::{DocumentKind, SessionEvent, SessionHandle, VoiceState};

/// How long `quit` waits for the session to wind down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        None | Some(Commands::Session) => {
            let config = load_config(&cli)?;
            run_interactive(config, cli.verbose).await?;
        }
        Some(Commands::Pdf { ref path }) => {
            let config = load_config(&cli)?;
            run_one_shot(config, path, DocumentKind::Pdf, cli.verbose).await?;
        }
        Some(Commands::Image { ref path }) => {
            let config = load_config(&cli)?;
            run_one_shot(config, path, DocumentKind::Image, cli.verbose).await?;
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Config { ref action }) => match action {
            ConfigAction::Dump => {
                print!("{}", Config::dump_template());
            }
            ConfigAction::Show => {
                let config = load_config(&cli)?;
                print!("{}", toml::to_string_pretty(&config)?);
            }
        },
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "vocalis", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Route `tracing` output to stderr.
///
/// `RUST_LOG` wins over the verbosity flags when set.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vocalis={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order (later wins):
/// 1. Built-in defaults
/// 2. Config file (--config, or ~/.config/vocalis/config.toml if present)
/// 3. Environment variables
/// 4. Command-line flags
fn load_config(cli: &Cli) -> Result<Config> {
    let config = match cli.config.as_deref() {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    let mut config = config.with_env_overrides();

    if let Some(url) = &cli.url {
        config.connection.url = url.clone();
    }
    if let Some(device) = &cli.device {
        config.audio.device = Some(device.clone());
    }
    if let Some(timeout) = cli.connect_timeout {
        config.connection.first_timeout_ms = timeout.as_millis() as u64;
    }

    config.validate()?;
    Ok(config)
}

/// List available audio input devices.
fn list_audio_devices() -> Result<()> {
    let devices = list_devices()?;

    if devices.is_empty() {
        eprintln!("No audio input devices found");
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

fn spawn_session(config: Config) -> SessionHandle {
    suppress_audio_warnings();
    let backend = Arc::new(CpalBackend::new(config.audio.sample_rate));
    SessionHandle::spawn(config, backend)
}

/// Interactive session: one command per stdin line, events printed as they come.
async fn run_interactive(config: Config, verbose: u8) -> Result<()> {
    let url = config.connection.url.clone();
    let handle = spawn_session(config);

    let mut events = handle.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => render_event(&event, verbose),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Event printer skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    println!("vocalis {} - assistant at {}", vocalis::version_string(), url);
    println!("Type 'start' to begin, 'help' for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let command = match SessionCommand::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                eprintln!("{}", message.yellow());
                continue;
            }
        };

        let result = match command {
            SessionCommand::Start => handle.start().await,
            SessionCommand::Mute => handle.mute().await,
            SessionCommand::Unmute => handle.unmute().await,
            SessionCommand::Stop => handle.stop_speaking().await,
            SessionCommand::Send => handle.send_utterance().await,
            SessionCommand::End => handle.end().await,
            SessionCommand::Pdf(path) => {
                spawn_upload(&handle, path, DocumentKind::Pdf);
                Ok(())
            }
            SessionCommand::Image(path) => {
                spawn_upload(&handle, path, DocumentKind::Image);
                Ok(())
            }
            SessionCommand::Status => {
                render_status(&handle.snapshot());
                Ok(())
            }
            SessionCommand::Help => {
                println!("{}", SESSION_HELP);
                Ok(())
            }
            SessionCommand::Quit => break,
        };

        if let Err(e) = result {
            eprintln!("{}", format!("Error: {}", e).red());
        }
    }

    shutdown(&handle).await;
    printer.abort();
    Ok(())
}

/// Uploads wait for the session to come up, so they run off the input loop.
fn spawn_upload(handle: &SessionHandle, path: std::path::PathBuf, kind: DocumentKind) {
    let handle = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = handle.send_document(&path, kind).await {
            eprintln!("{}", format!("Error: {}", e).red());
        }
    });
}

/// Send one document and stay until the assistant has finished answering it.
async fn run_one_shot(config: Config, path: &Path, kind: DocumentKind, verbose: u8) -> Result<()> {
    let handle = spawn_session(config);
    let mut events = handle.subscribe();

    handle
        .send_document(path, kind)
        .await
        .with_context(|| format!("Could not send {}", path.display()))?;

    let outcome = tokio::select! {
        outcome = wait_for_reply(&mut events, verbose) => outcome,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };

    shutdown(&handle).await;
    outcome
}

/// Render events until the assistant's spoken reply has played out.
async fn wait_for_reply(
    events: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    verbose: u8,
) -> Result<()> {
    loop {
        match events.recv().await {
            Ok(event) => {
                render_event(&event, verbose);
                match event {
                    SessionEvent::StateChanged {
                        from: VoiceState::Speaking,
                        to: VoiceState::Listening,
                    } => return Ok(()),
                    SessionEvent::Error(message) => anyhow::bail!(message),
                    _ => {}
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!("Event listener skipped {} events", skipped);
            }
            Err(RecvError::Closed) => anyhow::bail!("session engine stopped"),
        }
    }
}

async fn shutdown(handle: &SessionHandle) {
    if handle.end().await.is_err() {
        return;
    }
    if !handle.wait_for_state(VoiceState::Idle, SHUTDOWN_TIMEOUT).await {
        tracing::warn!("Session did not reach idle before exit");
    }
}
