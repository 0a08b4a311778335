//! Command-line interface for vocalis
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Talk to your voice assistant from the terminal
#[derive(Parser, Debug)]
#[command(name = "vocalis", version, about = "Talk to your voice assistant from the terminal")]
pub struct Cli {
    /// Subcommand to execute (default: interactive session)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only print errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: info logs, -vv: debug logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Assistant WebSocket endpoint (e.g., ws://localhost:8000/ws)
    #[arg(long, global = true, value_name = "URL")]
    pub url: Option<String>,

    /// Audio input device (e.g., hw:0)
    #[arg(long, global = true, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Timeout for the first connection attempt. Examples: 3s, 1500ms, 2500
    #[arg(long, global = true, value_name = "DURATION", value_parser = parse_timeout)]
    pub connect_timeout: Option<Duration>,
}

/// Parse a timeout string.
///
/// Bare numbers are milliseconds; anything else goes through `humantime`
/// (`3s`, `500ms`, `1m30s`).
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Interactive session driven by commands typed on stdin
    Session,

    /// Start a session, send a PDF and play the assistant's reply
    Pdf {
        /// PDF file to send
        path: PathBuf,
    },

    /// Start a session, send an image and play the assistant's reply
    Image {
        /// Image file to send
        path: PathBuf,
    },

    /// List available audio input devices
    Devices,

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Dump a commented configuration template
    Dump,
    /// Print the effective configuration (file, environment and flags applied)
    Show,
}

/// One line typed into the interactive session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Mute,
    Unmute,
    Stop,
    Send,
    Pdf(PathBuf),
    Image(PathBuf),
    End,
    Status,
    Help,
    Quit,
}

impl SessionCommand {
    /// Parse a line of user input.
    ///
    /// Returns `Ok(None)` for blank lines.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "start" => Self::Start,
            "mute" => Self::Mute,
            "unmute" => Self::Unmute,
            "stop" => Self::Stop,
            "send" => Self::Send,
            "end" => Self::End,
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            "pdf" | "image" if rest.is_empty() => {
                return Err(format!("usage: {} <path>", word));
            }
            "pdf" => Self::Pdf(PathBuf::from(rest)),
            "image" => Self::Image(PathBuf::from(rest)),
            other => return Err(format!("unknown command '{}' (try 'help')", other)),
        };
        Ok(Some(command))
    }
}

pub const SESSION_HELP: &str = "\
Commands:
  start          connect and start listening
  mute / unmute  toggle the microphone
  stop           stop the assistant speaking
  send           send what you said so far
  pdf <path>     send a PDF document
  image <path>   send an image
  end            end the session
  status         show session state
  quit           end the session and exit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_default_command() {
        let cli = Cli::try_parse_from(["vocalis"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.device.is_none());
        assert!(cli.url.is_none());
        assert!(cli.connect_timeout.is_none());
        assert!(!cli.quiet);
        assert_eq!(cli.verbose, 0);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_verbose_double() {
        let cli = Cli::try_parse_from(["vocalis", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "vocalis",
            "session",
            "--url",
            "ws://10.0.0.2:8000/ws",
            "--device",
            "hw:0",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Session)));
        assert_eq!(cli.url.as_deref(), Some("ws://10.0.0.2:8000/ws"));
        assert_eq!(cli.device.as_deref(), Some("hw:0"));
    }

    #[test]
    fn test_parse_pdf_path() {
        let cli = Cli::try_parse_from(["vocalis", "pdf", "/tmp/report.pdf"]).unwrap();
        match cli.command {
            Some(Commands::Pdf { path }) => assert_eq!(path, PathBuf::from("/tmp/report.pdf")),
            _ => panic!("Expected Pdf command"),
        }
    }

    #[test]
    fn test_parse_config_dump() {
        let cli = Cli::try_parse_from(["vocalis", "config", "dump"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Config {
                action: ConfigAction::Dump
            })
        ));
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["vocalis", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Completions { shell: Shell::Bash })
        ));
    }

    #[test]
    fn test_connect_timeout_formats() {
        assert_eq!(parse_timeout("2500"), Ok(Duration::from_millis(2500)));
        assert_eq!(parse_timeout("3s"), Ok(Duration::from_secs(3)));
        assert_eq!(parse_timeout("1m30s"), Ok(Duration::from_secs(90)));
        assert!(parse_timeout("soon").is_err());

        let cli = Cli::try_parse_from(["vocalis", "--connect-timeout", "500ms"]).unwrap();
        assert_eq!(cli.connect_timeout, Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_session_command_parse() {
        assert_eq!(SessionCommand::parse("  "), Ok(None));
        assert_eq!(SessionCommand::parse("START"), Ok(Some(SessionCommand::Start)));
        assert_eq!(SessionCommand::parse("exit"), Ok(Some(SessionCommand::Quit)));
        assert_eq!(
            SessionCommand::parse("pdf  my notes.pdf "),
            Ok(Some(SessionCommand::Pdf(PathBuf::from("my notes.pdf"))))
        );
        assert!(SessionCommand::parse("image").is_err());
        assert!(SessionCommand::parse("dance").is_err());
    }
}
