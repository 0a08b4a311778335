//! Terminal rendering of session events.

use crate::session::{Session, SessionEvent, VoiceState};
use owo_colors::OwoColorize;

/// Short label for a state, coloured by how the user should read it.
pub fn state_label(state: VoiceState) -> String {
    match state {
        VoiceState::Idle => state.as_str().dimmed().to_string(),
        VoiceState::Connecting => state.as_str().yellow().to_string(),
        VoiceState::Listening => state.as_str().green().to_string(),
        VoiceState::Processing => state.as_str().cyan().to_string(),
        VoiceState::Speaking => state.as_str().blue().to_string(),
        VoiceState::Error => state.as_str().red().to_string(),
    }
}

/// Format an event as one terminal line, or `None` if it is not worth showing.
pub fn format_event(event: &SessionEvent, verbose: u8) -> Option<String> {
    match event {
        SessionEvent::StateChanged { to, .. } => Some(format!("[{}]", state_label(*to))),
        SessionEvent::Transcript(text) if !text.is_empty() => {
            Some(format!("{} {}", "you:".bold(), text))
        }
        SessionEvent::AssistantText(text) if !text.is_empty() => {
            Some(format!("{} {}", "assistant:".bold().magenta(), text))
        }
        SessionEvent::Status(text) => Some(text.dimmed().to_string()),
        SessionEvent::MuteChanged(true) => Some("microphone muted".yellow().to_string()),
        SessionEvent::MuteChanged(false) => Some("microphone active".green().to_string()),
        SessionEvent::Error(message) => Some(format!("Error: {}", message).red().to_string()),
        SessionEvent::UtteranceSent { bytes } if verbose > 0 => {
            Some(format!("sent utterance ({} bytes)", bytes).dimmed().to_string())
        }
        SessionEvent::DocumentSent(kind) => {
            Some(format!("{} sent, waiting for the assistant", kind).dimmed().to_string())
        }
        _ => None,
    }
}

/// Print an event to stderr.
pub fn render_event(event: &SessionEvent, verbose: u8) {
    if let Some(line) = format_event(event, verbose) {
        eprintln!("{}", line);
    }
}

/// Print a session snapshot for the `status` command.
pub fn render_status(session: &Session) {
    println!("Session:");
    println!("  {}      {}", "State:".dimmed(), state_label(session.state));
    println!(
        "  {}    {}",
        "Started:".dimmed(),
        if session.started { "yes" } else { "no" }
    );
    println!(
        "  {} {}",
        "Microphone:".dimmed(),
        if session.muted { "muted" } else { "active" }
    );
    if !session.transcript.is_empty() {
        println!("  {}        {}", "You:".dimmed(), session.transcript);
    }
    if !session.assistant_text.is_empty() {
        println!("  {}  {}", "Assistant:".dimmed(), session.assistant_text);
    }
    if session.pending_upload {
        println!("  {}", "Document waiting to be sent".yellow());
    }
}
