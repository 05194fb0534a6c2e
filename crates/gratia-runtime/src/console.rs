//! Line commands for the interactive node

use std::fmt::Write as _;

use gratia_core::{GratiaError, Mood, Phase, SignalFrame};
use thiserror::Error;

use crate::Gratia;

pub const HELP: &str = "\
commands:
  phase <companion|presence|archive>
  mood <soft|presence|focused|celebratory>
  whisper [text]      set or clear the whisper
  radar               peers in range, best resonance first
  me                  our own current signal
  stats               hub, signal and mesh counters
  help
  quit";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeCommand {
    Phase(Phase),
    Mood(Mood),
    Whisper(String),
    Radar,
    Me,
    Stats,
    Help,
    Quit,
}

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("unknown command {0:?}, try `help`")]
    Unknown(String),

    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),

    #[error(transparent)]
    Invalid(#[from] GratiaError),
}

/// Parse one input line; blank lines yield `None`
pub fn parse_command(line: &str) -> Result<Option<NodeCommand>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "phase" => NodeCommand::Phase(argument("phase", rest)?.parse()?),
        "mood" => NodeCommand::Mood(argument("mood", rest)?.parse()?),
        "whisper" => NodeCommand::Whisper(rest.to_string()),
        "radar" => NodeCommand::Radar,
        "me" => NodeCommand::Me,
        "stats" => NodeCommand::Stats,
        "help" | "?" => NodeCommand::Help,
        "quit" | "exit" => NodeCommand::Quit,
        _ => return Err(CommandError::Unknown(word.to_string())),
    };
    Ok(Some(command))
}

fn argument<'a>(command: &'static str, rest: &'a str) -> Result<&'a str, CommandError> {
    if rest.is_empty() {
        Err(CommandError::MissingArgument(command))
    } else {
        Ok(rest)
    }
}

/// Run a command against the node; `None` means the node should exit
pub fn execute(gratia: &Gratia, command: NodeCommand) -> Option<String> {
    let reply = match command {
        NodeCommand::Phase(phase) => {
            gratia.set_phase(phase);
            format!("phase -> {phase}")
        }
        NodeCommand::Mood(mood) => {
            gratia.set_mood(mood);
            format!("mood -> {mood}")
        }
        NodeCommand::Whisper(text) if text.is_empty() => {
            gratia.whisper(text);
            "whisper cleared".to_string()
        }
        NodeCommand::Whisper(text) => {
            gratia.whisper(text);
            "whisper set".to_string()
        }
        NodeCommand::Radar => render_radar(gratia),
        NodeCommand::Me => SignalFrame::encode(&gratia.me())
            .unwrap_or_else(|e| format!("cannot encode own signal: {e}")),
        NodeCommand::Stats => render_stats(gratia),
        NodeCommand::Help => HELP.to_string(),
        NodeCommand::Quit => return None,
    };
    Some(reply)
}

fn render_radar(gratia: &Gratia) -> String {
    let entries = gratia.radar();
    if entries.is_empty() {
        return "radar is quiet".to_string();
    }
    let mut out = String::new();
    for entry in entries {
        let signal = &entry.signal;
        let _ = write!(
            out,
            "{:<16} {:>4.2}  {}/{}",
            signal.id, entry.resonance, signal.phase, signal.mood
        );
        if let Some(whisper) = &signal.whisper {
            let _ = write!(out, "  \"{whisper}\"");
        }
        out.push('\n');
    }
    out.pop();
    out
}

fn render_stats(gratia: &Gratia) -> String {
    let stats = gratia.stats();
    let mut out = format!(
        "peer {} on {}\nticks {}  events {}  evicted {}\nbroadcasts {}  send failures {}  received {}  radar {}",
        gratia.peer_id(),
        gratia.transport().kind(),
        stats.hub.ticks,
        stats.hub.events_published,
        stats.hub.peers_evicted,
        stats.signal.broadcasts,
        stats.signal.send_failures,
        stats.signal.received,
        stats.radar,
    );
    if let Some(mesh) = stats.mesh {
        let _ = write!(out, "\nmesh peers {}  channels {}", mesh.peers, mesh.channels);
    }
    out
}
