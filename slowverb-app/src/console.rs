//! Line commands typed at the `play` prompt

use slowverb_audio::SessionCommand;
use std::path::PathBuf;

/// A parsed console line
#[derive(Debug, Clone)]
pub enum ConsoleCommand {
    /// Forwarded to the session as-is
    Session(SessionCommand),
    /// Decode a file and load it
    Load(PathBuf),
    /// Write the current render to a folder (config default when none)
    Save(Option<PathBuf>),
    /// Keep the current effect settings as the startup defaults
    SaveConfig,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  play [pos]       start playback, optionally from a position in seconds
  stop             stop playback, keeping the position
  seek <s>         jump to a position and play
  rate <r>         playback rate (0.6 - 1.0)
  wet <w>          reverb wet level (0 - 1)
  decay <d>        reverb decay in seconds (0.5 - 10)
  predelay <p>     reverb pre-delay in seconds (0 - 1)
  render           render the processed song offline
  save [folder]    save the last render as reverb-song.wav
  load <path>      load another audio file
  release          discard the last render
  keep             save the current effect settings as defaults
  status           show playback and effect state
  quit             exit";

/// Parse one line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let input = line.trim();
    if input.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    };

    let command = match word {
        "play" | "p" => {
            if rest.is_empty() {
                ConsoleCommand::Session(SessionCommand::Play)
            } else {
                ConsoleCommand::Session(SessionCommand::PlayFrom(number(word, rest)?))
            }
        }
        "stop" | "s" => ConsoleCommand::Session(SessionCommand::Stop),
        "seek" => ConsoleCommand::Session(SessionCommand::Seek(number(word, rest)?)),
        "rate" => ConsoleCommand::Session(SessionCommand::SetPlaybackRate(number(word, rest)?)),
        "wet" => ConsoleCommand::Session(SessionCommand::SetReverbWet(number(word, rest)?)),
        "decay" => ConsoleCommand::Session(SessionCommand::SetReverbDecay(number(word, rest)?)),
        "predelay" | "pre-delay" => {
            ConsoleCommand::Session(SessionCommand::SetReverbPreDelay(number(word, rest)?))
        }
        "render" => ConsoleCommand::Session(SessionCommand::RequestRender),
        "release" => ConsoleCommand::Session(SessionCommand::ReleaseArtifact),
        "save" => ConsoleCommand::Save((!rest.is_empty()).then(|| PathBuf::from(unquote(rest)))),
        "load" => {
            let path = unquote(rest);
            if path.is_empty() {
                return Err("load needs a file path".to_string());
            }
            ConsoleCommand::Load(PathBuf::from(path))
        }
        "keep" | "save-config" => ConsoleCommand::SaveConfig,
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "q" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '{other}', try 'help'")),
    };
    Ok(Some(command))
}

fn number(command: &str, arg: &str) -> Result<f64, String> {
    arg.parse::<f64>()
        .map_err(|_| format!("{command} needs a number, got '{arg}'"))
}

/// Strip one pair of matching surrounding quotes
fn unquote(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('\'') && s.ends_with('\'')) || (s.starts_with('"') && s.ends_with('"')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}
