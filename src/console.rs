//! Line-oriented control surface for the headless front end.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use crate::input::{InputEvent, MouseButton, NavAction, PointerPhase};
use crate::router::CommandArgs;

pub const HELP: &str = "\
commands:
  open <file.wav>        load a WAV file (split into records)
  demo [seed]            generate a labelled demo signal
  active <index>         make record <index> active
  train | classify | motifs
  save <file> | restore <file>
  export-net <file> | load-net <file>
  label <0-9>            label the current selection
  play | stop | status
navigation:
  home | forward | back | pan | zoom | select
  press <x> <y> [right] | drag <x> <y> | release <x> <y> [right]
  key <char> | resize <w> <h>
  help | quit";

/// Commands whose only argument is a path
const PATH_COMMANDS: &[&str] = &["open", "save", "restore", "export-net", "load-net"];

/// Parse one console line. Blank lines and comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<InputEvent>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let word = word.to_ascii_lowercase();

    let event = match word.as_str() {
        "quit" | "exit" => InputEvent::Quit,
        "home" => InputEvent::Navigate(NavAction::Home),
        "forward" | "f" => InputEvent::Navigate(NavAction::Forward),
        "back" | "b" => InputEvent::Navigate(NavAction::Back),
        "pan" => InputEvent::Navigate(NavAction::Pan),
        "zoom" => InputEvent::Navigate(NavAction::Zoom),
        "select" => InputEvent::Navigate(NavAction::Select),
        "press" => pointer(PointerPhase::Press, rest)?,
        "drag" => pointer(PointerPhase::Drag, rest)?,
        "release" => pointer(PointerPhase::Release, rest)?,
        "key" => {
            let mut chars = rest.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => InputEvent::Key(c),
                _ => bail!("key takes exactly one character"),
            }
        }
        "resize" => {
            let (width, height) = two_numbers(rest)?;
            InputEvent::Resize { width, height }
        }
        "demo" | "active" => {
            let args = if rest.is_empty() {
                CommandArgs::none()
            } else {
                let index = rest
                    .parse()
                    .with_context(|| format!("'{}' is not a number", rest))?;
                CommandArgs::with_index(index)
            };
            InputEvent::command(&word, args)
        }
        "label" => {
            let label = rest
                .parse()
                .with_context(|| format!("'{}' is not a class number", rest))?;
            InputEvent::command("label", CommandArgs::with_label(label))
        }
        name if PATH_COMMANDS.contains(&name) => {
            let args = if rest.is_empty() {
                CommandArgs::none()
            } else {
                CommandArgs::with_path(PathBuf::from(rest))
            };
            InputEvent::command(name, args)
        }
        // Everything else goes to the router, which knows what exists
        name => InputEvent::command(name, CommandArgs::none()),
    };
    Ok(Some(event))
}

fn pointer(phase: PointerPhase, rest: &str) -> Result<InputEvent> {
    let mut parts = rest.split_whitespace();
    let x = number(parts.next())?;
    let y = number(parts.next())?;
    let button = match parts.next() {
        None | Some("left") => MouseButton::Left,
        Some("right") => MouseButton::Right,
        Some("middle") => MouseButton::Middle,
        Some(other) => bail!("unknown mouse button '{}'", other),
    };
    Ok(InputEvent::Pointer { phase, x, y, button })
}

fn two_numbers(rest: &str) -> Result<(f64, f64)> {
    let mut parts = rest.split_whitespace();
    Ok((number(parts.next())?, number(parts.next())?))
}

fn number(part: Option<&str>) -> Result<f64> {
    let Some(part) = part else {
        bail!("missing coordinate");
    };
    part.parse()
        .with_context(|| format!("'{}' is not a number", part))
}

// ============================================================================
// UNIT TESTS
// ============================================================================
