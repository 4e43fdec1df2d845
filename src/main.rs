// ============================================================================
// MAIN.RS - Console Front End
// ============================================================================
//
// Reads commands from stdin on a helper thread and feeds them to the session
// as InputEvents. Console output goes straight to stdout, so carriage-return
// progress lines overwrite themselves in a terminal.
//
// Run with: cargo run --bin session
// ============================================================================

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::{Duration, Instant};

use songscope::analysis::BasicBackend;
use songscope::console::{self, HELP};
use songscope::input::{ChannelInput, InputEvent};
use songscope::output::OutputWriter;
use songscope::render::HeadlessRenderer;
use songscope::{Session, Settings, logging};

/// How long quitting waits for running tasks before giving up on them
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    let settings = Settings::load_or_create(Path::new(Settings::FILE_NAME));
    logging::init(None);

    let (events, input) = ChannelInput::new();
    let poll_interval = settings.poll_interval();
    let mut session = Session::new(
        settings,
        Box::new(HeadlessRenderer::new()),
        Box::new(input),
        Arc::new(BasicBackend),
    );
    session.set_console_consumer(Box::new(|text: &str| {
        let mut stdout = io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }));

    let out = session.console();
    out.line("songscope session. Type 'help' for commands.");
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || read_commands(io::stdin().lock(), events, out))?;

    while session.tick(Instant::now()) {
        thread::sleep(poll_interval);
    }

    if !session.wait_for_tasks(SHUTDOWN_GRACE) {
        log::warn!(
            "Exiting with {} task(s) still running: [{}]",
            session.runner().live_count(),
            session.runner().live_task_names().join(", ")
        );
    }
    Ok(())
}

/// Parse input line by line. End of input quits the session. Help and parse
/// errors go through the console stream like everything else.
fn read_commands(input: impl BufRead, events: Sender<InputEvent>, out: OutputWriter) {
    for line in input.lines() {
        let Ok(line) = line else {
            break;
        };
        if line.trim().eq_ignore_ascii_case("help") {
            out.line(HELP);
            continue;
        }
        match console::parse_line(&line) {
            Ok(Some(event)) => {
                if events.send(event).is_err() {
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => out.line(&format!("{:#}", e)),
        }
    }
    let _ = events.send(InputEvent::Quit);
}

// ============================================================================
// UNIT TESTS
// ============================================================================
