// ============================================================================
// SONGSCOPE - Interactive Analysis Session Runtime
// ============================================================================
//
// A control thread owns the Session: it routes commands, runs long analysis
// jobs on worker threads while the router is busy-locked, multiplexes console
// output and keeps a bounded time/value view in sync across every axis.
//
// Front ends (src/main.rs, src/main_gui.rs) only feed InputEvents in and
// provide a Renderer; everything else lives here.
// ============================================================================

pub mod analysis;
pub mod console;
pub mod error;
pub mod input;
pub mod logging;
pub mod navigation;
pub mod output;
pub mod playback;
pub mod render;
pub mod router;
pub mod session;
pub mod settings;
pub mod tasks;
pub mod throttle;

pub use error::{SessionError, SessionResult};
pub use session::Session;
pub use settings::Settings;
