//! Session error taxonomy.
//!
//! Every variant here is recoverable: it is reported where it is detected
//! (output line + log record) and the session keeps running.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    /// No handler registered under this name
    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    /// A navigation request would leave the loaded extent
    #[error("navigation out of bounds: {0}")]
    OutOfBoundsNavigation(String),

    /// A background task returned an error or panicked
    #[error("task '{name}' failed: {reason}")]
    TaskFailure { name: String, reason: String },

    /// The command needs an active signal record and none is set
    #[error("command '{0}' needs an active record, load a file first")]
    MissingActiveRecord(String),

    #[error("no record at index {0}")]
    NoSuchRecord(usize),

    #[error("command '{command}' is missing its '{arg}' argument")]
    MissingArgument { command: String, arg: &'static str },

    #[error("command '{0}' needs a selection, drag one in select mode first")]
    NothingSelected(String),

    /// The OS refused to start a worker thread
    #[error("could not start worker for '{name}': {source}")]
    WorkerSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;
