use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Invalid job id: {0}")]
    InvalidJobId(String),

    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Signal delivery failed: {0}")]
    Signal(#[from] nix::errno::Errno),

    #[error("Dispatcher is not running")]
    DispatcherClosed,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response from server: {0}")]
    UnexpectedResponse(String),
}

pub type Result<T> = std::result::Result<T, RunnerError>;
