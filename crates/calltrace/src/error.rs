/// Errors that can occur while opening a trace session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("tracing is disabled")]
    Disabled,

    #[error("unable to determine the program name")]
    NoProgramName,

    #[error("no trace session was ever opened")]
    NeverOpened,

    #[error("a call is in progress on this thread")]
    Busy,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
