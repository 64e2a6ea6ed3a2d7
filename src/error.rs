use thiserror::Error;

/// Conditions that desynchronize the filter from smtpd.
///
/// Any of these ends the whole process: once a frame has been misread
/// there is no way to trust the boundaries of the frames that follow.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("unexpected config line: {0}")]
    Config(String),

    #[error("config failure: input ended before config|ready")]
    ConfigIncomplete,

    #[error("missing atoms: {0}")]
    Framing(String),

    #[error("unexpected input: {0}")]
    UnexpectedInput(String),

    #[error("{event}: expected {expected} args, got {got}: {line}")]
    Arity {
        event: String,
        expected: usize,
        got: usize,
        line: String,
    },

    #[error("{event}: unknown session: {session}")]
    UnknownSession { event: String, session: String },

    #[error("{event}: session {session} unknown message: {message}")]
    UnknownMessage {
        event: String,
        session: String,
        message: String,
    },

    #[error("{event}: session {session} has no message in the data phase")]
    NoDataMessage { event: String, session: String },

    #[error("{event}: existing session: {session}")]
    DuplicateSession { event: String, session: String },

    #[error("{event}: in session {session} for existing message {message}")]
    DuplicateMessage {
        event: String,
        session: String,
        message: String,
    },

    #[error("spam score parse failed: {0}")]
    SpamScore(String),

    #[error("I/O error on filter stream: {0}")]
    Io(#[from] std::io::Error),
}

/// A header or envelope address that did not match the accepted syntax.
///
/// This never stops mail; callers log it and move on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed parsing email address: '{candidate}'")]
pub struct AddressParseError {
    pub candidate: String,
}
