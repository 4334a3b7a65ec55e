use thiserror::Error;

/// Errors raised by the stream transport and frame parsers.
///
/// None of these reach tick listeners. Parse failures drop the frame, transport
/// failures end the current connection and hand control to the reconnect loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Connection closed by upstream")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed frame: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Parse(err.to_string())
    }
}
