//! Error type shared by the store, transport and sync layers.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
  /// The request never completed (connect failure, timeout, dropped connection).
  #[error("network failure: {0}")]
  Network(String),

  /// The server answered with a non-success status.
  #[error("server responded {status}: {body}")]
  Server { status: u16, body: String },

  /// Missing, expired or rejected credential. Forwarded to the session owner as-is.
  #[error("authentication failed: {0}")]
  Auth(String),

  /// Local persistence failure. The caller must tell the user; the mutation may be lost.
  #[error("local storage failure: {0}")]
  Storage(#[from] rusqlite::Error),

  #[error("local storage failure: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialization failure: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("invalid endpoint url: {0}")]
  Url(#[from] url::ParseError),

  #[error("no queued mutation with key {0}")]
  NotFound(String),

  #[error("mutation {key} is {status}, expected {expected}")]
  InvalidTransition {
    key: String,
    status: String,
    expected: String,
  },
}

impl Error {
  /// Failures that leave local state consistent and are reported softly.
  pub fn is_recoverable(&self) -> bool {
    matches!(self, Error::Network(_) | Error::Server { .. })
  }
}

/// Transport-level failures; HTTP statuses are classified by the caller.
impl From<reqwest::Error> for Error {
  fn from(e: reqwest::Error) -> Self {
    Error::Network(e.to_string())
  }
}
