//! Credential context handed to the transport by whoever owns authentication.

use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{Error, Result};

/// Bearer-token holder shared between the auth owner and the transport.
///
/// Clones share the same token, so a refresh by the owner is seen by every
/// transport built from it.
#[derive(Debug, Clone, Default)]
pub struct Session {
  token: Arc<RwLock<Option<String>>>,
}

impl Session {
  pub fn new(token: Option<String>) -> Self {
    Self {
      token: Arc::new(RwLock::new(token.filter(|t| !t.trim().is_empty()))),
    }
  }

  pub fn set_token(&self, token: impl Into<String>) {
    *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
  }

  /// Forget the credential (e.g., on sign-out or after a 401).
  pub fn clear(&self) {
    *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
  }

  /// The current token, or `Error::Auth` when none is set.
  pub fn bearer_token(&self) -> Result<String> {
    self
      .token
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
      .ok_or_else(|| Error::Auth("no credential in session".to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_clones_share_token() {
    let session = Session::new(None);
    let transport_view = session.clone();
    assert!(matches!(transport_view.bearer_token(), Err(Error::Auth(_))));

    session.set_token("abc");
    assert_eq!(transport_view.bearer_token().unwrap(), "abc");

    session.clear();
    assert!(transport_view.bearer_token().is_err());
  }

  #[test]
  fn test_blank_token_counts_as_missing() {
    assert!(Session::new(Some("  ".into())).bearer_token().is_err());
  }
}
