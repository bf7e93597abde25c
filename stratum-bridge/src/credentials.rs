//! Worker credentials and the authorization policy.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;

/// Why an authorization attempt was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("empty username")]
    EmptyUsername,

    #[error("unknown worker {0:?}")]
    UnknownWorker(String),

    #[error("wrong password for worker {0:?}")]
    WrongPassword(String),
}

/// Worker name to password, supplied by configuration.
///
/// An empty map puts the bridge in permissive mode: any non-empty username
/// is accepted, whatever the password.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct CredentialMap(HashMap<String, String>);

impl CredentialMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Apply the authorization policy to one attempt.
    pub fn check(&self, username: &str, password: &str) -> Result<(), AuthError> {
        if username.is_empty() {
            return Err(AuthError::EmptyUsername);
        }
        if self.0.is_empty() {
            return Ok(());
        }

        match self.0.get(username) {
            None => Err(AuthError::UnknownWorker(username.to_string())),
            Some(expected) if expected == password => Ok(()),
            Some(_) => Err(AuthError::WrongPassword(username.to_string())),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CredentialMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, password)| (name.into(), password.into()))
                .collect(),
        )
    }
}
