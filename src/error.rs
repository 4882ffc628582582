//! The error type returned by `main`.

use std::fmt;

/// An error that should terminate the process with a non-zero exit code.
#[derive(Debug)]
pub struct ExitError {
    message: String,
}

impl ExitError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ExitError {}

impl From<String> for ExitError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ExitError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<crate::config::ConfigError> for ExitError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<dnsctl_store::StoreError> for ExitError {
    fn from(err: dnsctl_store::StoreError) -> Self {
        Self::new(err.to_string())
    }
}
