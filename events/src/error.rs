// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!
//! Delivery itself never fails: submitting, draining and (un)registering are either
//! successful or documented no-ops. Errors only surface from worker lifecycle and
//! configuration.
//!

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the event engine.
#[derive(Clone, Debug, Error, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// A worker was spawned outside of a tokio runtime.
    #[error("No tokio runtime available to run {0}.")]
    NoRuntime(String),
    /// The worker (or the dispatcher it depends on) has already been stopped.
    #[error("{0} has already been stopped.")]
    AlreadyStopped(String),
    /// A process-wide dispatcher was installed more than once.
    #[error("A global event dispatcher is already installed.")]
    GlobalAlreadySet,
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// A worker task ended abnormally while being joined.
    #[error("Worker {0} terminated abnormally: {1}")]
    Join(String, String),
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_error_display() {
        let error = Error::AlreadyStopped("sensor".to_owned());
        assert_eq!(error.to_string(), "sensor has already been stopped.");
        let error = Error::Join("event-manager".to_owned(), "panicked".to_owned());
        assert_eq!(
            error.to_string(),
            "Worker event-manager terminated abnormally: panicked"
        );
    }
}
