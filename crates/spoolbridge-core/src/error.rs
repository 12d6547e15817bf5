// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Spoolbridge.

use thiserror::Error;

use crate::types::ErrorClass;

/// Top-level error type for all Spoolbridge operations.
#[derive(Debug, Error)]
pub enum AgentError {
    // -- Message errors --
    #[error("malformed print message: {0}")]
    Malformed(String),

    // -- Content fetch errors --
    #[error("content fetch failed: {0}")]
    Fetch(String),

    #[error("backend returned status {status}: {body}")]
    FetchStatus { status: u16, body: String },

    // -- Spooler errors --
    #[error("printer discovery failed: {0}")]
    Discovery(String),

    #[error("printer unavailable: {0}")]
    PrinterUnavailable(String),

    #[error("spooler error: {0}")]
    Spooler(String),

    // -- Broker errors --
    #[error("broker error: {0}")]
    Broker(String),

    #[error("broker connection lost: {0}")]
    ConnectionLost(String),

    // -- Configuration --
    #[error("no configuration has been applied")]
    NoConfig,

    #[error("incomplete configuration: {0}")]
    IncompleteConfig(String),

    // -- Control plane --
    #[error("invalid control request: {0}")]
    InvalidRequest(String),

    // -- Platform / IO --
    #[error("feature not available on this platform")]
    PlatformUnavailable,

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    /// Classify this error for the delivery pipeline's retry decisions.
    pub fn class(&self) -> ErrorClass {
        classify_error(self)
    }
}

/// Map an `AgentError` onto the pipeline's failure taxonomy.
///
/// Only `TransientRemote` and `TransientLocal` consume retry budget; the
/// supervisor reacts to `ConnectionLost`; everything else is final for the
/// message or request that produced it.
pub fn classify_error(err: &AgentError) -> ErrorClass {
    match err {
        AgentError::Malformed(_) | AgentError::InvalidRequest(_) => ErrorClass::Malformed,
        AgentError::Serialization(_) => ErrorClass::Malformed,

        AgentError::Fetch(_) | AgentError::FetchStatus { .. } => ErrorClass::TransientRemote,

        AgentError::Discovery(_)
        | AgentError::PrinterUnavailable(_)
        | AgentError::Spooler(_)
        | AgentError::PlatformUnavailable
        | AgentError::Io(_) => ErrorClass::TransientLocal,

        AgentError::Broker(_) | AgentError::ConnectionLost(_) => ErrorClass::ConnectionLost,

        AgentError::NoConfig | AgentError::IncompleteConfig(_) => ErrorClass::FatalConfig,
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AgentError>;
