//! Error handling
//!
//! This module defines:
//! - [`Error`]: the main error type for ICAP server operations.
//! - [`IcapResult<T>`]: a convenient alias for `Result<T, Error>`.
//!
//! It covers network failures, ICAP wire-protocol violations, embedded-HTTP
//! parse failures, handler failures, and response-writer misuse.

use http::header::{InvalidHeaderName, InvalidHeaderValue};
use thiserror::Error;

/// Error type for everything that can go wrong while serving ICAP.
#[derive(Error, Debug)]
pub enum Error {
    /// Network-level error (TCP connection, timeout, etc.).
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// Malformed ICAP wire syntax: request line, headers, `Encapsulated`,
    /// or chunk framing.
    #[error("ICAP protocol error: {0}")]
    Parse(String),

    /// Failed to parse an encapsulated HTTP message head.
    #[error("HTTP parsing error: {0}")]
    HttpParse(String),

    /// Application handler failure.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Response writer misuse (writing before `write_header`, double
    /// `write_header`, writing on a bodyless response).
    #[error("Usage error: {0}")]
    Usage(String),

    /// Server configuration error (bad listen address, unusable TLS
    /// certificate or key).
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create an ICAP protocol error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Create an embedded-HTTP parsing error.
    pub fn http_parse(message: impl Into<String>) -> Self {
        Self::HttpParse(message.into())
    }

    /// Create a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Create a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    /// True for errors caused by bytes the peer sent, as opposed to local
    /// IO failures. The connection loop answers these with `400 Bad
    /// Request` when no response bytes have been committed yet.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Parse(_) | Error::HttpParse(_))
    }
}

impl From<InvalidHeaderName> for Error {
    fn from(e: InvalidHeaderName) -> Self {
        Error::Parse(e.to_string())
    }
}

impl From<InvalidHeaderValue> for Error {
    fn from(e: InvalidHeaderValue) -> Self {
        Error::Parse(e.to_string())
    }
}

/// Convenient alias for results in the ICAP server library.
pub type IcapResult<T> = Result<T, Error>;
