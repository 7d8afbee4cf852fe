//! Error types for butterfly-reach
//!
//! One error enum covers dataset loading, geometry, and the routing table API.
//! Transient routing failures are told apart from fatal ones through
//! [`Error::is_transient`], which the retry loop uses as its predicate.

use std::fmt;

/// Main error type for butterfly-reach operations
#[derive(Debug)]
pub enum Error {
    /// File I/O error
    IoError(std::io::Error),

    /// Dataset or response JSON could not be parsed
    JsonError(serde_json::Error),

    /// Invalid configuration, parameters or dataset content
    InvalidInput(String),

    /// Coordinate reference system named by a dataset is not supported
    UnsupportedCrs(String),

    /// Connection failure, timeout or broken response body
    NetworkError(String),

    /// Router answered with a non-200 HTTP status
    HttpStatus { status: u16, url: String },

    /// Router answered 200 but its payload code is not "Ok"
    RouterCode { code: String, message: Option<String> },

    /// Router payload does not have the shape of a table response
    MalformedResponse(String),

    /// Geometry operation produced something unusable
    GeometryError(String),
}

impl Error {
    /// Whether a failed routing attempt may succeed when repeated
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::NetworkError(_) | Error::HttpStatus { .. } | Error::RouterCode { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IoError(err) => write!(f, "I/O error: {err}"),
            Error::JsonError(err) => write!(f, "JSON error: {err}"),
            Error::InvalidInput(msg) => write!(f, "Invalid input: {msg}"),
            Error::UnsupportedCrs(name) => {
                write!(f, "Unsupported coordinate reference system '{name}'")
            }
            Error::NetworkError(msg) => write!(f, "Network error: {msg}"),
            Error::HttpStatus { status, url } => {
                write!(f, "Router responded with HTTP {status} for {url}")
            }
            Error::RouterCode { code, message } => match message {
                Some(message) => write!(f, "Router response code not Ok: {code} ({message})"),
                None => write!(f, "Router response code not Ok: {code}"),
            },
            Error::MalformedResponse(msg) => write!(f, "Malformed router response: {msg}"),
            Error::GeometryError(msg) => write!(f, "Geometry error: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(err) => Some(err),
            Error::JsonError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::JsonError(err)
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        // Anything that kept the request from completing counts as a network failure
        if let Some(status) = err.status() {
            Error::HttpStatus {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            Error::NetworkError(err.to_string())
        }
    }
}

/// Convenience result type for butterfly-reach operations
pub type Result<T> = std::result::Result<T, Error>;
