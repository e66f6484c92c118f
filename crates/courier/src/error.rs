//! Carrier error taxonomy.
//!
//! Every failure that reaches a caller is one of six [`ErrorKind`]s. Carrier
//! response codes are mapped through a fixed table; unknown codes become
//! [`ErrorKind::GenericCarrierError`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidParameters,
    Conflict,
    UpstreamError,
    Unprocessable,
    GenericCarrierError,
}

/// Carrier response codes with a dedicated kind.
const CODE_TABLE: &[(&str, ErrorKind)] = &[
    ("CODE_000", ErrorKind::NotFound),
    ("CODE_001", ErrorKind::UpstreamError),
    ("CODE_002", ErrorKind::InvalidParameters),
    ("CODE_003", ErrorKind::UpstreamError),
    ("CODE_004", ErrorKind::Conflict),
    ("CODE_005", ErrorKind::Unprocessable),
    ("CODE_006", ErrorKind::UpstreamError),
    ("CODE_007", ErrorKind::Unprocessable),
];

impl ErrorKind {
    /// HTTP status used when the error is surfaced to a caller.
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidParameters => 400,
            ErrorKind::Conflict => 409,
            ErrorKind::UpstreamError => 502,
            ErrorKind::Unprocessable => 422,
            ErrorKind::GenericCarrierError => 500,
        }
    }

    pub fn for_code(code: &str) -> ErrorKind {
        CODE_TABLE
            .iter()
            .find(|(known, _)| *known == code)
            .map(|(_, kind)| *kind)
            .unwrap_or(ErrorKind::GenericCarrierError)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidParameters => "invalid_parameters",
            ErrorKind::Conflict => "conflict",
            ErrorKind::UpstreamError => "upstream_error",
            ErrorKind::Unprocessable => "unprocessable",
            ErrorKind::GenericCarrierError => "generic_carrier_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed carrier interaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CarrierError {
    kind: ErrorKind,
    message: String,
    code: Option<String>,
}

impl CarrierError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    /// Map a carrier response code, keeping the code for the caller.
    pub fn from_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            kind: ErrorKind::for_code(&code),
            message: message.into(),
            code: Some(code),
        }
    }

    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParameters, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamError, message)
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::GenericCarrierError, message)
    }

    /// Missing input at `path`, e.g. `ubicacion_destino.oficina.codoficina`.
    pub fn missing(path: &str) -> Self {
        Self::invalid_parameters(format!("missing required field: {path}"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn status(&self) -> u16 {
        self.kind.status()
    }
}
