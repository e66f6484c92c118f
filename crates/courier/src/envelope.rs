//! Response envelope shared by every caller-facing surface.

use serde::{Deserialize, Serialize};

use crate::error::CarrierError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub mensaje: String,
    pub codigo_zoom: Option<String>,
}

impl From<&CarrierError> for ErrorBody {
    fn from(err: &CarrierError) -> Self {
        Self {
            mensaje: err.message().to_string(),
            codigo_zoom: err.code().map(str::to_string),
        }
    }
}

/// `{"ok": true, "data": ..}` or `{"ok": false, "error": {..}}`.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(skip)]
    status: u16,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            status: 200,
        }
    }

    pub fn failure(err: &CarrierError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody::from(err)),
            status: err.status(),
        }
    }

    /// Anything that escaped the carrier taxonomy: 500, no carrier code.
    pub fn unexpected(err: &anyhow::Error) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                mensaje: format!("{err:#}"),
                codigo_zoom: None,
            }),
            status: 500,
        }
    }

    /// HTTP-style status: 200 on success, the error kind's status otherwise.
    pub fn status(&self) -> u16 {
        self.status
    }
}

impl<T> From<Result<T, CarrierError>> for Envelope<T> {
    fn from(result: Result<T, CarrierError>) -> Self {
        match result {
            Ok(data) => Envelope::success(data),
            Err(err) => Envelope::failure(&err),
        }
    }
}
