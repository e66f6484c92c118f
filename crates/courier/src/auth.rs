//! Per-run carrier session.
//!
//! A session is created by the authentication step of one pipeline run and
//! dropped with it. Nothing here is cached between runs.

use serde_json::{Value, json};

use crate::client::{CarrierCall, CarrierClient};
use crate::error::CarrierError;
use crate::report::Reporter;
use crate::route::Route;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthSession {
    pub token: Option<String>,
    pub certificate: Option<Value>,
}

impl AuthSession {
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    pub fn has_certificate(&self) -> bool {
        self.certificate.is_some()
    }
}

/// Exchange login and secret for a session token.
pub fn issue_token(
    client: &CarrierClient,
    login: &str,
    secret: &str,
    reporter: &mut dyn Reporter,
) -> Result<String, CarrierError> {
    let call = CarrierCall::post(Route::CreateToken, json!({"login": login, "clave": secret}));
    let response = client.invoke(&call, reporter)?;
    response
        .pointer("/entidadRespuesta/token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CarrierError::generic(format!("token missing from carrier response: {response}")))
}

/// Fetch the signing certificate used by international creation.
///
/// The carrier sometimes wraps it in `certificado`; otherwise the whole
/// response is the certificate.
pub fn fetch_certificate(
    client: &CarrierClient,
    login: &str,
    secret: &str,
    token: &str,
    passphrase: &str,
    reporter: &mut dyn Reporter,
) -> Result<Value, CarrierError> {
    let call = CarrierCall::post(
        Route::Certificate,
        json!({
            "login": login,
            "password": secret,
            "token": token,
            "frase_privada": passphrase,
        }),
    );
    let mut response = client.invoke(&call, reporter)?;
    Ok(match response.get_mut("certificado") {
        Some(certificate) => certificate.take(),
        None => response,
    })
}
