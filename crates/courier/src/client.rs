//! Resilient carrier client.
//!
//! [`CarrierClient::invoke`] is the single entry point for a carrier call:
//! it picks the base URL for the route's family, builds auth and signature
//! headers, retries transport faults on the configured schedule and turns
//! carrier response codes into [`CarrierError`]s.

use std::fmt;

use anyhow::Result;
use courier_retry::{RetryStrategyConfig, calculate_delay};
use serde_json::{Value, json};

use crate::config::{CourierConfig, Endpoints};
use crate::error::CarrierError;
use crate::report::Reporter;
use crate::route::{AuthMode, EndpointFamily, Route};
use crate::signing::{SIGNATURE_HEADER, sign};
use crate::transport::{HttpTransport, Method, OutboundRequest, Transport};

/// Field the carrier uses for application-level outcome, and its success value.
const RESPONSE_CODE_FIELD: &str = "Codrespuesta";
const RESPONSE_MESSAGE_FIELD: &str = "Mensaje";
const RESPONSE_CODE_OK: &str = "OK";

/// Ordered query parameters. Absent values are never sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: impl fmt::Display) -> &mut Self {
        self.0.push((key.to_string(), value.to_string()));
        self
    }

    pub fn push_opt(&mut self, key: &str, value: Option<impl fmt::Display>) -> &mut Self {
        if let Some(value) = value {
            self.push(key, value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, String)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<(String, String)> for QueryParams {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// One carrier call, before endpoint resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierCall {
    pub route: Route,
    pub method: Method,
    pub query: QueryParams,
    pub body: Option<Value>,
    pub auth: AuthMode,
}

impl CarrierCall {
    pub fn new(method: Method, route: Route) -> Self {
        let auth = route.default_auth();
        Self {
            route,
            method,
            query: QueryParams::new(),
            body: None,
            auth,
        }
    }

    pub fn get(route: Route) -> Self {
        Self::new(Method::Get, route)
    }

    pub fn post(route: Route, body: Value) -> Self {
        Self::new(Method::Post, route).body(body)
    }

    pub fn query(mut self, query: QueryParams) -> Self {
        self.query = query;
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn auth(mut self, auth: AuthMode) -> Self {
        self.auth = auth;
        self
    }
}

pub struct CarrierClient {
    endpoints: Endpoints,
    api_key: String,
    signing_secret: Option<String>,
    retry: RetryStrategyConfig,
    transport: Box<dyn Transport>,
}

impl CarrierClient {
    /// Client over HTTP, configured from `config`.
    pub fn new(config: &CourierConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.timeout)?;
        let signing_secret = (config.sign_requests && !config.shared_secret.is_empty())
            .then(|| config.shared_secret.clone());
        Ok(Self {
            endpoints: config.endpoints()?,
            api_key: config.api_key.clone(),
            signing_secret,
            retry: config.retry.clone(),
            transport: Box::new(transport),
        })
    }

    pub fn with_transport(
        endpoints: Endpoints,
        retry: RetryStrategyConfig,
        transport: impl Transport + 'static,
    ) -> Self {
        Self {
            endpoints,
            api_key: String::new(),
            signing_secret: None,
            retry,
            transport: Box::new(transport),
        }
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    pub fn signing_secret(mut self, secret: impl Into<String>) -> Self {
        self.signing_secret = Some(secret.into()).filter(|s| !s.is_empty());
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn base_for(&self, family: EndpointFamily) -> &str {
        match family {
            EndpointFamily::Public => &self.endpoints.public,
            EndpointFamily::Private => &self.endpoints.private,
            EndpointFamily::Registration => &self.endpoints.registration,
        }
    }

    /// Full URL for `route` with `query` appended.
    pub fn url_for(&self, route: &Route, query: &QueryParams) -> Result<String, CarrierError> {
        let base = self.base_for(route.family());
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(CarrierError::generic(format!(
                "carrier base URL must start with http:// or https:// (got '{base}')"
            )));
        }
        let joined = format!("{}/{}", base.trim_end_matches('/'), route.path());
        let mut url = reqwest::Url::parse(&joined)
            .map_err(|e| CarrierError::generic(format!("invalid carrier URL {joined}: {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        Ok(url.into())
    }

    fn bearer<'a>(&'a self, auth: &'a AuthMode) -> Option<&'a str> {
        let api_key = Some(self.api_key.as_str()).filter(|k| !k.is_empty());
        match auth {
            AuthMode::None => None,
            AuthMode::ApiKey => api_key,
            AuthMode::SessionToken(Some(token)) if !token.is_empty() => Some(token.as_str()),
            AuthMode::SessionToken(_) => api_key,
        }
    }

    fn headers(&self, call: &CarrierCall) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        if let Some(token) = self.bearer(&call.auth) {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        if let (Some(secret), Some(body)) = (&self.signing_secret, &call.body)
            && call.route.family() != EndpointFamily::Public
        {
            headers.push((SIGNATURE_HEADER.to_string(), sign(body, secret)));
        }
        headers
    }

    pub fn build_request(&self, call: &CarrierCall) -> Result<OutboundRequest, CarrierError> {
        Ok(OutboundRequest {
            method: call.method,
            url: self.url_for(&call.route, &call.query)?,
            headers: self.headers(call),
            body: call.body.clone(),
        })
    }

    /// Perform `call`, retrying transport faults.
    ///
    /// Carrier rejections and HTTP errors are returned on the first response;
    /// only connection and timeout faults are retried, and once the schedule
    /// is exhausted they surface as an upstream error.
    pub fn invoke(
        &self,
        call: &CarrierCall,
        reporter: &mut dyn Reporter,
    ) -> Result<Value, CarrierError> {
        let request = self.build_request(call)?;
        let total = self.retry.total_attempts();
        let mut attempt = 1;

        loop {
            match self.transport.send(&request) {
                Ok(raw) => {
                    reporter.info(&format!("{} {} -> {}", call.method, call.route, raw.status));
                    return interpret(raw.status, &raw.body);
                }
                Err(err) if err.class().is_retryable() => {
                    if attempt >= total {
                        reporter.error(&format!(
                            "{} {}: giving up after {total} attempts: {err}",
                            call.method, call.route
                        ));
                        return Err(CarrierError::upstream(format!(
                            "network failure talking to carrier ({}): {err}",
                            call.route
                        )));
                    }
                    let delay = calculate_delay(&self.retry, attempt);
                    reporter.warn(&format!(
                        "{} {}: attempt {attempt}/{total} failed ({err}); retrying in {}",
                        call.method,
                        call.route,
                        humantime::format_duration(delay)
                    ));
                    self.transport.pause(delay);
                    attempt += 1;
                }
                Err(err) => {
                    return Err(CarrierError::generic(format!(
                        "{} {}: {err}",
                        call.method, call.route
                    )));
                }
            }
        }
    }
}

/// Carrier operations outside the shipment pipeline.
impl CarrierClient {
    /// Full status history of a tracking number.
    pub fn info_tracking(
        &self,
        tracking_number: &str,
        client_code: i64,
        reporter: &mut dyn Reporter,
    ) -> Result<Value, CarrierError> {
        let tracking_number = tracking_number.trim();
        if tracking_number.is_empty() {
            return Err(CarrierError::invalid_parameters(
                "tracking number is required",
            ));
        }
        let mut query = QueryParams::new();
        query
            .push("tipo_busqueda", 1)
            .push("codigo", tracking_number)
            .push("codigo_cliente", client_code);
        self.invoke(&CarrierCall::get(Route::InfoTracking).query(query), reporter)
    }

    pub fn client_report(
        &self,
        filter: &Value,
        reporter: &mut dyn Reporter,
    ) -> Result<Value, CarrierError> {
        self.invoke(&CarrierCall::post(Route::ClientReport, filter.clone()), reporter)
    }

    pub fn request_pickup(
        &self,
        pickup: &Value,
        reporter: &mut dyn Reporter,
    ) -> Result<Value, CarrierError> {
        self.invoke(&CarrierCall::post(Route::PickupRequest, pickup.clone()), reporter)
    }

    pub fn create_client(
        &self,
        client: &Value,
        reporter: &mut dyn Reporter,
    ) -> Result<Value, CarrierError> {
        self.invoke(&CarrierCall::post(Route::CreateClient, client.clone()), reporter)
    }
}

/// Parse a transported response and apply the carrier's outcome rules.
pub fn interpret(status: u16, body: &str) -> Result<Value, CarrierError> {
    let data: Value = serde_json::from_str(body)
        .unwrap_or_else(|_| json!({"status_code": status, "texto": body}));

    if let Some(code) = data.get(RESPONSE_CODE_FIELD).and_then(Value::as_str)
        && !code.is_empty()
        && code != RESPONSE_CODE_OK
    {
        let message = data
            .get(RESPONSE_MESSAGE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or("carrier rejected the request");
        return Err(CarrierError::from_code(code, message));
    }

    if status >= 400 {
        return Err(CarrierError::generic(format!("HTTP {status}: {data}")));
    }
    Ok(data)
}
