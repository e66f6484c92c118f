//! Partner business-record API.
//!
//! A small client for the partner's `monitor/business` resource. It shares
//! the [`Transport`] seam and retry schedule with the carrier client, but
//! reports failures as plain `anyhow` errors.

use anyhow::{Context, Result, bail};
use courier_retry::{RetryStrategyConfig, calculate_delay};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CourierConfig;
use crate::report::Reporter;
use crate::transport::{HttpTransport, Method, OutboundRequest, Transport};

pub const API_KEY_HEADER: &str = "armi-business-api-key";
pub const COUNTRY_HEADER: &str = "country";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartnerConfig {
    pub base_url: Option<String>,
    pub api_key: String,
    pub country: String,
}

impl Default for PartnerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: String::new(),
            country: "COL".to_string(),
        }
    }
}

pub struct PartnerClient {
    base_url: String,
    api_key: String,
    country: String,
    retry: RetryStrategyConfig,
    transport: Box<dyn Transport>,
}

impl PartnerClient {
    pub fn new(config: &CourierConfig) -> Result<Self> {
        let transport = HttpTransport::new(config.timeout)?;
        Self::with_transport(&config.partner, config.retry.clone(), transport)
    }

    pub fn with_transport(
        partner: &PartnerConfig,
        retry: RetryStrategyConfig,
        transport: impl Transport + 'static,
    ) -> Result<Self> {
        let Some(base_url) = partner.base_url.as_deref().map(str::trim) else {
            bail!("partner base URL is not configured (ARMI_BASE_URL)");
        };
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            bail!("partner base URL must start with http:// or https:// (got '{base_url}')");
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: partner.api_key.clone(),
            country: partner.country.clone(),
            retry,
            transport: Box::new(transport),
        })
    }

    pub fn create_business(&self, business: &Value, reporter: &mut dyn Reporter) -> Result<Value> {
        self.request(
            Method::Post,
            "monitor/business/create",
            Some(business.clone()),
            reporter,
        )
    }

    pub fn get_business(&self, id: u64, reporter: &mut dyn Reporter) -> Result<Value> {
        self.request(Method::Get, &format!("monitor/business/{id}"), None, reporter)
    }

    pub fn delete_business(&self, id: u64, reporter: &mut dyn Reporter) -> Result<Value> {
        self.request(Method::Delete, &format!("monitor/business/{id}"), None, reporter)
    }

    fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        reporter: &mut dyn Reporter,
    ) -> Result<Value> {
        let request = OutboundRequest {
            method,
            url: format!("{}/{}", self.base_url, path.trim_start_matches('/')),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                (API_KEY_HEADER.to_string(), self.api_key.clone()),
                (COUNTRY_HEADER.to_string(), self.country.clone()),
            ],
            body,
        };
        let total = self.retry.total_attempts();
        let mut attempt = 1;

        let raw = loop {
            match self.transport.send(&request) {
                Ok(raw) => break raw,
                Err(err) if err.class().is_retryable() && attempt < total => {
                    let delay = calculate_delay(&self.retry, attempt);
                    reporter.warn(&format!(
                        "partner {method} {path}: attempt {attempt}/{total} failed ({err}); retrying in {}",
                        humantime::format_duration(delay)
                    ));
                    self.transport.pause(delay);
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err).with_context(|| format!("partner {method} {path} failed"));
                }
            }
        };

        reporter.info(&format!("partner {method} {path} -> {}", raw.status));
        if raw.status >= 400 {
            bail!("partner {method} {path} returned HTTP {}: {}", raw.status, raw.body);
        }
        if raw.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&raw.body)
            .with_context(|| format!("partner {method} {path} returned invalid JSON"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::client::testing::{ScriptedTransport, ok, status};
    use crate::report::CollectingReporter;
    use crate::transport::TransportError;

    fn partner() -> PartnerConfig {
        PartnerConfig {
            base_url: Some("http://partner.test/api/".into()),
            api_key: "pk".into(),
            country: "VEN".into(),
        }
    }

    #[test]
    fn create_sends_key_and_country_headers() {
        let transport = ScriptedTransport::new().on("create", ok(r#"{"id":42}"#));
        let client =
            PartnerClient::with_transport(&partner(), RetryStrategyConfig::default(), transport.clone())
                .expect("client");

        let created = client
            .create_business(&json!({"name": "Tienda"}), &mut CollectingReporter::default())
            .expect("create");
        assert_eq!(created["id"], 42);

        let sent = &transport.requests()[0];
        assert_eq!(sent.url, "http://partner.test/api/monitor/business/create");
        assert_eq!(sent.method, Method::Post);
        assert_eq!(sent.header(API_KEY_HEADER), Some("pk"));
        assert_eq!(sent.header(COUNTRY_HEADER), Some("VEN"));
    }

    #[test]
    fn get_and_delete_address_the_record() {
        let transport = ScriptedTransport::new().on("42", ok(r#"{"id":42}"#));
        let client =
            PartnerClient::with_transport(&partner(), RetryStrategyConfig::default(), transport.clone())
                .expect("client");
        let mut reporter = CollectingReporter::default();

        client.get_business(42, &mut reporter).expect("get");
        client.delete_business(42, &mut reporter).expect("delete");

        let methods: Vec<_> = transport.requests().iter().map(|r| r.method).collect();
        assert_eq!(methods, vec![Method::Get, Method::Delete]);
        assert!(transport.requests()[1].url.ends_with("monitor/business/42"));
    }

    #[test]
    fn transport_faults_are_retried_then_reported() {
        let transport = ScriptedTransport::new()
            .on("7", Err(TransportError::Connect("refused".into())));
        let client =
            PartnerClient::with_transport(&partner(), RetryStrategyConfig::default(), transport.clone())
                .expect("client");

        let err = client
            .get_business(7, &mut CollectingReporter::default())
            .expect_err("unreachable");
        assert!(format!("{err:#}").contains("refused"));
        assert_eq!(transport.count("7"), 4);
    }

    #[test]
    fn http_errors_are_not_retried() {
        let transport = ScriptedTransport::new().on("7", status(404, "not found"));
        let client =
            PartnerClient::with_transport(&partner(), RetryStrategyConfig::default(), transport.clone())
                .expect("client");
        let err = client
            .delete_business(7, &mut CollectingReporter::default())
            .expect_err("404");
        assert!(err.to_string().contains("HTTP 404"));
        assert_eq!(transport.count("7"), 1);
    }

    #[test]
    fn missing_base_url_is_a_configuration_error() {
        let err = PartnerClient::with_transport(
            &PartnerConfig::default(),
            RetryStrategyConfig::default(),
            ScriptedTransport::new(),
        )
        .err()
        .expect("no base url");
        assert!(err.to_string().contains("ARMI_BASE_URL"));
    }
}
