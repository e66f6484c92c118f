//! Process configuration.
//!
//! Built once at startup from defaults, an optional TOML file and the
//! environment, then passed by reference to the client, the orchestrator and
//! the partner client.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use courier_retry::RetryStrategyConfig;
use serde::{Deserialize, Serialize};

use crate::label::LabelConfig;
use crate::partner::PartnerConfig;
use crate::pipeline::PipelineOptions;
use crate::store::StoreConfig;

pub const SANDBOX_PUBLIC_BASE: &str = "http://sandbox.zoom.red/baaszoom/public/canguroazul";
pub const QA_PRIVATE_BASE: &str = "https://miws-qa.zoom.red/api";
pub const REGISTRATION_BASE: &str = "https://sandbox.zoom.red/baaszoom/public/guiaelectronica";

/// Deployment profile. Decides which base URL each endpoint family uses
/// when no explicit override is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    #[default]
    Sandbox,
    Qa,
    Production,
}

impl FromStr for Profile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Profile::Sandbox),
            "qa" => Ok(Profile::Qa),
            "production" | "produccion" | "prod" => Ok(Profile::Production),
            other => bail!("unknown profile '{other}' (expected sandbox, qa or production)"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointOverrides {
    pub public: Option<String>,
    pub private: Option<String>,
    pub registration: Option<String>,
}

/// Resolved base URLs, one per endpoint family, without trailing slashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoints {
    pub public: String,
    pub private: String,
    pub registration: String,
}

impl Endpoints {
    /// Point every family at the same base. Handy for tests against one mock.
    pub fn uniform(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            public: base.clone(),
            private: base.clone(),
            registration: base,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub profile: Profile,
    pub debug: bool,
    pub endpoints: EndpointOverrides,
    pub api_key: String,
    pub shared_secret: String,
    pub sign_requests: bool,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub retry: RetryStrategyConfig,
    pub pipeline: PipelineOptions,
    pub labels: LabelConfig,
    pub store: StoreConfig,
    pub partner: PartnerConfig,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            profile: Profile::Sandbox,
            debug: false,
            endpoints: EndpointOverrides::default(),
            api_key: String::new(),
            shared_secret: String::new(),
            sign_requests: false,
            timeout: Duration::from_secs(15),
            retry: RetryStrategyConfig::default(),
            pipeline: PipelineOptions::default(),
            labels: LabelConfig::default(),
            store: StoreConfig::default(),
            partner: PartnerConfig::default(),
        }
    }
}

impl CourierConfig {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Overlay environment values. `lookup` returns the raw value of a variable.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(raw) = get("DEBUG") {
            self.debug = parse_flag(&raw);
        }
        match get("ZOOM_PROFILE") {
            Some(raw) => self.profile = raw.parse()?,
            None if self.debug && self.profile == Profile::Sandbox => self.profile = Profile::Qa,
            None => {}
        }

        if let Some(url) = get("ZOOM_BASE_URL") {
            self.endpoints.public = Some(url);
        }
        if let Some(url) = get("ZOOM_PRIVATE_BASE_URL") {
            self.endpoints.private = Some(url);
        }
        if let Some(url) = get("ZOOM_REGISTRATION_BASE_URL") {
            self.endpoints.registration = Some(url);
        }
        if let Some(key) = get("ZOOM_API_KEY") {
            self.api_key = key;
        }
        if let Some(secret) = get("ZOOM_FRASE_SECRETA") {
            self.shared_secret = secret;
        }
        if let Some(raw) = get("ZOOM_FIRMAR") {
            self.sign_requests = parse_flag(&raw);
        }
        if let Some(raw) = get("ZOOM_TIMEOUT") {
            self.timeout = parse_timeout(&raw).context("invalid ZOOM_TIMEOUT")?;
        }
        if let Some(raw) = get("ZOOM_REINTENTOS") {
            self.retry.retries = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid ZOOM_REINTENTOS: {raw}"))?;
        }
        if let Some(raw) = get("ZOOM_CODIGO_CLIENTE") {
            self.pipeline.default_client_code = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid ZOOM_CODIGO_CLIENTE: {raw}"))?;
        }
        if let Some(raw) = get("ZOOM_IMPRESION_ETIQUETA") {
            self.labels.write = parse_flag(&raw);
        }
        if let Some(raw) = get("ZOOM_GUARDA_PDF_ETIQUETA") {
            self.labels.archive = parse_flag(&raw);
        }
        if let Some(dir) = get("ZOOM_DIR_ETIQUETAS") {
            self.labels.dir = dir.into();
        }
        if let Some(dir) = get("COURIER_STATE_DIR") {
            self.store.dir = dir.into();
        }
        if let Some(url) = get("ARMI_BASE_URL") {
            self.partner.base_url = Some(url);
        }
        if let Some(key) = get("ARMI_API_KEY") {
            self.partner.api_key = key;
        }
        if let Some(country) = get("ARMI_COUNTRY") {
            self.partner.country = country;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            bail!("timeout must be greater than 0");
        }
        if self.retry.max_delay < self.retry.base_delay {
            bail!("retry.max_delay must be greater than or equal to retry.base_delay");
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            bail!("retry.jitter must be between 0.0 and 1.0");
        }
        self.endpoints().map(|_| ())
    }

    /// Resolve the base URL of every endpoint family for the active profile.
    pub fn endpoints(&self) -> Result<Endpoints> {
        let public = match (&self.endpoints.public, self.profile) {
            (Some(url), _) => url.clone(),
            (None, Profile::Production) => {
                bail!("production profile requires endpoints.public (ZOOM_BASE_URL)")
            }
            (None, _) => SANDBOX_PUBLIC_BASE.to_string(),
        };
        let private = match (&self.endpoints.private, self.profile) {
            (Some(url), _) => url.clone(),
            (None, Profile::Qa) => QA_PRIVATE_BASE.to_string(),
            (None, _) => public.clone(),
        };
        let registration = self
            .endpoints
            .registration
            .clone()
            .unwrap_or_else(|| REGISTRATION_BASE.to_string());

        Ok(Endpoints {
            public: checked_base("endpoints.public", &public)?,
            private: checked_base("endpoints.private", &private)?,
            registration: checked_base("endpoints.registration", &registration)?,
        })
    }

    /// Copy with secrets masked, for diagnostics.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for secret in [
            &mut copy.api_key,
            &mut copy.shared_secret,
            &mut copy.partner.api_key,
        ] {
            if !secret.is_empty() {
                *secret = "***".to_string();
            }
        }
        copy
    }
}

fn checked_base(name: &str, url: &str) -> Result<String> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{name} must start with http:// or https:// (got '{url}')");
    }
    Ok(url.trim_end_matches('/').to_string())
}

/// `1`, `true`, `yes` and `on` are true; anything else is false.
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Plain seconds (`15`, `2.5`) or a humantime string (`1500ms`, `1m`).
pub fn parse_timeout(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<f64>() {
        if !secs.is_finite() || secs <= 0.0 {
            bail!("timeout must be a positive number of seconds (got {raw})");
        }
        return Ok(Duration::from_secs_f64(secs));
    }
    humantime::parse_duration(raw).with_context(|| format!("invalid duration: {raw}"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::pipeline::DependencyPolicy;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_resolve_to_sandbox_families() {
        let config = CourierConfig::default();
        let endpoints = config.endpoints().expect("endpoints");
        assert_eq!(endpoints.public, SANDBOX_PUBLIC_BASE);
        assert_eq!(endpoints.private, SANDBOX_PUBLIC_BASE);
        assert_eq!(endpoints.registration, REGISTRATION_BASE);
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.retry.retries, 3);
        assert_eq!(config.pipeline.default_client_code, 407940);
    }

    #[test]
    fn debug_switches_private_family_to_qa() {
        let mut config = CourierConfig::default();
        config.apply_env_from(env(&[("DEBUG", "true")])).expect("env");
        assert!(config.debug);
        assert_eq!(config.profile, Profile::Qa);
        let endpoints = config.endpoints().expect("endpoints");
        assert_eq!(endpoints.private, QA_PRIVATE_BASE);
        assert_eq!(endpoints.public, SANDBOX_PUBLIC_BASE);
    }

    #[test]
    fn explicit_profile_wins_over_debug() {
        let mut config = CourierConfig::default();
        config
            .apply_env_from(env(&[
                ("DEBUG", "1"),
                ("ZOOM_PROFILE", "production"),
                ("ZOOM_BASE_URL", "https://carrier.example/api/"),
            ]))
            .expect("env");
        assert_eq!(config.profile, Profile::Production);
        let endpoints = config.endpoints().expect("endpoints");
        assert_eq!(endpoints.public, "https://carrier.example/api");
        assert_eq!(endpoints.private, "https://carrier.example/api");
        assert_eq!(endpoints.registration, REGISTRATION_BASE);
    }

    #[test]
    fn production_without_base_url_is_rejected() {
        let config = CourierConfig {
            profile: Profile::Production,
            ..Default::default()
        };
        let err = config.endpoints().expect_err("must fail");
        assert!(err.to_string().contains("ZOOM_BASE_URL"));
    }

    #[test]
    fn base_url_must_have_scheme() {
        let mut config = CourierConfig::default();
        config.endpoints.registration = Some("ftp://nope".to_string());
        let err = config.validate().expect_err("must fail");
        assert!(err.to_string().contains("endpoints.registration"));
    }

    #[test]
    fn env_overrides_numeric_and_flag_values() {
        let mut config = CourierConfig::default();
        config
            .apply_env_from(env(&[
                ("ZOOM_TIMEOUT", "2.5"),
                ("ZOOM_REINTENTOS", "5"),
                ("ZOOM_GUARDA_PDF_ETIQUETA", "no"),
                ("ZOOM_DIR_ETIQUETAS", "/tmp/labels"),
                ("ARMI_COUNTRY", "VEN"),
                ("ZOOM_API_KEY", "k-123"),
            ]))
            .expect("env");
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.retry.retries, 5);
        assert!(!config.labels.archive);
        assert!(config.labels.write);
        assert_eq!(config.labels.dir, Path::new("/tmp/labels"));
        assert_eq!(config.partner.country, "VEN");
        assert_eq!(config.api_key, "k-123");
    }

    #[test]
    fn bad_retry_count_names_variable() {
        let mut config = CourierConfig::default();
        let err = config
            .apply_env_from(env(&[("ZOOM_REINTENTOS", "many")]))
            .expect_err("must fail");
        assert!(err.to_string().contains("ZOOM_REINTENTOS"));
    }

    #[test]
    fn timeout_accepts_humantime() {
        assert_eq!(parse_timeout("1500ms").expect("parse"), Duration::from_millis(1500));
        assert_eq!(parse_timeout("15").expect("parse"), Duration::from_secs(15));
        assert!(parse_timeout("0").is_err());
        assert!(parse_timeout("soon").is_err());
    }

    #[test]
    fn toml_file_is_layered_under_env() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("courier.toml");
        std::fs::write(
            &path,
            r#"
profile = "qa"
timeout = "30s"

[retry]
retries = 1
base_delay = "100ms"

[pipeline]
dependency_policy = "attempt"

[labels]
archive = false
"#,
        )
        .expect("write");

        let mut config = CourierConfig::load_from_file(&path).expect("load");
        assert_eq!(config.profile, Profile::Qa);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.retry.retries, 1);
        assert_eq!(config.retry.base_delay, Duration::from_millis(100));
        assert_eq!(config.pipeline.dependency_policy, DependencyPolicy::Attempt);
        assert!(!config.labels.archive);

        config
            .apply_env_from(env(&[("ZOOM_REINTENTOS", "4")]))
            .expect("env");
        assert_eq!(config.retry.retries, 4);
    }

    #[test]
    fn redacted_masks_only_present_secrets() {
        let config = CourierConfig {
            api_key: "secret".to_string(),
            ..Default::default()
        };
        let redacted = config.redacted();
        assert_eq!(redacted.api_key, "***");
        assert_eq!(redacted.shared_secret, "");
    }
}
