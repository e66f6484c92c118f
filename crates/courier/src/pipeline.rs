//! Shipment-creation pipeline.
//!
//! [`Orchestrator::run`] drives the ten steps of a shipment in order and
//! returns one [`PipelineResult`]. Steps never abort the run: each one
//! records a [`StepOutcome`], and failures are accumulated in `errores`.
//!
//! Steps declare the earlier steps they need. Under
//! [`DependencyPolicy::Skip`] a step whose prerequisite did not succeed is
//! recorded as skipped instead of being attempted with missing data.
//! [`DependencyPolicy::Attempt`] keeps the best-effort behaviour, except
//! that nothing runs on a request that failed structure validation.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::auth::{AuthSession, fetch_certificate, issue_token};
use crate::client::{CarrierCall, CarrierClient, QueryParams};
use crate::error::{CarrierError, ErrorKind};
use crate::label::{LabelConfig, LabelFiles, LabelWriter};
use crate::payload::{Validated, validate};
use crate::report::Reporter;
use crate::request::{ShipmentRequest, code_value};
use crate::route::Route;
use crate::store::{ClientRecord, ShipmentReceipt, ShipmentRecord, ShipmentStore};
use crate::variant::{ShipmentType, compact};

const REGISTRATION_OK: &str = "COD_001";
const TRACKING_OK: &str = "COD_000";
/// Creation accepted but still being processed; no tracking number yet.
const CREATION_PENDING: &str = "CODE_001";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepName {
    StructureValidation,
    Authentication,
    ServiceValidation,
    TariffCalculation,
    SenderRegistration,
    RecipientRegistration,
    ShipmentCreation,
    TrackingRetrieval,
    LabelGeneration,
    Persistence,
}

impl StepName {
    pub const ALL: [StepName; 10] = [
        StepName::StructureValidation,
        StepName::Authentication,
        StepName::ServiceValidation,
        StepName::TariffCalculation,
        StepName::SenderRegistration,
        StepName::RecipientRegistration,
        StepName::ShipmentCreation,
        StepName::TrackingRetrieval,
        StepName::LabelGeneration,
        StepName::Persistence,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StepName::StructureValidation => "structure_validation",
            StepName::Authentication => "authentication",
            StepName::ServiceValidation => "service_validation",
            StepName::TariffCalculation => "tariff_calculation",
            StepName::SenderRegistration => "sender_registration",
            StepName::RecipientRegistration => "recipient_registration",
            StepName::ShipmentCreation => "shipment_creation",
            StepName::TrackingRetrieval => "tracking_retrieval",
            StepName::LabelGeneration => "label_generation",
            StepName::Persistence => "persistence",
        }
    }

    /// A failure here means the run cannot produce a usable shipment.
    pub fn is_critical(self) -> bool {
        matches!(
            self,
            StepName::StructureValidation | StepName::Authentication | StepName::ShipmentCreation
        )
    }
}

impl fmt::Display for StepName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Turned off by the request configuration.
    Disabled,
    /// Nothing to do, e.g. no tracking number was issued.
    NotApplicable,
    /// A prerequisite step did not succeed.
    Dependency(StepName),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "estado", content = "motivo", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepError {
    /// `None` for local failures (store, label files).
    pub kind: Option<ErrorKind>,
    pub mensaje: String,
    pub codigo_zoom: Option<String>,
}

impl From<&CarrierError> for StepError {
    fn from(err: &CarrierError) -> Self {
        Self {
            kind: Some(err.kind()),
            mensaje: err.message().to_string(),
            codigo_zoom: err.code().map(str::to_string),
        }
    }
}

impl StepError {
    fn local(err: &anyhow::Error) -> Self {
        Self {
            kind: None,
            mensaje: format!("{err:#}"),
            codigo_zoom: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    #[serde(rename = "paso")]
    pub name: StepName,
    #[serde(flatten)]
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(rename = "datos", skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub duration_ms: u64,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == StepStatus::Succeeded
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyPolicy {
    /// Skip a step whose prerequisites did not succeed.
    #[default]
    Skip,
    /// Attempt every step whose input is available.
    Attempt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    pub dependency_policy: DependencyPolicy,
    /// Carrier client code used when the request has none.
    pub default_client_code: i64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            dependency_policy: DependencyPolicy::Skip,
            default_client_code: 407940,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuthSummary {
    pub token_obtenido: bool,
    pub certificado_obtenido: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IntermediateData {
    pub autenticacion: AuthSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servicios_validados: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tarifa: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remitente_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destinatario: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envio: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guia_zoom: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etiqueta: Option<LabelFiles>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db: Option<ShipmentReceipt>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FinalResponse {
    pub envio: String,
    pub guia_zoom: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etiqueta_envio: Option<LabelFiles>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db: Option<ShipmentReceipt>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetadata {
    pub solicitud_id: Option<String>,
    pub tipo_envio: Option<String>,
    pub timestamp_inicio: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineResult {
    /// False when any step failed or `errores` is non-empty.
    pub ok: bool,
    pub metadata: RunMetadata,
    #[serde(rename = "pasos")]
    pub steps: Vec<StepOutcome>,
    #[serde(rename = "pasos_completados")]
    pub completed: Vec<StepName>,
    #[serde(rename = "errores")]
    pub errors: Vec<String>,
    #[serde(rename = "datos_intermedios")]
    pub intermediate: IntermediateData,
    #[serde(rename = "respuesta_final")]
    pub final_response: FinalResponse,
    pub critical_failure: Option<StepName>,
    #[serde(rename = "timestamp_final")]
    pub finished_at: DateTime<Utc>,
}

impl PipelineResult {
    pub fn step(&self, name: StepName) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.final_response.guia_zoom.as_deref()
    }
}

/// Accumulates outcomes while a run progresses.
#[derive(Default)]
struct Ledger {
    steps: Vec<StepOutcome>,
    errors: Vec<String>,
}

impl Ledger {
    fn status(&self, name: StepName) -> Option<StepStatus> {
        self.steps.iter().find(|s| s.name == name).map(|s| s.status)
    }

    fn push(&mut self, name: StepName, status: StepStatus, started: Instant) -> &mut StepOutcome {
        self.steps.push(StepOutcome {
            name,
            status,
            error: None,
            data: None,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        let last = self.steps.len() - 1;
        &mut self.steps[last]
    }

    fn succeed(
        &mut self,
        name: StepName,
        data: Option<Value>,
        started: Instant,
        reporter: &mut dyn Reporter,
    ) {
        reporter.info(&format!("{name}: ok"));
        self.push(name, StepStatus::Succeeded, started).data = data;
    }

    fn fail(
        &mut self,
        name: StepName,
        error: StepError,
        started: Instant,
        reporter: &mut dyn Reporter,
    ) {
        reporter.error(&format!("{name}: {}", error.mensaje));
        self.errors.push(format!("{name}: {}", error.mensaje));
        self.push(name, StepStatus::Failed, started).error = Some(error);
    }

    /// Failed, but the run treats it as informational.
    fn fail_advisory(
        &mut self,
        name: StepName,
        error: StepError,
        started: Instant,
        reporter: &mut dyn Reporter,
    ) {
        reporter.warn(&format!("{name}: {} (not required)", error.mensaje));
        self.push(name, StepStatus::Failed, started).error = Some(error);
    }

    fn skip(&mut self, name: StepName, reason: SkipReason, reporter: &mut dyn Reporter) {
        match reason {
            SkipReason::Dependency(dep) => {
                reporter.warn(&format!("{name}: skipped, {dep} did not succeed"));
                self.errors
                    .push(format!("{name}: skipped because {dep} did not succeed"));
            }
            SkipReason::Disabled => reporter.info(&format!("{name}: disabled")),
            SkipReason::NotApplicable => reporter.info(&format!("{name}: not applicable")),
        }
        self.push(name, StepStatus::Skipped(reason), Instant::now());
    }
}

/// Runs shipment requests against one carrier client and store.
pub struct Orchestrator<'a> {
    client: &'a CarrierClient,
    store: &'a dyn ShipmentStore,
    labels: LabelWriter,
    options: PipelineOptions,
    today: Option<NaiveDate>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        client: &'a CarrierClient,
        store: &'a dyn ShipmentStore,
        labels: LabelConfig,
        options: PipelineOptions,
    ) -> Self {
        Self {
            client,
            store,
            labels: LabelWriter::new(labels),
            options,
            today: None,
        }
    }

    /// Fix the ship date used by quotes instead of the local date.
    pub fn on_date(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// First prerequisite of a step that blocks it, if any.
    fn blocker(&self, ledger: &Ledger, requires: &[StepName]) -> Option<StepName> {
        if ledger.status(StepName::StructureValidation) != Some(StepStatus::Succeeded) {
            return Some(StepName::StructureValidation);
        }
        if self.options.dependency_policy == DependencyPolicy::Attempt {
            return None;
        }
        requires
            .iter()
            .copied()
            .find(|dep| ledger.status(*dep) != Some(StepStatus::Succeeded))
    }

    pub fn run(&self, request: &ShipmentRequest, reporter: &mut dyn Reporter) -> PipelineResult {
        let started_at = Utc::now();
        let today = self.today.unwrap_or_else(|| Local::now().date_naive());
        let mut ledger = Ledger::default();
        let mut data = IntermediateData::default();
        let mut session = AuthSession::default();

        let raw_type = request
            .settings
            .as_ref()
            .and_then(|s| s.shipment_type.clone());
        reporter.info(&format!(
            "shipment run {} ({})",
            request.request_id().unwrap_or("-"),
            raw_type.as_deref().unwrap_or("no type")
        ));
        let variant = raw_type
            .as_deref()
            .ok_or_else(|| CarrierError::missing("configuracion_envio.tipo_envio"))
            .and_then(str::parse::<ShipmentType>);

        // structure_validation
        let t = Instant::now();
        let validated = match validate(request) {
            Ok(v) => {
                ledger.succeed(StepName::StructureValidation, None, t, reporter);
                Some(v)
            }
            Err(err) => {
                ledger.fail(StepName::StructureValidation, (&err).into(), t, reporter);
                None
            }
        };

        // authentication
        let t = Instant::now();
        match (validated, self.blocker(&ledger, &[])) {
            (Some(v), None) => {
                let result = self.authenticate(&v, &mut session, reporter);
                data.autenticacion = AuthSummary {
                    token_obtenido: session.has_token(),
                    certificado_obtenido: session.has_certificate(),
                };
                let summary = serde_json::to_value(&data.autenticacion).ok();
                match result {
                    Ok(()) => ledger.succeed(StepName::Authentication, summary, t, reporter),
                    Err(err) => ledger.fail(StepName::Authentication, (&err).into(), t, reporter),
                }
            }
            (_, blocker) => ledger.skip(
                StepName::Authentication,
                SkipReason::Dependency(blocker.unwrap_or(StepName::StructureValidation)),
                reporter,
            ),
        }

        // service_validation
        let t = Instant::now();
        match (validated, self.blocker(&ledger, &[])) {
            (Some(v), None) if !v.settings.validates_service() => {
                ledger.skip(StepName::ServiceValidation, SkipReason::Disabled, reporter)
            }
            (Some(v), None) => match self.validate_service(&v, reporter) {
                Ok(services) => {
                    data.servicios_validados = Some(true);
                    ledger.succeed(
                        StepName::ServiceValidation,
                        Some(json!({"servicios": services})),
                        t,
                        reporter,
                    );
                }
                Err(err) => {
                    data.servicios_validados = Some(false);
                    ledger.fail(StepName::ServiceValidation, (&err).into(), t, reporter);
                }
            },
            (_, blocker) => ledger.skip(
                StepName::ServiceValidation,
                SkipReason::Dependency(blocker.unwrap_or(StepName::StructureValidation)),
                reporter,
            ),
        }

        // tariff_calculation
        let t = Instant::now();
        match (&variant, validated, self.blocker(&ledger, &[])) {
            (Err(err), _, _) => ledger.fail(StepName::TariffCalculation, err.into(), t, reporter),
            (Ok(kind), Some(v), None) => {
                let result = kind
                    .handler()
                    .tariff_call(&v, today)
                    .and_then(|call| self.client.invoke(&call, reporter));
                match result {
                    Ok(tariff) => {
                        data.tarifa = Some(tariff.clone());
                        ledger.succeed(StepName::TariffCalculation, Some(tariff), t, reporter);
                    }
                    Err(err) if v.settings.requires_valid_tariff() => {
                        ledger.fail(StepName::TariffCalculation, (&err).into(), t, reporter)
                    }
                    Err(err) => {
                        ledger.fail_advisory(StepName::TariffCalculation, (&err).into(), t, reporter)
                    }
                }
            }
            (Ok(_), _, blocker) => ledger.skip(
                StepName::TariffCalculation,
                SkipReason::Dependency(blocker.unwrap_or(StepName::StructureValidation)),
                reporter,
            ),
        }

        // sender_registration
        let t = Instant::now();
        match (validated, self.blocker(&ledger, &[])) {
            (Some(v), None) => match self.register_sender(&v, reporter) {
                Ok(sender_id) => {
                    data.remitente_id = sender_id.clone();
                    ledger.succeed(
                        StepName::SenderRegistration,
                        Some(json!({"remitente_id": sender_id})),
                        t,
                        reporter,
                    );
                }
                Err(err) => ledger.fail(StepName::SenderRegistration, (&err).into(), t, reporter),
            },
            (_, blocker) => ledger.skip(
                StepName::SenderRegistration,
                SkipReason::Dependency(blocker.unwrap_or(StepName::StructureValidation)),
                reporter,
            ),
        }

        // recipient_registration
        let t = Instant::now();
        match (validated, self.blocker(&ledger, &[])) {
            (Some(v), None) => match self.register_recipient(&v, reporter) {
                Ok(response) => {
                    data.destinatario = Some(response.clone());
                    ledger.succeed(StepName::RecipientRegistration, Some(response), t, reporter);
                }
                Err(err) => {
                    ledger.fail(StepName::RecipientRegistration, (&err).into(), t, reporter)
                }
            },
            (_, blocker) => ledger.skip(
                StepName::RecipientRegistration,
                SkipReason::Dependency(blocker.unwrap_or(StepName::StructureValidation)),
                reporter,
            ),
        }

        // shipment_creation
        let t = Instant::now();
        let mut creation_requires = vec![StepName::Authentication];
        if validated.is_some_and(|v| v.settings.requires_valid_tariff()) {
            creation_requires.push(StepName::TariffCalculation);
        }
        let mut tracking_number = None;
        match (&variant, validated, self.blocker(&ledger, &creation_requires)) {
            (Err(err), _, _) => ledger.fail(StepName::ShipmentCreation, err.into(), t, reporter),
            (Ok(kind), Some(v), None) => {
                let call = kind.handler().creation_call(&v, &session);
                match self
                    .client
                    .invoke(&call, reporter)
                    .and_then(|response| creation_outcome(response, *kind))
                {
                    Ok((response, guia)) => {
                        tracking_number = guia;
                        data.envio = Some(response.clone());
                        data.guia_zoom = tracking_number.clone();
                        ledger.succeed(StepName::ShipmentCreation, Some(response), t, reporter);
                    }
                    Err(err) => ledger.fail(StepName::ShipmentCreation, (&err).into(), t, reporter),
                }
            }
            (Ok(_), _, blocker) => ledger.skip(
                StepName::ShipmentCreation,
                SkipReason::Dependency(blocker.unwrap_or(StepName::StructureValidation)),
                reporter,
            ),
        }
        let created = ledger.status(StepName::ShipmentCreation) == Some(StepStatus::Succeeded);

        // tracking_retrieval
        let t = Instant::now();
        match (validated, tracking_number.as_deref()) {
            (Some(v), Some(guia)) => match self.fetch_tracking(&v, guia, reporter) {
                Ok(tracking) => {
                    data.tracking = Some(tracking.clone());
                    ledger.succeed(StepName::TrackingRetrieval, Some(tracking), t, reporter);
                }
                Err(err) => ledger.fail(StepName::TrackingRetrieval, (&err).into(), t, reporter),
            },
            _ if created => {
                ledger.skip(StepName::TrackingRetrieval, SkipReason::NotApplicable, reporter)
            }
            _ => ledger.skip(
                StepName::TrackingRetrieval,
                SkipReason::Dependency(StepName::ShipmentCreation),
                reporter,
            ),
        }

        // label_generation
        let t = Instant::now();
        match (validated, tracking_number.as_deref()) {
            (Some(v), Some(_)) if !v.settings.generates_label() => {
                ledger.skip(StepName::LabelGeneration, SkipReason::Disabled, reporter)
            }
            (Some(_), Some(guia)) => match self.generate_label(guia, reporter) {
                Ok(files) => {
                    data.etiqueta = Some(files.clone());
                    ledger.succeed(
                        StepName::LabelGeneration,
                        serde_json::to_value(&files).ok(),
                        t,
                        reporter,
                    );
                }
                Err(err) => ledger.fail(StepName::LabelGeneration, err, t, reporter),
            },
            _ if created => {
                ledger.skip(StepName::LabelGeneration, SkipReason::NotApplicable, reporter)
            }
            _ => ledger.skip(
                StepName::LabelGeneration,
                SkipReason::Dependency(StepName::ShipmentCreation),
                reporter,
            ),
        }

        // persistence
        let t = Instant::now();
        let attempted = matches!(
            ledger.status(StepName::ShipmentCreation),
            Some(StepStatus::Succeeded | StepStatus::Failed)
        );
        match validated {
            Some(v) if attempted => {
                let snapshot = json!({"pasos": &ledger.steps, "datos_intermedios": &data});
                match self.persist(&v, &session, tracking_number.as_deref(), snapshot) {
                    Ok(receipt) => {
                        data.db = Some(receipt.clone());
                        ledger.succeed(
                            StepName::Persistence,
                            serde_json::to_value(&receipt).ok(),
                            t,
                            reporter,
                        );
                    }
                    Err(err) => {
                        ledger.fail(StepName::Persistence, StepError::local(&err), t, reporter)
                    }
                }
            }
            _ => ledger.skip(
                StepName::Persistence,
                SkipReason::Dependency(StepName::ShipmentCreation),
                reporter,
            ),
        }

        let final_response = FinalResponse {
            envio: if created {
                match &tracking_number {
                    Some(_) => "shipment created".to_string(),
                    None => "shipment accepted, tracking number pending".to_string(),
                }
            } else {
                "shipment not created".to_string()
            },
            guia_zoom: tracking_number.clone(),
            etiqueta_envio: data.etiqueta.clone(),
            db: data.db.clone(),
        };
        let critical_failure = ledger
            .steps
            .iter()
            .find(|s| s.status == StepStatus::Failed && s.name.is_critical())
            .map(|s| s.name);
        let completed = ledger
            .steps
            .iter()
            .filter(|s| s.succeeded())
            .map(|s| s.name)
            .collect();

        let any_failed = ledger.steps.iter().any(|s| s.status == StepStatus::Failed);
        let result = PipelineResult {
            ok: ledger.errors.is_empty() && !any_failed,
            metadata: RunMetadata {
                solicitud_id: request.request_id().map(str::to_string),
                tipo_envio: raw_type,
                timestamp_inicio: started_at,
            },
            steps: ledger.steps,
            completed,
            errors: ledger.errors,
            intermediate: data,
            final_response,
            critical_failure,
            finished_at: Utc::now(),
        };
        if result.ok {
            reporter.info("shipment run finished without errors");
        } else {
            let failed = result
                .steps
                .iter()
                .filter(|s| s.status == StepStatus::Failed)
                .count();
            reporter.warn(&format!(
                "shipment run finished with {failed} failed step(s) and {} error(s)",
                result.errors.len()
            ));
        }
        result
    }

    fn authenticate(
        &self,
        v: &Validated<'_>,
        session: &mut AuthSession,
        reporter: &mut dyn Reporter,
    ) -> Result<(), CarrierError> {
        let token = issue_token(self.client, v.login(), v.secret(), reporter)?;
        session.token = Some(token.clone());
        if v.settings.requires_certificate() {
            let passphrase = v.auth.passphrase.as_deref().unwrap_or_default();
            session.certificate = Some(fetch_certificate(
                self.client,
                v.login(),
                v.secret(),
                &token,
                passphrase,
                reporter,
            )?);
        }
        Ok(())
    }

    fn validate_service(
        &self,
        v: &Validated<'_>,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<String>, CarrierError> {
        let call = CarrierCall::post(Route::ClientServices, json!({"login": v.login()}));
        let response = self.client.invoke(&call, reporter)?;
        let services: Vec<String> = response
            .get("entidadRespuesta")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|e| e.get("codserviciofin"))
                    .filter_map(scalar_text)
                    .collect()
            })
            .unwrap_or_default();
        if !services.iter().any(|s| s == v.service_code()) {
            return Err(CarrierError::new(
                ErrorKind::Unprocessable,
                format!("service {} is not enabled for this client", v.service_code()),
            ));
        }
        Ok(services)
    }

    fn register_sender(
        &self,
        v: &Validated<'_>,
        reporter: &mut dyn Reporter,
    ) -> Result<Option<String>, CarrierError> {
        let data = v.sender_data;
        let body = json!({
            "codigo_oficina": v.origin.office_code().map(code_value),
            "nombre_remitente": data.full_name,
            "cirif": data.document(),
            "contacto_remitente": data.contact(),
            "direccion_remitente": v.sender.full_address(),
            "ciudad_remitente": v.origin.city_code().map(code_value),
            "telefono_remitente": data.phone(),
            "observacion": v.request.notes(),
            "codigo_usuario": v.auth.user_id,
            "parroquia_remitente": v.origin.parish_code().map(code_value),
            "municipio_remitente": v.origin.municipality_code().map(code_value),
            "codpostal_remitente": v.origin.postal_code(),
            "ciudad_ipostel": v.sender.ipostel_city(),
            "inmueble_remitente": v.sender.building(),
            "celular_remitente": data.mobile,
        });
        let response = self.register(Route::SaveSender, body, "sender", reporter)?;
        Ok(response
            .pointer("/entidadRespuesta/codremitente")
            .and_then(scalar_text))
    }

    fn register_recipient(
        &self,
        v: &Validated<'_>,
        reporter: &mut dyn Reporter,
    ) -> Result<Value, CarrierError> {
        let data = v.recipient_data;
        let body = json!({
            "codigo_usuario": v.auth.user_id.as_deref().unwrap_or_default(),
            "nombre_destinatario": data.full_name,
            "direccion_destino": v.recipient.full_address(),
            "contacto_destinatario": data.contact(),
            "cirif_destinatario": data.document(),
            "telefono_destinatario": data.phone(),
            "fax_destinatario": data.mobile,
            "email_destinatario": data.email.as_deref().unwrap_or_default(),
            "codciudad_destino": v.destination.city_code().map(code_value),
            "codpais_destino": v.destination.country_code().map(code_value),
            "ciudad_destinoint": v.destination.city_name(),
            "referencia": v.package.client_reference().unwrap_or_default(),
            "municipio_destino": v.destination.municipality_code().map(code_value),
            "parroquia_destino": v.destination.parish_code().map(code_value),
            "codpostal_destino": v.destination.postal_code(),
            "ciudad_ipostel": v.recipient.ipostel_city(),
            "estado_destino": v.destination.state_name(),
            "immueble_destinatario": v.recipient.building(),
            "celular_destinatario": data.mobile,
        });
        self.register(Route::SaveRecipients, body, "recipient", reporter)
    }

    fn register(
        &self,
        route: Route,
        body: Value,
        what: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<Value, CarrierError> {
        let response = self
            .client
            .invoke(&CarrierCall::post(route, compact(body)), reporter)?;
        let code = marker(&response).map(str::to_string);
        match code.as_deref() {
            Some(REGISTRATION_OK) => Ok(response),
            Some(code) => Err(CarrierError::from_code(
                code,
                format!("carrier did not confirm {what} registration"),
            )),
            None => Err(CarrierError::generic(format!(
                "carrier did not confirm {what} registration"
            ))),
        }
    }

    fn fetch_tracking(
        &self,
        v: &Validated<'_>,
        guia: &str,
        reporter: &mut dyn Reporter,
    ) -> Result<Value, CarrierError> {
        let mut query = QueryParams::new();
        query
            .push("tipo_busqueda", 1)
            .push("codigo", guia)
            .push(
                "codigo_cliente",
                v.auth.client_code_or(self.options.default_client_code),
            );
        let response = self
            .client
            .invoke(&CarrierCall::get(Route::LastTracking).query(query), reporter)?;
        let code = marker(&response).map(str::to_string);
        match code.as_deref() {
            Some(TRACKING_OK) => Ok(response),
            code => Err(CarrierError::generic(format!(
                "initial tracking not available for {guia} ({})",
                code.unwrap_or("no response code")
            ))),
        }
    }

    fn generate_label(&self, guia: &str, reporter: &mut dyn Reporter) -> Result<LabelFiles, StepError> {
        let call = CarrierCall::post(
            Route::ThermalLabel,
            json!({"codguia": [guia], "termicaPdf": "1", "terminos": "1"}),
        );
        let response = self
            .client
            .invoke(&call, reporter)
            .map_err(|err| StepError::from(&err))?;
        let encoded = response
            .pointer("/entidadRespuesta/guiaPDF")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StepError::from(&CarrierError::generic(format!(
                    "label missing from carrier response for {guia}"
                )))
            })?;
        self.labels
            .write(guia, encoded)
            .map_err(|err| StepError::local(&err))
    }

    fn persist(
        &self,
        v: &Validated<'_>,
        session: &AuthSession,
        tracking_number: Option<&str>,
        snapshot: Value,
    ) -> anyhow::Result<ShipmentReceipt> {
        let client_code = v.auth.client_code_or(self.options.default_client_code);
        let client_id = self
            .store
            .upsert_client(&ClientRecord::from_sender(v, client_code))?;
        let record = ShipmentRecord::from_run(
            v,
            client_id,
            client_code,
            session.has_certificate(),
            tracking_number,
            snapshot,
        );
        self.store.insert_shipment(&record)
    }
}

/// Step-level response code (lowercase `codrespuesta`).
fn marker(response: &Value) -> Option<&str> {
    response.get("codrespuesta").and_then(Value::as_str)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Tracking number of a creation response: first entry of the result list,
/// or the result object itself.
pub fn tracking_number_of(response: &Value) -> Option<String> {
    let entity = response.get("entidadRespuesta")?;
    let first = match entity {
        Value::Array(entries) => entries.first()?,
        other => other,
    };
    first.get("numguia").and_then(scalar_text)
}

fn creation_outcome(
    response: Value,
    kind: ShipmentType,
) -> Result<(Value, Option<String>), CarrierError> {
    let guia = tracking_number_of(&response);
    if guia.is_none() && marker(&response) != Some(CREATION_PENDING) {
        let message = response
            .get("mensaje")
            .or_else(|| response.get("Mensaje"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{kind} shipment was not created: no tracking number"));
        return Err(match marker(&response) {
            Some(code) => CarrierError::from_code(code, message),
            None => CarrierError::generic(message),
        });
    }
    Ok((response, guia))
}
