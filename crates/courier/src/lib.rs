//! # Courier
//!
//! Shipment creation against the Zoom carrier API, with a resilient client
//! underneath every remote call.
//!
//! ## Pipeline
//!
//! [`pipeline::Orchestrator::run`] takes a typed [`request::ShipmentRequest`]
//! and drives ten steps in order:
//!
//! 1. `structure_validation` ([`payload::validate`])
//! 2. `authentication` (session token, optional certificate)
//! 3. `service_validation`
//! 4. `tariff_calculation` (one shape per [`variant::ShipmentType`])
//! 5. `sender_registration`
//! 6. `recipient_registration`
//! 7. `shipment_creation`
//! 8. `tracking_retrieval`
//! 9. `label_generation` ([`label::LabelWriter`])
//! 10. `persistence` ([`store::ShipmentStore`])
//!
//! Steps soft-fail: each records a [`pipeline::StepOutcome`] and the run
//! continues. Steps whose prerequisites did not succeed are skipped under
//! the default [`pipeline::DependencyPolicy::Skip`]. Callers read
//! [`pipeline::PipelineResult::ok`] and the `errores` list, not the exit
//! status.
//!
//! ## Remote calls
//!
//! [`client::CarrierClient::invoke`] owns header selection, request
//! signing, retry with exponential backoff on transport faults, and the
//! mapping of carrier response codes onto [`error::ErrorKind`]. The HTTP
//! stack sits behind the [`transport::Transport`] trait.
//!
//! ## Example
//!
//! ```ignore
//! use courier::{CarrierClient, CourierConfig, FileStore, Orchestrator, NullReporter};
//!
//! let config = CourierConfig::load(None)?;
//! let client = CarrierClient::new(&config)?;
//! let store = FileStore::new(config.store.dir.clone());
//! let orchestrator = Orchestrator::new(&client, &store, config.labels.clone(), config.pipeline.clone());
//!
//! let request = serde_json::from_str(&std::fs::read_to_string("envio.json")?)?;
//! let result = orchestrator.run(&request, &mut NullReporter);
//! println!("{}", serde_json::to_string_pretty(&result)?);
//! ```

#![recursion_limit = "256"]

pub mod auth;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod label;
pub mod partner;
pub mod payload;
pub mod pipeline;
pub mod quote;
pub mod report;
pub mod request;
pub mod route;
pub mod signing;
pub mod store;
pub mod transport;
pub mod variant;

pub use client::{CarrierCall, CarrierClient, QueryParams};
pub use config::CourierConfig;
pub use envelope::Envelope;
pub use error::{CarrierError, ErrorKind};
pub use pipeline::{Orchestrator, PipelineResult, StepName};
pub use report::{NullReporter, Reporter};
pub use request::ShipmentRequest;
pub use store::{FileStore, MemoryStore, ShipmentStore};
