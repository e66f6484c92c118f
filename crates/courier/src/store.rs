//! Local persistence of clients and created shipments.
//!
//! [`ShipmentStore`] is the persistence contract the pipeline calls at the
//! end of a run. [`FileStore`] keeps everything under one directory:
//! `clients.json` (rewritten atomically on every upsert) and
//! `shipments.jsonl` (one record appended per shipment).

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::payload::{
    ADDRESS_WIDTH, DOCUMENT_NUMBER_WIDTH, EMAIL_WIDTH, PHONE_WIDTH, Validated,
    document_type_code, truncate,
};

pub const CLIENTS_FILE: &str = "clients.json";
pub const SHIPMENTS_FILE: &str = "shipments.jsonl";

/// Carrier id of this integration in the shipment table.
pub const CARRIER_ID: i64 = 1;
/// Status of a freshly created shipment.
pub const STATUS_CREATED: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".courier"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientType {
    /// Sender unknown to the carrier.
    ClienteFinal,
    /// Sender already registered with the carrier (`remitente_id`).
    Integrador,
}

/// Client row. Unique on (document type, document number, carrier code).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub client_type: ClientType,
    pub document_type: String,
    pub document_number: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    pub carrier_client_code: i64,
}

impl ClientRecord {
    /// The sender of `request`, shaped for the fixed-width client columns.
    pub fn from_sender(request: &Validated<'_>, carrier_client_code: i64) -> Self {
        let data = request.sender_data;
        Self {
            client_type: if request.sender.existing_id.is_some() {
                ClientType::Integrador
            } else {
                ClientType::ClienteFinal
            },
            document_type: document_type_code(data.document_type.as_deref().unwrap_or_default()),
            document_number: truncate(
                data.document_number.as_deref().unwrap_or_default(),
                DOCUMENT_NUMBER_WIDTH,
            ),
            phone: truncate(data.phone().unwrap_or_default(), PHONE_WIDTH),
            email: truncate(data.email.as_deref().unwrap_or_default(), EMAIL_WIDTH),
            address: truncate(
                request.sender.full_address().unwrap_or_default(),
                ADDRESS_WIDTH,
            ),
            carrier_client_code,
        }
    }

    fn same_client(&self, other: &ClientRecord) -> bool {
        self.document_type == other.document_type
            && self.document_number == other.document_number
            && self.carrier_client_code == other.carrier_client_code
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredClient {
    pub id: i64,
    #[serde(flatten)]
    pub record: ClientRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartyRecord {
    pub name: Option<String>,
    pub address: Option<String>,
    pub city_code: Option<String>,
    pub contact: Option<String>,
    pub phone: Option<String>,
}

/// Shipment header row, with the request and step results kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRecord {
    pub client_id: i64,
    pub carrier_id: i64,
    pub internal_reference: Option<String>,
    pub has_certificate: bool,
    pub carrier_client_code: i64,
    pub sender: PartyRecord,
    pub recipient: PartyRecord,
    pub office_pickup: bool,
    pub destination_office: Option<String>,
    pub service_code: Option<String>,
    pub rate_type: Option<String>,
    pub rate_modality: Option<String>,
    pub cod_modality: Option<String>,
    pub pieces: u32,
    pub weight: f64,
    pub height: Option<f64>,
    pub width: Option<f64>,
    pub length: Option<f64>,
    pub package_kind: Option<String>,
    pub merchandise_value: f64,
    pub declared_value: f64,
    pub insured: bool,
    pub description: String,
    pub status: i64,
    pub notes: Option<String>,
    pub carrier_reference: Option<String>,
    pub tracking_number: String,
    pub request: Value,
    pub results: Value,
}

impl ShipmentRecord {
    pub fn from_run(
        request: &Validated<'_>,
        client_id: i64,
        carrier_client_code: i64,
        has_certificate: bool,
        tracking_number: Option<&str>,
        results: Value,
    ) -> Self {
        let party = |contact: &crate::request::Contact,
                     data: &crate::request::PersonalData,
                     location: &crate::request::Location| PartyRecord {
            name: data.full_name.clone(),
            address: contact.full_address().map(str::to_string),
            city_code: location.city_code().map(str::to_string),
            contact: data.contact().map(str::to_string),
            phone: data.phone().map(str::to_string),
        };
        let dimensions = request.package.dimensions.unwrap_or_default();
        let reference = request.request.request_id().map(str::to_string);

        Self {
            client_id,
            carrier_id: CARRIER_ID,
            internal_reference: reference.clone(),
            has_certificate,
            carrier_client_code,
            sender: party(request.sender, request.sender_data, request.origin),
            recipient: party(request.recipient, request.recipient_data, request.destination),
            office_pickup: request.recipient.office_pickup(),
            destination_office: request.destination.office_code().map(str::to_string),
            service_code: request.service.code.clone(),
            rate_type: request.service.rate_type.clone(),
            rate_modality: request.service.rate_modality.clone(),
            cod_modality: request.service.cod_modality.clone(),
            pieces: request.pieces(),
            weight: request.weight(),
            height: dimensions.height,
            width: dimensions.width,
            length: dimensions.length,
            package_kind: request.package.kind.clone(),
            merchandise_value: request.package.merchandise_value().unwrap_or_default(),
            declared_value: request.package.declared_value().unwrap_or_default(),
            insured: request.service.is_insured(),
            description: request.package.description.clone().unwrap_or_default(),
            status: STATUS_CREATED,
            notes: request.request.extra.as_ref().and_then(|e| e.notes.clone()),
            carrier_reference: reference,
            tracking_number: tracking_number.unwrap_or_default().to_string(),
            request: serde_json::to_value(request.request).unwrap_or(Value::Null),
            results,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredShipment {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub record: ShipmentRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentReceipt {
    pub success: bool,
    pub message: String,
    pub shipment_id: Option<i64>,
    pub tracking_number: String,
}

/// Persistence backend for the pipeline.
///
/// Implementations must make `upsert_client` atomic: concurrent upserts of
/// the same client yield one row and the same id.
pub trait ShipmentStore: Send + Sync {
    /// Insert or update a client, returning its id.
    fn upsert_client(&self, client: &ClientRecord) -> Result<i64>;

    fn insert_shipment(&self, shipment: &ShipmentRecord) -> Result<ShipmentReceipt>;
}

#[derive(Debug, Default)]
struct Tables {
    clients: Vec<StoredClient>,
    shipments: Vec<StoredShipment>,
}

impl Tables {
    fn upsert(&mut self, client: &ClientRecord) -> i64 {
        let now = Utc::now();
        if let Some(existing) = self.clients.iter_mut().find(|c| c.record.same_client(client)) {
            existing.record = client.clone();
            existing.updated_at = now;
            return existing.id;
        }
        let id = self.clients.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        self.clients.push(StoredClient {
            id,
            record: client.clone(),
            created_at: now,
            updated_at: now,
        });
        id
    }
}

fn receipt(stored: &StoredShipment) -> ShipmentReceipt {
    ShipmentReceipt {
        success: true,
        message: "shipment stored".to_string(),
        shipment_id: Some(stored.id),
        tracking_number: stored.record.tracking_number.clone(),
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clients(&self) -> Vec<StoredClient> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clients
            .clone()
    }

    pub fn shipments(&self) -> Vec<StoredShipment> {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .shipments
            .clone()
    }
}

impl ShipmentStore for MemoryStore {
    fn upsert_client(&self, client: &ClientRecord) -> Result<i64> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?;
        Ok(tables.upsert(client))
    }

    fn insert_shipment(&self, shipment: &ShipmentRecord) -> Result<ShipmentReceipt> {
        let mut tables = self
            .tables
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?;
        let stored = StoredShipment {
            id: tables.shipments.len() as i64 + 1,
            created_at: Utc::now(),
            record: shipment.clone(),
        };
        let receipt = receipt(&stored);
        tables.shipments.push(stored);
        Ok(receipt)
    }
}

/// Directory-backed store. Writers are serialised by an in-process lock.
pub struct FileStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn clients_path(&self) -> PathBuf {
        self.dir.join(CLIENTS_FILE)
    }

    pub fn shipments_path(&self) -> PathBuf {
        self.dir.join(SHIPMENTS_FILE)
    }

    pub fn load_clients(&self) -> Result<Vec<StoredClient>> {
        let path = self.clients_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read clients file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse clients JSON {}", path.display()))
    }

    pub fn load_shipments(&self) -> Result<Vec<StoredShipment>> {
        let path = self.shipments_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read shipments file {}", path.display()))?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .enumerate()
            .map(|(i, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!("failed to parse shipment line {} in {}", i + 1, path.display())
                })
            })
            .collect()
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create store dir {}", self.dir.display()))
    }
}

impl ShipmentStore for FileStore {
    fn upsert_client(&self, client: &ClientRecord) -> Result<i64> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        self.ensure_dir()?;
        let mut tables = Tables {
            clients: self.load_clients()?,
            shipments: Vec::new(),
        };
        let id = tables.upsert(client);
        atomic_write_json(&self.clients_path(), &tables.clients)?;
        Ok(id)
    }

    fn insert_shipment(&self, shipment: &ShipmentRecord) -> Result<ShipmentReceipt> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("store lock poisoned"))?;
        self.ensure_dir()?;
        let stored = StoredShipment {
            id: self.load_shipments()?.len() as i64 + 1,
            created_at: Utc::now(),
            record: shipment.clone(),
        };

        let path = self.shipments_path();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open shipments file {}", path.display()))?;
        let line = serde_json::to_string(&stored).context("failed to serialize shipment")?;
        writeln!(file, "{line}").context("failed to write shipment line")?;
        file.sync_all().ok();

        Ok(receipt(&stored))
    }
}

/// Replace `path` with the JSON form of `value`. The new content is written
/// beside it and renamed into place, so readers see the old table or the new
/// one, never a partial write.
fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let staged = path.with_extension("json.tmp");
    let data =
        serde_json::to_vec_pretty(value).with_context(|| format!("failed to serialize {name}"))?;

    let mut file = fs::File::create(&staged)
        .with_context(|| format!("failed to stage {name} at {}", staged.display()))?;
    file.write_all(&data)
        .with_context(|| format!("failed to write staged {name}"))?;
    file.sync_all().ok();
    drop(file);

    fs::rename(&staged, path)
        .with_context(|| format!("failed to replace {} with staged copy", path.display()))?;

    // Persist the rename itself.
    if let Some(dir) = path.parent().and_then(|p| fs::File::open(p).ok()) {
        dir.sync_all().ok();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::payload::validate;
    use crate::request::ShipmentRequest;

    fn client(number: &str, code: i64) -> ClientRecord {
        ClientRecord {
            client_type: ClientType::ClienteFinal,
            document_type: "V".into(),
            document_number: number.into(),
            phone: "04141234567".into(),
            email: "ana@example.com".into(),
            address: "Av. Principal".into(),
            carrier_client_code: code,
        }
    }

    fn request() -> ShipmentRequest {
        serde_json::from_value(json!({
            "metadata": {"solicitud_id": "SOL-9"},
            "autenticacion_zoom": {"login": "u", "clave": "p"},
            "configuracion_envio": {"tipo_envio": "nacional"},
            "servicio": {"codservicio": 31},
            "ubicacion_origen": {"ciudad": {"codciudad": 19}},
            "ubicacion_destino": {"ciudad": {"codciudad": 8}},
            "remitente": {
                "remitente_id": "R-1",
                "datos_personales": {
                    "nombre_completo": "Ana",
                    "tipo_documento": "V-",
                    "numero_documento": "123456789012",
                    "telefono_fijo": "0212-555-0000-1234",
                    "email": format!("{}@example.com", "a".repeat(60))
                },
                "direccion": {"direccion_completa": "x".repeat(250)}
            },
            "destinatario": {"datos_personales": {"nombre_completo": "Luis", "numero_documento": "456"}},
            "paquete": {"peso_total": 1.2, "numero_piezas": 1}
        }))
        .expect("parse")
    }

    #[test]
    fn client_record_truncates_fixed_width_columns() {
        let request = request();
        let record = ClientRecord::from_sender(&validate(&request).expect("valid"), 407940);
        assert_eq!(record.client_type, ClientType::Integrador);
        assert_eq!(record.document_type, "V");
        assert_eq!(record.document_number, "1234567890");
        assert_eq!(record.phone, "0212-555-0000-");
        assert_eq!(record.email.chars().count(), 50);
        assert_eq!(record.address.chars().count(), 200);
    }

    #[test]
    fn shipment_record_embeds_request_and_results() {
        let request = request();
        let validated = validate(&request).expect("valid");
        let record = ShipmentRecord::from_run(
            &validated,
            3,
            407940,
            false,
            Some("1234567"),
            json!({"envio": {"ok": true}}),
        );
        assert_eq!(record.client_id, 3);
        assert_eq!(record.internal_reference.as_deref(), Some("SOL-9"));
        assert_eq!(record.tracking_number, "1234567");
        assert_eq!(record.status, STATUS_CREATED);
        assert_eq!(record.request["metadata"]["solicitud_id"], "SOL-9");
        assert_eq!(record.results["envio"]["ok"], true);
        assert_eq!(record.sender.contact.as_deref(), Some("Ana"));
    }

    #[test]
    fn memory_store_upsert_is_keyed_by_document_and_code() {
        let store = MemoryStore::new();
        let first = store.upsert_client(&client("123", 407940)).expect("upsert");
        let again = store.upsert_client(&client("123", 407940)).expect("upsert");
        let other_code = store.upsert_client(&client("123", 1)).expect("upsert");
        assert_eq!(first, again);
        assert_ne!(first, other_code);
        assert_eq!(store.clients().len(), 2);
    }

    #[test]
    fn file_store_upsert_updates_in_place() {
        let td = tempdir().expect("tempdir");
        let store = FileStore::new(td.path().join("state"));

        let id = store.upsert_client(&client("123", 407940)).expect("upsert");
        let mut changed = client("123", 407940);
        changed.phone = "02125550000".into();
        assert_eq!(store.upsert_client(&changed).expect("upsert"), id);

        let clients = store.load_clients().expect("load");
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].record.phone, "02125550000");
        assert!(!store.dir().join("clients.json.tmp").exists());
    }

    #[test]
    fn failed_client_write_names_the_file_and_keeps_the_old_table() {
        let td = tempdir().expect("tempdir");
        let store = FileStore::new(td.path().to_path_buf());
        store.upsert_client(&client("123", 407940)).expect("upsert");
        fs::create_dir(store.dir().join("clients.json.tmp")).expect("block staging path");

        let err = store
            .upsert_client(&client("456", 407940))
            .expect_err("staging blocked");

        assert!(format!("{err:#}").contains("failed to stage clients.json"));
        let clients = store.load_clients().expect("load");
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0].record.document_number, "123");
    }

    #[test]
    fn memory_readers_see_data_after_a_panicking_writer() {
        let store = Arc::new(MemoryStore::new());
        store.upsert_client(&client("123", 407940)).expect("upsert");
        let holder = Arc::clone(&store);
        let _ = thread::spawn(move || {
            let _tables = holder.tables.lock().expect("lock");
            panic!("writer died holding the lock");
        })
        .join();

        assert!(store.tables.is_poisoned());
        assert_eq!(store.clients().len(), 1);
        assert!(store.shipments().is_empty());
    }

    #[test]
    fn file_store_appends_shipments() {
        let td = tempdir().expect("tempdir");
        let store = FileStore::new(td.path().to_path_buf());
        let request = request();
        let record = ShipmentRecord::from_run(
            &validate(&request).expect("valid"),
            1,
            407940,
            true,
            Some("G-1"),
            Value::Null,
        );

        let first = store.insert_shipment(&record).expect("insert");
        let second = store.insert_shipment(&record).expect("insert");
        assert_eq!(first.shipment_id, Some(1));
        assert_eq!(second.shipment_id, Some(2));
        assert_eq!(second.tracking_number, "G-1");

        let stored = store.load_shipments().expect("load");
        assert_eq!(stored.len(), 2);
        assert!(stored[0].record.has_certificate);
    }

    #[test]
    fn concurrent_upserts_of_same_client_yield_one_row() {
        let td = tempdir().expect("tempdir");
        let store = Arc::new(FileStore::new(td.path().to_path_buf()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.upsert_client(&client("999", 407940)).expect("upsert"))
            })
            .collect();
        let ids: Vec<i64> = handles
            .into_iter()
            .map(|h| h.join().expect("join"))
            .collect();

        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(store.load_clients().expect("load").len(), 1);
    }
}
