//! Boundary validation and persisted-field shaping.
//!
//! [`validate`] checks the structural preconditions of a
//! [`ShipmentRequest`] once and hands back a [`Validated`] view whose
//! required blocks are guaranteed present. The first problem found is
//! reported with the wire path of the offending field.

use crate::error::CarrierError;
use crate::request::{
    CarrierAuth, Contact, Location, Package, PersonalData, Service, ShipmentRequest,
    ShipmentSettings,
};
use crate::variant::ShipmentType;

pub const DOCUMENT_NUMBER_WIDTH: usize = 10;
pub const PHONE_WIDTH: usize = 14;
pub const EMAIL_WIDTH: usize = 50;
pub const ADDRESS_WIDTH: usize = 200;

/// A request whose required blocks and fields are known to be present.
#[derive(Debug, Clone, Copy)]
pub struct Validated<'a> {
    pub request: &'a ShipmentRequest,
    pub shipment_type: ShipmentType,
    pub auth: &'a CarrierAuth,
    pub settings: &'a ShipmentSettings,
    pub service: &'a Service,
    pub origin: &'a Location,
    pub destination: &'a Location,
    pub sender: &'a Contact,
    pub sender_data: &'a PersonalData,
    pub recipient: &'a Contact,
    pub recipient_data: &'a PersonalData,
    pub package: &'a Package,
}

impl Validated<'_> {
    pub fn login(&self) -> &str {
        self.auth.login.as_deref().unwrap_or_default()
    }

    pub fn secret(&self) -> &str {
        self.auth.secret.as_deref().unwrap_or_default()
    }

    pub fn service_code(&self) -> &str {
        self.service.code.as_deref().unwrap_or_default()
    }

    pub fn weight(&self) -> f64 {
        self.package.weight.unwrap_or_default()
    }

    pub fn pieces(&self) -> u32 {
        self.package.pieces.unwrap_or(1)
    }
}

fn block<'a, T>(value: &'a Option<T>, path: &str) -> Result<&'a T, CarrierError> {
    value.as_ref().ok_or_else(|| CarrierError::missing(path))
}

fn field<T>(value: Option<T>, path: &str) -> Result<T, CarrierError> {
    value.ok_or_else(|| CarrierError::missing(path))
}

/// Check the request and return a typed view of it.
pub fn validate(request: &ShipmentRequest) -> Result<Validated<'_>, CarrierError> {
    let auth = block(&request.auth, "autenticacion_zoom")?;
    let settings = block(&request.settings, "configuracion_envio")?;
    let service = block(&request.service, "servicio")?;
    let origin = block(&request.origin, "ubicacion_origen")?;
    let destination = block(&request.destination, "ubicacion_destino")?;
    let sender = block(&request.sender, "remitente")?;
    let recipient = block(&request.recipient, "destinatario")?;
    let package = block(&request.package, "paquete")?;

    field(auth.login.as_ref(), "autenticacion_zoom.login")?;
    field(auth.secret.as_ref(), "autenticacion_zoom.clave")?;

    let raw_type = field(
        settings.shipment_type.as_deref(),
        "configuracion_envio.tipo_envio",
    )?;
    let shipment_type = raw_type.parse::<ShipmentType>()?;

    field(service.code.as_ref(), "servicio.codservicio")?;
    field(origin.city_code(), "ubicacion_origen.ciudad.codciudad")?;
    field(destination.city_code(), "ubicacion_destino.ciudad.codciudad")?;

    let sender_data = field(sender.personal.as_ref(), "remitente.datos_personales")?;
    field(
        sender_data.full_name.as_ref(),
        "remitente.datos_personales.nombre_completo",
    )?;
    field(
        sender_data.document_number.as_ref(),
        "remitente.datos_personales.numero_documento",
    )?;
    let recipient_data = field(recipient.personal.as_ref(), "destinatario.datos_personales")?;
    field(
        recipient_data.full_name.as_ref(),
        "destinatario.datos_personales.nombre_completo",
    )?;
    field(
        recipient_data.document_number.as_ref(),
        "destinatario.datos_personales.numero_documento",
    )?;

    field(package.weight, "paquete.peso_total")?;
    field(package.pieces, "paquete.numero_piezas")?;

    Ok(Validated {
        request,
        shipment_type,
        auth,
        settings,
        service,
        origin,
        destination,
        sender,
        sender_data,
        recipient,
        recipient_data,
        package,
    })
}

/// At most `width` characters of `value`.
pub fn truncate(value: &str, width: usize) -> String {
    value.chars().take(width).collect()
}

/// Single-character document type column: `"V-"` becomes `"V"`.
pub fn document_type_code(raw: &str) -> String {
    truncate(raw.trim(), 1)
}
