//! Shipment types and their carrier call shapes.
//!
//! Each [`ShipmentType`] has one [`ShipmentVariant`] handler that knows how
//! to price and create that kind of shipment. The pipeline never branches on
//! the type itself.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::auth::AuthSession;
use crate::client::{CarrierCall, QueryParams};
use crate::error::CarrierError;
use crate::payload::Validated;
use crate::quote::{InternationalQuote, LockerQuote, PostalArea, PriceQuote};
use crate::request::code_value;
use crate::route::{AuthMode, Route};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentType {
    National,
    International,
    LockerAir,
    LockerSea,
}

impl ShipmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ShipmentType::National => "national",
            ShipmentType::International => "international",
            ShipmentType::LockerAir => "locker_air",
            ShipmentType::LockerSea => "locker_sea",
        }
    }

    /// Service code sent to the international creation endpoint.
    pub fn international_service_code(self) -> u32 {
        match self {
            ShipmentType::International => 3,
            ShipmentType::LockerAir => 4,
            ShipmentType::LockerSea => 5,
            ShipmentType::National => 99,
        }
    }

    pub fn handler(self) -> &'static dyn ShipmentVariant {
        match self {
            ShipmentType::National => &NationalShipment,
            ShipmentType::International => &InternationalShipment,
            ShipmentType::LockerAir => &LockerAirShipment,
            ShipmentType::LockerSea => &LockerSeaShipment,
        }
    }
}

impl fmt::Display for ShipmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentType {
    type Err = CarrierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nacional" | "national" => Ok(ShipmentType::National),
            "internacional" | "international" => Ok(ShipmentType::International),
            "casillero_aereo" | "locker_air" => Ok(ShipmentType::LockerAir),
            "casillero_maritimo" | "locker_sea" => Ok(ShipmentType::LockerSea),
            _ => Err(CarrierError::invalid_parameters(format!(
                "unsupported shipment type: {s}"
            ))),
        }
    }
}

pub trait ShipmentVariant: Sync {
    /// Tariff lookup for this kind of shipment. Fails before any call when a
    /// required input is missing.
    fn tariff_call(
        &self,
        request: &Validated<'_>,
        today: NaiveDate,
    ) -> Result<CarrierCall, CarrierError>;

    fn creation_call(&self, request: &Validated<'_>, session: &AuthSession) -> CarrierCall;
}

pub struct NationalShipment;
pub struct InternationalShipment;
pub struct LockerAirShipment;
pub struct LockerSeaShipment;

impl ShipmentVariant for NationalShipment {
    fn tariff_call(
        &self,
        r: &Validated<'_>,
        _today: NaiveDate,
    ) -> Result<CarrierCall, CarrierError> {
        let mut q = QueryParams::new();
        q.push_opt("tipo_tarifa", r.service.rate_type.as_ref())
            .push_opt("modalidad_tarifa", r.service.rate_modality.as_ref())
            .push_opt("ciudad_remitente", r.origin.city_code())
            .push_opt("ciudad_destinatario", r.destination.city_code());
        if r.recipient.office_pickup() {
            let office = r
                .destination
                .office_code()
                .ok_or_else(|| CarrierError::missing("ubicacion_destino.oficina.codoficina"))?;
            q.push("oficina_retirar", office);
        }
        q.push("cantidad_piezas", r.pieces())
            .push("peso", r.weight())
            .push_opt("valor_mercancia", r.package.merchandise_value())
            .push_opt("valor_declarado", r.package.declared_value())
            .push_opt("codpais", r.origin.country_code())
            .push("tipo_envio", "0")
            .push_opt("zona_postal", r.origin.postal_code());
        if let Some(d) = r.package.dimensions {
            q.push_opt("alto", d.height)
                .push_opt("ancho", d.width)
                .push_opt("largo", d.length);
        }
        Ok(CarrierCall::get(Route::CalculateTariff).query(q))
    }

    fn creation_call(&self, r: &Validated<'_>, session: &AuthSession) -> CarrierCall {
        let sender = r.sender_data;
        let recipient = r.recipient_data;
        let notes = r.request.notes();
        let body = json!({
            "login": r.login(),
            "clave": r.secret(),
            "codservicio": code_value(r.service_code()),
            "remitente": sender.full_name,
            "contacto_remitente": sender.contact(),
            "codciudadrem": r.origin.city_code().map(code_value),
            "tiporifcirem": sender.document_type,
            "cirifrem": sender.document_number,
            "codmunicipiorem": r.origin.municipality_code().map(code_value),
            "codparroquiarem": r.origin.parish_code().map(code_value),
            "zona_postal_remitente": r.sender.postal_zone(),
            "telefono_remitente": sender.fixed_phone(),
            "codcelurem": sender.mobile_prefix(),
            "celularrem": sender.mobile_local(),
            "direccion_remitente": r.sender.full_address(),
            "inmueble_remitente": r.sender.building(),
            "retira_oficina": flag(r.recipient.office_pickup()),
            "codciudaddes": r.destination.city_code().map(code_value),
            "destinatario": recipient.full_name,
            "codmunicipiodes": r.destination.municipality_code().map(code_value),
            "codparroquiades": r.destination.parish_code().map(code_value),
            "zona_postal_destino": r.recipient.postal_zone().unwrap_or_default(),
            "codoficinades": r.destination.office_code().map(code_value),
            "contacto_destino": recipient.contact(),
            "tiporifcidest": recipient.document_type,
            "cirif_destinatario": recipient.document_number,
            "codceludest": recipient.mobile_prefix(),
            "celular": recipient.mobile_local(),
            "telefono_destino": recipient.fixed_phone(),
            "direccion_destino": r.recipient.full_address(),
            "inmueble_destino": r.recipient.building(),
            "descripcion_contenido": r.package.description,
            "referencia": r.package.client_reference(),
            "numero_piezas": r.pieces(),
            "campo1": notes,
            "campo2": notes,
            "campo3": notes,
            "peso_bruto": r.weight(),
            "tipo_envio": r.package.kind,
            "valor_declarado": r.package.declared_value(),
            "seguro": flag(r.service.is_insured()),
            "valor_mercancia": r.package.merchandise_value(),
            "modalidad_cod": r.service.cod_modality.as_deref().map_or(json!(0), code_value),
            "codigo_casillero": r.request.locker_code.as_deref().unwrap_or_default(),
            "siglas_casillero": r.request.locker_prefix.as_deref().unwrap_or_default(),
            "web_services": 1,
        });
        CarrierCall::post(Route::CreateShipment, compact(body))
            .auth(AuthMode::SessionToken(session.token.clone()))
    }
}

impl ShipmentVariant for InternationalShipment {
    fn tariff_call(
        &self,
        r: &Validated<'_>,
        today: NaiveDate,
    ) -> Result<CarrierCall, CarrierError> {
        let required = |value: Option<&str>, path: &str| {
            value
                .map(str::to_string)
                .ok_or_else(|| CarrierError::missing(path))
        };
        let dimensions = r
            .package
            .full_dimensions()
            .ok_or_else(|| CarrierError::missing("paquete.dimensiones"))?;
        let quote = InternationalQuote {
            weight: r.weight(),
            ship_date: today,
            destination_iso: required(
                r.destination.country_iso(),
                "ubicacion_destino.pais.siglas_pais",
            )?,
            destination_city: required(
                r.destination.city_name(),
                "ubicacion_destino.ciudad.nombre",
            )?,
            origin_iso: required(r.origin.country_iso(), "ubicacion_origen.pais.siglas_pais")?,
            origin_city: required(r.origin.city_name(), "ubicacion_origen.ciudad.nombre")?,
            declared_value: r.package.declared_value().unwrap_or_default(),
            merchandise: r.package.kind.as_deref() == Some("M"),
            origin_city_code: required(r.origin.city_code(), "ubicacion_origen.ciudad.codciudad")?,
            dimensions,
            destination_area: postal_area(r.destination),
            origin_area: postal_area(r.origin),
        };
        Ok(PriceQuote::international(quote)?.to_call())
    }

    fn creation_call(&self, r: &Validated<'_>, session: &AuthSession) -> CarrierCall {
        international_creation(ShipmentType::International, r, session)
    }
}

impl ShipmentVariant for LockerAirShipment {
    fn tariff_call(
        &self,
        r: &Validated<'_>,
        _today: NaiveDate,
    ) -> Result<CarrierCall, CarrierError> {
        Ok(PriceQuote::locker_air(locker_quote(r, None)?)?.to_call())
    }

    fn creation_call(&self, r: &Validated<'_>, session: &AuthSession) -> CarrierCall {
        international_creation(ShipmentType::LockerAir, r, session)
    }
}

impl ShipmentVariant for LockerSeaShipment {
    fn tariff_call(
        &self,
        r: &Validated<'_>,
        _today: NaiveDate,
    ) -> Result<CarrierCall, CarrierError> {
        let quote = locker_quote(r, r.package.full_dimensions())?;
        Ok(PriceQuote::locker_sea(quote)?.to_call())
    }

    fn creation_call(&self, r: &Validated<'_>, session: &AuthSession) -> CarrierCall {
        international_creation(ShipmentType::LockerSea, r, session)
    }
}

fn postal_area(location: &crate::request::Location) -> PostalArea {
    PostalArea {
        zipcode: location.postal_code().map(str::to_string),
        suburb: location.suburb().map(str::to_string),
    }
}

fn locker_quote(
    r: &Validated<'_>,
    dimensions: Option<(f64, f64, f64)>,
) -> Result<LockerQuote, CarrierError> {
    Ok(LockerQuote {
        origin_country: r
            .origin
            .country_code()
            .ok_or_else(|| CarrierError::missing("ubicacion_origen.pais.codpais"))?
            .to_string(),
        destination_country: r
            .destination
            .country_code()
            .ok_or_else(|| CarrierError::missing("ubicacion_destino.pais.codpais"))?
            .to_string(),
        office_pickup: r.recipient.office_pickup(),
        weight: r.weight(),
        merchandise_value: r.package.merchandise_value().unwrap_or_default(),
        destination_city: r.destination.city_code().map(str::to_string),
        dimensions,
    })
}

fn international_creation(
    kind: ShipmentType,
    r: &Validated<'_>,
    session: &AuthSession,
) -> CarrierCall {
    let sender = r.sender_data;
    let recipient = r.recipient_data;
    let pickup = r.recipient.office_pickup();
    let mut body = json!({
        "login": r.login(),
        "clave": r.secret(),
        "certificado": session.certificate.clone().unwrap_or_else(|| json!("")),
        "codservicio": kind.international_service_code(),
        "remitente": sender.full_name,
        "contacto_remitente": sender.contact(),
        "telefono_remitente": sender.fixed_phone(),
        "direccion_remitente": r.sender.full_address(),
        "codpaisdes": r.destination.country_code().map(code_value),
        "ciudaddes": r.destination.city_name(),
        "destinatario": recipient.full_name,
        "contacto_destino": recipient.contact(),
        "rif_ci_destinatario": recipient.document(),
        "telefono_destino": recipient.fixed_phone(),
        "direcciondes": r.recipient.full_address(),
        "tipo_envio": r.package.kind,
        "numero_piezas": r.pieces(),
        "peso_bruto": r.weight(),
        "valor_declarado": r.package.declared_value(),
        "descripcion_contenido": r.package.description,
        "web_services": 1,
        "retira_oficina": flag(pickup),
        "seguro": flag(r.service.is_insured()),
    });
    if let (Some(d), Some(fields)) = (r.package.dimensions, body.as_object_mut()) {
        fields.insert("alto".into(), json!(d.height));
        fields.insert("ancho".into(), json!(d.width));
        fields.insert("largo".into(), json!(d.length));
    }
    if pickup
        && let (Some(office), Some(fields)) = (r.destination.office_code(), body.as_object_mut())
    {
        fields.insert("codoficinades".into(), code_value(office));
    }
    CarrierCall::post(Route::CreateInternationalShipment, compact(body))
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

/// Drop top-level nulls so absent optional fields are not sent.
pub(crate) fn compact(mut body: Value) -> Value {
    if let Some(fields) = body.as_object_mut() {
        fields.retain(|_, v| !v.is_null());
    }
    body
}
