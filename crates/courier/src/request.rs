//! Typed shipment request.
//!
//! Wire keys follow the merchant contract (`autenticacion_zoom`, `remitente`,
//! ...). Every block and leaf is optional at this layer so a malformed
//! request still parses and [`crate::payload::validate`] can name the first
//! missing field. Scalars are coerced loosely: codes may arrive as numbers or
//! strings, weights as numeric strings, flags as `"1"`/`"si"`/`true`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

pub(crate) mod loose {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => {
                let s = s.trim();
                Ok((!s.is_empty()).then(|| s.to_string()))
            }
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(other) => Err(D::Error::custom(format!("expected text, got {other}"))),
        }
    }

    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s
                .trim()
                .replace(',', ".")
                .parse::<f64>()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("expected a number, got '{s}'"))),
            Some(other) => Err(D::Error::custom(format!("expected a number, got {other}"))),
        }
    }

    pub fn count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
        match number(d)? {
            None => Ok(None),
            Some(n) if n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX) => {
                Ok(Some(n as u32))
            }
            Some(n) => Err(D::Error::custom(format!(
                "expected a whole non-negative count, got {n}"
            ))),
        }
    }

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(b)),
            Some(Value::Number(n)) => Ok(Some(n.as_f64().is_some_and(|n| n != 0.0))),
            Some(Value::String(s)) => Ok(Some(matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "si" | "sí" | "s" | "yes" | "y" | "on"
            ))),
            Some(other) => Err(D::Error::custom(format!("expected a flag, got {other}"))),
        }
    }
}

/// Carrier codes travel as JSON numbers when they look like integers.
pub fn code_value(code: &str) -> Value {
    code.parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::String(code.to_string()))
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipmentRequest {
    pub metadata: Option<Metadata>,
    #[serde(rename = "autenticacion_zoom")]
    pub auth: Option<CarrierAuth>,
    #[serde(rename = "configuracion_envio")]
    pub settings: Option<ShipmentSettings>,
    #[serde(rename = "servicio")]
    pub service: Option<Service>,
    #[serde(rename = "ubicacion_origen")]
    pub origin: Option<Location>,
    #[serde(rename = "ubicacion_destino")]
    pub destination: Option<Location>,
    #[serde(rename = "remitente")]
    pub sender: Option<Contact>,
    #[serde(rename = "destinatario")]
    pub recipient: Option<Contact>,
    #[serde(rename = "paquete")]
    pub package: Option<Package>,
    #[serde(rename = "informacion_adicional")]
    pub extra: Option<AdditionalInfo>,
    #[serde(rename = "casillero_codigo", default, deserialize_with = "loose::string")]
    pub locker_code: Option<String>,
    #[serde(rename = "casillero_siglas", default, deserialize_with = "loose::string")]
    pub locker_prefix: Option<String>,
}

impl ShipmentRequest {
    pub fn request_id(&self) -> Option<&str> {
        self.metadata.as_ref()?.request_id.as_deref()
    }

    pub fn notes(&self) -> &str {
        self.extra
            .as_ref()
            .and_then(|e| e.notes.as_deref())
            .unwrap_or_default()
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    #[serde(rename = "solicitud_id", default, deserialize_with = "loose::string")]
    pub request_id: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CarrierAuth {
    #[serde(default, deserialize_with = "loose::string")]
    pub login: Option<String>,
    #[serde(rename = "clave", default, deserialize_with = "loose::string")]
    pub secret: Option<String>,
    #[serde(rename = "frase_secreta", default, deserialize_with = "loose::string")]
    pub passphrase: Option<String>,
    #[serde(rename = "codigo_cliente", default, deserialize_with = "loose::number")]
    pub client_code: Option<f64>,
    #[serde(rename = "cliente_id", default, deserialize_with = "loose::string")]
    pub user_id: Option<String>,
}

impl CarrierAuth {
    /// Carrier client code, or `fallback` when absent or not a whole number.
    pub fn client_code_or(&self, fallback: i64) -> i64 {
        self.client_code
            .filter(|c| c.fract() == 0.0)
            .map(|c| c as i64)
            .unwrap_or(fallback)
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShipmentSettings {
    #[serde(rename = "tipo_envio", default, deserialize_with = "loose::string")]
    pub shipment_type: Option<String>,
    #[serde(rename = "validar_servicios", default, deserialize_with = "loose::flag")]
    pub validate_service: Option<bool>,
    #[serde(rename = "requerir_tarifa_valida", default, deserialize_with = "loose::flag")]
    pub require_valid_tariff: Option<bool>,
    #[serde(rename = "generar_etiqueta", default, deserialize_with = "loose::flag")]
    pub generate_label: Option<bool>,
    #[serde(rename = "requerir_certificado", default, deserialize_with = "loose::flag")]
    pub require_certificate: Option<bool>,
}

impl ShipmentSettings {
    pub fn validates_service(&self) -> bool {
        self.validate_service.unwrap_or(true)
    }

    pub fn requires_valid_tariff(&self) -> bool {
        self.require_valid_tariff.unwrap_or(true)
    }

    pub fn generates_label(&self) -> bool {
        self.generate_label.unwrap_or(true)
    }

    pub fn requires_certificate(&self) -> bool {
        self.require_certificate.unwrap_or(false)
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "codservicio", default, deserialize_with = "loose::string")]
    pub code: Option<String>,
    #[serde(rename = "tipo_tarifa", default, deserialize_with = "loose::string")]
    pub rate_type: Option<String>,
    #[serde(rename = "modalidad_tarifa", default, deserialize_with = "loose::string")]
    pub rate_modality: Option<String>,
    #[serde(rename = "modalidad_cod", default, deserialize_with = "loose::string")]
    pub cod_modality: Option<String>,
    #[serde(rename = "seguro", default, deserialize_with = "loose::flag")]
    pub insured: Option<bool>,
}

impl Service {
    pub fn is_insured(&self) -> bool {
        self.insured.unwrap_or(false)
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "pais")]
    pub country: Option<Country>,
    #[serde(rename = "estado")]
    pub state: Option<Region>,
    #[serde(rename = "ciudad")]
    pub city: Option<City>,
    #[serde(rename = "oficina")]
    pub office: Option<Office>,
    #[serde(rename = "municipio")]
    pub municipality: Option<Municipality>,
    #[serde(rename = "parroquia")]
    pub parish: Option<Parish>,
}

impl Location {
    pub fn city_code(&self) -> Option<&str> {
        self.city.as_ref()?.code.as_deref()
    }

    pub fn city_name(&self) -> Option<&str> {
        self.city.as_ref()?.name.as_deref()
    }

    pub fn postal_code(&self) -> Option<&str> {
        self.city.as_ref()?.postal_code.as_deref()
    }

    pub fn suburb(&self) -> Option<&str> {
        self.city.as_ref()?.suburb.as_deref()
    }

    pub fn country_code(&self) -> Option<&str> {
        self.country.as_ref()?.code.as_deref()
    }

    pub fn country_iso(&self) -> Option<&str> {
        self.country.as_ref()?.iso.as_deref()
    }

    pub fn office_code(&self) -> Option<&str> {
        self.office.as_ref()?.code.as_deref()
    }

    pub fn municipality_code(&self) -> Option<&str> {
        self.municipality.as_ref()?.code.as_deref()
    }

    pub fn parish_code(&self) -> Option<&str> {
        self.parish.as_ref()?.code.as_deref()
    }

    pub fn state_name(&self) -> Option<&str> {
        self.state.as_ref()?.name.as_deref()
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Country {
    #[serde(rename = "codpais", default, deserialize_with = "loose::string")]
    pub code: Option<String>,
    #[serde(rename = "siglas_pais", default, deserialize_with = "loose::string")]
    pub iso: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Region {
    #[serde(rename = "nombre", default, deserialize_with = "loose::string")]
    pub name: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct City {
    #[serde(rename = "codciudad", default, deserialize_with = "loose::string")]
    pub code: Option<String>,
    #[serde(rename = "nombre", default, deserialize_with = "loose::string")]
    pub name: Option<String>,
    #[serde(rename = "codpostal", default, deserialize_with = "loose::string")]
    pub postal_code: Option<String>,
    #[serde(
        rename = "suburbio",
        alias = "suburb",
        default,
        deserialize_with = "loose::string"
    )]
    pub suburb: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Office {
    #[serde(rename = "codoficina", default, deserialize_with = "loose::string")]
    pub code: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Municipality {
    #[serde(rename = "codmunicipio", default, deserialize_with = "loose::string")]
    pub code: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parish {
    #[serde(rename = "codparroquia", default, deserialize_with = "loose::string")]
    pub code: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(
        rename = "remitente_id",
        alias = "destinatario_id",
        default,
        deserialize_with = "loose::string"
    )]
    pub existing_id: Option<String>,
    #[serde(rename = "datos_personales")]
    pub personal: Option<PersonalData>,
    #[serde(rename = "direccion")]
    pub address: Option<Address>,
    #[serde(rename = "configuracion")]
    pub settings: Option<ContactSettings>,
}

impl Contact {
    pub fn office_pickup(&self) -> bool {
        self.settings
            .as_ref()
            .and_then(|s| s.office_pickup)
            .unwrap_or(false)
    }

    pub fn ipostel_city(&self) -> Option<&str> {
        self.settings.as_ref()?.ipostel_city.as_deref()
    }

    pub fn full_address(&self) -> Option<&str> {
        self.address.as_ref()?.full_address.as_deref()
    }

    pub fn building(&self) -> Option<&str> {
        self.address.as_ref()?.building.as_deref()
    }

    pub fn postal_zone(&self) -> Option<&str> {
        self.address.as_ref()?.postal_zone.as_deref()
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonalData {
    #[serde(rename = "nombre_completo", default, deserialize_with = "loose::string")]
    pub full_name: Option<String>,
    #[serde(rename = "tipo_documento", default, deserialize_with = "loose::string")]
    pub document_type: Option<String>,
    #[serde(rename = "numero_documento", default, deserialize_with = "loose::string")]
    pub document_number: Option<String>,
    #[serde(rename = "contacto", default, deserialize_with = "loose::string")]
    pub contact_name: Option<String>,
    #[serde(rename = "telefono_movil", default, deserialize_with = "loose::string")]
    pub mobile: Option<String>,
    #[serde(rename = "telefono_fijo", default, deserialize_with = "loose::string")]
    pub landline: Option<String>,
    #[serde(default, deserialize_with = "loose::string")]
    pub email: Option<String>,
}

impl PersonalData {
    /// Contact person, falling back to the full name.
    pub fn contact(&self) -> Option<&str> {
        self.contact_name.as_deref().or(self.full_name.as_deref())
    }

    /// Mobile first, then landline.
    pub fn phone(&self) -> Option<&str> {
        self.mobile.as_deref().or(self.landline.as_deref())
    }

    /// Landline first, then mobile. The creation endpoints want a fixed line.
    pub fn fixed_phone(&self) -> Option<&str> {
        self.landline.as_deref().or(self.mobile.as_deref())
    }

    /// Document type and number joined, e.g. `V12345678`.
    pub fn document(&self) -> String {
        format!(
            "{}{}",
            self.document_type.as_deref().unwrap_or_default(),
            self.document_number.as_deref().unwrap_or_default()
        )
    }

    /// Mobile operator prefix (first four characters).
    pub fn mobile_prefix(&self) -> String {
        self.mobile
            .as_deref()
            .map(|m| m.chars().take(4).collect())
            .unwrap_or_default()
    }

    /// Mobile subscriber number (last seven characters).
    pub fn mobile_local(&self) -> String {
        self.mobile
            .as_deref()
            .map(|m| {
                let chars: Vec<char> = m.chars().collect();
                chars[chars.len().saturating_sub(7)..].iter().collect()
            })
            .unwrap_or_default()
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Address {
    #[serde(rename = "direccion_completa", default, deserialize_with = "loose::string")]
    pub full_address: Option<String>,
    #[serde(rename = "inmueble", default, deserialize_with = "loose::string")]
    pub building: Option<String>,
    #[serde(rename = "zona_postal", default, deserialize_with = "loose::string")]
    pub postal_zone: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactSettings {
    #[serde(rename = "retira_oficina", default, deserialize_with = "loose::flag")]
    pub office_pickup: Option<bool>,
    #[serde(rename = "ciudad_ipostel", default, deserialize_with = "loose::string")]
    pub ipostel_city: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Package {
    #[serde(rename = "numero_piezas", default, deserialize_with = "loose::count")]
    pub pieces: Option<u32>,
    #[serde(rename = "peso_total", default, deserialize_with = "loose::number")]
    pub weight: Option<f64>,
    #[serde(rename = "dimensiones")]
    pub dimensions: Option<Dimensions>,
    #[serde(rename = "valores")]
    pub values: Option<Values>,
    #[serde(rename = "tipo_paquete", default, deserialize_with = "loose::string")]
    pub kind: Option<String>,
    #[serde(rename = "descripcion", default, deserialize_with = "loose::string")]
    pub description: Option<String>,
    #[serde(rename = "referencias")]
    pub references: Option<References>,
}

impl Package {
    pub fn merchandise_value(&self) -> Option<f64> {
        self.values.as_ref()?.merchandise
    }

    pub fn declared_value(&self) -> Option<f64> {
        self.values.as_ref()?.declared
    }

    pub fn client_reference(&self) -> Option<&str> {
        self.references.as_ref()?.client_reference.as_deref()
    }

    /// All three dimensions, or nothing.
    pub fn full_dimensions(&self) -> Option<(f64, f64, f64)> {
        let d = self.dimensions.as_ref()?;
        Some((d.height?, d.width?, d.length?))
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    #[serde(rename = "alto", default, deserialize_with = "loose::number")]
    pub height: Option<f64>,
    #[serde(rename = "ancho", default, deserialize_with = "loose::number")]
    pub width: Option<f64>,
    #[serde(rename = "largo", default, deserialize_with = "loose::number")]
    pub length: Option<f64>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Values {
    #[serde(rename = "valor_mercancia", default, deserialize_with = "loose::number")]
    pub merchandise: Option<f64>,
    #[serde(rename = "valor_declarado", default, deserialize_with = "loose::number")]
    pub declared: Option<f64>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct References {
    #[serde(rename = "referencia_cliente", default, deserialize_with = "loose::string")]
    pub client_reference: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdditionalInfo {
    #[serde(rename = "observaciones", default, deserialize_with = "loose::string")]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn coerces_numbers_strings_and_flags() {
        let request: ShipmentRequest = serde_json::from_value(json!({
            "autenticacion_zoom": {"login": 1234, "clave": " pw ", "codigo_cliente": "407941"},
            "servicio": {"codservicio": 31, "seguro": "si"},
            "paquete": {"numero_piezas": "2", "peso_total": "1,5"},
            "destinatario": {"configuracion": {"retira_oficina": 1}},
            "ubicacion_origen": {"ciudad": {"codciudad": "19", "suburb": "Centro"}}
        }))
        .expect("parse");

        let auth = request.auth.as_ref().expect("auth");
        assert_eq!(auth.login.as_deref(), Some("1234"));
        assert_eq!(auth.secret.as_deref(), Some("pw"));
        assert_eq!(auth.client_code_or(1), 407941);

        let service = request.service.as_ref().expect("service");
        assert_eq!(service.code.as_deref(), Some("31"));
        assert!(service.is_insured());

        let package = request.package.as_ref().expect("package");
        assert_eq!(package.pieces, Some(2));
        assert_eq!(package.weight, Some(1.5));

        assert!(request.recipient.as_ref().expect("recipient").office_pickup());
        let origin = request.origin.as_ref().expect("origin");
        assert_eq!(origin.city_code(), Some("19"));
        assert_eq!(origin.suburb(), Some("Centro"));
    }

    #[test]
    fn blank_strings_are_absent() {
        let data: PersonalData = serde_json::from_value(json!({
            "nombre_completo": "  ",
            "telefono_movil": "",
            "telefono_fijo": "02125551234"
        }))
        .expect("parse");
        assert_eq!(data.full_name, None);
        assert_eq!(data.phone(), Some("02125551234"));
    }

    #[test]
    fn fractional_piece_count_is_rejected() {
        let err = serde_json::from_value::<Package>(json!({"numero_piezas": 1.5}))
            .expect_err("not a count");
        assert!(err.to_string().contains("whole"));
    }

    #[test]
    fn contact_and_phone_fallbacks() {
        let data = PersonalData {
            full_name: Some("Ana Rojas".into()),
            mobile: Some("04141234567".into()),
            landline: Some("02125550000".into()),
            document_type: Some("V-".into()),
            document_number: Some("12345678".into()),
            ..Default::default()
        };
        assert_eq!(data.contact(), Some("Ana Rojas"));
        assert_eq!(data.phone(), Some("04141234567"));
        assert_eq!(data.fixed_phone(), Some("02125550000"));
        assert_eq!(data.document(), "V-12345678");
        assert_eq!(data.mobile_prefix(), "0414");
        assert_eq!(data.mobile_local(), "1234567");

        let short = PersonalData {
            contact_name: Some("Recepcion".into()),
            full_name: Some("Ana".into()),
            mobile: Some("123".into()),
            ..Default::default()
        };
        assert_eq!(short.contact(), Some("Recepcion"));
        assert_eq!(short.mobile_local(), "123");
        assert_eq!(PersonalData::default().mobile_prefix(), "");
    }

    #[test]
    fn settings_defaults() {
        let settings = ShipmentSettings::default();
        assert!(settings.validates_service());
        assert!(settings.requires_valid_tariff());
        assert!(settings.generates_label());
        assert!(!settings.requires_certificate());
    }

    #[test]
    fn serializes_back_with_wire_keys_and_no_nulls() {
        let request = ShipmentRequest {
            package: Some(Package {
                weight: Some(2.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let value = serde_json::to_value(&request).expect("json");
        assert_eq!(value, json!({"paquete": {"peso_total": 2.0}}));
    }

    #[test]
    fn code_value_prefers_integers() {
        assert_eq!(code_value("19"), json!(19));
        assert_eq!(code_value("A-1"), json!("A-1"));
    }
}
