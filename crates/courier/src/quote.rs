//! Price-quote multiplexer.
//!
//! `consultarPreciosWs` answers eight kinds of quote selected by
//! `tipo_precio`. Each kind is a [`PriceQuote`] variant that checks its own
//! required inputs before anything is sent.

use std::fmt;

use chrono::NaiveDate;

use crate::client::{CarrierCall, QueryParams};
use crate::error::CarrierError;
use crate::route::Route;

/// Destination country whose locker quotes need a destination city.
pub const DESIGNATED_COUNTRY: &str = "124";

const LOCKER_AIR_RATE: u32 = 90;
const LOCKER_SEA_RATE: u32 = 102;

/// Quotes 1 and 2: city pair, pieces and weight.
#[derive(Debug, Clone, PartialEq)]
pub struct DomesticQuote {
    pub rate_type: String,
    pub rate_modality: String,
    pub origin_city: String,
    pub destination_city: String,
    pub pickup_office: Option<String>,
    pub pieces: u32,
    pub weight: f64,
    pub declared_value: f64,
}

/// Postal code and suburb for one side of an international quote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostalArea {
    pub zipcode: Option<String>,
    pub suburb: Option<String>,
}

impl PostalArea {
    fn require(self, side: &str) -> Result<Self, CarrierError> {
        if self.zipcode.is_none() && self.suburb.is_none() {
            return Err(CarrierError::invalid_parameters(format!(
                "zipcode_{side} or suburb_{side} is required"
            )));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InternationalQuote {
    pub weight: f64,
    pub ship_date: NaiveDate,
    pub destination_iso: String,
    pub destination_city: String,
    pub origin_iso: String,
    pub origin_city: String,
    pub declared_value: f64,
    /// `M` (merchandise) or `D` (documents).
    pub merchandise: bool,
    pub origin_city_code: String,
    pub dimensions: (f64, f64, f64),
    pub destination_area: PostalArea,
    pub origin_area: PostalArea,
}

impl InternationalQuote {
    /// Fails when either side has neither a postal code nor a suburb.
    pub fn checked(self) -> Result<Self, CarrierError> {
        Ok(Self {
            destination_area: self.destination_area.require("d")?,
            origin_area: self.origin_area.require("o")?,
            ..self
        })
    }
}

/// Quotes 4 and 5: country pair, weight and merchandise value.
#[derive(Debug, Clone, PartialEq)]
pub struct LockerQuote {
    pub origin_country: String,
    pub destination_country: String,
    pub office_pickup: bool,
    pub weight: f64,
    pub merchandise_value: f64,
    pub destination_city: Option<String>,
    pub dimensions: Option<(f64, f64, f64)>,
}

impl LockerQuote {
    /// Keeps the destination city only for [`DESIGNATED_COUNTRY`], where it
    /// is mandatory.
    pub fn checked(self) -> Result<Self, CarrierError> {
        let designated = self.destination_country == DESIGNATED_COUNTRY;
        if designated && self.destination_city.is_none() {
            return Err(CarrierError::invalid_parameters(format!(
                "ciudad_destinatario is required when codpais_destinatario is {DESIGNATED_COUNTRY}"
            )));
        }
        Ok(Self {
            destination_city: self.destination_city.filter(|_| designated),
            ..self
        })
    }

    fn checked_sea(self) -> Result<Self, CarrierError> {
        if self.dimensions.is_none() {
            return Err(CarrierError::invalid_parameters(
                "alto, ancho and largo are required for sea locker quotes",
            ));
        }
        self.checked()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrencyQuote {
    /// Foreign currency sale for an international money transfer.
    TransferSale,
    CashPurchase,
    CashSale,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PriceQuote {
    CashOnDelivery(DomesticQuote),
    National(DomesticQuote),
    International(InternationalQuote),
    LockerAir(LockerQuote),
    LockerSea(LockerQuote),
    Currency { kind: CurrencyQuote, amount: f64 },
}

impl PriceQuote {
    pub fn locker_air(quote: LockerQuote) -> Result<Self, CarrierError> {
        quote.checked().map(PriceQuote::LockerAir)
    }

    pub fn locker_sea(quote: LockerQuote) -> Result<Self, CarrierError> {
        quote.checked_sea().map(PriceQuote::LockerSea)
    }

    pub fn international(quote: InternationalQuote) -> Result<Self, CarrierError> {
        quote.checked().map(PriceQuote::International)
    }

    /// The `tipo_precio` discriminator.
    pub fn kind(&self) -> u8 {
        match self {
            PriceQuote::CashOnDelivery(_) => 1,
            PriceQuote::National(_) => 2,
            PriceQuote::International(_) => 3,
            PriceQuote::LockerAir(_) => 4,
            PriceQuote::LockerSea(_) => 5,
            PriceQuote::Currency { kind, .. } => match kind {
                CurrencyQuote::TransferSale => 6,
                CurrencyQuote::CashPurchase => 7,
                CurrencyQuote::CashSale => 8,
            },
        }
    }

    /// Build a quote from loose `key=value` inputs.
    pub fn from_params(kind: u8, params: &QueryParams) -> Result<Self, CarrierError> {
        let p = Params(params);
        match kind {
            1 | 2 => {
                let quote = DomesticQuote {
                    rate_type: p.text("tipo_tarifa")?,
                    rate_modality: p.text("modalidad_tarifa")?,
                    origin_city: p.text("ciudad_remitente")?,
                    destination_city: p.text("ciudad_destinatario")?,
                    pickup_office: p.optional("oficina_retirar"),
                    pieces: p.count("cantidad_piezas")?,
                    weight: p.number("peso")?,
                    declared_value: p.number_or("valor_declarado", 0.0)?,
                };
                Ok(if kind == 1 {
                    PriceQuote::CashOnDelivery(quote)
                } else {
                    PriceQuote::National(quote)
                })
            }
            3 => {
                let ship_date = match p.optional("fecha_envio") {
                    Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
                        CarrierError::invalid_parameters(format!(
                            "fecha_envio must be YYYY-MM-DD (got '{raw}')"
                        ))
                    })?,
                    None => return Err(CarrierError::missing("fecha_envio")),
                };
                PriceQuote::international(InternationalQuote {
                    weight: p.number("pesob")?,
                    ship_date,
                    destination_iso: p.text("siglas_pd")?,
                    destination_city: p.text("ciudad_d")?,
                    origin_iso: p.text("siglas_po")?,
                    origin_city: p.text("ciudad_o")?,
                    declared_value: p.number("valor_declarado")?,
                    merchandise: p.text("merdoc")?.eq_ignore_ascii_case("M"),
                    origin_city_code: p.text("codciudadori")?,
                    dimensions: p.dimensions()?,
                    destination_area: PostalArea {
                        zipcode: p.optional("zipcode_d"),
                        suburb: p.optional("suburb_d"),
                    },
                    origin_area: PostalArea {
                        zipcode: p.optional("zipcode_o"),
                        suburb: p.optional("suburb_o"),
                    },
                })
            }
            4 | 5 => {
                let quote = LockerQuote {
                    origin_country: p.text("codpais_remitente")?,
                    destination_country: p.text("codpais_destinatario")?,
                    office_pickup: p.optional("oficina_retirar").as_deref() == Some("1"),
                    weight: p.number("peso")?,
                    merchandise_value: p.number_or("valor_mercancia", 0.0)?,
                    destination_city: p.optional("ciudad_destinatario"),
                    dimensions: None,
                };
                if kind == 4 {
                    PriceQuote::locker_air(quote)
                } else {
                    PriceQuote::locker_sea(LockerQuote {
                        dimensions: Some(p.dimensions()?),
                        ..quote
                    })
                }
            }
            6..=8 => Ok(PriceQuote::Currency {
                kind: match kind {
                    6 => CurrencyQuote::TransferSale,
                    7 => CurrencyQuote::CashPurchase,
                    _ => CurrencyQuote::CashSale,
                },
                amount: p.number("monto")?,
            }),
            other => Err(CarrierError::invalid_parameters(format!(
                "unsupported tipo_precio: {other}"
            ))),
        }
    }

    pub fn to_query(&self) -> QueryParams {
        let mut q = QueryParams::new();
        q.push("tipo_precio", self.kind());
        match self {
            PriceQuote::CashOnDelivery(d) | PriceQuote::National(d) => {
                q.push("tipo_tarifa", &d.rate_type)
                    .push("modalidad_tarifa", &d.rate_modality)
                    .push("ciudad_remitente", &d.origin_city)
                    .push("ciudad_destinatario", &d.destination_city)
                    .push_opt("oficina_retirar", d.pickup_office.as_ref())
                    .push("cantidad_piezas", d.pieces)
                    .push("peso", d.weight)
                    .push("valor_declarado", d.declared_value);
            }
            PriceQuote::International(i) => {
                q.push("pesob", i.weight)
                    .push("fecha_envio", i.ship_date.format("%Y-%m-%d"))
                    .push("siglas_pd", &i.destination_iso)
                    .push("ciudad_d", &i.destination_city)
                    .push("siglas_po", &i.origin_iso)
                    .push("ciudad_o", &i.origin_city)
                    .push("valor_declarado", i.declared_value)
                    .push("merdoc", if i.merchandise { "M" } else { "D" })
                    .push("codciudadori", &i.origin_city_code);
                push_dimensions(&mut q, i.dimensions);
                q.push_opt("zipcode_d", i.destination_area.zipcode.as_ref())
                    .push_opt("suburb_d", i.destination_area.suburb.as_ref())
                    .push_opt("zipcode_o", i.origin_area.zipcode.as_ref())
                    .push_opt("suburb_o", i.origin_area.suburb.as_ref());
            }
            PriceQuote::LockerAir(l) | PriceQuote::LockerSea(l) => {
                let rate = if matches!(self, PriceQuote::LockerAir(_)) {
                    LOCKER_AIR_RATE
                } else {
                    LOCKER_SEA_RATE
                };
                q.push("tipo_tarifa", rate)
                    .push("codpais_remitente", &l.origin_country)
                    .push("codpais_destinatario", &l.destination_country)
                    .push("oficina_retirar", if l.office_pickup { 1 } else { 2 })
                    .push("peso", l.weight)
                    .push("valor_mercancia", l.merchandise_value)
                    .push("codtipoenv", 1)
                    .push("codservicio", 0);
                if let Some(dimensions) = l.dimensions {
                    push_dimensions(&mut q, dimensions);
                }
                q.push_opt("ciudad_destinatario", l.destination_city.as_ref());
            }
            PriceQuote::Currency { amount, .. } => {
                q.push("monto", amount);
            }
        }
        q
    }

    pub fn to_call(&self) -> CarrierCall {
        CarrierCall::get(Route::PriceQuote).query(self.to_query())
    }
}

impl fmt::Display for PriceQuote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PriceQuote::CashOnDelivery(_) => "cash on delivery",
            PriceQuote::National(_) => "national",
            PriceQuote::International(_) => "international",
            PriceQuote::LockerAir(_) => "air locker",
            PriceQuote::LockerSea(_) => "sea locker",
            PriceQuote::Currency {
                kind: CurrencyQuote::TransferSale,
                ..
            } => "transfer currency sale",
            PriceQuote::Currency {
                kind: CurrencyQuote::CashPurchase,
                ..
            } => "cash currency purchase",
            PriceQuote::Currency {
                kind: CurrencyQuote::CashSale,
                ..
            } => "cash currency sale",
        };
        write!(f, "{name} quote (tipo_precio={})", self.kind())
    }
}

fn push_dimensions(q: &mut QueryParams, (height, width, length): (f64, f64, f64)) {
    q.push("alto", height).push("ancho", width).push("largo", length);
}

struct Params<'a>(&'a QueryParams);

impl Params<'_> {
    fn optional(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn text(&self, key: &str) -> Result<String, CarrierError> {
        self.optional(key).ok_or_else(|| CarrierError::missing(key))
    }

    fn number(&self, key: &str) -> Result<f64, CarrierError> {
        let raw = self.text(key)?;
        raw.parse().map_err(|_| {
            CarrierError::invalid_parameters(format!("{key} must be a number (got '{raw}')"))
        })
    }

    fn number_or(&self, key: &str, fallback: f64) -> Result<f64, CarrierError> {
        match self.optional(key) {
            Some(_) => self.number(key),
            None => Ok(fallback),
        }
    }

    fn count(&self, key: &str) -> Result<u32, CarrierError> {
        let raw = self.text(key)?;
        raw.parse().map_err(|_| {
            CarrierError::invalid_parameters(format!("{key} must be a whole number (got '{raw}')"))
        })
    }

    fn dimensions(&self) -> Result<(f64, f64, f64), CarrierError> {
        Ok((
            self.number("alto")?,
            self.number("ancho")?,
            self.number("largo")?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn params(pairs: &[(&str, &str)]) -> QueryParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn domestic() -> QueryParams {
        params(&[
            ("tipo_tarifa", "1"),
            ("modalidad_tarifa", "2"),
            ("ciudad_remitente", "19"),
            ("ciudad_destinatario", "4"),
            ("cantidad_piezas", "1"),
            ("peso", "1.5"),
        ])
    }

    fn international() -> InternationalQuote {
        InternationalQuote {
            weight: 2.0,
            ship_date: NaiveDate::from_ymd_opt(2026, 3, 14).expect("date"),
            destination_iso: "US".into(),
            destination_city: "Miami".into(),
            origin_iso: "VE".into(),
            origin_city: "Caracas".into(),
            declared_value: 100.0,
            merchandise: true,
            origin_city_code: "19".into(),
            dimensions: (10.0, 20.0, 30.0),
            destination_area: PostalArea::default(),
            origin_area: PostalArea {
                zipcode: Some("1010".into()),
                suburb: None,
            },
        }
    }

    fn locker(country: &str, city: Option<&str>) -> LockerQuote {
        LockerQuote {
            origin_country: "840".into(),
            destination_country: country.into(),
            office_pickup: false,
            weight: 3.0,
            merchandise_value: 50.0,
            destination_city: city.map(str::to_string),
            dimensions: None,
        }
    }

    #[test]
    fn cash_on_delivery_and_national_are_distinct() {
        let cod = PriceQuote::from_params(1, &domestic()).expect("cod");
        let national = PriceQuote::from_params(2, &domestic()).expect("national");
        assert!(matches!(cod, PriceQuote::CashOnDelivery(_)));
        assert!(matches!(national, PriceQuote::National(_)));
        assert_eq!(cod.to_query().get("tipo_precio"), Some("1"));
        assert_eq!(national.to_query().get("tipo_precio"), Some("2"));
        assert_eq!(national.to_query().get("valor_declarado"), Some("0"));
        assert!(!national.to_query().contains("oficina_retirar"));
    }

    #[test]
    fn domestic_quote_requires_weight() {
        let mut without_weight: QueryParams = domestic()
            .iter()
            .filter(|(k, _)| k != "peso")
            .cloned()
            .collect();
        let err = PriceQuote::from_params(2, &without_weight).expect_err("no weight");
        assert_eq!(err.message(), "missing required field: peso");

        without_weight.push("peso", "heavy");
        let err = PriceQuote::from_params(2, &without_weight).expect_err("bad weight");
        assert_eq!(err.kind(), ErrorKind::InvalidParameters);
    }

    #[test]
    fn international_requires_postal_or_suburb_per_side() {
        let err = PriceQuote::international(international()).expect_err("no destination area");
        assert_eq!(err.kind(), ErrorKind::InvalidParameters);
        assert!(err.message().contains("zipcode_d or suburb_d"));

        let mut no_origin = international();
        no_origin.destination_area.suburb = Some("Brickell".into());
        no_origin.origin_area = PostalArea::default();
        let err = PriceQuote::international(no_origin).expect_err("no origin area");
        assert!(err.message().contains("zipcode_o or suburb_o"));
    }

    #[test]
    fn international_sends_both_postal_values_when_present() {
        let mut quote = international();
        quote.destination_area = PostalArea {
            zipcode: Some("33131".into()),
            suburb: Some("Brickell".into()),
        };
        let query = PriceQuote::international(quote).expect("valid").to_query();
        assert_eq!(query.get("zipcode_d"), Some("33131"));
        assert_eq!(query.get("suburb_d"), Some("Brickell"));
        assert_eq!(query.get("zipcode_o"), Some("1010"));
        assert!(!query.contains("suburb_o"));
        assert_eq!(query.get("fecha_envio"), Some("2026-03-14"));
        assert_eq!(query.get("merdoc"), Some("M"));
        assert_eq!(query.get("tipo_precio"), Some("3"));
    }

    #[test]
    fn locker_destination_city_only_for_designated_country() {
        let err = PriceQuote::locker_air(locker(DESIGNATED_COUNTRY, None)).expect_err("city");
        assert!(err.message().contains("ciudad_destinatario"));

        let query = PriceQuote::locker_air(locker(DESIGNATED_COUNTRY, Some("19")))
            .expect("valid")
            .to_query();
        assert_eq!(query.get("ciudad_destinatario"), Some("19"));
        assert_eq!(query.get("tipo_tarifa"), Some("90"));
        assert_eq!(query.get("oficina_retirar"), Some("2"));

        let query = PriceQuote::locker_air(locker("862", Some("19")))
            .expect("valid")
            .to_query();
        assert!(!query.contains("ciudad_destinatario"));
    }

    #[test]
    fn sea_locker_requires_dimensions() {
        let err = PriceQuote::locker_sea(locker("862", None)).expect_err("dimensions");
        assert!(err.message().contains("alto"));

        let quote = LockerQuote {
            dimensions: Some((1.0, 2.0, 3.0)),
            ..locker("862", None)
        };
        let query = PriceQuote::locker_sea(quote).expect("valid").to_query();
        assert_eq!(query.get("tipo_tarifa"), Some("102"));
        assert_eq!(query.get("largo"), Some("3"));
    }

    #[test]
    fn currency_quotes_need_an_amount() {
        let quote = PriceQuote::from_params(7, &params(&[("monto", "250")])).expect("quote");
        assert_eq!(
            quote,
            PriceQuote::Currency {
                kind: CurrencyQuote::CashPurchase,
                amount: 250.0
            }
        );
        let keys: Vec<_> = quote.to_query().keys().map(str::to_string).collect();
        assert_eq!(keys, vec!["tipo_precio", "monto"]);
        assert!(PriceQuote::from_params(6, &QueryParams::new()).is_err());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = PriceQuote::from_params(9, &QueryParams::new()).expect_err("unsupported");
        assert_eq!(err.kind(), ErrorKind::InvalidParameters);
    }

    #[test]
    fn quotes_go_to_the_multiplexed_route() {
        let call = PriceQuote::from_params(8, &params(&[("monto", "10")]))
            .expect("quote")
            .to_call();
        assert_eq!(call.route, Route::PriceQuote);
        assert_eq!(call.method, crate::transport::Method::Get);
        assert!(call.body.is_none());
    }
}
