use std::fs;
use std::io::Read;
use std::thread;
use std::time::Duration;

use courier::config::EndpointOverrides;
use courier::label::LabelConfig;
use courier::pipeline::{Orchestrator, PipelineOptions, StepName};
use courier::report::CollectingReporter;
use courier::signing::{SIGNATURE_HEADER, verify};
use courier::store::FileStore;
use courier::{CarrierClient, CourierConfig, ShipmentRequest};
use serde_json::{Value, json};
use tempfile::tempdir;
use tiny_http::{Header, Response, Server};

const SECRET: &str = "frase-compartida";

struct Seen {
    method: String,
    path: String,
    query: String,
    authorization: Option<String>,
    signature: Option<String>,
    body: Option<Value>,
}

struct MockCarrier {
    base_url: String,
    handle: thread::JoinHandle<Vec<Seen>>,
}

impl MockCarrier {
    fn join(self) -> Vec<Seen> {
        self.handle.join().expect("join server")
    }
}

fn reply_for(path: &str) -> Value {
    match path {
        "crearToken" => json!({"entidadRespuesta": {"token": "tok-e2e"}}),
        "serviciosClientes" => json!({"entidadRespuesta": [{"codserviciofin": 31}]}),
        "CalcularTarifa" => json!({"entidadRespuesta": {"total": 18.75}}),
        "GuardarRemitenteWs" => {
            json!({"codrespuesta": "COD_001", "entidadRespuesta": {"codremitente": 88}})
        }
        "GuardarDestinatariosWs" => json!({"codrespuesta": "COD_001"}),
        "createShipment" => {
            json!({"codrespuesta": "COD_000", "entidadRespuesta": [{"numguia": "1500012345"}]})
        }
        "getLastTracking" => {
            json!({"codrespuesta": "COD_000", "entidadRespuesta": [{"estatus": "REGISTRADA"}]})
        }
        // "%PDF-1.4 e2e"
        "etiquetaTermica" => json!({"entidadRespuesta": {"guiaPDF": "JVBERi0xLjQgZTJl"}}),
        other => json!({"Codrespuesta": "CODE_000", "Mensaje": format!("unknown route {other}")}),
    }
}

/// Answers carrier routes by their last path segment until `expected`
/// requests were served or the server goes quiet.
fn spawn_carrier(expected: usize) -> MockCarrier {
    let server = Server::http("127.0.0.1:0").expect("server");
    let base_url = format!("http://{}/api", server.server_addr());
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        while seen.len() < expected {
            let Some(mut req) = server
                .recv_timeout(Duration::from_secs(10))
                .expect("receive")
            else {
                break;
            };
            let url = req.url().to_string();
            let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));
            let route = path.rsplit('/').next().unwrap_or_default().to_string();
            let header = |name: &'static str| {
                req.headers()
                    .iter()
                    .find(|h| h.field.equiv(name))
                    .map(|h| h.value.as_str().to_string())
            };
            let authorization = header("Authorization");
            let signature = header(SIGNATURE_HEADER);
            let mut raw = String::new();
            req.as_reader().read_to_string(&mut raw).expect("body");

            seen.push(Seen {
                method: req.method().as_str().to_string(),
                path: route.clone(),
                query: query.to_string(),
                authorization,
                signature,
                body: serde_json::from_str(&raw).ok(),
            });

            let response = Response::from_string(reply_for(&route).to_string()).with_header(
                Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
                    .expect("header"),
            );
            req.respond(response).expect("respond");
        }
        seen
    });
    MockCarrier { base_url, handle }
}

fn config_for(base_url: &str) -> CourierConfig {
    CourierConfig {
        endpoints: EndpointOverrides {
            public: Some(base_url.to_string()),
            private: Some(base_url.to_string()),
            registration: Some(base_url.to_string()),
        },
        api_key: "static-api-key".to_string(),
        shared_secret: SECRET.to_string(),
        sign_requests: true,
        timeout: Duration::from_secs(5),
        ..CourierConfig::default()
    }
}

fn national_request() -> ShipmentRequest {
    serde_json::from_value(json!({
        "metadata": {"solicitud_id": "E2E-1"},
        "autenticacion_zoom": {"login": "tienda", "clave": "secreta", "codigo_cliente": "407950"},
        "configuracion_envio": {"tipo_envio": "nacional"},
        "servicio": {"codservicio": "31", "tipo_tarifa": "2", "modalidad_tarifa": "1"},
        "ubicacion_origen": {"ciudad": {"codciudad": "19", "codpostal": "1010"}},
        "ubicacion_destino": {"ciudad": {"codciudad": "8"}},
        "remitente": {
            "datos_personales": {
                "nombre_completo": "Tienda Central",
                "tipo_documento": "J",
                "numero_documento": "409876543",
                "telefono_movil": "04241234567",
                "email": "ventas@tienda.test"
            },
            "direccion": {"direccion_completa": "Calle 4, Local 2"}
        },
        "destinatario": {
            "datos_personales": {
                "nombre_completo": "Maria Gil",
                "tipo_documento": "V",
                "numero_documento": "20111222",
                "telefono_fijo": "02125550000"
            },
            "direccion": {"direccion_completa": "Res. Sol, Apto 3"}
        },
        "paquete": {
            "numero_piezas": "2",
            "peso_total": "3,5",
            "dimensiones": {"alto": 10, "ancho": 20, "largo": 30},
            "valores": {"valor_declarado": 100}
        }
    }))
    .expect("request")
}

#[test]
fn national_shipment_runs_end_to_end_over_http() {
    let carrier = spawn_carrier(8);
    let config = config_for(&carrier.base_url);
    let client = CarrierClient::new(&config).expect("client");
    let state = tempdir().expect("state dir");
    let store = FileStore::new(state.path().join("store"));
    let labels = LabelConfig {
        scratch_file: state.path().join("etiqueta.pdf"),
        dir: state.path().join("etiquetas"),
        ..LabelConfig::default()
    };
    let mut reporter = CollectingReporter::default();

    let result = Orchestrator::new(&client, &store, labels, PipelineOptions::default())
        .run(&national_request(), &mut reporter);
    let seen = carrier.join();

    assert!(result.ok, "errors: {:?}", result.errors);
    assert_eq!(result.completed, StepName::ALL.to_vec());
    assert_eq!(result.tracking_number(), Some("1500012345"));

    let paths: Vec<&str> = seen.iter().map(|s| s.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "crearToken",
            "serviciosClientes",
            "CalcularTarifa",
            "GuardarRemitenteWs",
            "GuardarDestinatariosWs",
            "createShipment",
            "getLastTracking",
            "etiquetaTermica",
        ]
    );

    let tariff = &seen[2];
    assert_eq!(tariff.method, "GET");
    assert_eq!(tariff.authorization, None);
    assert!(tariff.query.contains("peso=3.5"));
    assert!(!tariff.query.contains("oficina_retirar"));

    let creation = &seen[5];
    assert_eq!(creation.authorization.as_deref(), Some("Bearer tok-e2e"));
    let body = creation.body.as_ref().expect("creation body");
    let signature = creation.signature.as_deref().expect("signed");
    assert!(verify(body, SECRET, signature));

    let tracking = &seen[6];
    assert!(tracking.query.contains("codigo=1500012345"));
    assert!(tracking.query.contains("codigo_cliente=407950"));

    let archived = state.path().join("etiquetas/etiqueta_1500012345.pdf");
    assert_eq!(fs::read(archived).expect("archived label"), b"%PDF-1.4 e2e");
    assert!(state.path().join("etiqueta.pdf").exists());

    let shipments = store.load_shipments().expect("shipments");
    assert_eq!(shipments.len(), 1);
    assert_eq!(shipments[0].record.tracking_number, "1500012345");
    assert_eq!(shipments[0].record.pieces, 2);
    assert_eq!(shipments[0].record.request["metadata"]["solicitud_id"], "E2E-1");

    let lines = reporter.infos.join("\n") + &reporter.warns.join("\n");
    assert!(!lines.contains("tok-e2e"));
    assert!(!lines.contains("secreta"));
}

#[test]
fn repeated_sender_is_upserted_once() {
    let carrier = spawn_carrier(16);
    let config = config_for(&carrier.base_url);
    let client = CarrierClient::new(&config).expect("client");
    let state = tempdir().expect("state dir");
    let store = FileStore::new(state.path().join("store"));
    let labels = LabelConfig {
        write: false,
        archive: false,
        ..LabelConfig::default()
    };
    let orchestrator = Orchestrator::new(&client, &store, labels, PipelineOptions::default());
    let mut reporter = CollectingReporter::default();

    let first = orchestrator.run(&national_request(), &mut reporter);
    let second = orchestrator.run(&national_request(), &mut reporter);
    carrier.join();

    assert!(first.ok && second.ok);
    let clients = store.load_clients().expect("clients");
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].record.carrier_client_code, 407950);

    let shipments = store.load_shipments().expect("shipments");
    assert_eq!(shipments.len(), 2);
    assert!(shipments.iter().all(|s| s.record.client_id == clients[0].id));
    assert_ne!(shipments[0].id, shipments[1].id);
}
