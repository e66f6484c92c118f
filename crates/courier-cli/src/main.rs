use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};

use courier::client::{CarrierCall, CarrierClient, QueryParams};
use courier::config::CourierConfig;
use courier::envelope::Envelope;
use courier::partner::PartnerClient;
use courier::pipeline::Orchestrator;
use courier::quote::PriceQuote;
use courier::report::Reporter;
use courier::request::ShipmentRequest;
use courier::route::{EndpointFamily, Route};
use courier::store::FileStore;
use courier::transport::Method;

/// Exit code for a carrier or partner call answered with an error status.
const EXIT_REJECTED: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "courier", version)]
#[command(about = "Create, price and track shipments with the Zoom carrier")]
struct Cli {
    /// TOML configuration file. Environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Deployment profile: sandbox, qa or production.
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Directory for the file-backed client and shipment store.
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Show info-level progress on stderr.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the shipment pipeline for one request and print the result.
    Ship {
        /// Request JSON file, or `-` for stdin.
        #[arg(long)]
        request: PathBuf,
    },
    /// Price a shipment through the multiplexed quote endpoint.
    Quote {
        /// Quote type, 1 to 8.
        #[arg(long = "tipo-precio")]
        tipo_precio: u8,
        /// Quote input as key=value (repeatable).
        #[arg(long = "param", value_parser = parse_pair)]
        params: Vec<(String, String)>,
    },
    /// Print the full status history of a tracking number.
    Track {
        tracking_number: String,
        /// Carrier client code. Defaults to `pipeline.default_client_code`.
        #[arg(long)]
        client_code: Option<i64>,
    },
    /// Forward an arbitrary call to the carrier.
    Proxy {
        method: String,
        path: String,
        /// Query pair as key=value (repeatable).
        #[arg(long = "query", value_parser = parse_pair)]
        query: Vec<(String, String)>,
        /// JSON body file, or `-` for stdin.
        #[arg(long)]
        body: Option<PathBuf>,
        /// Endpoint family: public, private or registration.
        #[arg(long, default_value = "private")]
        family: String,
    },
    /// Manage partner business records.
    Partner {
        #[command(subcommand)]
        cmd: PartnerCommands,
    },
    /// Print the resolved configuration with secrets redacted.
    Doctor,
}

#[derive(Subcommand, Debug)]
enum PartnerCommands {
    Create {
        #[arg(long)]
        body: PathBuf,
    },
    Get {
        id: u64,
    },
    Delete {
        id: u64,
    },
}

struct CliReporter {
    verbose: bool,
}

impl Reporter for CliReporter {
    fn info(&mut self, msg: &str) {
        if self.verbose {
            eprintln!("[info] {msg}");
        }
    }

    fn warn(&mut self, msg: &str) {
        eprintln!("[warn] {msg}");
    }

    fn error(&mut self, msg: &str) {
        eprintln!("[error] {msg}");
    }
}

fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let mut reporter = CliReporter {
        verbose: cli.verbose || config.debug,
    };

    match cli.cmd {
        Commands::Ship { request } => run_ship(&config, &request, &mut reporter),
        Commands::Quote {
            tipo_precio,
            params,
        } => {
            let client = carrier_client(&config)?;
            let params: QueryParams = params.into_iter().collect();
            let result = PriceQuote::from_params(tipo_precio, &params).and_then(|quote| {
                reporter.info(&format!("quote: {quote}"));
                client.invoke(&quote.to_call(), &mut reporter)
            });
            print_envelope(&Envelope::from(result))
        }
        Commands::Track {
            tracking_number,
            client_code,
        } => {
            let client = carrier_client(&config)?;
            let client_code = client_code.unwrap_or(config.pipeline.default_client_code);
            let result = client.info_tracking(&tracking_number, client_code, &mut reporter);
            print_envelope(&Envelope::from(result))
        }
        Commands::Proxy {
            method,
            path,
            query,
            body,
            family,
        } => {
            let client = carrier_client(&config)?;
            let method: Method = method.parse()?;
            let family: EndpointFamily = family.parse()?;
            let mut call = CarrierCall::new(method, Route::custom(&path, family))
                .query(query.into_iter().collect());
            if let Some(body) = body {
                call = call.body(read_json(&body)?);
            }
            let result = client.invoke(&call, &mut reporter);
            print_envelope(&Envelope::from(result))
        }
        Commands::Partner { cmd } => {
            let client = PartnerClient::new(&config)?;
            let result = match cmd {
                PartnerCommands::Create { body } => {
                    client.create_business(&read_json(&body)?, &mut reporter)
                }
                PartnerCommands::Get { id } => client.get_business(id, &mut reporter),
                PartnerCommands::Delete { id } => client.delete_business(id, &mut reporter),
            };
            let envelope = match result {
                Ok(data) => Envelope::success(data),
                Err(err) => {
                    reporter.error(&format!("{err:#}"));
                    Envelope::unexpected(&err)
                }
            };
            print_envelope(&envelope)
        }
        Commands::Doctor => run_doctor(&config),
    }
}

fn load_config(cli: &Cli) -> Result<CourierConfig> {
    let mut config = CourierConfig::load(cli.config.as_deref())?;
    if let Some(profile) = &cli.profile {
        config.profile = profile.parse()?;
    }
    if let Some(dir) = &cli.state_dir {
        config.store.dir = dir.clone();
    }
    Ok(config)
}

fn run_ship(config: &CourierConfig, request: &Path, reporter: &mut CliReporter) -> Result<ExitCode> {
    let client = carrier_client(config)?;
    let raw = read_input(request)?;
    let request: ShipmentRequest = serde_json::from_str(&raw)
        .with_context(|| format!("invalid shipment request JSON in {}", request.display()))?;

    let store = FileStore::new(config.store.dir.clone());
    let orchestrator = Orchestrator::new(
        &client,
        &store,
        config.labels.clone(),
        config.pipeline.clone(),
    );
    let result = orchestrator.run(&request, reporter);

    print_json(&result)?;
    Ok(ExitCode::SUCCESS)
}

fn carrier_client(config: &CourierConfig) -> Result<CarrierClient> {
    config.validate().context("invalid configuration")?;
    CarrierClient::new(config)
}

fn run_doctor(config: &CourierConfig) -> Result<ExitCode> {
    let redacted = config.redacted();
    let endpoints = match config.endpoints() {
        Ok(endpoints) => serde_json::to_value(endpoints)?,
        Err(err) => json!({"error": format!("{err:#}")}),
    };
    let report = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "config": redacted,
        "endpoints": endpoints,
        "api_key_configured": !config.api_key.is_empty(),
        "signing_enabled": config.sign_requests && !config.shared_secret.is_empty(),
        "partner_configured": config.partner.base_url.is_some(),
    });
    print_json(&report)?;
    Ok(ExitCode::SUCCESS)
}

fn print_envelope<T: Serialize>(envelope: &Envelope<T>) -> Result<ExitCode> {
    print_json(envelope)?;
    Ok(if envelope.status() < 400 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_REJECTED)
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut raw = String::new();
        std::io::stdin()
            .read_to_string(&mut raw)
            .context("failed to read stdin")?;
        return Ok(raw);
    }
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_json(path: &Path) -> Result<Value> {
    let raw = read_input(path)?;
    serde_json::from_str(&raw).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn parse_pair(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}
