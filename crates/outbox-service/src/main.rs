use anyhow::{anyhow, bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use ed25519_dalek::SigningKey;
use outbox_artifact::CardId;
use outbox_ledger::{
    format_date, JournalFilter, JournalQuery, JsonFileBackend, Ledger, Thumbprint, DEFAULT_LIMIT,
};
use outbox_service::bootstrap::{board_from_config, build, spawn_sweeper};
use outbox_service::config::LogConfig;
use outbox_service::http::{serve, AppState};
use outbox_service::{telemetry, OutboxClient, PrepareRequest, ServiceConfig, SystemClock};
use outbox_signing::{FirstEligible, OrchestratorConfig, SigningOrchestrator, SoftTokenAgent};
use rand::rngs::OsRng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

fn year_month_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("year")
                .long("year")
                .value_parser(value_parser!(i32))
                .help("Outgoing year"),
        )
        .arg(
            Arg::new("month")
                .long("month")
                .value_parser(value_parser!(u32))
                .help("Outgoing month (1-12)"),
        )
}

fn cli() -> Command {
    Command::new("outbox")
        .version(outbox_service::VERSION)
        .about("Outgoing correspondence registration and signature issuance")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Path to the TOML config (default: outbox.toml when present)"),
        )
        .subcommand(Command::new("serve").about("Run the HTTP API"))
        .subcommand(
            year_month_args(Command::new("export").about("Export the journal as XLSX")).arg(
                Arg::new("out")
                    .long("out")
                    .value_parser(value_parser!(PathBuf))
                    .help("Output file (default: journal[_YYYY][_MM].xlsx)"),
            ),
        )
        .subcommand(
            year_month_args(Command::new("journal").about("Print journal entries"))
                .arg(
                    Arg::new("skip")
                        .long("skip")
                        .default_value("0")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .default_value("100")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(Command::new("verify-ledger").about("Check the ledger's audit hash chain"))
        .subcommand(
            Command::new("keygen")
                .about("Create a software signing key")
                .arg(
                    Arg::new("out")
                        .long("out")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("File receiving the hex-encoded secret key"),
                ),
        )
        .subcommand(
            Command::new("sign")
                .about("Register and sign a card's template headlessly with a software key")
                .arg(Arg::new("server").long("server").required(true).help("Base URL of the outbox API"))
                .arg(Arg::new("token").long("token").help("Bearer token for the API"))
                .arg(
                    Arg::new("card")
                        .long("card")
                        .required(true)
                        .value_parser(value_parser!(u64)),
                )
                .arg(Arg::new("file").long("file").required(true).help("Template file name on the card"))
                .arg(
                    Arg::new("key")
                        .long("key")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Key file written by `outbox keygen`"),
                )
                .arg(
                    Arg::new("subject")
                        .long("subject")
                        .default_value("CN=Outbox software key")
                        .help("Certificate subject reported for the key"),
                ),
        )
}

fn load_config(matches: &ArgMatches) -> Result<ServiceConfig> {
    let path = matches.get_one::<PathBuf>("config").map(PathBuf::as_path);
    ServiceConfig::load(path).context("failed to load configuration")
}

fn filter_from(args: &ArgMatches) -> JournalFilter {
    JournalFilter {
        year: args.get_one::<i32>("year").copied(),
        month: args.get_one::<u32>("month").copied(),
    }
}

fn open_query(config: &ServiceConfig) -> Result<JournalQuery> {
    let ledger = Ledger::open(JsonFileBackend::new(config.storage.ledger_path()))
        .with_context(|| format!("failed to open ledger at {}", config.storage.ledger_path().display()))?;
    Ok(JournalQuery::new(Arc::new(ledger)).with_date_format(config.render.date_format.clone()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn run_serve(config: ServiceConfig) -> Result<()> {
    let board = board_from_config(&config)?;
    let service = Arc::new(build(&config, board, Arc::new(SystemClock))?);
    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    info!(addr = %listener.local_addr()?, "outbox listening");
    let sweeper = spawn_sweeper(service.clone(), &config.retention);
    let state = AppState::new(service, config.server.api_tokens.clone());
    serve(listener, state, shutdown_signal()).await?;
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    Ok(())
}

fn run_export(config: &ServiceConfig, args: &ArgMatches) -> Result<()> {
    let export = open_query(config)?.export(&filter_from(args))?;
    let out = args
        .get_one::<PathBuf>("out")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(&export.file_name));
    std::fs::write(&out, &export.bytes).with_context(|| format!("failed to write {}", out.display()))?;
    println!("Exported {} entries to {}", export.rows, out.display());
    Ok(())
}

fn run_journal(config: &ServiceConfig, args: &ArgMatches) -> Result<()> {
    let skip = args.get_one::<usize>("skip").copied().unwrap_or(0);
    let limit = args.get_one::<usize>("limit").copied().unwrap_or(DEFAULT_LIMIT);
    let page = open_query(config)?.query(&filter_from(args), skip, limit, None)?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }
    println!("{} entries (revision {})", page.total, page.revision);
    for entry in &page.entries {
        println!(
            "{:>6}  {:<16} {}  {:<30} {:<24} {}",
            entry.sequence_number.numeric,
            entry.sequence_number.formatted,
            format_date(entry.outgoing_date, &config.render.date_format)?,
            entry.to_whom,
            entry.executor,
            entry.folder_path
        );
    }
    Ok(())
}

fn run_verify(config: &ServiceConfig) -> Result<()> {
    let ledger = Ledger::open(JsonFileBackend::new(config.storage.ledger_path()));
    match ledger {
        Ok(ledger) => {
            ledger.verify_integrity()?;
            let (entries, events) = ledger.read(|s| (s.entries.len(), s.audit.len()));
            println!(
                "Ledger OK: revision {}, {entries} entries, {events} audit events",
                ledger.revision()
            );
            Ok(())
        }
        Err(e) => bail!("ledger verification failed: {e}"),
    }
}

fn run_keygen(out: &Path) -> Result<()> {
    if out.exists() {
        bail!("{} already exists", out.display());
    }
    let key = SigningKey::generate(&mut OsRng);
    std::fs::write(out, hex::encode(key.to_bytes())).with_context(|| format!("failed to write {}", out.display()))?;
    let public = key.verifying_key();
    println!("Secret key written to {}", out.display());
    println!("public_key = \"{}\"", hex::encode(public.to_bytes()));
    println!("thumbprint = {}", Thumbprint::of_key(&public));
    Ok(())
}

fn read_key(path: &Path) -> Result<SigningKey> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let bytes: [u8; 32] = hex::decode(raw.trim())
        .context("key file is not hex")?
        .try_into()
        .map_err(|_| anyhow!("key file must hold 32 bytes"))?;
    Ok(SigningKey::from_bytes(&bytes))
}

async fn run_sign(args: &ArgMatches, orchestrator_config: OrchestratorConfig) -> Result<()> {
    let server = args.get_one::<String>("server").context("--server is required")?;
    let card = *args.get_one::<u64>("card").context("--card is required")?;
    let file = args.get_one::<String>("file").context("--file is required")?;
    let key_path = args.get_one::<PathBuf>("key").context("--key is required")?;
    let subject = args.get_one::<String>("subject").cloned().unwrap_or_default();

    let agent = Arc::new(SoftTokenAgent::new().with_key(subject, read_key(key_path)?));
    let client = OutboxClient::new(server.clone(), args.get_one::<String>("token").cloned())?;

    let registration = client
        .prepare_registration(&PrepareRequest {
            card_id: CardId(card),
            selected_file_name: file.clone(),
        })
        .await?;
    println!(
        "Allocated {} for card {card}; signing {} ({} bytes)",
        registration.sequence_number, registration.artifact.file_name, registration.artifact.byte_length
    );

    let orchestrator = SigningOrchestrator::new(agent, Arc::new(client.clone()), Arc::new(client), orchestrator_config);
    let mut session = orchestrator.open(registration.ticket());
    let entry = orchestrator.run(&mut session, &FirstEligible).await?;
    println!(
        "Registered {} as journal entry {} in {}",
        entry.sequence_number, entry.id, entry.folder_path
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("serve", _)) => {
            let config = load_config(&matches)?;
            telemetry::init(&config.log)?;
            run_serve(config).await
        }
        Some(("export", args)) => {
            let config = load_config(&matches)?;
            telemetry::init(&config.log)?;
            run_export(&config, args)
        }
        Some(("journal", args)) => {
            let config = load_config(&matches)?;
            telemetry::init(&config.log)?;
            run_journal(&config, args)
        }
        Some(("verify-ledger", _)) => {
            let config = load_config(&matches)?;
            telemetry::init(&config.log)?;
            run_verify(&config)
        }
        Some(("keygen", args)) => {
            let out = args.get_one::<PathBuf>("out").context("--out is required")?;
            run_keygen(out)
        }
        Some(("sign", args)) => {
            telemetry::init(&LogConfig::default())?;
            let orchestrator = match matches.get_one::<PathBuf>("config") {
                Some(path) => ServiceConfig::from_file(path)?.signing.orchestrator(),
                None => OrchestratorConfig::default(),
            };
            run_sign(args, orchestrator).await
        }
        _ => Ok(()),
    }
}
