use std::collections::BTreeSet;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use crossterm::execute;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use currency_lookup::proto::auth_service_server::AuthServiceServer;
use currency_lookup::proto::query_service_server::QueryServiceServer;
use currency_lookup::server::{
    AuthServiceImpl, QueryServiceImpl, RateLimiter, RecordStore, ServerConfig, Services,
};
use currency_lookup::Record;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::Notify;
use tonic::transport::Server;
use tonic_health::server::{health_reporter, HealthReporter};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Authenticated currency lookup server", long_about = None)]
#[command(version)]
struct Args {
    /// Host to bind to (overrides configuration)
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on (overrides configuration)
    #[arg(short, long)]
    port: Option<u16>,

    /// CSV file with currency records (overrides configuration)
    #[arg(short, long)]
    data: Option<String>,

    /// Run without the interactive console
    #[arg(long, env = "SERVER_NO_REPL")]
    no_repl: bool,
}

/// One line typed at the operator console.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Status,
    Records,
    Find { code: String, number: i32 },
    Users,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    /// Accepts `status`, `records`, `find <CODE|NUMBER>`, `users`, `help` and
    /// `quit`, with or without a leading `/`.
    fn from_str(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Err(String::new());
        };

        let command = match name.trim_start_matches('/').to_lowercase().as_str() {
            "status" | "st" => Command::Status,
            "records" | "r" => Command::Records,
            "find" | "f" => {
                let key = words.next().ok_or("usage: find <CODE|NUMBER>")?;
                match key.parse::<i32>() {
                    Ok(0) => return Err("currency number must be non-zero".to_string()),
                    Ok(number) => Command::Find {
                        code: String::new(),
                        number,
                    },
                    Err(_) => Command::Find {
                        code: key.to_uppercase(),
                        number: 0,
                    },
                }
            }
            "users" | "u" => Command::Users,
            "help" | "h" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => return Err(format!("unknown command `{other}`, type help")),
        };
        Ok(command)
    }
}

fn paint(color: Color, text: &str) {
    let mut stdout = io::stdout();
    execute!(stdout, SetForegroundColor(color), Print(text), ResetColor, Print("\n")).ok();
}

fn print_help() {
    paint(Color::Yellow, "commands:");
    println!("  status               record, code and user counts, uptime");
    println!("  records              every record in store order");
    println!("  find <CODE|NUMBER>   records matching one key, as Lookup would");
    println!("  users                accounts allowed to log in");
    println!("  quit                 stop serving and exit");
}

fn print_records(records: &[Record]) {
    paint(Color::Cyan, &format!("{:<50}{:<10}{}", "Country", "Code", "Number"));
    for record in records {
        println!("{:<50}{:<10}{}", record.country(), record.code(), record.number());
    }
    paint(Color::Cyan, &format!("({} records)", records.len()));
}

async fn print_status(addr: &str, config: &ServerConfig, store: &RecordStore, started: Instant) {
    let records = store.snapshot().await;
    let codes = records
        .iter()
        .map(Record::code)
        .filter(|code| !code.is_empty())
        .collect::<BTreeSet<_>>();

    paint(
        Color::Cyan,
        &format!(
            "{addr}: {} records, {} currency codes, {} users, up {}s",
            records.len(),
            codes.len(),
            config.auth.users.len(),
            started.elapsed().as_secs()
        ),
    );
    println!(
        "  tokens live {}s, {} req/min (burst {}), tls {}, metrics {}",
        config.auth.token_ttl_secs,
        config.rate_limit.requests_per_minute,
        config.rate_limit.burst,
        on_off(config.tls.enabled),
        on_off(config.metrics.enabled)
    );
}

fn print_users(config: &ServerConfig) {
    paint(Color::Cyan, &format!("{:<20}{}", "Username", "Display name"));
    for user in &config.auth.users {
        println!("{:<20}{}", user.username, user.display_name);
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let started = Instant::now();

    let mut config = ServerConfig::from_env().unwrap_or_else(|e| {
        error!("Failed to load configuration: {e}");
        info!("Using default configuration");
        ServerConfig::default()
    });
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(data) = args.data {
        config.data_file = data;
    }

    if let Err(e) = config.validate() {
        paint(Color::Red, &format!("invalid configuration: {e}"));
        return Err(format!("Invalid configuration: {e}").into());
    }

    let store = RecordStore::load_csv(&config.data_file)?;
    let loaded = store.len().await;
    info!(records = loaded, file = %config.data_file, "records loaded");

    let credentials = config.auth.build_credentials()?;
    let authority = config.auth.build_authority();
    let limiter = RateLimiter::from_config(&config.rate_limit);
    let services = Services::new(store.clone(), credentials, authority, Some(limiter));

    if config.metrics.enabled {
        let metrics_addr = config.metrics.addr()?;
        match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()
        {
            Ok(()) => info!("Metrics server started on {metrics_addr}"),
            Err(e) => error!("Failed to start metrics server: {e}"),
        }
    }

    let (mut health_reporter, health_service) = health_reporter();
    health_reporter
        .set_serving::<AuthServiceServer<AuthServiceImpl>>()
        .await;
    health_reporter
        .set_serving::<QueryServiceServer<QueryServiceImpl>>()
        .await;

    let addr = config.addr()?;
    let addr_str = addr.to_string();

    let mut builder = Server::builder();
    if let Some(tls) = config.tls.load()? {
        builder = builder.tls_config(tls)?;
    }

    paint(
        Color::Green,
        &format!(
            "serving {loaded} records to {} users on {addr} (tls {})",
            config.auth.users.len(),
            on_off(config.tls.enabled)
        ),
    );

    let shutdown = Arc::new(Notify::new());
    let shutdown_reporter = health_reporter.clone();
    let server_shutdown = Arc::clone(&shutdown);

    let server_handle = tokio::spawn(async move {
        builder
            .add_service(health_service)
            .add_service(services.auth)
            .add_service(services.query)
            .serve_with_shutdown(addr, shutdown_signal(shutdown_reporter, server_shutdown))
            .await
    });

    if args.no_repl {
        info!("Console disabled; stop with Ctrl+C or SIGTERM");
    } else {
        paint(Color::Yellow, "type help for commands");
        run_console(&addr_str, &config, &store, started, &shutdown).await;
    }

    match server_handle.await {
        Ok(Ok(())) => info!("server stopped"),
        Ok(Err(e)) => error!("server error: {e}"),
        Err(e) => error!("server task failed: {e}"),
    }
    Ok(())
}

async fn run_console(
    addr: &str,
    config: &ServerConfig,
    store: &RecordStore,
    started: Instant,
    shutdown: &Notify,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("lookup> ");
        io::stdout().flush().ok();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("console read failed: {e}");
                break;
            }
        };

        match line.parse::<Command>() {
            Ok(Command::Status) => print_status(addr, config, store, started).await,
            Ok(Command::Records) => print_records(&store.snapshot().await),
            Ok(Command::Find { code, number }) => print_records(&store.search(&code, number).await),
            Ok(Command::Users) => print_users(config),
            Ok(Command::Help) => print_help(),
            Ok(Command::Quit) => {
                paint(Color::Yellow, "draining in-flight calls, then exiting");
                shutdown.notify_one();
                break;
            }
            Err(msg) if msg.is_empty() => {}
            Err(msg) => paint(Color::Red, &msg),
        }
    }
}

async fn shutdown_signal(mut health_reporter: HealthReporter, console_quit: Arc<Notify>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
        _ = console_quit.notified() => {
            info!("Shutdown requested from console");
        },
    }

    health_reporter
        .set_not_serving::<AuthServiceServer<AuthServiceImpl>>()
        .await;
    health_reporter
        .set_not_serving::<QueryServiceServer<QueryServiceImpl>>()
        .await;

    info!("Initiating graceful shutdown (allowing in-flight requests to complete)");

    tokio::time::sleep(Duration::from_secs(2)).await;
}
