use std::time::Duration;

use clap::{Parser, Subcommand};
use currency_lookup::client::{login, BearerToken, ClientConfig, LookupClient};
use currency_lookup::proto::{self, LookupRequest};
use tonic::{Code, Status, Streaming};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "Currency lookup client", long_about = None)]
struct Cli {
    /// Server URL (overrides CLIENT_SERVER_URL)
    #[arg(short, long)]
    server: Option<String>,

    /// CA certificate (PEM) for TLS
    #[arg(long)]
    ca_cert: Option<String>,

    /// Expected server name in the certificate
    #[arg(long)]
    domain: Option<String>,

    /// Login user
    #[arg(short, long)]
    user: Option<String>,

    /// Login password
    #[arg(short, long)]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Unary lookup by code and/or number
    Lookup {
        #[arg(short, long, default_value = "")]
        code: String,

        #[arg(short, long, default_value_t = 0)]
        number: i32,
    },

    /// Server-streaming lookup
    Stream {
        #[arg(short, long, default_value = "")]
        code: String,

        #[arg(short, long, default_value_t = 0)]
        number: i32,
    },

    /// Upload records given as COUNTRY:NAME:CODE:NUMBER
    Ingest {
        #[arg(required = true)]
        records: Vec<String>,
    },

    /// Bidirectional lookup; each key is a code or a number
    Find {
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Walk through every call shape
    Demo,
}

fn print_header(title: &str) {
    println!();
    println!("{title}");
    println!("{}", "-".repeat(title.len()));
}

fn print_records(records: &[proto::Record]) {
    for record in records {
        println!("{:<50}{:<10}", record.country, record.code);
    }
}

async fn print_stream(mut stream: Streaming<proto::Record>) -> Result<(), Status> {
    while let Some(record) = stream.message().await? {
        println!("{:<50}{:<10}", record.country, record.code);
    }
    Ok(())
}

fn report(context: &str, status: &Status) {
    match status.code() {
        Code::InvalidArgument => eprintln!("error in {context}: {}", status.message()),
        Code::Unauthenticated | Code::PermissionDenied => {
            eprintln!("{context}: access refused: {}", status.message())
        }
        Code::DeadlineExceeded => eprintln!("{context}: timed out: {}", status.message()),
        _ => eprintln!("{context}: {status}"),
    }
}

fn parse_record(value: &str) -> Result<proto::Record, String> {
    let parts = value.split(':').collect::<Vec<_>>();
    let [country, name, code, number] = parts.as_slice() else {
        return Err(format!("expected COUNTRY:NAME:CODE:NUMBER, got '{value}'"));
    };
    let number = number
        .parse::<i32>()
        .map_err(|e| format!("invalid number in '{value}': {e}"))?;
    Ok(proto::Record {
        country: country.to_string(),
        name: name.to_string(),
        code: code.to_string(),
        number,
    })
}

fn parse_key(value: &str) -> LookupRequest {
    match value.parse::<i32>() {
        Ok(number) => LookupRequest {
            code: String::new(),
            number,
        },
        Err(_) => LookupRequest {
            code: value.to_string(),
            number: 0,
        },
    }
}

async fn demo(client: &LookupClient) {
    print_header("USD Countries");
    match client
        .clone()
        .with_deadline(Duration::from_millis(300))
        .lookup("USD", 0)
        .await
    {
        Ok(records) => print_records(&records),
        Err(status) => report("lookup", &status),
    }

    print_header("EUR Countries");
    let eur = client.clone().with_deadline(Duration::from_millis(500));
    let outcome = match eur.lookup_stream("EUR", 0).await {
        Ok(stream) => print_stream(stream).await,
        Err(status) => Err(status),
    };
    if let Err(status) = outcome {
        report("stream", &status);
    }

    print_header("Saved currencies");
    let caribbean = vec![
        ("HAITI", "Gourde", "HTG", 332),
        ("MARTINIQUE", "Euro", "EUR", 978),
        ("CUBA", "Cuban Peso", "CUP", 192),
        ("JAMAICA", "Jamaican Dollar", "JMD", 388),
    ]
    .into_iter()
    .map(|(country, name, code, number)| proto::Record {
        country: country.to_string(),
        name: name.to_string(),
        code: code.to_string(),
        number,
    })
    .collect();
    match client
        .clone()
        .with_deadline(Duration::from_millis(500))
        .ingest(caribbean)
        .await
    {
        Ok(saved) => print_records(&saved),
        Err(status) => report("ingest", &status),
    }

    print_header("Found Currencies");
    let requests = ["CDF", "AZN", "392", "QAR", "949"]
        .into_iter()
        .map(parse_key)
        .collect();
    let finder = client.clone().with_deadline(Duration::from_secs(1));
    let outcome = match finder.find(requests).await {
        Ok(stream) => print_stream(stream).await,
        Err(status) => Err(status),
    };
    if let Err(status) = outcome {
        report("find", &status);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = ClientConfig::from_env()?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    if cli.ca_cert.is_some() {
        config.ca_cert_path = cli.ca_cert;
    }
    if cli.domain.is_some() {
        config.domain_name = cli.domain;
    }
    if let Some(user) = cli.user {
        config.username = user;
    }
    if let Some(password) = cli.password {
        config.password = password;
    }

    let channel = config.connect().await?;
    let policy = config.retry_policy();

    let token = login(
        channel.clone(),
        &policy,
        Some(config.request_timeout()),
        &config.username,
        &config.password,
    )
    .await
    .map_err(|status| {
        report("login", &status);
        status
    })?;

    let client = LookupClient::new(channel, BearerToken::new(&token)?).with_policy(policy);

    match cli.command {
        Commands::Lookup { code, number } => {
            let client = client.with_deadline(config.request_timeout());
            match client.lookup(&code, number).await {
                Ok(records) => {
                    print_header("Results");
                    print_records(&records);
                }
                Err(status) => {
                    report("lookup", &status);
                    std::process::exit(1);
                }
            }
        }

        Commands::Stream { code, number } => {
            let client = client.with_deadline(config.request_timeout());
            print_header("Results");
            let outcome = match client.lookup_stream(&code, number).await {
                Ok(stream) => print_stream(stream).await,
                Err(status) => Err(status),
            };
            if let Err(status) = outcome {
                report("stream", &status);
                std::process::exit(1);
            }
        }

        Commands::Ingest { records } => {
            let records = records
                .iter()
                .map(|value| parse_record(value))
                .collect::<Result<Vec<_>, _>>()?;
            let client = client.with_deadline(config.request_timeout());
            match client.ingest(records).await {
                Ok(saved) => {
                    print_header("Saved currencies");
                    print_records(&saved);
                }
                Err(status) => {
                    report("ingest", &status);
                    std::process::exit(1);
                }
            }
        }

        Commands::Find { keys } => {
            let requests = keys.iter().map(|key| parse_key(key)).collect();
            let client = client.with_deadline(config.request_timeout());
            print_header("Found Currencies");
            let outcome = match client.find(requests).await {
                Ok(stream) => print_stream(stream).await,
                Err(status) => Err(status),
            };
            if let Err(status) = outcome {
                report("find", &status);
                std::process::exit(1);
            }
        }

        Commands::Demo => demo(&client).await,
    }

    Ok(())
}
