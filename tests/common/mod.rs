//! Common test utilities shared across integration tests.
#![allow(dead_code)]

use currency_lookup::auth::{Credential, CredentialStore, TokenAuthority, DEFAULT_TOKEN_TTL};
use currency_lookup::client::{login, BearerToken, LookupClient, RetryPolicy};
use currency_lookup::server::{RateLimiter, RecordStore, Services};
use currency_lookup::Record;
use tonic::transport::{Channel, Server};

/// Signing secret of every test server.
pub const SECRET: &[u8] = b"a1b2c3d";

/// Initialize test tracing (call once at the beginning of tests).
///
/// Subsequent calls are safe and will be ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new("currency_lookup=debug");

    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .try_init();
}

/// Haiti and Cuba, the minimal lookup table.
pub fn caribbean() -> Vec<Record> {
    vec![
        Record::new("HAITI", "Gourde", "HTG", 332),
        Record::new("CUBA", "Cuban Peso", "CUP", 192),
    ]
}

/// A table with duplicate codes.
pub fn euro_area() -> Vec<Record> {
    vec![
        Record::new("HAITI", "Gourde", "HTG", 332),
        Record::new("MARTINIQUE", "Euro", "EUR", 978),
        Record::new("CUBA", "Cuban Peso", "CUP", 192),
        Record::new("FRANCE", "Euro", "EUR", 978),
        Record::new("GERMANY", "Euro", "EUR", 978),
    ]
}

/// Authority matching the test servers' secret.
pub fn authority() -> TokenAuthority {
    TokenAuthority::new(SECRET, DEFAULT_TOKEN_TTL)
}

pub async fn start_test_server(records: Vec<Record>) -> (String, RecordStore, tokio::task::JoinHandle<()>) {
    start_test_server_with_limiter(records, None).await
}

pub async fn start_test_server_with_limiter(
    records: Vec<Record>,
    limiter: Option<RateLimiter>,
) -> (String, RecordStore, tokio::task::JoinHandle<()>) {
    let store = RecordStore::from_records(records);
    let credentials = CredentialStore::new(vec![
        Credential::new("vector", "Vic Vector", "abc123").expect("hashing should succeed"),
    ])
    .expect("credential store should build");
    let services = Services::new(store.clone(), credentials, authority(), limiter);

    let addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    let local_addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(services.auth)
            .add_service(services.query)
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

    (format!("http://{}", local_addr), store, handle)
}

pub async fn connect(url: &str) -> Channel {
    Channel::from_shared(url.to_string())
        .expect("URL should parse")
        .connect()
        .await
        .expect("Failed to connect to server")
}

/// Logs in as `vector` and returns a ready query client.
pub async fn authenticated_client(url: &str) -> LookupClient {
    let channel = connect(url).await;
    let token = login(
        channel.clone(),
        &RetryPolicy::default(),
        None,
        "vector",
        "abc123",
    )
    .await
    .expect("Login should succeed");

    LookupClient::new(channel, BearerToken::new(&token).expect("token should be ASCII"))
}
