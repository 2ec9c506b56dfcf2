use std::future::Future;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};
use tonic::{Request, Status};

/// Metadata key carrying the caller's deadline.
const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Identity of a caller whose token was accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthContext {
    /// Username from the token's `sub` claim.
    pub subject: String,
    /// Display name from the token's `name` claim.
    pub display_name: String,
}

/// Per-call state visible to handlers: the caller's deadline and identity.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    auth: Option<AuthContext>,
}

impl CallContext {
    /// Captures the deadline and validated identity of an inbound request.
    pub fn from_request<T>(request: &Request<T>) -> Self {
        let deadline = request
            .metadata()
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_grpc_timeout)
            .map(|timeout| Instant::now() + timeout);

        Self {
            deadline,
            auth: request.extensions().get::<AuthContext>().cloned(),
        }
    }

    /// Creates a context with an explicit deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Point in time after which the caller no longer waits.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Identity attached by the token validator, if any.
    pub fn auth(&self) -> Option<&AuthContext> {
        self.auth.as_ref()
    }

    /// Subject for log fields.
    pub fn subject(&self) -> &str {
        self.auth
            .as_ref()
            .map(|auth| auth.subject.as_str())
            .unwrap_or("anonymous")
    }

    /// Runs `fut` to completion or until the call deadline passes.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T, Status>
    where
        F: Future<Output = Result<T, Status>>,
    {
        match self.deadline {
            Some(deadline) => timeout_at(deadline, fut)
                .await
                .map_err(|_| Status::deadline_exceeded("call deadline exceeded"))?,
            None => fut.await,
        }
    }
}

/// Parses a `grpc-timeout` value such as `1500m` or `5S`.
///
/// The value is at most eight ASCII digits followed by one unit:
/// `H` hours, `M` minutes, `S` seconds, `m` millis, `u` micros, `n` nanos.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount = digits.parse::<u64>().ok()?;

    let duration = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(duration)
}
