//! Client side of the lookup service.
//!
//! [`login`] trades a username and password for a token, which then goes
//! into a [`BearerToken`] for [`LookupClient`]. Unary calls (`Login`,
//! `Lookup`) run under the [`RetryPolicy`]; streaming calls are never retried.

/// Client configuration.
pub mod config;
/// Bearer token interceptor.
pub mod credentials;
/// Retry policy for unary calls.
pub mod retry;

use std::time::Duration;

use tokio_stream::wrappers::ReceiverStream;
use tonic::service::interceptor::InterceptedService;
use tonic::transport::Channel;
use tonic::{Request, Status, Streaming};
use tracing::debug;

pub use config::ClientConfig;
pub use credentials::BearerToken;
pub use retry::{is_retryable, RetryPolicy};

use crate::proto::auth_service_client::AuthServiceClient;
use crate::proto::query_service_client::QueryServiceClient;
use crate::proto::{self, LoginRequest, LookupRequest};

fn with_timeout<T>(message: T, timeout: Option<Duration>) -> Request<T> {
    let mut request = Request::new(message);
    if let Some(timeout) = timeout {
        request.set_timeout(timeout);
    }
    request
}

/// Logs in and returns the issued token.
pub async fn login(
    channel: Channel,
    policy: &RetryPolicy,
    deadline: Option<Duration>,
    username: &str,
    password: &str,
) -> Result<String, Status> {
    let client = AuthServiceClient::new(channel);
    let message = LoginRequest {
        username: username.to_string(),
        password: password.to_string(),
    };

    let response = policy
        .run(deadline, |budget| {
            let mut client = client.clone();
            let request = with_timeout(message.clone(), budget);
            async move { client.login(request).await }
        })
        .await?;

    debug!(username, "logged in");
    Ok(response.into_inner().token)
}

/// Authenticated query client.
#[derive(Clone)]
pub struct LookupClient {
    inner: QueryServiceClient<InterceptedService<Channel, BearerToken>>,
    policy: RetryPolicy,
    deadline: Option<Duration>,
}

impl LookupClient {
    /// Creates a client sending `token` on every call.
    pub fn new(channel: Channel, token: BearerToken) -> Self {
        Self {
            inner: QueryServiceClient::with_interceptor(channel, token),
            policy: RetryPolicy::default(),
            deadline: None,
        }
    }

    /// Sets the retry policy for unary calls.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the deadline applied to every call.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Unary lookup, retried per the policy.
    pub async fn lookup(&self, code: &str, number: i32) -> Result<Vec<proto::Record>, Status> {
        let message = LookupRequest {
            code: code.to_string(),
            number,
        };

        let response = self
            .policy
            .run(self.deadline, |budget| {
                let mut client = self.inner.clone();
                let request = with_timeout(message.clone(), budget);
                async move { client.lookup(request).await }
            })
            .await?;

        Ok(response.into_inner().items)
    }

    /// Opens a server stream of every matching record.
    pub async fn lookup_stream(
        &self,
        code: &str,
        number: i32,
    ) -> Result<Streaming<proto::Record>, Status> {
        let request = with_timeout(
            LookupRequest {
                code: code.to_string(),
                number,
            },
            self.deadline,
        );
        let response = self.inner.clone().lookup_stream(request).await?;
        Ok(response.into_inner())
    }

    /// Streams `records` to the server and returns the committed batch.
    pub async fn ingest(&self, records: Vec<proto::Record>) -> Result<Vec<proto::Record>, Status> {
        let request = with_timeout(tokio_stream::iter(records), self.deadline);
        let response = self.inner.clone().ingest(request).await?;
        Ok(response.into_inner().items)
    }

    /// Opens a bidirectional find call.
    ///
    /// Requests are sent from the returned channel; drop it to half-close.
    pub async fn find_channel(
        &self,
        buffer: usize,
    ) -> Result<(tokio::sync::mpsc::Sender<LookupRequest>, Streaming<proto::Record>), Status> {
        let (tx, rx) = tokio::sync::mpsc::channel(buffer.max(1));
        let request = with_timeout(ReceiverStream::new(rx), self.deadline);
        let response = self.inner.clone().find(request).await?;
        Ok((tx, response.into_inner()))
    }

    /// Sends all `requests` on one find call and returns the result stream.
    pub async fn find(
        &self,
        requests: Vec<LookupRequest>,
    ) -> Result<Streaming<proto::Record>, Status> {
        let request = with_timeout(tokio_stream::iter(requests), self.deadline);
        let response = self.inner.clone().find(request).await?;
        Ok(response.into_inner())
    }
}
