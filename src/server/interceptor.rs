use std::sync::{Arc, Mutex};
use std::time::Instant;

use metrics::counter;
use tonic::metadata::MetadataMap;
use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::{debug, info, warn};

use super::config::RateLimitSettings;
use super::context::AuthContext;
use crate::auth::{TokenAuthority, TokenError};

/// Metadata key carrying the bearer token.
pub const AUTHORIZATION_HEADER: &str = "authorization";

const BEARER_PREFIX: &str = "Bearer ";

/// One step of an [`InterceptorChain`].
///
/// Runs before the handler future is created: once per unary call and once
/// per stream at establishment.
pub trait CallInterceptor: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Passes the request on, possibly enriched, or rejects the call.
    #[allow(clippy::result_large_err)]
    fn intercept(&self, request: Request<()>) -> Result<Request<()>, Status>;
}

/// Ordered list of interceptors applied as one tonic [`Interceptor`].
///
/// The first rejection ends the chain; later interceptors never see the call.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn CallInterceptor>>,
}

impl InterceptorChain {
    /// Creates an empty chain that accepts every call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `interceptor` to the end of the chain.
    pub fn with(mut self, interceptor: impl CallInterceptor) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Names of the interceptors, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// Number of interceptors in the chain.
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns true if the chain has no interceptors.
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}

impl Interceptor for InterceptorChain {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        for interceptor in &self.interceptors {
            request = interceptor.intercept(request).map_err(|status| {
                debug!(
                    interceptor = interceptor.name(),
                    code = ?status.code(),
                    "call rejected"
                );
                status
            })?;
        }
        Ok(request)
    }
}

/// Logs every inbound call.
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestLogger;

impl CallInterceptor for RequestLogger {
    fn name(&self) -> &'static str {
        "request-logger"
    }

    fn intercept(&self, request: Request<()>) -> Result<Request<()>, Status> {
        counter!("rpc.calls").increment(1);

        let metadata = request.metadata();
        let user_agent = metadata
            .get("user-agent")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-");
        let timeout = metadata
            .get("grpc-timeout")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-");

        info!(
            remote = ?request.remote_addr(),
            user_agent,
            timeout,
            authorized = metadata.contains_key(AUTHORIZATION_HEADER),
            "inbound call"
        );
        Ok(request)
    }
}

/// Token bucket shared by every call on the server.
///
/// Holds `burst` tokens and refills at `requests_per_minute`. Clones share
/// one bucket.
#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<BucketState>>,
    rate: u64,
    burst: u64,
}

struct BucketState {
    tokens: f64,
    last_update: Instant,
}

impl RateLimiter {
    /// Creates a limiter from configuration settings.
    pub fn from_config(settings: &RateLimitSettings) -> Self {
        Self::new(settings.requests_per_minute, settings.burst)
    }

    /// Creates a limiter with a full bucket.
    pub fn new(requests_per_minute: u64, burst: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(BucketState {
                tokens: burst as f64,
                last_update: Instant::now(),
            })),
            rate: requests_per_minute,
            burst,
        }
    }

    /// Takes one token, or fails with `ResourceExhausted` when the bucket is
    /// empty.
    #[allow(clippy::result_large_err)]
    pub fn check(&self) -> Result<(), Status> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Status::internal("Rate limiter state poisoned"))?;
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_update).as_secs_f64();

        let tokens_per_second = self.rate as f64 / 60.0;
        state.tokens = (state.tokens + elapsed * tokens_per_second).min(self.burst as f64);
        state.last_update = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            counter!("rpc.rate_limited").increment(1);
            Err(Status::resource_exhausted("Rate limit exceeded"))
        }
    }
}

impl CallInterceptor for RateLimiter {
    fn name(&self) -> &'static str {
        "rate-limiter"
    }

    fn intercept(&self, request: Request<()>) -> Result<Request<()>, Status> {
        self.check()?;
        Ok(request)
    }
}

/// Rejects calls without a valid bearer token.
///
/// On success the caller's [`AuthContext`] is placed in the request
/// extensions for the handler.
#[derive(Clone)]
pub struct TokenValidator {
    authority: Arc<TokenAuthority>,
}

impl TokenValidator {
    /// Creates a validator checking tokens against `authority`.
    pub fn new(authority: Arc<TokenAuthority>) -> Self {
        Self { authority }
    }

    #[allow(clippy::result_large_err)]
    fn authenticate(&self, metadata: &MetadataMap) -> Result<AuthContext, TokenError> {
        let token = bearer_token(metadata)?;
        let claims = self.authority.verify(token)?;
        Ok(AuthContext {
            subject: claims.sub,
            display_name: claims.name,
        })
    }
}

impl CallInterceptor for TokenValidator {
    fn name(&self) -> &'static str {
        "token-validator"
    }

    fn intercept(&self, mut request: Request<()>) -> Result<Request<()>, Status> {
        match self.authenticate(request.metadata()) {
            Ok(auth) => {
                debug!(subject = %auth.subject, "token accepted");
                request.extensions_mut().insert(auth);
                Ok(request)
            }
            Err(err) => {
                counter!("auth.token.rejected").increment(1);
                warn!(error = %err, "token rejected");
                Err(err.into())
            }
        }
    }
}

/// Extracts the token from the `authorization` metadata entry.
///
/// A leading `Bearer ` is optional.
fn bearer_token(metadata: &MetadataMap) -> Result<&str, TokenError> {
    let value = metadata
        .get(AUTHORIZATION_HEADER)
        .ok_or(TokenError::Missing)?
        .to_str()
        .map_err(|_| TokenError::Malformed("authorization value is not ASCII".to_string()))?;

    let token = value.strip_prefix(BEARER_PREFIX).unwrap_or(value).trim();
    if token.is_empty() {
        return Err(TokenError::Missing);
    }
    Ok(token)
}
