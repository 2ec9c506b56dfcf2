//! Server side of the lookup service.
//!
//! Both gRPC services share one port. Every call passes through an
//! [`InterceptorChain`] before its handler runs: `RequestLogger`, then the
//! shared `RateLimiter`, then (query service only) `TokenValidator`.

/// Login RPC.
pub mod auth;
/// Server configuration.
pub mod config;
/// Per-call deadline and identity.
pub mod context;
/// Interceptor chain and its steps.
pub mod interceptor;
/// Query RPCs.
pub mod service;
/// In-memory record store.
pub mod state;

use std::sync::Arc;

use tonic::service::interceptor::InterceptedService;

pub use auth::AuthServiceImpl;
pub use config::ServerConfig;
pub use context::{AuthContext, CallContext};
pub use interceptor::{
    CallInterceptor, InterceptorChain, RateLimiter, RequestLogger, TokenValidator,
};
pub use service::QueryServiceImpl;
pub use state::RecordStore;

use crate::auth::{CredentialStore, TokenAuthority};
use crate::proto::auth_service_server::AuthServiceServer;
use crate::proto::query_service_server::QueryServiceServer;

/// Login service wrapped in its interceptor chain.
pub type AuthServer = InterceptedService<AuthServiceServer<AuthServiceImpl>, InterceptorChain>;

/// Query service wrapped in its interceptor chain.
pub type QueryServer = InterceptedService<QueryServiceServer<QueryServiceImpl>, InterceptorChain>;

/// The two services ready to be added to a tonic `Server`.
pub struct Services {
    /// `AuthService`, open to unauthenticated callers.
    pub auth: AuthServer,
    /// `QueryService`, requiring a bearer token.
    pub query: QueryServer,
}

impl Services {
    /// Wires both services and their interceptor chains.
    ///
    /// `limiter` is shared by both chains; pass `None` to disable rate
    /// limiting.
    pub fn new(
        store: RecordStore,
        credentials: CredentialStore,
        authority: TokenAuthority,
        limiter: Option<RateLimiter>,
    ) -> Self {
        let authority = Arc::new(authority);

        let mut auth_chain = InterceptorChain::new().with(RequestLogger);
        let mut query_chain = InterceptorChain::new().with(RequestLogger);
        if let Some(limiter) = limiter {
            auth_chain = auth_chain.with(limiter.clone());
            query_chain = query_chain.with(limiter);
        }
        let query_chain = query_chain.with(TokenValidator::new(Arc::clone(&authority)));

        let auth = AuthServiceImpl::new(Arc::new(credentials), authority);
        let query = QueryServiceImpl::new(store);

        Self {
            auth: AuthServiceServer::with_interceptor(auth, auth_chain),
            query: QueryServiceServer::with_interceptor(query, query_chain),
        }
    }
}
