use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tonic::{Request, Response, Status};
use tracing::{error, info, warn};

use crate::auth::{CredentialStore, TokenAuthority};
use crate::proto::auth_service_server::AuthService;
use crate::proto::{LoginRequest, LoginResponse};

/// gRPC service exchanging a username and password for a bearer token.
pub struct AuthServiceImpl {
    credentials: Arc<CredentialStore>,
    authority: Arc<TokenAuthority>,
}

impl AuthServiceImpl {
    /// Creates the login service over the given users and signing authority.
    pub fn new(credentials: Arc<CredentialStore>, authority: Arc<TokenAuthority>) -> Self {
        Self {
            credentials,
            authority,
        }
    }

    #[allow(clippy::result_large_err)]
    fn validate_login(request: &LoginRequest) -> Result<(), Status> {
        if request.username.is_empty() || request.password.is_empty() {
            return Err(Status::invalid_argument(
                "must provide username and password",
            ));
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl AuthService for AuthServiceImpl {
    async fn login(
        &self,
        request: Request<LoginRequest>,
    ) -> Result<Response<LoginResponse>, Status> {
        let start = Instant::now();
        counter!("auth.login.requests").increment(1);

        let req = request.into_inner();
        Self::validate_login(&req)?;

        let username = req.username.clone();
        let credentials = Arc::clone(&self.credentials);
        let verified = tokio::task::spawn_blocking(move || {
            credentials
                .authenticate(&req.username, &req.password)
                .cloned()
        })
        .await
        .map_err(|e| Status::internal(format!("Credential check failed: {e}")))?;

        histogram!("auth.login.duration").record(start.elapsed().as_secs_f64());

        let Some(credential) = verified else {
            counter!("auth.login.failure").increment(1);
            warn!(username = %username, "login refused");
            return Err(Status::permission_denied("invalid username or password"));
        };

        let token = self.authority.issue(&credential).map_err(|e| {
            error!(username = %username, error = %e, "token signing failed");
            Status::from(e)
        })?;

        counter!("auth.login.success").increment(1);
        info!(subject = %credential.username(), "login succeeded");

        Ok(Response::new(LoginResponse { token }))
    }
}

#[cfg(test)]
mod tests {
    use tonic::Code;

    use super::*;
    use crate::auth::{Credential, DEFAULT_TOKEN_TTL};

    fn service() -> (AuthServiceImpl, Arc<TokenAuthority>) {
        let credentials = CredentialStore::new(vec![
            Credential::new("vector", "Vic Vector", "abc123").unwrap(),
        ])
        .unwrap();
        let authority = Arc::new(TokenAuthority::new(b"a1b2c3d", DEFAULT_TOKEN_TTL));
        (
            AuthServiceImpl::new(Arc::new(credentials), Arc::clone(&authority)),
            authority,
        )
    }

    fn login(username: &str, password: &str) -> Request<LoginRequest> {
        Request::new(LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    #[tokio::test]
    async fn login_issues_verifiable_token() {
        let (service, authority) = service();

        let token = service
            .login(login("vector", "abc123"))
            .await
            .unwrap()
            .into_inner()
            .token;

        let claims = authority.verify(&token).unwrap();
        assert_eq!(claims.sub, "vector");
        assert_eq!(claims.name, "Vic Vector");
    }

    #[tokio::test]
    async fn wrong_password_is_permission_denied() {
        let (service, _) = service();
        let err = service.login(login("vector", "abc124")).await.unwrap_err();
        assert_eq!(err.code(), Code::PermissionDenied);
    }

    #[tokio::test]
    async fn unknown_user_is_permission_denied() {
        let (service, _) = service();
        let err = service.login(login("mallory", "abc123")).await.unwrap_err();
        assert_eq!(err.code(), Code::PermissionDenied);
    }

    #[tokio::test]
    async fn empty_fields_are_invalid() {
        let (service, _) = service();

        let err = service.login(login("", "abc123")).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);

        let err = service.login(login("vector", "")).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }
}
