//! The per-platform half of the upload client.
//!
//! Every integration supplies one [`PlatformAdapter`]. The authorization manager, negotiator,
//! and transfer engine are written once against this trait; what differs between platforms
//! (endpoint URLs, scope syntax, request and response shapes, chunk limits, whether finalizing
//! is a separate call) lives behind it.

use crate::credential::{Credential, Platform};
use crate::error::{AuthError, UploadError};
use crate::pkce::PkceExchange;
use crate::plan::ChunkLimits;
use crate::session::{SessionRequest, SessionTarget, UploadResult, UploadSession};
use crate::transfer::TransferReceipt;
use http::StatusCode;
use oauth2::basic::BasicTokenResponse;
use oauth2::{AuthorizationCode, PkceCodeVerifier, RefreshToken};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::future::Future;

pub mod tiktok;
pub mod youtube;

pub use tiktok::TikTok;
pub use youtube::YouTube;

/// The registered OAuth application used to talk to one platform environment.
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthApp {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub redirect_url: String,
}

impl OAuthApp {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: Option<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
            redirect_url: redirect_url.into(),
        }
    }

    /// The same application, redirected somewhere else for this attempt.
    pub fn with_redirect(&self, redirect_url: impl Into<String>) -> Self {
        Self {
            redirect_url: redirect_url.into(),
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for OAuthApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthApp")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[redacted]"))
            .field("redirect_url", &self.redirect_url)
            .finish()
    }
}

/// What is traded in at the token endpoint.
pub enum TokenGrant {
    AuthorizationCode {
        code: AuthorizationCode,
        verifier: PkceCodeVerifier,
    },
    Refresh(RefreshToken),
}

/// The capability set one platform integration provides.
///
/// Implementations are selected at construction time; there is no shared base behavior beyond
/// the defaults below.
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Authorization URL the operator opens in a browser.
    fn build_auth_url(&self, app: &OAuthApp, pkce: &PkceExchange) -> Result<Url, AuthError>;

    /// Trades a grant for tokens at the platform's token endpoint.
    fn exchange_token(
        &self,
        http: &reqwest::Client,
        app: &OAuthApp,
        grant: TokenGrant,
    ) -> impl Future<Output = Result<BasicTokenResponse, AuthError>> + Send;

    /// Invalidates `credential` on the platform side.
    fn revoke(
        &self,
        http: &reqwest::Client,
        app: &OAuthApp,
        credential: &Credential,
    ) -> impl Future<Output = Result<(), AuthError>> + Send;

    fn chunk_limits(&self) -> ChunkLimits;

    /// Opens an upload session. One request, no retries.
    fn init_session(
        &self,
        http: &reqwest::Client,
        credential: &Credential,
        request: SessionRequest<'_>,
    ) -> impl Future<Output = Result<SessionTarget, UploadError>> + Send;

    /// `Content-Type` of every chunk PUT.
    fn media_type(&self) -> &str {
        "video/mp4"
    }

    /// Whether chunk PUTs carry the bearer token. Upload URLs that embed their own
    /// authorization should not see it.
    fn chunk_needs_auth(&self) -> bool {
        true
    }

    /// Whether a chunk PUT answered with `status` was received. `is_last` is set for the
    /// final chunk of the session.
    fn accepts_chunk_status(&self, status: StatusCode, _is_last: bool) -> bool {
        matches!(
            status,
            StatusCode::OK | StatusCode::CREATED | StatusCode::PARTIAL_CONTENT
        )
    }

    /// Turns a fully transferred session into a result, calling the platform if it needs an
    /// explicit publish step.
    fn finalize(
        &self,
        http: &reqwest::Client,
        credential: &Credential,
        session: &UploadSession,
        receipt: &TransferReceipt,
    ) -> impl Future<Output = Result<UploadResult, UploadError>> + Send;
}

/// Reads the body of a failed response for diagnostics, tolerating unreadable bodies.
pub(crate) async fn failure_body(response: reqwest::Response) -> (StatusCode, String) {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    (status, body)
}

/// Shared OAuth2 plumbing for the adapters.
pub(crate) mod oauth {
    use super::{OAuthApp, TokenGrant};
    use crate::credential::Platform;
    use crate::error::AuthError;
    use crate::pkce::PkceExchange;
    use oauth2::basic::{BasicClient, BasicTokenResponse};
    use oauth2::{
        AuthType, AuthUrl, ClientId, ClientSecret, RedirectUrl, RequestTokenError, Scope, TokenUrl,
    };
    use reqwest::Url;

    pub(crate) fn authorize_url(
        platform: Platform,
        app: &OAuthApp,
        auth_url: &Url,
        scope: &str,
        pkce: &PkceExchange,
        extra: &[(&str, &str)],
    ) -> Result<Url, AuthError> {
        let redirect = redirect_url(platform, app)?;
        let client = BasicClient::new(ClientId::new(app.client_id.clone()))
            .set_auth_uri(AuthUrl::from_url(auth_url.clone()))
            .set_redirect_uri(redirect);

        let state = pkce.state().clone();
        let mut request = client
            .authorize_url(move || state)
            .add_scope(Scope::new(scope.to_string()))
            .set_pkce_challenge(pkce.challenge().clone());
        for (k, v) in extra {
            request = request.add_extra_param(*k, *v);
        }
        let (url, _state) = request.url();
        Ok(url)
    }

    pub(crate) async fn exchange(
        platform: Platform,
        http: &reqwest::Client,
        app: &OAuthApp,
        token_url: &Url,
        grant: TokenGrant,
        extra: &[(&str, &str)],
    ) -> Result<BasicTokenResponse, AuthError> {
        let mut client = BasicClient::new(ClientId::new(app.client_id.clone()))
            .set_auth_type(AuthType::RequestBody)
            .set_token_uri(TokenUrl::from_url(token_url.clone()))
            .set_redirect_uri(redirect_url(platform, app)?);
        if let Some(secret) = &app.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }

        let result = match grant {
            TokenGrant::AuthorizationCode { code, verifier } => {
                tracing::debug!(%platform, "exchanging authorization code");
                let mut request = client.exchange_code(code).set_pkce_verifier(verifier);
                for (k, v) in extra {
                    request = request.add_extra_param(*k, *v);
                }
                request.request_async(http).await
            }
            TokenGrant::Refresh(refresh_token) => {
                tracing::debug!(%platform, "refreshing access token");
                let mut request = client.exchange_refresh_token(&refresh_token);
                for (k, v) in extra {
                    request = request.add_extra_param(*k, *v);
                }
                request.request_async(http).await
            }
        };

        result.map_err(|e| match e {
            RequestTokenError::ServerResponse(response) => AuthError::Denied {
                platform,
                message: response
                    .error_description()
                    .cloned()
                    .unwrap_or_else(|| response.error().to_string()),
            },
            RequestTokenError::Request(e) => AuthError::Transient {
                platform,
                message: e.to_string(),
            },
            RequestTokenError::Parse(e, _) => AuthError::Denied {
                platform,
                message: format!("unexpected token response: {e}"),
            },
            RequestTokenError::Other(message) => AuthError::Denied { platform, message },
        })
    }

    fn redirect_url(platform: Platform, app: &OAuthApp) -> Result<RedirectUrl, AuthError> {
        RedirectUrl::new(app.redirect_url.clone()).map_err(|e| AuthError::Denied {
            platform,
            message: format!("invalid redirect URL '{}': {e}", app.redirect_url),
        })
    }
}

/// Parses a JSON response body, mapping failures with `on_error`.
pub(crate) async fn json_body<T, E>(
    response: reqwest::Response,
    on_error: impl FnOnce(String) -> E,
) -> Result<T, E>
where
    T: serde::de::DeserializeOwned,
{
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return Err(on_error(format!("read response body: {e}"))),
    };
    serde_json::from_slice(&bytes).map_err(|e| on_error(format!("parse response body: {e}")))
}
