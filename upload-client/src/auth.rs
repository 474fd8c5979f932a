//! Producing a usable bearer credential with as few operator interactions as possible.

use crate::credential::{Credential, CredentialStore, Environment, Platform};
use crate::error::AuthError;
use crate::pkce::PkceExchange;
use crate::platform::{OAuthApp, PlatformAdapter, TokenGrant};
use oauth2::{AuthorizationCode, CsrfToken};
use reqwest::Url;
use std::future::Future;
use tracing::instrument;

/// Where authorization codes come from.
///
/// The operator has to approve access in a browser at least once. How the resulting code gets
/// back to us (typed at a prompt, caught by a local redirect listener, or not at all) is up to
/// the implementation.
pub trait AuthorizationCodeProvider: Send + Sync {
    /// Redirect URL to use for the next attempt, for providers that receive the redirect
    /// themselves. `None` keeps the application's registered redirect.
    fn redirect_url(
        &self,
        _platform: Platform,
    ) -> impl Future<Output = Result<Option<String>, AuthError>> + Send {
        async { Ok(None) }
    }

    /// Has the operator visit the prompt's URL and returns the code they were redirected with.
    ///
    /// `Ok(None)` means the operator declined or nobody is there to ask.
    fn authorization_code(
        &self,
        prompt: AuthorizationPrompt<'_>,
    ) -> impl Future<Output = Result<Option<AuthorizationCode>, AuthError>> + Send;
}

impl<C: AuthorizationCodeProvider> AuthorizationCodeProvider for &C {
    fn redirect_url(
        &self,
        platform: Platform,
    ) -> impl Future<Output = Result<Option<String>, AuthError>> + Send {
        (**self).redirect_url(platform)
    }

    fn authorization_code(
        &self,
        prompt: AuthorizationPrompt<'_>,
    ) -> impl Future<Output = Result<Option<AuthorizationCode>, AuthError>> + Send {
        (**self).authorization_code(prompt)
    }
}

/// One pending authorization attempt.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationPrompt<'a> {
    pub platform: Platform,
    pub url: &'a Url,
    /// Nonce the redirect must echo back as `state`.
    pub state: &'a CsrfToken,
}

impl AuthorizationPrompt<'_> {
    pub(crate) fn denied(&self, message: impl Into<String>) -> AuthError {
        AuthError::Denied {
            platform: self.platform,
            message: message.into(),
        }
    }
}

/// Never asks anyone. Unattended runs fail instead of blocking on a prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive;

impl AuthorizationCodeProvider for NonInteractive {
    async fn authorization_code(
        &self,
        prompt: AuthorizationPrompt<'_>,
    ) -> Result<Option<AuthorizationCode>, AuthError> {
        tracing::warn!(url = %prompt.url, "interactive authorization required but disabled");
        Ok(None)
    }
}

/// Hands out credentials for one platform environment.
///
/// Cached credentials are used as-is while valid; expired ones are refreshed silently when
/// possible; otherwise the operator is sent through the PKCE authorization-code flow via the
/// [`AuthorizationCodeProvider`]. Every credential obtained is persisted before it is returned.
#[derive(Debug)]
pub struct AuthorizationManager<P, C> {
    adapter: P,
    app: OAuthApp,
    environment: Environment,
    store: CredentialStore,
    codes: C,
    http: reqwest::Client,
}

impl<P, C> AuthorizationManager<P, C>
where
    P: PlatformAdapter,
    C: AuthorizationCodeProvider,
{
    pub fn new(
        adapter: P,
        app: OAuthApp,
        environment: Environment,
        store: CredentialStore,
        codes: C,
        http: reqwest::Client,
    ) -> Self {
        Self {
            adapter,
            app,
            environment,
            store,
            codes,
            http,
        }
    }

    pub fn adapter(&self) -> &P {
        &self.adapter
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Returns a credential that is valid right now.
    ///
    /// The whole load, refresh, authorize, save sequence runs under the store's lock for this
    /// platform and environment, so two processes never both prompt the operator.
    ///
    /// A refresh token the platform rejects is not an error: the operator is asked to
    /// authorize again. Network failures are returned as [`AuthError::Transient`] without
    /// retrying.
    #[instrument(skip(self), fields(platform = %self.adapter.platform(), environment = %self.environment))]
    pub async fn obtain(&self) -> Result<Credential, AuthError> {
        let platform = self.adapter.platform();
        let _lock = self.store.lock(platform, self.environment).await?;

        let cached = self.store.load(platform, self.environment).await?;
        if let Some(credential) = &cached {
            if credential.is_valid() {
                tracing::debug!("using cached credential");
                return Ok(credential.clone());
            }
            tracing::debug!(expired_at = %credential.expires_at, "cached credential expired");
        }

        if let Some(refresh_token) = cached.as_ref().and_then(|c| c.refresh_token.clone()) {
            match self
                .adapter
                .exchange_token(&self.http, &self.app, TokenGrant::Refresh(refresh_token.clone()))
                .await
            {
                Ok(token) => {
                    let credential = Credential::from_token_response(
                        platform,
                        self.environment,
                        &token,
                        Some(refresh_token),
                    );
                    self.store.save(&credential).await?;
                    tracing::info!("refreshed access token");
                    return Ok(credential);
                }
                Err(AuthError::Denied { message, .. }) => {
                    tracing::warn!(%message, "refresh token rejected, re-authorizing");
                }
                Err(e) => return Err(e),
            }
        }

        let credential = self.authorize(cached.is_some()).await?;
        self.store.save(&credential).await?;
        tracing::info!("authorized");
        Ok(credential)
    }

    /// Runs the interactive PKCE flow once.
    async fn authorize(&self, had_credential: bool) -> Result<Credential, AuthError> {
        let platform = self.adapter.platform();
        let pkce = PkceExchange::new();
        let app = match self.codes.redirect_url(platform).await? {
            Some(redirect) => self.app.with_redirect(redirect),
            None => self.app.clone(),
        };
        let url = self.adapter.build_auth_url(&app, &pkce)?;
        tracing::info!(%url, "asking operator to authorize");

        let prompt = AuthorizationPrompt {
            platform,
            url: &url,
            state: pkce.state(),
        };
        let Some(code) = self.codes.authorization_code(prompt).await? else {
            return Err(if had_credential {
                AuthError::Expired { platform }
            } else {
                AuthError::Denied {
                    platform,
                    message: "authorization was not granted".to_string(),
                }
            });
        };

        let token = self
            .adapter
            .exchange_token(
                &self.http,
                &app,
                TokenGrant::AuthorizationCode {
                    code,
                    verifier: pkce.into_verifier(),
                },
            )
            .await?;
        Ok(Credential::from_token_response(
            platform,
            self.environment,
            &token,
            None,
        ))
    }

    /// Revokes the cached credential with the platform and deletes it locally.
    ///
    /// Returns `false` if there was nothing cached. A platform that no longer recognizes the
    /// token does not prevent the local copy from being removed.
    #[instrument(skip(self), fields(platform = %self.adapter.platform(), environment = %self.environment))]
    pub async fn revoke(&self) -> Result<bool, AuthError> {
        let platform = self.adapter.platform();
        let _lock = self.store.lock(platform, self.environment).await?;
        let Some(credential) = self.store.load(platform, self.environment).await? else {
            return Ok(false);
        };

        match self.adapter.revoke(&self.http, &self.app, &credential).await {
            Ok(()) => tracing::info!("revoked credential"),
            Err(AuthError::Denied { message, .. }) => {
                tracing::warn!(%message, "platform refused revocation, removing local copy anyway");
            }
            Err(e) => return Err(e),
        }
        self.store.remove(platform, self.environment).await
    }
}
