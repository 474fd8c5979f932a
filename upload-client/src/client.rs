//! The end-to-end upload: authorize, open a session, transfer, finalize.

use crate::auth::{AuthorizationCodeProvider, AuthorizationManager};
use crate::config::Timeouts;
use crate::credential::{Credential, CredentialStore, Environment};
use crate::error::{ConfigError, UploadError};
use crate::platform::{OAuthApp, PlatformAdapter};
use crate::session::{PostSettings, SessionNegotiator, UploadResult, UploadSession};
use crate::transfer::{ChunkProgress, TransferEngine, TransferReceipt};
use std::path::Path;
use tracing::instrument;

/// HTTP client shared by every call an [`UploadClient`] makes.
///
/// Redirects are never followed, and every request is bounded by the control-plane timeout
/// unless it sets its own (chunk PUTs do).
pub fn http_client(timeouts: &Timeouts) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::ClientBuilder::new()
        // SSRF no thank you.
        .redirect(reqwest::redirect::Policy::none())
        .timeout(timeouts.control)
        .build()
}

/// Uploads media files to one platform environment.
#[derive(Debug)]
pub struct UploadClient<P, C> {
    auth: AuthorizationManager<P, C>,
    http: reqwest::Client,
    timeouts: Timeouts,
}

impl<P, C> UploadClient<P, C>
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
        timeouts: Timeouts,
    ) -> Result<Self, ConfigError> {
        let http = http_client(&timeouts)?;
        let auth = AuthorizationManager::new(adapter, app, environment, store, codes, http.clone());
        Ok(Self {
            auth,
            http,
            timeouts,
        })
    }

    pub fn authorization(&self) -> &AuthorizationManager<P, C> {
        &self.auth
    }

    pub fn adapter(&self) -> &P {
        self.auth.adapter()
    }

    pub fn negotiator(&self) -> SessionNegotiator<'_, P> {
        SessionNegotiator::new(self.auth.adapter(), &self.http)
    }

    pub fn transfer_engine(&self) -> TransferEngine<'_, P> {
        TransferEngine::new(self.auth.adapter(), &self.http).with_chunk_timeout(self.timeouts.chunk)
    }

    /// Runs the platform's finalize step for a fully transferred session.
    ///
    /// Separate from [`UploadClient::upload`] so a caller can retry just this step after an
    /// [`UploadError::Finalize`].
    pub async fn finalize(
        &self,
        credential: &Credential,
        session: &UploadSession,
        receipt: &TransferReceipt,
    ) -> Result<UploadResult, UploadError> {
        self.auth
            .adapter()
            .finalize(&self.http, credential, session, receipt)
            .await
    }

    /// Uploads the file at `path` in one pass.
    ///
    /// `on_progress` is called after every chunk the platform confirms.
    #[instrument(skip(self, settings, on_progress), fields(platform = %self.adapter().platform()))]
    pub async fn upload(
        &self,
        path: &Path,
        settings: &PostSettings,
        on_progress: impl FnMut(&ChunkProgress),
    ) -> Result<UploadResult, UploadError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| UploadError::media(path, "stat media file", e))?;
        if !metadata.is_file() {
            return Err(UploadError::Media {
                path: path.to_path_buf(),
                message: "not a regular file".to_string(),
                source: None,
            });
        }
        if metadata.len() == 0 {
            return Err(UploadError::EmptyFile {
                path: path.to_path_buf(),
            });
        }

        let max = self.adapter().chunk_limits().max_file_size;
        if metadata.len() > max {
            return Err(UploadError::SizeLimitExceeded {
                platform: self.adapter().platform(),
                size: metadata.len(),
                max,
            });
        }

        let credential = self.auth.obtain().await?;
        let mut session = self
            .negotiator()
            .initialize(&credential, metadata.len(), settings)
            .await?;
        tracing::info!(
            session_id = %session.session_id,
            chunks = session.chunk_count(),
            bytes = session.total_bytes(),
            "transferring"
        );
        let receipt = self
            .transfer_engine()
            .transfer(&credential, &mut session, path, on_progress)
            .await?;
        let result = self.finalize(&credential, &session, &receipt).await?;
        tracing::info!(content_id = %result.content_id, status = ?result.status, "upload complete");
        Ok(result)
    }
}
