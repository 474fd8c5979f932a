//! YouTube Data API v3 resumable uploads.
//!
//! The session is opened with the video resource as JSON metadata; the `Location` header of that
//! response is the URL every chunk goes to. Intermediate chunks are answered with
//! `308 Resume Incomplete`, and the last one with the created video, so there is no separate
//! publish call.

use super::{OAuthApp, PlatformAdapter, TokenGrant, failure_body, oauth};
use crate::credential::{Credential, Platform};
use crate::error::{AuthError, UploadError};
use crate::pkce::PkceExchange;
use crate::plan::ChunkLimits;
use crate::session::{
    SessionRequest, SessionTarget, UploadResult, UploadSession, UploadStatus, Visibility,
};
use crate::transfer::TransferReceipt;
use http::StatusCode;
use jiff::Timestamp;
use oauth2::basic::BasicTokenResponse;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::instrument;

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";
const UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
const SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Every chunk but the last must be a multiple of 256 KiB, which 64 MiB is.
pub const CHUNK_LIMITS: ChunkLimits = ChunkLimits::new(256 * KIB, 64 * MIB, 128 * MIB, 256 * GIB);

#[derive(Debug, Clone)]
pub struct YouTube {
    auth_url: Url,
    token_url: Url,
    revoke_url: Url,
    upload_url: Url,
    limits: ChunkLimits,
}

impl YouTube {
    pub fn new() -> Self {
        Self {
            auth_url: Url::parse(AUTH_URL).expect("Invalid authorization endpoint URL"),
            token_url: Url::parse(TOKEN_URL).expect("Invalid token endpoint URL"),
            revoke_url: Url::parse(REVOKE_URL).expect("Invalid revocation endpoint URL"),
            upload_url: Url::parse(UPLOAD_URL).expect("Invalid upload endpoint URL"),
            limits: CHUNK_LIMITS,
        }
    }

    /// Sends token, revocation, and upload requests to `base` (`/token`, `/revoke`, and
    /// `/upload/youtube/v3/videos` under it).
    pub fn with_api_base(mut self, base: &Url) -> Result<Self, oauth2::url::ParseError> {
        self.token_url = base.join("/token")?;
        self.revoke_url = base.join("/revoke")?;
        self.upload_url = base.join("/upload/youtube/v3/videos")?;
        Ok(self)
    }

    pub fn with_chunk_limits(mut self, limits: ChunkLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl Default for YouTube {
    fn default() -> Self {
        Self::new()
    }
}

fn privacy_status(visibility: Option<Visibility>) -> &'static str {
    match visibility {
        Some(Visibility::Public) => "public",
        Some(Visibility::FollowersOnly | Visibility::MutualOnly) => "unlisted",
        Some(Visibility::SelfOnly) | None => "private",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoResource<'a> {
    snippet: Snippet<'a>,
    status: VideoStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Snippet<'a> {
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    tags: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    category_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_language: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatus {
    privacy_status: &'static str,
    self_declared_made_for_kids: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorReason>,
}

#[derive(Debug, Deserialize)]
struct ErrorReason {
    reason: String,
}

/// The parts of the returned video resource we look at.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertedVideo {
    #[serde(default)]
    id: String,
    #[serde(default)]
    status: Option<InsertedStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertedStatus {
    #[serde(default)]
    upload_status: String,
    #[serde(default)]
    privacy_status: Option<String>,
    #[serde(default)]
    failure_reason: Option<String>,
    #[serde(default)]
    rejection_reason: Option<String>,
}

/// Google reports `{"error": {"code", "message", "status", "errors": [{"reason"}]}}`; the most
/// specific reason wins as the platform code.
fn split_failure(status: StatusCode, body: &str) -> (Option<String>, String) {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody { error }) => {
            let code = error
                .errors
                .into_iter()
                .map(|e| e.reason)
                .next()
                .or(error.status);
            (code, error.message)
        }
        Err(_) if body.is_empty() => (None, status.to_string()),
        Err(_) => (None, body.to_string()),
    }
}

fn session_id(location: &Url) -> String {
    location
        .query_pairs()
        .find(|(k, _)| k == "upload_id")
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| location.to_string())
}

impl PlatformAdapter for YouTube {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    fn build_auth_url(&self, app: &OAuthApp, pkce: &PkceExchange) -> Result<Url, AuthError> {
        // offline access is what gets us a refresh token, and prompting for consent makes Google
        // hand one out again even if the app was authorized before.
        oauth::authorize_url(
            Platform::YouTube,
            app,
            &self.auth_url,
            SCOPE,
            pkce,
            &[("access_type", "offline"), ("prompt", "consent")],
        )
    }

    async fn exchange_token(
        &self,
        http: &reqwest::Client,
        app: &OAuthApp,
        grant: TokenGrant,
    ) -> Result<BasicTokenResponse, AuthError> {
        oauth::exchange(Platform::YouTube, http, app, &self.token_url, grant, &[]).await
    }

    #[instrument(skip_all)]
    async fn revoke(
        &self,
        http: &reqwest::Client,
        _app: &OAuthApp,
        credential: &Credential,
    ) -> Result<(), AuthError> {
        // revoking the refresh token also invalidates every access token minted from it
        let token = credential
            .refresh_token
            .as_ref()
            .map(|t| t.secret())
            .unwrap_or_else(|| credential.access_token.secret());
        let response = http
            .post(self.revoke_url.clone())
            .form(&[("token", token.as_str())])
            .send()
            .await
            .map_err(|e| AuthError::Transient {
                platform: Platform::YouTube,
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            let (status, body) = failure_body(response).await;
            return Err(AuthError::Denied {
                platform: Platform::YouTube,
                message: format!("revocation failed ({status}): {body}"),
            });
        }
        Ok(())
    }

    fn chunk_limits(&self) -> ChunkLimits {
        self.limits
    }

    #[instrument(skip_all, fields(video_size = request.plan.total_bytes()))]
    async fn init_session(
        &self,
        http: &reqwest::Client,
        credential: &Credential,
        request: SessionRequest<'_>,
    ) -> Result<SessionTarget, UploadError> {
        let negotiation = |http_status, platform_code, platform_message| UploadError::Negotiation {
            platform: Platform::YouTube,
            http_status,
            platform_code,
            platform_message,
        };

        let settings = request.settings;
        let resource = VideoResource {
            snippet: Snippet {
                title: settings.title.as_deref().unwrap_or("Untitled"),
                description: settings.description.as_deref(),
                tags: &settings.tags,
                category_id: settings.category_id.as_deref(),
                default_language: settings.default_language.as_deref(),
            },
            status: VideoStatus {
                privacy_status: privacy_status(settings.visibility),
                self_declared_made_for_kids: false,
            },
        };

        let response = http
            .post(self.upload_url.clone())
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .header("Authorization", credential.bearer())
            .header("X-Upload-Content-Length", request.plan.total_bytes())
            .header("X-Upload-Content-Type", self.media_type())
            .json(&resource)
            .send()
            .await
            .map_err(|e| negotiation(None, None, format!("send init request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let (status, body) = failure_body(response).await;
            let (code, message) = split_failure(status, &body);
            return Err(negotiation(Some(status), code, message));
        }

        let Some(location) = response
            .headers()
            .get(http::header::LOCATION)
            .and_then(|v| v.to_str().ok())
        else {
            return Err(negotiation(
                Some(status),
                None,
                "no Location header in resumable session response".to_string(),
            ));
        };
        let location = self
            .upload_url
            .join(location)
            .map_err(|e| negotiation(Some(status), None, format!("bad Location header: {e}")))?;

        let session_id = session_id(&location);
        tracing::info!(%session_id, "resumable session opened");
        Ok(SessionTarget {
            session_id,
            upload_url: location.to_string(),
        })
    }

    /// 308 acknowledges an intermediate chunk. On the last chunk it means bytes are missing.
    fn accepts_chunk_status(&self, status: StatusCode, is_last: bool) -> bool {
        status.is_success() || (!is_last && status == StatusCode::PERMANENT_REDIRECT)
    }

    #[instrument(skip_all, fields(session_id = session.session_id.as_str()))]
    async fn finalize(
        &self,
        _http: &reqwest::Client,
        _credential: &Credential,
        session: &UploadSession,
        receipt: &TransferReceipt,
    ) -> Result<UploadResult, UploadError> {
        let finalize_error = |platform_code, platform_message| UploadError::Finalize {
            platform: Platform::YouTube,
            http_status: Some(receipt.status),
            platform_code,
            platform_message,
        };

        // only reachable with a receipt that did not come from a completed transfer
        if !receipt.status.is_success() {
            return Err(finalize_error(
                None,
                format!(
                    "upload of {} bytes was not acknowledged as complete",
                    session.total_bytes()
                ),
            ));
        }

        let video: InsertedVideo = serde_json::from_slice(&receipt.body)
            .map_err(|e| finalize_error(None, format!("parse video resource: {e}")))?;
        if video.id.is_empty() {
            return Err(finalize_error(None, "video resource has no id".to_string()));
        }

        let (status, message) = match video.status {
            Some(InsertedStatus {
                upload_status,
                failure_reason,
                rejection_reason,
                ..
            }) if matches!(upload_status.as_str(), "failed" | "rejected" | "deleted") => (
                UploadStatus::Failed,
                format!(
                    "upload {upload_status}: {}",
                    failure_reason
                        .or(rejection_reason)
                        .unwrap_or_else(|| "no reason given".to_string())
                ),
            ),
            Some(InsertedStatus { privacy_status, .. }) => (
                UploadStatus::Published,
                format!(
                    "https://www.youtube.com/watch?v={} ({})",
                    video.id,
                    privacy_status.as_deref().unwrap_or("private")
                ),
            ),
            None => (
                UploadStatus::Published,
                format!("https://www.youtube.com/watch?v={}", video.id),
            ),
        };
        tracing::info!(video_id = %video.id, ?status, "upload finalized");

        Ok(UploadResult {
            content_id: video.id,
            status,
            message,
            completed_at: Timestamp::now(),
        })
    }
}
