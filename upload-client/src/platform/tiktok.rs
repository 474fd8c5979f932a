//! TikTok Content Posting API, inbox upload flow.
//!
//! Videos land in the creator's inbox. Posting them to the feed is done by the creator in the
//! TikTok app, so a successful upload here ends at [`UploadStatus::QueuedForReview`].
//!
//! See <https://developers.tiktok.com/doc/content-posting-api-reference-upload-video> and
//! <https://developers.tiktok.com/doc/content-posting-api-media-transfer-guide>.

use super::{OAuthApp, PlatformAdapter, TokenGrant, failure_body, json_body, oauth};
use crate::credential::{Credential, Platform};
use crate::error::{AuthError, UploadError};
use crate::pkce::PkceExchange;
use crate::plan::ChunkLimits;
use crate::session::{
    SessionRequest, SessionTarget, UploadResult, UploadSession, UploadStatus, Visibility,
};
use crate::transfer::TransferReceipt;
use jiff::Timestamp;
use oauth2::basic::BasicTokenResponse;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::instrument;

const AUTH_URL: &str = "https://www.tiktok.com/v2/auth/authorize/";
const API_BASE: &str = "https://open.tiktokapis.com";
const TOKEN_PATH: &str = "/v2/oauth/token/";
const REVOKE_PATH: &str = "/v2/oauth/revoke/";
const INBOX_INIT_PATH: &str = "/v2/post/publish/inbox/video/init/";
const STATUS_PATH: &str = "/v2/post/publish/status/fetch/";

/// TikTok wants its scopes comma-separated, unlike the OAuth2 default.
const SCOPES: &str = "user.info.basic,video.upload,video.publish";

const MIB: u64 = 1024 * 1024;

/// Single-chunk uploads up to 64 MiB; split chunks between 5 and 64 MiB, the final one up to
/// 128 MiB.
pub const CHUNK_LIMITS: ChunkLimits = ChunkLimits::new(5 * MIB, 64 * MIB, 128 * MIB, 301 * MIB);

#[derive(Debug, Clone)]
pub struct TikTok {
    auth_url: Url,
    api_base: Url,
    limits: ChunkLimits,
}

impl TikTok {
    pub fn new() -> Self {
        Self {
            auth_url: Url::parse(AUTH_URL).expect("Invalid TikTok endpoint URL"),
            api_base: Url::parse(API_BASE).expect("Invalid TikTok endpoint URL"),
            limits: CHUNK_LIMITS,
        }
    }

    /// Points every API call (token, init, status, revoke) at `api_base` instead of
    /// `open.tiktokapis.com`.
    pub fn with_api_base(mut self, api_base: Url) -> Self {
        self.api_base = api_base;
        self
    }

    pub fn with_chunk_limits(mut self, limits: ChunkLimits) -> Self {
        self.limits = limits;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, oauth2::url::ParseError> {
        self.api_base.join(path)
    }

    fn endpoint_for_auth(&self, path: &str) -> Result<Url, AuthError> {
        self.endpoint(path).map_err(|e| AuthError::Denied {
            platform: Platform::TikTok,
            message: format!("invalid endpoint {path}: {e}"),
        })
    }
}

impl Default for TikTok {
    fn default() -> Self {
        Self::new()
    }
}

/// `privacy_level` values accepted by the Content Posting API.
fn privacy_level(visibility: Visibility) -> &'static str {
    match visibility {
        Visibility::SelfOnly => "SELF_ONLY",
        Visibility::FollowersOnly => "FOLLOWER_OF_CREATOR",
        Visibility::MutualOnly => "MUTUAL_FOLLOW_FRIENDS",
        Visibility::Public => "PUBLIC_TO_EVERYONE",
    }
}

#[derive(Debug, Serialize)]
struct InitRequest<'a> {
    source_info: SourceInfo,
    post_info: PostInfo<'a>,
}

#[derive(Debug, Serialize)]
struct SourceInfo {
    source: &'static str,
    video_size: u64,
    chunk_size: u64,
    total_chunk_count: usize,
}

#[derive(Debug, Serialize)]
struct PostInfo<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    privacy_level: &'static str,
    disable_comment: bool,
    disable_duet: bool,
    disable_stitch: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    video_cover_timestamp_ms: Option<u64>,
}

/// Every Content Posting API response wraps its payload like this.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default = "Option::default")]
    data: Option<T>,
    #[serde(default)]
    error: ApiError,
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl ApiError {
    fn is_ok(&self) -> bool {
        self.code.is_empty() || self.code == "ok"
    }
}

#[derive(Debug, Default, Deserialize)]
struct InitData {
    #[serde(default)]
    publish_id: String,
    #[serde(default)]
    upload_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct StatusData {
    #[serde(default)]
    status: String,
    #[serde(default)]
    fail_reason: Option<String>,
}

fn split_failure(status: http::StatusCode, body: &str) -> (Option<String>, String) {
    match serde_json::from_str::<Envelope<serde_json::Value>>(body) {
        Ok(envelope) if !envelope.error.code.is_empty() => {
            (Some(envelope.error.code), envelope.error.message)
        }
        _ if body.is_empty() => (None, status.to_string()),
        _ => (None, body.to_string()),
    }
}

impl PlatformAdapter for TikTok {
    fn platform(&self) -> Platform {
        Platform::TikTok
    }

    fn build_auth_url(&self, app: &OAuthApp, pkce: &PkceExchange) -> Result<Url, AuthError> {
        // TikTok identifies the app by `client_key` rather than `client_id`.
        oauth::authorize_url(
            Platform::TikTok,
            app,
            &self.auth_url,
            SCOPES,
            pkce,
            &[("client_key", app.client_id.as_str())],
        )
    }

    async fn exchange_token(
        &self,
        http: &reqwest::Client,
        app: &OAuthApp,
        grant: TokenGrant,
    ) -> Result<BasicTokenResponse, AuthError> {
        let token_url = self.endpoint_for_auth(TOKEN_PATH)?;
        oauth::exchange(
            Platform::TikTok,
            http,
            app,
            &token_url,
            grant,
            &[("client_key", app.client_id.as_str())],
        )
        .await
    }

    #[instrument(skip_all)]
    async fn revoke(
        &self,
        http: &reqwest::Client,
        app: &OAuthApp,
        credential: &Credential,
    ) -> Result<(), AuthError> {
        let url = self.endpoint_for_auth(REVOKE_PATH)?;
        let mut form = vec![
            ("client_key", app.client_id.as_str()),
            ("token", credential.access_token.secret().as_str()),
        ];
        if let Some(secret) = &app.client_secret {
            form.push(("client_secret", secret.as_str()));
        }
        let response = http
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthError::Transient {
                platform: Platform::TikTok,
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            let (status, body) = failure_body(response).await;
            let (_, message) = split_failure(status, &body);
            return Err(AuthError::Denied {
                platform: Platform::TikTok,
                message,
            });
        }
        Ok(())
    }

    fn chunk_limits(&self) -> ChunkLimits {
        self.limits
    }

    /// The media-transfer URL is pre-authorized for this publish id.
    fn chunk_needs_auth(&self) -> bool {
        false
    }

    #[instrument(skip_all, fields(video_size = request.plan.total_bytes()))]
    async fn init_session(
        &self,
        http: &reqwest::Client,
        credential: &Credential,
        request: SessionRequest<'_>,
    ) -> Result<SessionTarget, UploadError> {
        let negotiation = |http_status, platform_code, platform_message| UploadError::Negotiation {
            platform: Platform::TikTok,
            http_status,
            platform_code,
            platform_message,
        };

        let url = self
            .endpoint(INBOX_INIT_PATH)
            .map_err(|e| negotiation(None, None, format!("invalid endpoint: {e}")))?;
        let settings = request.settings;
        let body = InitRequest {
            source_info: SourceInfo {
                source: "FILE_UPLOAD",
                video_size: request.plan.total_bytes(),
                chunk_size: request.plan.chunk_size(),
                total_chunk_count: request.plan.len(),
            },
            post_info: PostInfo {
                title: settings.title.as_deref(),
                privacy_level: privacy_level(settings.visibility.unwrap_or(Visibility::SelfOnly)),
                disable_comment: !settings.allow_comments.unwrap_or(true),
                disable_duet: !settings.allow_duet.unwrap_or(true),
                disable_stitch: !settings.allow_stitch.unwrap_or(true),
                video_cover_timestamp_ms: settings.cover_frame.map(|d| d.as_millis() as u64),
            },
        };

        let response = http
            .post(url)
            .header("Authorization", credential.bearer())
            .json(&body)
            .send()
            .await
            .map_err(|e| negotiation(None, None, format!("send init request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let (status, body) = failure_body(response).await;
            let (code, message) = split_failure(status, &body);
            return Err(negotiation(Some(status), code, message));
        }

        let envelope: Envelope<InitData> =
            json_body(response, |m| negotiation(Some(status), None, m)).await?;
        if !envelope.error.is_ok() {
            return Err(negotiation(
                Some(status),
                Some(envelope.error.code),
                envelope.error.message,
            ));
        }
        let data = envelope.data.unwrap_or_default();
        tracing::info!(publish_id = %data.publish_id, "upload initialized");
        Ok(SessionTarget {
            session_id: data.publish_id,
            upload_url: data.upload_url,
        })
    }

    #[instrument(skip_all, fields(publish_id = session.session_id.as_str()))]
    async fn finalize(
        &self,
        http: &reqwest::Client,
        credential: &Credential,
        session: &UploadSession,
        _receipt: &TransferReceipt,
    ) -> Result<UploadResult, UploadError> {
        let finalize_error = |http_status, platform_code, platform_message| UploadError::Finalize {
            platform: Platform::TikTok,
            http_status,
            platform_code,
            platform_message,
        };

        let url = self
            .endpoint(STATUS_PATH)
            .map_err(|e| finalize_error(None, None, format!("invalid endpoint: {e}")))?;
        let response = http
            .post(url)
            .header("Authorization", credential.bearer())
            .json(&serde_json::json!({ "publish_id": session.session_id }))
            .send()
            .await
            .map_err(|e| finalize_error(None, None, format!("send status request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let (status, body) = failure_body(response).await;
            let (code, message) = split_failure(status, &body);
            return Err(finalize_error(Some(status), code, message));
        }

        let envelope: Envelope<StatusData> =
            json_body(response, |m| finalize_error(Some(status), None, m)).await?;
        if !envelope.error.is_ok() {
            return Err(finalize_error(
                Some(status),
                Some(envelope.error.code),
                envelope.error.message,
            ));
        }
        let data = envelope.data.unwrap_or_default();

        let (status, message) = match data.status.as_str() {
            "PUBLISH_COMPLETE" => (UploadStatus::Published, "published".to_string()),
            "FAILED" => (
                UploadStatus::Failed,
                data.fail_reason.unwrap_or_else(|| "upload failed".to_string()),
            ),
            // SEND_TO_USER_INBOX, PROCESSING_UPLOAD, PROCESSING_DOWNLOAD
            other => (
                UploadStatus::QueuedForReview,
                format!(
                    "in the creator's inbox ({}); finish posting in the TikTok app",
                    if other.is_empty() { "pending" } else { other }
                ),
            ),
        };
        tracing::info!(?status, "upload finalized");

        Ok(UploadResult {
            content_id: session.session_id.clone(),
            status,
            message,
            completed_at: Timestamp::now(),
        })
    }
}
