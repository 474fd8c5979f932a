//! Opening an upload session and the records that describe it.

use crate::credential::Credential;
use crate::error::UploadError;
use crate::plan::ChunkPlan;
use crate::platform::PlatformAdapter;
use derive_builder::Builder;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;

/// Who may see the uploaded post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    SelfOnly,
    FollowersOnly,
    MutualOnly,
    Public,
}

/// Caller-chosen post options. Anything left unset takes the platform's default.
#[derive(Debug, Clone, Default, Builder, Serialize, Deserialize)]
#[builder(default)]
pub struct PostSettings {
    /// Title, or caption on platforms without a separate title.
    #[builder(setter(into, strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[builder(setter(into, strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[builder(setter(each(name = "tag", into)))]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[builder(setter(into, strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,

    #[builder(setter(into, strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_language: Option<String>,

    #[builder(setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,

    #[builder(setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_duet: Option<bool>,

    #[builder(setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_stitch: Option<bool>,

    #[builder(setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_comments: Option<bool>,

    /// Offset into the video of the frame to use as cover image.
    #[builder(setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none", with = "millis")]
    pub cover_frame: Option<Duration>,
}

impl PostSettings {
    pub fn builder() -> PostSettingsBuilder {
        PostSettingsBuilder::default()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// What the negotiator asks the platform for.
#[derive(Debug, Clone, Copy)]
pub struct SessionRequest<'a> {
    pub plan: &'a ChunkPlan,
    pub settings: &'a PostSettings,
}

/// What the platform answers with when it opens a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionTarget {
    pub session_id: String,
    pub upload_url: String,
}

/// One in-flight upload.
///
/// `offset` only advances when a chunk has been confirmed by the platform, so it always satisfies
/// `0 <= offset <= total_bytes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub session_id: String,
    pub upload_url: String,
    pub plan: ChunkPlan,
    offset: u64,
}

impl UploadSession {
    pub fn new(target: SessionTarget, plan: ChunkPlan) -> Self {
        Self {
            session_id: target.session_id,
            upload_url: target.upload_url,
            plan,
            offset: 0,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.plan.total_bytes()
    }

    pub fn chunk_size(&self) -> u64 {
        self.plan.chunk_size()
    }

    pub fn chunk_count(&self) -> usize {
        self.plan.len()
    }

    /// Bytes confirmed received by the platform so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_complete(&self) -> bool {
        self.offset == self.total_bytes()
    }

    pub(crate) fn confirm(&mut self, through: u64) {
        debug_assert!(through >= self.offset && through <= self.total_bytes());
        self.offset = through.min(self.total_bytes());
    }
}

/// Where the upload ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UploadStatus {
    /// Waiting for the creator to finish posting on the platform itself.
    QueuedForReview,
    Published,
    Failed,
}

/// Outcome handed back to the caller, who decides where to record it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    pub content_id: String,
    pub status: UploadStatus,
    pub message: String,
    pub completed_at: Timestamp,
}

/// Opens upload sessions on one platform.
#[derive(Debug)]
pub struct SessionNegotiator<'a, P> {
    adapter: &'a P,
    http: &'a reqwest::Client,
}

impl<'a, P: PlatformAdapter> SessionNegotiator<'a, P> {
    pub fn new(adapter: &'a P, http: &'a reqwest::Client) -> Self {
        Self { adapter, http }
    }

    /// Checks the size against the platform limit, plans the chunks, and opens the session.
    ///
    /// Exactly one request goes out. Any non-2xx answer, or an answer missing either the
    /// transfer endpoint or the session identifier, is a [`UploadError::Negotiation`].
    #[instrument(skip(self, credential, settings), fields(platform = %self.adapter.platform()))]
    pub async fn initialize(
        &self,
        credential: &Credential,
        file_size: u64,
        settings: &PostSettings,
    ) -> Result<UploadSession, UploadError> {
        let platform = self.adapter.platform();
        let limits = self.adapter.chunk_limits();
        if file_size > limits.max_file_size {
            return Err(UploadError::SizeLimitExceeded {
                platform,
                size: file_size,
                max: limits.max_file_size,
            });
        }
        let plan = ChunkPlan::new(file_size, &limits).ok_or_else(|| UploadError::Negotiation {
            platform,
            http_status: None,
            platform_code: None,
            platform_message: "cannot open a session for an empty file".to_string(),
        })?;

        let target = self
            .adapter
            .init_session(self.http, credential, SessionRequest {
                plan: &plan,
                settings,
            })
            .await?;

        if target.upload_url.is_empty() || target.session_id.is_empty() {
            return Err(UploadError::Negotiation {
                platform,
                http_status: None,
                platform_code: None,
                platform_message: "response is missing the upload URL or session id".to_string(),
            });
        }

        tracing::debug!(
            session_id = %target.session_id,
            chunks = plan.len(),
            chunk_size = plan.chunk_size(),
            "opened upload session"
        );
        Ok(UploadSession::new(target, plan))
    }
}
