//! The content manifest: every generated video and where it has been posted.
//!
//! The manifest is shared with the tools that generate content, so fields this crate does not
//! know about are carried through a load/save cycle untouched.

use eyre::Context;
use jiff::Timestamp;
use resumable_upload::{Platform, UploadResult, UploadStatus};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

const MANIFEST_VERSION: &str = "1.0";

/// Prefix of the `url` recorded for uploads that still wait in the creator's inbox.
pub const INBOX_UPLOADED: &str = "inbox_uploaded";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentManifest {
    pub version: String,
    pub generated_at: Timestamp,
    #[serde(default)]
    pub items: Vec<ContentItem>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub media: Media,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub platforms: Platforms,
    #[serde(default)]
    pub posting_status: PostingStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub video_path: PathBuf,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub source_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Platforms {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube: Option<YouTubeMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiktok: Option<TikTokMetadata>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct YouTubeMetadata {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub default_language: String,
    /// `public`, `unlisted` or `private`.
    #[serde(default)]
    pub privacy_status: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timestamps: Vec<VideoTimestamp>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoTimestamp {
    /// Position such as `0:15`.
    pub time: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TikTokMetadata {
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    /// `public`, `friends`, `followers` or `private`.
    #[serde(default)]
    pub privacy_level: String,
    #[serde(default)]
    pub duet_enabled: bool,
    #[serde(default)]
    pub stitch_enabled: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostingStatus {
    #[serde(default)]
    pub youtube: PostStatus,
    #[serde(default)]
    pub tiktok: PostStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PostingStatus {
    pub fn get(&self, platform: Platform) -> &PostStatus {
        match platform {
            Platform::YouTube => &self.youtube,
            Platform::TikTok => &self.tiktok,
        }
    }

    pub fn get_mut(&mut self, platform: Platform) -> &mut PostStatus {
        match platform {
            Platform::YouTube => &mut self.youtube,
            Platform::TikTok => &mut self.tiktok,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostStatus {
    #[serde(default)]
    pub posted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PostStatus {
    /// Uploaded and waiting for the creator to post it from the platform's inbox.
    pub fn is_queued(&self) -> bool {
        self.url
            .as_deref()
            .is_some_and(|url| url.starts_with(INBOX_UPLOADED))
    }

    /// Still needs an upload.
    pub fn is_pending(&self) -> bool {
        !self.posted && !self.is_queued()
    }
}

impl Default for ContentManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION.to_string(),
            generated_at: Timestamp::now(),
            items: Vec::new(),
            extra: Map::new(),
        }
    }
}

impl ContentManifest {
    /// Reads the manifest at `path`. A missing file is an empty manifest.
    pub async fn load(path: &Path) -> eyre::Result<Self> {
        let raw = match tokio::fs::read(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no manifest yet");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("read manifest {}", path.display()));
            }
        };
        serde_json::from_slice(&raw).with_context(|| format!("parse manifest {}", path.display()))
    }

    /// Writes the manifest to `path`, replacing the previous file in one step.
    pub async fn save(&mut self, path: &Path) -> eyre::Result<()> {
        self.generated_at = Timestamp::now();
        let json = serde_json::to_vec_pretty(self).context("serialize manifest")?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("replace manifest {}", path.display()))
    }

    pub fn get(&self, id: &str) -> Option<&ContentItem> {
        self.items.iter().find(|item| item.id == id)
    }

    fn get_mut(&mut self, id: &str) -> eyre::Result<&mut ContentItem> {
        self.items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| eyre::eyre!("no content item with id '{id}'"))
    }

    /// Replaces the item with the same id.
    pub fn update(&mut self, item: ContentItem) -> eyre::Result<()> {
        let id = item.id.clone();
        *self.get_mut(&id)? = item;
        Ok(())
    }

    /// Items not yet uploaded to `platform`, in manifest order.
    pub fn pending(&self, platform: Platform) -> impl Iterator<Item = &ContentItem> {
        self.items
            .iter()
            .filter(move |item| item.posting_status.get(platform).is_pending())
    }

    /// Records where an upload of item `id` ended up.
    pub fn record_result(
        &mut self,
        id: &str,
        platform: Platform,
        result: &UploadResult,
    ) -> eyre::Result<()> {
        let status = self.get_mut(id)?.posting_status.get_mut(platform);
        *status = match result.status {
            UploadStatus::Published => PostStatus {
                posted: true,
                url: Some(published_url(platform, result)),
                posted_at: Some(result.completed_at),
                error: None,
            },
            UploadStatus::QueuedForReview => PostStatus {
                posted: false,
                url: Some(format!("{INBOX_UPLOADED} (publish_id: {})", result.content_id)),
                posted_at: Some(result.completed_at),
                error: None,
            },
            UploadStatus::Failed => PostStatus {
                posted: false,
                url: None,
                posted_at: None,
                error: Some(result.message.clone()),
            },
        };
        Ok(())
    }

    /// Records a failed attempt, keeping nothing from earlier attempts but the error.
    pub fn record_error(&mut self, id: &str, platform: Platform, error: &str) -> eyre::Result<()> {
        *self.get_mut(id)?.posting_status.get_mut(platform) = PostStatus {
            error: Some(error.to_string()),
            ..PostStatus::default()
        };
        Ok(())
    }
}

fn published_url(platform: Platform, result: &UploadResult) -> String {
    match platform {
        Platform::YouTube => format!("https://www.youtube.com/watch?v={}", result.content_id),
        Platform::TikTok => format!("published (publish_id: {})", result.content_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = r#"{
      "version": "1.0",
      "generated_at": "2025-01-05T10:00:00.123456-05:00",
      "items": [
        {
          "id": "news-001",
          "created_at": "2025-01-05T09:00:00Z",
          "source": {"url": "https://example.com/a", "title": "A", "source_name": "Example News", "author": "Jo"},
          "media": {"audio_path": "out/a.mp3", "video_path": "out/a.mp4", "duration_seconds": 58.5},
          "platforms": {
            "youtube": {"title": "A", "description": "d", "tags": ["news"], "category_id": "25",
                        "default_language": "en", "privacy_status": "public"},
            "tiktok": {"caption": "A", "hashtags": ["news"], "privacy_level": "public",
                       "duet_enabled": true, "stitch_enabled": false},
            "instagram": {"caption": "A", "hashtags": []}
          },
          "posting_status": {
            "youtube": {"posted": true, "url": "https://www.youtube.com/watch?v=abc", "posted_at": "2025-01-05T11:00:00Z"},
            "tiktok": {"posted": false},
            "instagram": {"posted": false}
          }
        },
        {
          "id": "news-002",
          "media": {"video_path": "out/b.mp4"},
          "posting_status": {
            "youtube": {"posted": false, "error": "quota exceeded"},
            "tiktok": {"posted": false, "url": "inbox_uploaded (publish_id: v_inbox_file~1)"}
          }
        }
      ]
    }"#;

    fn manifest() -> ContentManifest {
        serde_json::from_str(MANIFEST).unwrap()
    }

    fn ids<'a>(items: impl Iterator<Item = &'a ContentItem>) -> Vec<&'a str> {
        items.map(|item| item.id.as_str()).collect()
    }

    #[test]
    fn pending_skips_posted_and_queued() {
        let manifest = manifest();
        assert_eq!(ids(manifest.pending(Platform::YouTube)), ["news-002"]);
        assert_eq!(ids(manifest.pending(Platform::TikTok)), ["news-001"]);
    }

    #[test]
    fn unknown_fields_survive_a_rewrite() {
        let value = serde_json::to_value(manifest()).unwrap();
        let item = &value["items"][0];
        assert_eq!(item["created_at"], "2025-01-05T09:00:00Z");
        assert_eq!(item["source"]["author"], "Jo");
        assert_eq!(item["media"]["duration_seconds"], 58.5);
        assert_eq!(item["platforms"]["instagram"]["caption"], "A");
        assert_eq!(item["posting_status"]["instagram"]["posted"], false);
    }

    #[test]
    fn results_are_recorded_per_status() {
        let mut manifest = manifest();
        let completed_at: Timestamp = "2025-01-06T12:00:00Z".parse().unwrap();

        manifest
            .record_result(
                "news-002",
                Platform::YouTube,
                &UploadResult {
                    content_id: "dQw4w9WgXcQ".to_string(),
                    status: UploadStatus::Published,
                    message: String::new(),
                    completed_at,
                },
            )
            .unwrap();
        assert_eq!(
            manifest.get("news-002").unwrap().posting_status.youtube,
            PostStatus {
                posted: true,
                url: Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string()),
                posted_at: Some(completed_at),
                error: None,
            }
        );

        manifest
            .record_result(
                "news-001",
                Platform::TikTok,
                &UploadResult {
                    content_id: "v_inbox_file~2".to_string(),
                    status: UploadStatus::QueuedForReview,
                    message: String::new(),
                    completed_at,
                },
            )
            .unwrap();
        let tiktok = &manifest.get("news-001").unwrap().posting_status.tiktok;
        assert!(!tiktok.posted);
        assert_eq!(tiktok.url.as_deref(), Some("inbox_uploaded (publish_id: v_inbox_file~2)"));
        assert_eq!(ids(manifest.pending(Platform::TikTok)), Vec::<&str>::new());

        manifest
            .record_error("news-001", Platform::TikTok, "chunk 2 transfer to tiktok failed")
            .unwrap();
        let tiktok = &manifest.get("news-001").unwrap().posting_status.tiktok;
        assert_eq!(tiktok.error.as_deref(), Some("chunk 2 transfer to tiktok failed"));
        assert_eq!(tiktok.url, None);
        assert_eq!(ids(manifest.pending(Platform::TikTok)), ["news-001"]);
    }

    #[test]
    fn update_replaces_item_by_id() {
        let mut manifest = manifest();
        let mut item = manifest.get("news-002").unwrap().clone();
        item.media.video_path = PathBuf::from("out/b-reencoded.mp4");
        item.posting_status.youtube = PostStatus::default();
        manifest.update(item).unwrap();

        let json = serde_json::to_string(&manifest).unwrap();
        let reloaded: ContentManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.items.len(), 2);
        let item = reloaded.get("news-002").unwrap();
        assert_eq!(item.media.video_path, PathBuf::from("out/b-reencoded.mp4"));
        assert_eq!(item.posting_status.youtube, PostStatus::default());
        assert_eq!(
            item.posting_status.tiktok.url.as_deref(),
            Some("inbox_uploaded (publish_id: v_inbox_file~1)")
        );
        assert_eq!(reloaded.items[0].id, "news-001");

        let mut stranger = item.clone();
        stranger.id = "news-999".to_string();
        assert!(manifest.update(stranger).is_err());
    }

    #[test]
    fn unknown_item_is_an_error() {
        let mut manifest = manifest();
        assert!(manifest.record_error("missing", Platform::TikTok, "x").is_err());
    }

    #[tokio::test]
    async fn missing_file_loads_empty_and_save_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("content_manifest.json");

        let mut empty = ContentManifest::load(&path).await.unwrap();
        assert_eq!(empty.version, "1.0");
        assert!(empty.items.is_empty());

        let mut manifest = manifest();
        let before = manifest.generated_at;
        manifest.save(&path).await.unwrap();
        assert!(manifest.generated_at > before);
        assert!(!dir.path().join("content_manifest.json.tmp").exists());

        let reloaded = ContentManifest::load(&path).await.unwrap();
        assert_eq!(reloaded.items.len(), 2);
        assert_eq!(reloaded.generated_at, manifest.generated_at);

        empty.save(&path).await.unwrap();
        assert!(ContentManifest::load(&path).await.unwrap().items.is_empty());
    }
}
