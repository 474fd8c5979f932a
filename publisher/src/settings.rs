//! Per-platform post settings derived from a manifest item.

use crate::manifest::ContentItem;
use resumable_upload::{Environment, Platform, PostSettings, Visibility};
use std::fmt::Write;

const YOUTUBE_TITLE_MAX: usize = 100;
const YOUTUBE_DESCRIPTION_MAX: usize = 5000;
const TIKTOK_CAPTION_MAX: usize = 2200;

const DESCRIPTION_TRUNCATED: &str = "\n\n[Description truncated due to length]";

/// Settings for uploading `item` to `platform`.
pub fn for_platform(
    platform: Platform,
    item: &ContentItem,
    environment: Environment,
) -> eyre::Result<PostSettings> {
    match platform {
        Platform::YouTube => youtube(item),
        Platform::TikTok => tiktok(item, environment),
    }
}

/// YouTube Shorts settings.
pub fn youtube(item: &ContentItem) -> eyre::Result<PostSettings> {
    let Some(meta) = &item.platforms.youtube else {
        eyre::bail!("content item '{}' has no YouTube metadata", item.id);
    };

    let mut tags = meta.tags.clone();
    if !tags
        .iter()
        .any(|t| t.eq_ignore_ascii_case("shorts") || t.eq_ignore_ascii_case("short"))
    {
        tags.insert(0, "Shorts".to_string());
    }

    let visibility = match meta.privacy_status.to_ascii_lowercase().as_str() {
        "public" => Some(Visibility::Public),
        "unlisted" => Some(Visibility::FollowersOnly),
        "private" => Some(Visibility::SelfOnly),
        _ => None,
    };

    Ok(PostSettings {
        title: Some(truncate_with(&meta.title, YOUTUBE_TITLE_MAX, "...")),
        description: Some(truncate_with(
            &youtube_description(item),
            YOUTUBE_DESCRIPTION_MAX,
            DESCRIPTION_TRUNCATED,
        )),
        tags,
        category_id: non_empty(&meta.category_id),
        default_language: non_empty(&meta.default_language),
        visibility,
        ..PostSettings::default()
    })
}

fn youtube_description(item: &ContentItem) -> String {
    let mut out = String::from("#Shorts\n\n");
    if let Some(meta) = &item.platforms.youtube {
        out.push_str(&meta.description);
        out.push_str("\n\n");
        if !meta.timestamps.is_empty() {
            out.push_str("⏱️ Timestamps:\n");
            for ts in &meta.timestamps {
                let _ = writeln!(out, "{} - {}", ts.time, ts.label);
            }
            out.push('\n');
        }
    }

    let source = &item.source;
    if !source.source_name.is_empty() {
        let _ = writeln!(out, "📰 Source: {}", source.source_name);
    }
    if !source.url.is_empty() {
        let _ = writeln!(out, "🔗 Full Article: {}", source.url);
    }
    out.truncate(out.trim_end().len());
    out
}

/// TikTok settings. Sandbox apps can only post privately, so sandbox always gets
/// [`Visibility::SelfOnly`].
pub fn tiktok(item: &ContentItem, environment: Environment) -> eyre::Result<PostSettings> {
    let Some(meta) = &item.platforms.tiktok else {
        eyre::bail!("content item '{}' has no TikTok metadata", item.id);
    };

    let mut caption = meta.caption.trim().to_string();
    for tag in meta.hashtags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !caption.is_empty() {
            caption.push(' ');
        }
        if !tag.starts_with('#') {
            caption.push('#');
        }
        caption.push_str(tag);
    }

    let visibility = match environment {
        Environment::Sandbox => Visibility::SelfOnly,
        Environment::Production => match meta.privacy_level.to_ascii_lowercase().as_str() {
            "public" => Visibility::Public,
            "friends" => Visibility::MutualOnly,
            "followers" => Visibility::FollowersOnly,
            _ => Visibility::SelfOnly,
        },
    };

    Ok(PostSettings {
        title: Some(truncate_with(&caption, TIKTOK_CAPTION_MAX, "")),
        visibility: Some(visibility),
        allow_duet: Some(meta.duet_enabled),
        allow_stitch: Some(meta.stitch_enabled),
        ..PostSettings::default()
    })
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Cuts `s` to at most `max` characters, ending in `marker` when anything was cut.
fn truncate_with(s: &str, max: usize, marker: &str) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(marker.chars().count());
    let mut out: String = s.chars().take(keep).collect();
    out.push_str(marker);
    out
}
