//! Caller-facing configuration: what to upload, where credentials live, which OAuth app to use.

use crate::credential::{CredentialStore, Environment, Platform};
use crate::error::{AuthError, ConfigError};
use crate::platform::OAuthApp;
use crate::session::PostSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bounds on individual network calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Token exchange, session init, finalize, revoke.
    #[serde(with = "secs")]
    pub control: Duration,
    /// One chunk PUT.
    #[serde(with = "secs")]
    pub chunk: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            control: Duration::from_secs(30),
            chunk: crate::transfer::DEFAULT_CHUNK_TIMEOUT,
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Everything one upload needs besides the OAuth application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub platform: Platform,
    #[serde(default)]
    pub environment: Environment,
    pub file_path: PathBuf,
    #[serde(default)]
    pub post_settings: PostSettings,
    /// Overrides the default `~/.credentials` directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_store_path: Option<PathBuf>,
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl UploadConfig {
    pub fn new(platform: Platform, file_path: impl Into<PathBuf>) -> Self {
        Self {
            platform,
            environment: Environment::default(),
            file_path: file_path.into(),
            post_settings: PostSettings::default(),
            credential_store_path: None,
            timeouts: Timeouts::default(),
        }
    }

    pub fn credential_store(&self) -> Result<CredentialStore, AuthError> {
        match &self.credential_store_path {
            Some(dir) => Ok(CredentialStore::new(dir)),
            None => CredentialStore::default_location(),
        }
    }
}

/// Redirect used for TikTok when `TIKTOK_REDIRECT_URI` is unset. It must also be registered with
/// the app in the TikTok developer portal.
const TIKTOK_DEFAULT_REDIRECT: &str = "http://localhost:8080/callback";

/// Redirect used for Google clients that list none; loopback redirects may pick any port.
const GOOGLE_DEFAULT_REDIRECT: &str = "http://127.0.0.1";

#[derive(Debug, Deserialize)]
struct GoogleClientSecretFile {
    #[serde(alias = "web")]
    installed: GoogleClient,
}

#[derive(Debug, Deserialize)]
struct GoogleClient {
    client_id: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

impl OAuthApp {
    /// TikTok app credentials from the process environment.
    ///
    /// Production reads `TIKTOK_CLIENT_KEY` and `TIKTOK_CLIENT_SECRET`; sandbox reads the same
    /// names with a `_SANDBOX` suffix. The redirect comes from `TIKTOK_REDIRECT_URI`.
    pub fn tiktok_from_env(environment: Environment) -> Result<Self, ConfigError> {
        Self::tiktok_from_lookup(environment, |name| std::env::var(name).ok())
    }

    fn tiktok_from_lookup(
        environment: Environment,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let suffix = match environment {
            Environment::Production => "",
            Environment::Sandbox => "_SANDBOX",
        };
        let required = |name: String| {
            lookup(&name)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingVar { name })
        };
        let client_key = required(format!("TIKTOK_CLIENT_KEY{suffix}"))?;
        let client_secret = required(format!("TIKTOK_CLIENT_SECRET{suffix}"))?;
        let redirect = lookup("TIKTOK_REDIRECT_URI")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| TIKTOK_DEFAULT_REDIRECT.to_string());
        Ok(Self::new(client_key, Some(client_secret), redirect))
    }

    /// Google OAuth client from a downloaded `client_secret.json`.
    pub async fn from_google_client_secret(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read(path)
            .await
            .map_err(|e| ConfigError::ClientSecret {
                path: path.to_path_buf(),
                message: "read file".to_string(),
                source: Some(Box::new(e)),
            })?;
        Self::from_google_client_secret_json(&raw).map_err(|e| ConfigError::ClientSecret {
            path: path.to_path_buf(),
            message: "parse client secret".to_string(),
            source: Some(Box::new(e)),
        })
    }

    fn from_google_client_secret_json(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let file: GoogleClientSecretFile = serde_json::from_slice(raw)?;
        let GoogleClient {
            client_id,
            client_secret,
            redirect_uris,
        } = file.installed;
        let redirect = redirect_uris
            .into_iter()
            .next()
            .unwrap_or_else(|| GOOGLE_DEFAULT_REDIRECT.to_string());
        Ok(Self::new(client_id, client_secret, redirect))
    }

    /// The application for `platform`, from wherever that platform keeps it.
    pub async fn for_platform(
        platform: Platform,
        environment: Environment,
        google_client_secret: &Path,
    ) -> Result<Self, ConfigError> {
        match platform {
            Platform::TikTok => Self::tiktok_from_env(environment),
            Platform::YouTube => Self::from_google_client_secret(google_client_secret).await,
        }
    }
}
