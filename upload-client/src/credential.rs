//! Bearer credentials and their on-disk cache.
//!
//! Each (platform, environment) pair owns exactly one JSON file in the store directory. The file
//! is written with owner-only permissions and is never logged; only its path shows up in
//! diagnostics.

use crate::error::AuthError;
use jiff::{SignedDuration, Timestamp};
use oauth2::basic::BasicTokenResponse;
use oauth2::{AccessToken, RefreshToken, TokenResponse};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Margin subtracted from the platform-declared lifetime so a token is never used right at its
/// expiry instant.
const EXPIRY_MARGIN: Duration = Duration::from_secs(300);

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3300);

/// Directory under the user's home where credentials live by default.
const DEFAULT_STORE_DIR: &str = ".credentials";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    TikTok,
    YouTube,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::TikTok => "tiktok",
            Platform::YouTube => "youtube",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tiktok" => Ok(Platform::TikTok),
            "youtube" => Ok(Platform::YouTube),
            other => Err(format!("unknown platform '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Sandbox,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Sandbox => "sandbox",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bearer token for one (platform, environment) pair.
///
/// A credential is usable only while [`Credential::is_valid_at`] holds; past that point it must be
/// refreshed or re-obtained.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub platform: Platform,
    pub environment: Environment,
    pub access_token: AccessToken,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<RefreshToken>,
    pub expires_at: Timestamp,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Credential {
    /// Builds a credential from a fresh token endpoint response.
    ///
    /// If the response carries no refresh token, `previous_refresh` is kept so a refresh never
    /// loses the ability to refresh again.
    pub fn from_token_response(
        platform: Platform,
        environment: Environment,
        token: &BasicTokenResponse,
        previous_refresh: Option<RefreshToken>,
    ) -> Self {
        let refresh_token = match token.refresh_token() {
            Some(r) => Some(r.clone()),
            None => {
                if previous_refresh.is_some() {
                    tracing::trace!("new token lacks refresh token, preserving original");
                }
                previous_refresh
            }
        };
        let scopes = token
            .scopes()
            .map(|s| s.iter().map(|s| s.to_string()).collect())
            .unwrap_or_default();

        Self {
            platform,
            environment,
            access_token: token.access_token().clone(),
            refresh_token,
            expires_at: expiry_from(Timestamp::now(), token.expires_in()),
            scopes,
        }
    }

    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Timestamp::now())
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token.secret())
    }
}

fn expiry_from(now: Timestamp, expires_in: Option<Duration>) -> Timestamp {
    let lifetime = match expires_in {
        Some(d) => d.saturating_sub(EXPIRY_MARGIN),
        None => DEFAULT_LIFETIME,
    };
    let lifetime = SignedDuration::try_from(lifetime).unwrap_or(SignedDuration::MAX);
    now.checked_add(lifetime).unwrap_or(Timestamp::MAX)
}

/// Local cache of credentials, one file per (platform, environment).
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The per-user default: `~/.credentials`.
    pub fn default_location() -> Result<Self, AuthError> {
        let home = dirs::home_dir().ok_or_else(|| {
            AuthError::storage(DEFAULT_STORE_DIR, "cannot determine the current user's home")
        })?;
        Ok(Self::new(home.join(DEFAULT_STORE_DIR)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, platform: Platform, environment: Environment) -> PathBuf {
        self.dir.join(format!("{platform}-{environment}.json"))
    }

    /// Takes the advisory lock guarding the read-check-refresh-write sequence for one pair.
    ///
    /// The lock is released when the returned guard is dropped, on every exit path.
    pub async fn lock(
        &self,
        platform: Platform,
        environment: Environment,
    ) -> Result<StoreLock, AuthError> {
        self.ensure_dir().await?;
        let mut path = self.path_for(platform, environment).into_os_string();
        path.push(".lock");
        let path = PathBuf::from(path);

        let lock_path = path.clone();
        let file = tokio::task::spawn_blocking(move || {
            let mut options = std::fs::OpenOptions::new();
            options.create(true).truncate(false).write(true);
            #[cfg(unix)]
            std::os::unix::fs::OpenOptionsExt::mode(&mut options, 0o600);
            let file = options.open(&lock_path)?;
            file.lock()?;
            Ok::<_, std::io::Error>(file)
        })
        .await
        .map_err(|e| AuthError::storage(&path, format!("lock task failed: {e}")))?
        .map_err(|e| AuthError::io(&path, "acquire lock", e))?;

        tracing::trace!(path = %path.display(), "acquired credential lock");
        Ok(StoreLock { _file: file, path })
    }

    /// Loads the cached credential, if any.
    ///
    /// A missing file is not an error. A file that no longer parses is treated as absent so the
    /// caller falls through to a fresh authorization.
    pub async fn load(
        &self,
        platform: Platform,
        environment: Environment,
    ) -> Result<Option<Credential>, AuthError> {
        let path = self.path_for(platform, environment);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::io(&path, "read credential", e)),
        };
        match serde_json::from_slice::<Credential>(&raw) {
            Ok(credential)
                if credential.platform == platform && credential.environment == environment =>
            {
                Ok(Some(credential))
            }
            Ok(_) => {
                tracing::warn!(path = %path.display(), "cached credential belongs to another platform, ignoring");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cached credential is unreadable, ignoring");
                Ok(None)
            }
        }
    }

    /// Persists `credential`, replacing whatever was cached for its pair.
    pub async fn save(&self, credential: &Credential) -> Result<(), AuthError> {
        self.ensure_dir().await?;
        let path = self.path_for(credential.platform, credential.environment);
        let json = serde_json::to_vec_pretty(credential)
            .map_err(|e| AuthError::storage(&path, format!("serialize credential: {e}")))?;

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).truncate(true).write(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options
            .open(&tmp)
            .await
            .map_err(|e| AuthError::io(&tmp, "create credential file", e))?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &json)
            .await
            .map_err(|e| AuthError::io(&tmp, "write credential file", e))?;
        file.sync_all()
            .await
            .map_err(|e| AuthError::io(&tmp, "flush credential file", e))?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| AuthError::io(&path, "replace credential file", e))?;
        tracing::debug!(path = %path.display(), "saved credential");
        Ok(())
    }

    /// Deletes the cached credential. Deleting an absent credential succeeds.
    pub async fn remove(&self, platform: Platform, environment: Environment) -> Result<bool, AuthError> {
        let path = self.path_for(platform, environment);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AuthError::io(&path, "delete credential", e)),
        }
    }

    async fn ensure_dir(&self) -> Result<(), AuthError> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o700);
        builder
            .create(&self.dir)
            .await
            .map_err(|e| AuthError::io(&self.dir, "create credential directory", e))
    }
}

/// Held for the duration of a read-check-refresh-write sequence.
#[derive(Debug)]
pub struct StoreLock {
    _file: std::fs::File,
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        tracing::trace!(path = %self.path.display(), "released credential lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn credential(expires_at: Timestamp) -> Credential {
        Credential {
            platform: Platform::TikTok,
            environment: Environment::Sandbox,
            access_token: AccessToken::new("act.123".into()),
            refresh_token: Some(RefreshToken::new("rft.456".into())),
            expires_at,
            scopes: vec!["video.upload".into()],
        }
    }

    #[test]
    fn validity_is_strictly_before_expiry() {
        let at = Timestamp::from_second(1_700_000_000).unwrap();
        let c = credential(at);
        assert!(c.is_valid_at(Timestamp::from_second(1_699_999_999).unwrap()));
        assert!(!c.is_valid_at(at));
        assert!(!c.is_valid_at(Timestamp::from_second(1_700_000_001).unwrap()));
    }

    #[test]
    fn expiry_keeps_a_safety_margin() {
        let now = Timestamp::from_second(1_000_000).unwrap();
        assert_eq!(
            expiry_from(now, Some(Duration::from_secs(3600))),
            Timestamp::from_second(1_000_000 + 3300).unwrap()
        );
        assert_eq!(
            expiry_from(now, None),
            Timestamp::from_second(1_000_000 + 3300).unwrap()
        );
        // shorter than the margin means already stale
        assert_eq!(expiry_from(now, Some(Duration::from_secs(60))), now);
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let c = credential(Timestamp::now());
        let debug = format!("{c:?}");
        assert!(!debug.contains("act.123"));
        assert!(!debug.contains("rft.456"));
    }

    #[test]
    fn file_per_platform_and_environment() {
        let store = CredentialStore::new("/tmp/creds");
        assert_eq!(
            store.path_for(Platform::TikTok, Environment::Sandbox),
            PathBuf::from("/tmp/creds/tiktok-sandbox.json")
        );
        assert_eq!(
            store.path_for(Platform::YouTube, Environment::Production),
            PathBuf::from("/tmp/creds/youtube-production.json")
        );
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path().join("nested"));
        assert!(
            store
                .load(Platform::TikTok, Environment::Sandbox)
                .await
                .unwrap()
                .is_none()
        );

        let c = credential(Timestamp::from_second(2_000_000_000).unwrap());
        store.save(&c).await.unwrap();

        let loaded = store
            .load(Platform::TikTok, Environment::Sandbox)
            .await
            .unwrap()
            .expect("credential was just saved");
        assert_eq!(loaded.access_token.secret(), "act.123");
        assert_eq!(
            loaded.refresh_token.as_ref().map(|r| r.secret().as_str()),
            Some("rft.456")
        );
        assert_eq!(loaded.expires_at, c.expires_at);
        assert_eq!(loaded.scopes, vec!["video.upload".to_string()]);

        // the other environment is a different file
        assert!(
            store
                .load(Platform::TikTok, Environment::Production)
                .await
                .unwrap()
                .is_none()
        );

        assert!(store.remove(Platform::TikTok, Environment::Sandbox).await.unwrap());
        assert!(!store.remove(Platform::TikTok, Environment::Sandbox).await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn credential_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        store.save(&credential(Timestamp::now())).await.unwrap();
        let meta = std::fs::metadata(store.path_for(Platform::TikTok, Environment::Sandbox)).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[tokio::test]
    async fn unreadable_cache_is_treated_as_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        std::fs::write(store.path_for(Platform::YouTube, Environment::Production), b"{not json").unwrap();
        assert!(
            store
                .load(Platform::YouTube, Environment::Production)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(dir.path());
        let first = store.lock(Platform::TikTok, Environment::Production).await.unwrap();

        let contender = store.clone();
        let second = tokio::spawn(async move {
            contender.lock(Platform::TikTok, Environment::Production).await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!second.is_finished());

        drop(first);
        let second = tokio::time::timeout(Duration::from_secs(5), second)
            .await
            .expect("lock released on drop")
            .unwrap();
        assert!(second.is_ok());
    }
}
