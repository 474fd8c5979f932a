#![allow(dead_code)]

use jiff::{SignedDuration, Timestamp};
use oauth2::{AccessToken, AuthorizationCode, RefreshToken};
use resumable_upload::{
    AuthError, AuthorizationCodeProvider, AuthorizationPrompt, ChunkLimits, Credential,
    CredentialStore, Environment, OAuthApp, Platform, TikTok,
};
use std::io::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Small enough to split a 25-byte file into 10 + 10 + 5.
pub const LIMITS: ChunkLimits = ChunkLimits::new(4, 10, 20, 1000);

pub fn tiktok(server: &mockito::ServerGuard) -> TikTok {
    TikTok::new()
        .with_api_base(server.url().parse().unwrap())
        .with_chunk_limits(LIMITS)
}

pub fn app() -> OAuthApp {
    OAuthApp::new(
        "awtestkey",
        Some("test-secret".to_string()),
        "https://example.github.io/callback",
    )
}

pub fn credential(platform: Platform, valid_for: SignedDuration, refresh: Option<&str>) -> Credential {
    Credential {
        platform,
        environment: Environment::Sandbox,
        access_token: AccessToken::new("act.cached".to_string()),
        refresh_token: refresh.map(|r| RefreshToken::new(r.to_string())),
        expires_at: Timestamp::now() + valid_for,
        scopes: vec!["video.upload".to_string()],
    }
}

pub async fn store_with(credential: Option<&Credential>) -> (tempfile::TempDir, CredentialStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(dir.path().join("credentials"));
    if let Some(credential) = credential {
        store.save(credential).await.unwrap();
    }
    (dir, store)
}

/// 25 bytes: `abcdefghij` `klmnopqrst` `uvwxy`.
pub fn media_file(len: usize) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".mp4").tempfile().unwrap();
    let bytes: Vec<u8> = (0..len).map(|i| b'a' + (i % 26) as u8).collect();
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();
    file
}

pub fn token_body(access: &str, refresh: Option<&str>) -> String {
    let mut body = serde_json::json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": 86400,
        "scope": "user.info.basic,video.upload,video.publish",
        "open_id": "open-123",
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = refresh.into();
        body["refresh_expires_in"] = 31536000.into();
    }
    body.to_string()
}

/// Answers every prompt with the same canned code and counts how often it was asked.
#[derive(Debug, Default)]
pub struct CannedCode {
    code: Option<&'static str>,
    calls: AtomicUsize,
    last_url: Mutex<Option<String>>,
}

impl CannedCode {
    pub fn new(code: &'static str) -> Self {
        Self {
            code: Some(code),
            ..Self::default()
        }
    }

    pub fn declining() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_url(&self) -> Option<String> {
        self.last_url.lock().unwrap().clone()
    }
}

impl AuthorizationCodeProvider for CannedCode {
    async fn authorization_code(
        &self,
        prompt: AuthorizationPrompt<'_>,
    ) -> Result<Option<AuthorizationCode>, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_url.lock().unwrap() = Some(prompt.url.to_string());
        Ok(self.code.map(|c| AuthorizationCode::new(c.to_string())))
    }
}
