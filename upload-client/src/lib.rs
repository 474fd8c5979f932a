//! Resumable, chunked media uploads to short-video platforms.
//!
//! An [`UploadClient`] ties together the three stages of an upload:
//!
//! 1. [`AuthorizationManager`] produces a bearer [`Credential`], from the local
//!    [`CredentialStore`] when possible, by silent refresh otherwise, and by an OAuth2 PKCE
//!    authorization-code flow as a last resort.
//! 2. [`SessionNegotiator`] opens an upload session sized for the file.
//! 3. [`TransferEngine`] PUTs the file one [`Chunk`] at a time, after which the platform's
//!    finalize step produces an [`UploadResult`].
//!
//! Everything platform-specific sits behind [`PlatformAdapter`], implemented by [`TikTok`] and
//! [`YouTube`].

pub mod auth;
pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod pkce;
pub mod plan;
pub mod platform;
pub mod prompt;
pub mod session;
pub mod transfer;

pub use auth::{AuthorizationCodeProvider, AuthorizationManager, AuthorizationPrompt, NonInteractive};
pub use client::{UploadClient, http_client};
pub use config::{Timeouts, UploadConfig};
pub use credential::{Credential, CredentialStore, Environment, Platform};
pub use error::{AuthError, ConfigError, UploadError};
pub use pkce::PkceExchange;
pub use plan::{Chunk, ChunkLimits, ChunkPlan};
pub use platform::{OAuthApp, PlatformAdapter, TikTok, TokenGrant, YouTube};
pub use prompt::{ConsolePrompt, LoopbackRedirect};
pub use session::{
    PostSettings, PostSettingsBuilder, SessionNegotiator, UploadResult, UploadSession,
    UploadStatus, Visibility,
};
pub use transfer::{ChunkProgress, TransferEngine, TransferReceipt};
