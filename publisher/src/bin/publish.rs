use clap::{Args, Parser, Subcommand};
use content_publisher::{ContentManifest, settings};
use eyre::Context;
use resumable_upload::{
    AuthorizationCodeProvider, ChunkProgress, ConsolePrompt, CredentialStore, Environment,
    LoopbackRedirect, NonInteractive, OAuthApp, Platform, PlatformAdapter, TikTok, Timeouts,
    UploadClient, UploadError, UploadStatus, YouTube,
};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Upload generated videos listed in a content manifest.
#[derive(Debug, Parser)]
#[command(name = "publish", version)]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    upload: UploadArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Revoke the stored credential with the platform and delete it.
    Revoke {
        /// youtube or tiktok
        platform: Platform,

        #[command(flatten)]
        auth: AuthArgs,
    },
}

#[derive(Debug, Args)]
struct UploadArgs {
    /// youtube or tiktok
    #[arg(required = true)]
    platform: Option<Platform>,

    /// Manifest item to upload.
    #[arg(required_unless_present = "all_unposted", conflicts_with = "all_unposted")]
    content_id: Option<String>,

    /// Upload every item not yet posted to the platform.
    #[arg(long)]
    all_unposted: bool,

    /// Show what would be uploaded without touching the network.
    #[arg(long)]
    dry_run: bool,

    #[arg(long, value_name = "PATH", default_value = "content_manifest.json")]
    manifest: PathBuf,

    /// Fail instead of asking for authorization in a browser.
    #[arg(long)]
    non_interactive: bool,

    #[command(flatten)]
    auth: AuthArgs,
}

#[derive(Debug, Args)]
struct AuthArgs {
    /// Use the platform's sandbox app.
    #[arg(long)]
    sandbox: bool,

    /// Where cached credentials live [default: ~/.credentials]
    #[arg(long, value_name = "DIR")]
    credentials_dir: Option<PathBuf>,

    /// Google OAuth client file, for YouTube.
    #[arg(long, value_name = "PATH", default_value = "client_secret.json")]
    client_secret: PathBuf,
}

impl AuthArgs {
    fn environment(&self) -> Environment {
        if self.sandbox {
            Environment::Sandbox
        } else {
            Environment::Production
        }
    }

    fn store(&self) -> eyre::Result<CredentialStore> {
        match &self.credentials_dir {
            Some(dir) => Ok(CredentialStore::new(dir)),
            None => CredentialStore::default_location().context("locate credential store"),
        }
    }

    async fn app(&self, platform: Platform) -> eyre::Result<OAuthApp> {
        OAuthApp::for_platform(platform, self.environment(), &self.client_secret)
            .await
            .with_context(|| format!("load {platform} OAuth app"))
    }
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Revoke { platform, auth }) => match platform {
            Platform::TikTok => revoke(TikTok::new(), &auth).await,
            Platform::YouTube => revoke(YouTube::new(), &auth).await,
        },
        None => {
            let args = cli.upload;
            let Some(platform) = args.platform else {
                eyre::bail!("a platform is required");
            };
            match platform {
                Platform::TikTok => upload(TikTok::new(), &args).await,
                Platform::YouTube => upload(YouTube::new(), &args).await,
            }
        }
    }
}

async fn revoke<P: PlatformAdapter>(adapter: P, auth: &AuthArgs) -> eyre::Result<()> {
    let platform = adapter.platform();
    let environment = auth.environment();
    let app = auth.app(platform).await?;
    let client = UploadClient::new(
        adapter,
        app,
        environment,
        auth.store()?,
        NonInteractive,
        Timeouts::default(),
    )?;
    if client
        .authorization()
        .revoke()
        .await
        .with_context(|| format!("revoke {platform} credential"))?
    {
        eprintln!("Revoked {platform} ({environment}) credential.");
    } else {
        eprintln!("No {platform} ({environment}) credential stored.");
    }
    Ok(())
}

async fn upload<P: PlatformAdapter>(adapter: P, args: &UploadArgs) -> eyre::Result<()> {
    let platform = adapter.platform();
    let environment = args.auth.environment();
    let manifest = ContentManifest::load(&args.manifest).await?;

    let ids: Vec<String> = match &args.content_id {
        Some(id) => {
            eyre::ensure!(
                manifest.get(id).is_some(),
                "no content item '{id}' in {}",
                args.manifest.display()
            );
            vec![id.clone()]
        }
        None => manifest
            .pending(platform)
            .map(|item| item.id.clone())
            .collect(),
    };
    if ids.is_empty() {
        eprintln!("Nothing to upload to {platform}.");
        return Ok(());
    }

    if args.dry_run {
        for id in &ids {
            let Some(item) = manifest.get(id) else {
                continue;
            };
            let settings = settings::for_platform(platform, item, environment)?;
            eprintln!("==> {id}: {}", item.media.video_path.display());
            eprintln!("{}", serde_json::to_string_pretty(&settings)?);
        }
        eprintln!("Dry run: {} item(s) would be uploaded to {platform}.", ids.len());
        return Ok(());
    }

    let app = args.auth.app(platform).await?;
    let store = args.auth.store()?;
    let publisher = Publisher {
        manifest,
        path: args.manifest.clone(),
        environment,
    };
    if args.non_interactive {
        publisher.run(adapter, app, store, NonInteractive, &ids).await
    } else {
        match platform {
            Platform::TikTok => {
                publisher
                    .run(adapter, app, store, ConsolePrompt::new(), &ids)
                    .await
            }
            Platform::YouTube => {
                publisher
                    .run(adapter, app, store, LoopbackRedirect::new(), &ids)
                    .await
            }
        }
    }
}

struct Publisher {
    manifest: ContentManifest,
    path: PathBuf,
    environment: Environment,
}

impl Publisher {
    /// Uploads each item in turn, recording every outcome in the manifest as it happens.
    async fn run<P, C>(
        mut self,
        adapter: P,
        app: OAuthApp,
        store: CredentialStore,
        codes: C,
        ids: &[String],
    ) -> eyre::Result<()>
    where
        P: PlatformAdapter,
        C: AuthorizationCodeProvider,
    {
        let platform = adapter.platform();
        let client = UploadClient::new(
            adapter,
            app,
            self.environment,
            store,
            codes,
            Timeouts::default(),
        )?;

        let mut succeeded = 0;
        let mut failed = Vec::new();
        for (n, id) in ids.iter().enumerate() {
            let Some(item) = self.manifest.get(id) else {
                continue;
            };
            eprintln!("==> [{}/{}] {id}", n + 1, ids.len());

            let outcome = match settings::for_platform(platform, item, self.environment) {
                Ok(settings) => {
                    let video = item.media.video_path.clone();
                    client
                        .upload(&video, &settings, report_progress)
                        .await
                        .map_err(|e| (e.to_string(), matches!(e, UploadError::Auth(_))))
                }
                Err(e) => Err((format!("{e:#}"), false)),
            };

            match outcome {
                Ok(result) => {
                    self.manifest.record_result(id, platform, &result)?;
                    match result.status {
                        UploadStatus::Published => {
                            eprintln!("    published: {}", result.content_id);
                            succeeded += 1;
                        }
                        UploadStatus::QueuedForReview => {
                            eprintln!(
                                "    in the {platform} inbox (publish_id: {}); finish posting in the app",
                                result.content_id
                            );
                            succeeded += 1;
                        }
                        UploadStatus::Failed => {
                            tracing::error!(content_id = %id, message = %result.message, "platform rejected upload");
                            failed.push(id.clone());
                        }
                    }
                }
                Err((message, auth)) => {
                    tracing::error!(content_id = %id, error = %message, "upload failed");
                    self.manifest.record_error(id, platform, &message)?;
                    failed.push(id.clone());
                    if auth {
                        // every remaining item would fail the same way
                        self.save().await?;
                        eyre::bail!("{platform} authorization failed: {message}");
                    }
                }
            }
            self.save().await?;
        }

        eprintln!(
            "{platform}: {succeeded} uploaded, {} failed, {} total",
            failed.len(),
            ids.len()
        );
        if !failed.is_empty() {
            eyre::bail!("failed to upload: {}", failed.join(", "));
        }
        Ok(())
    }

    async fn save(&mut self) -> eyre::Result<()> {
        self.manifest.save(&self.path).await
    }
}

fn report_progress(progress: &ChunkProgress) {
    tracing::info!(
        chunk = progress.index + 1,
        of = progress.total_chunks,
        bytes = progress.confirmed_bytes,
        total = progress.total_bytes,
        "chunk confirmed"
    );
}
