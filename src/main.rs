//! onedrive_transfer CLI - Upload and download large files to a OneDrive app folder.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

use onedrive_transfer::auth::{authorization_url, exchange_code};
use onedrive_transfer::models::format_size;
use onedrive_transfer::upload::DEFAULT_CHUNK_SIZE;
use onedrive_transfer::{
    Authorization, ClientConfig, ClientInfo, ConflictBehavior, OneDriveClient, StoredToken,
    UploadMetadata,
};

/// CLI tool for transferring large files to and from OneDrive.
#[derive(Parser)]
#[command(name = "onedrive_transfer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Application (client) id.
    #[arg(long, env = "ONEDRIVE_CLIENT_ID")]
    client_id: String,

    /// Application secret, needed to refresh expired tokens.
    #[arg(long, env = "ONEDRIVE_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Path to the JSON token file. Refreshed tokens are written back to it.
    #[arg(long, env = "ONEDRIVE_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Upload chunk size in bytes (multiple of 327680, at most 62914560).
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Times to re-send a chunk after a network error or server error.
    #[arg(long, default_value_t = 0)]
    retries: u32,

    /// Request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file into the app folder.
    Upload {
        /// Local file to upload.
        file: PathBuf,

        /// Destination folder under the app folder.
        #[arg(long, default_value = "/")]
        path: String,

        /// Remote file name (defaults to the local file name).
        #[arg(long)]
        name: Option<String>,

        /// What to do when a file with the same name exists.
        #[arg(long, value_enum, default_value_t = Conflict::Rename)]
        conflict: Conflict,

        /// Description stored with the file.
        #[arg(long)]
        description: Option<String>,
    },

    /// Download an item to the local filesystem.
    Download {
        /// Item id to download.
        item: String,

        /// Local destination path (file or directory).
        #[arg(long, short = 't', default_value = ".")]
        to: PathBuf,

        /// Resume at this byte offset, keeping the first bytes of an existing file.
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },

    /// Print the URL where a user grants this application access.
    AuthUrl {
        /// Redirect URI registered for the application.
        #[arg(long)]
        redirect: String,

        /// Opaque value echoed back to the redirect URI.
        #[arg(long, default_value = "")]
        state: String,
    },

    /// Redeem an authorization code and write the token to --token-file.
    AuthCode {
        /// Code delivered to the redirect URI.
        #[arg(long)]
        code: String,

        /// Redirect URI the code was delivered to.
        #[arg(long)]
        redirect: String,
    },

    /// Show the signed-in user.
    Whoami,
}

#[derive(Clone, Copy, ValueEnum)]
enum Conflict {
    Rename,
    Fail,
    Replace,
}

impl From<Conflict> for ConflictBehavior {
    fn from(conflict: Conflict) -> Self {
        match conflict {
            Conflict::Rename => ConflictBehavior::Rename,
            Conflict::Fail => ConflictBehavior::Fail,
            Conflict::Replace => ConflictBehavior::Replace,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::AuthUrl { redirect, state } = &cli.command {
        let info = ClientInfo::new(cli.client_id.clone(), cli.client_secret.clone().unwrap_or_default());
        let url = authorization_url(&info, redirect, state)?;
        println!("{}", url);
        return Ok(());
    }

    let token_file = cli
        .token_file
        .clone()
        .context("--token-file (or ONEDRIVE_TOKEN_FILE) is required")?;

    let mut config = ClientConfig::default();
    if let Some(secs) = cli.timeout {
        config = config.with_timeout(Duration::from_secs(secs));
    }

    if let Commands::AuthCode { code, redirect } = &cli.command {
        let secret = cli
            .client_secret
            .clone()
            .context("--client-secret (or ONEDRIVE_CLIENT_SECRET) is required to redeem a code")?;
        let info = ClientInfo::new(cli.client_id.clone(), secret);

        let token = exchange_code(&config.http_client()?, &info, code, redirect, &config.token_endpoint)
            .await
            .context("Failed to redeem authorization code")?;
        ensure_parent(&token_file)?;
        token
            .save(&token_file)
            .with_context(|| format!("Failed to save token to {:?}", token_file))?;

        println!("Token saved to: {:?}", token_file);
        return Ok(());
    }

    let token = StoredToken::from_file(&token_file)
        .with_context(|| format!("Failed to load token from {:?}", token_file))?;

    let mut client = match cli.client_secret.clone() {
        Some(secret) => {
            OneDriveClient::from_token(token, ClientInfo::new(cli.client_id.clone(), secret), config)?
        }
        None => {
            tracing::warn!("no client secret given, the token will not be refreshed");
            OneDriveClient::with_config(Authorization::Static(token.access_token), config)?
        }
    }
    .with_chunk_retries(cli.retries);

    client
        .set_chunk_size(cli.chunk_size)
        .context("Invalid --chunk-size")?;

    let outcome = run(&client, cli.command).await;

    // Persist a refreshed token even when the transfer itself failed.
    if let Authorization::Expiring(credential) = client.authorization() {
        let current = credential.snapshot().await;
        if let Err(e) = current.save(&token_file) {
            tracing::warn!(error = %e, "failed to save token");
        }
    }

    outcome
}

async fn run(client: &OneDriveClient, command: Commands) -> Result<()> {
    match command {
        Commands::Upload {
            file,
            path,
            name,
            conflict,
            description,
        } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .with_context(|| format!("Cannot derive a file name from {:?}", file))?,
            };

            let mut metadata =
                UploadMetadata::new(path, name).with_conflict_behavior(conflict.into());
            if let Some(description) = description {
                metadata = metadata.with_description(description);
            }

            let mut source = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("Failed to open {:?}", file))?;

            println!("Uploading {:?}...", file);
            let item = client
                .upload(&metadata, &mut source)
                .await
                .with_context(|| format!("Failed to upload {:?}", file))?;

            println!("OK ({})", item);
        }

        Commands::Download { item, to, offset } => {
            let final_path = if to.is_dir() { to.join(&item) } else { to };
            ensure_parent(&final_path)?;

            let mut stream = client
                .open_download_stream(&item)
                .await
                .with_context(|| format!("Failed to open item: {}", item))?;
            stream.seek(std::io::SeekFrom::Start(offset))?;

            let mut file = open_destination(&final_path, offset).await?;

            print!("Downloading {} ({})... ", item, format_size(stream.len()));
            let copied = tokio::io::copy(&mut stream, &mut file)
                .await
                .with_context(|| format!("Failed to download item: {}", item))?;
            file.flush().await?;

            println!("OK");
            println!("Saved {} to: {:?}", format_size(offset + copied), final_path);
        }

        Commands::Whoami => {
            let user = client.current_user().await.context("Failed to get the signed-in user")?;
            println!("{}", user);
        }

        Commands::AuthUrl { .. } | Commands::AuthCode { .. } => {
            anyhow::bail!("authorization commands do not use a client")
        }
    }

    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }
    }
    Ok(())
}

/// Open the download target, truncated to `offset` bytes and positioned at its end.
async fn open_destination(path: &Path, offset: u64) -> Result<tokio::fs::File> {
    use tokio::io::AsyncSeekExt;

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(offset == 0)
        .open(path)
        .await
        .with_context(|| format!("Failed to open {:?}", path))?;

    if offset > 0 {
        file.set_len(offset).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
    }
    Ok(file)
}
