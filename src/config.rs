use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Staging area for in-flight chunked uploads.
    pub staging_dir: String,
    /// Destination for assembled uploads awaiting transcription.
    pub uploads_dir: String,
    /// Retained audio copies served back to the UI.
    pub audio_dir: String,
    pub database_url: String,
    /// Gemini credential; transcription fails with a typed error without it.
    pub gemini_api_key: Option<String>,
    /// Default drive folder for generated documents.
    pub drive_folder_id: Option<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Voice transcription service")]
pub struct Args {
    /// Host to bind to (overrides VOICEDOC_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides VOICEDOC_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Chunk staging directory (overrides VOICEDOC_STAGING_DIR)
    #[arg(long)]
    pub staging_dir: Option<String>,

    /// Assembled uploads directory (overrides VOICEDOC_UPLOADS_DIR)
    #[arg(long)]
    pub uploads_dir: Option<String>,

    /// Retained audio directory (overrides VOICEDOC_AUDIO_DIR)
    #[arg(long)]
    pub audio_dir: Option<String>,

    /// Database URL (overrides VOICEDOC_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Upload a file to a running server via the chunked protocol and exit
    #[arg(long, value_name = "FILE")]
    pub upload: Option<String>,

    /// Server URL for --upload mode
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    pub server: String,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the
    /// run-mode flags.
    pub fn from_env_and_args() -> Result<(Self, Args)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("VOICEDOC_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("VOICEDOC_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing VOICEDOC_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading VOICEDOC_PORT"),
        };
        let env_staging =
            env::var("VOICEDOC_STAGING_DIR").unwrap_or_else(|_| "./data/chunks".into());
        let env_uploads =
            env::var("VOICEDOC_UPLOADS_DIR").unwrap_or_else(|_| "./data/uploads".into());
        let env_audio = env::var("VOICEDOC_AUDIO_DIR").unwrap_or_else(|_| "./data/audio".into());
        let env_db = env::var("VOICEDOC_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/voicedoc.db".into());
        let gemini_api_key = env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());
        let drive_folder_id = env::var("GOOGLE_DRIVE_FOLDER_ID")
            .ok()
            .filter(|k| !k.is_empty());

        // --- Merge ---
        let cfg = Self {
            host: args.host.clone().unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            staging_dir: args.staging_dir.clone().unwrap_or(env_staging),
            uploads_dir: args.uploads_dir.clone().unwrap_or(env_uploads),
            audio_dir: args.audio_dir.clone().unwrap_or(env_audio),
            database_url: args.database_url.clone().unwrap_or(env_db),
            gemini_api_key,
            drive_folder_id,
        };

        Ok((cfg, args))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
