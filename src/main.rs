use anyhow::Result;
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, io::ErrorKind, path::Path, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
mod uploader;

use services::{
    chunk_store::{ChunkStore, MAX_CHUNK_SIZE},
    docgen::DocumentGenerator,
    drive::DriveClient,
    history_service::HistoryService,
    jobs::spawn_worker,
    summarizer::SummaryEngine,
    transcriber::{GeminiClient, LeakageFilter, Transcriber},
};

/// Staging sessions older than this are abandoned uploads.
const SESSION_MAX_AGE: Duration = Duration::from_secs(6 * 60 * 60);
const REAPER_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Background job queue depth before submissions start getting dropped.
const JOB_QUEUE_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run-mode flags ---
    let (cfg, args) = config::AppConfig::from_env_and_args()?;

    // --- Client mode: chunked upload against a running server ---
    if let Some(file) = args.upload {
        return run_upload(&file, &args.server).await;
    }

    tracing::info!(
        host = %cfg.host,
        port = cfg.port,
        staging_dir = %cfg.staging_dir,
        uploads_dir = %cfg.uploads_dir,
        audio_dir = %cfg.audio_dir,
        "starting voicedoc"
    );

    // --- Ensure data directories exist ---
    for dir in [&cfg.staging_dir, &cfg.uploads_dir, &cfg.audio_dir] {
        if !Path::new(dir).exists() {
            fs::create_dir_all(dir)?;
            tracing::info!("Created directory at {}", dir);
        }
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // SQLx will not create the database file on its own.
    if let Err(e) = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(db_path)
    {
        tracing::warn!("Failed to open database file {}: {}", db_path, e);
    }

    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?,
    );

    // --- Handle migration mode ---
    if args.migrate {
        run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize core services ---
    let http = reqwest::Client::new();
    let gemini = GeminiClient::new(http.clone(), cfg.gemini_api_key.clone());
    let transcriber = Arc::new(Transcriber::new(gemini.clone(), LeakageFilter::default()));
    let summary = SummaryEngine::new(gemini);
    let docs = Arc::new(DocumentGenerator::new(
        summary.clone(),
        std::env::temp_dir(),
    ));
    let drive = DriveClient::new(http);
    let history = HistoryService::new(db.clone());
    let chunks = Arc::new(ChunkStore::new(
        &cfg.staging_dir,
        &cfg.uploads_dir,
        MAX_CHUNK_SIZE,
    ));

    let (jobs, _worker) = spawn_worker(history.clone(), summary.clone(), JOB_QUEUE_CAPACITY);

    // --- Background reaper for abandoned chunk sessions ---
    let reaper_chunks = chunks.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REAPER_INTERVAL);
        loop {
            ticker.tick().await;
            match reaper_chunks.reap_stale_sessions(SESSION_MAX_AGE).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(reaped = n, "removed stale upload sessions"),
                Err(e) => tracing::warn!("session reaper failed: {}", e),
            }
        }
    });

    let app_state = state::AppState {
        chunks,
        transcriber,
        summary,
        docs,
        drive,
        history,
        jobs,
        uploads_dir: cfg.uploads_dir.clone().into(),
        audio_dir: cfg.audio_dir.clone().into(),
        drive_folder_id: cfg.drive_folder_id.clone(),
    };

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(app_state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// `--upload FILE` mode: push a file to a running server with the chunked
/// protocol and print the server-side path.
async fn run_upload(file: &str, server: &str) -> Result<()> {
    let client = uploader::ChunkedUploader::new(reqwest::Client::new(), server);
    let remote = client
        .upload_file(Path::new(file), |received, total| {
            tracing::info!(received, total, "chunk accepted");
        })
        .await?;
    tracing::info!(
        file_path = %remote.file_path,
        file_size = remote.file_size,
        "upload complete"
    );
    println!("{}", remote.file_path);
    Ok(())
}

/// Run SQLite migrations manually from the embedded SQL file.
async fn run_migrations(db: &Arc<sqlx::Pool<sqlx::Sqlite>>) -> Result<()> {
    let path = "migrations/0001_init.sql";

    if !Path::new(path).exists() {
        anyhow::bail!("Migration file not found: {}", path);
    }

    let sql = fs::read_to_string(path)?;
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(&**db).await?;
    }

    Ok(())
}
