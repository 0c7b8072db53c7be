use anyhow::Context;
use resumable_upload::api::create_api_server;
use resumable_upload::config::ServerConfig;
use resumable_upload::metrics::install_recorder;
use resumable_upload::server::UploadService;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env_and_args()?;
    install_recorder().context("failed to install metrics recorder")?;

    println!("\n╔══════════════════════════════════════════════════════════════════╗");
    println!("║              Resumable Upload Server                             ║");
    println!("╚══════════════════════════════════════════════════════════════════╝\n");

    println!("📦 Chunk store:     {}", if config.in_memory_chunks {
        "in-memory".to_string()
    } else {
        config.chunk_dir.display().to_string()
    });
    println!("🗂  Objects:         {}", config.objects_dir.display());
    println!("💾 Sessions:        {}", config.database_url);
    println!("⏱  Session TTL:     {}s", config.session_ttl.as_secs());

    let gc_interval = config.gc_interval;
    let session_ttl = config.session_ttl;
    let addr = config.addr();
    let public_url = config.public_base_url.clone();

    let service = Arc::new(
        UploadService::from_config(config)
            .await
            .context("failed to initialize upload service")?,
    );

    // Expire abandoned sessions in the background
    let gc_service = service.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(gc_interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match gc_service.collect_expired(session_ttl).await {
                Ok(report) if report.sessions_removed > 0 || report.tickets_purged > 0 => {
                    info!(
                        sessions = report.sessions_removed,
                        chunks = report.chunks_removed,
                        tickets = report.tickets_purged,
                        "expired sessions collected"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "session GC failed"),
            }
        }
    });

    let app = create_api_server(service);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    println!("\n✅ Listening on {addr}");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📍 Public URL:      {public_url}");
    println!("🏥 Health Check:    {public_url}/health");
    println!("📊 Metrics:         {public_url}/metrics");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("   POST   /chunk                 - Store one chunk (multipart)");
    println!("   POST   /check-chunks          - List stored chunk indices");
    println!("   POST   /merge                 - Assemble and publish");
    println!("   POST   /presign               - Issue a presigned PUT URL");
    println!("   PUT    /presigned/:fileId     - Presigned upload target");
    println!("   POST   /upload-presigned      - Confirm a presigned upload");
    println!("   GET    /uploads/:fileId       - Session record");
    println!("   DELETE /uploads/:fileId       - Cancel and delete a session");
    println!("   GET    /files/:fileId/:name   - Published objects\n");

    info!(%addr, "upload server started");
    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}
