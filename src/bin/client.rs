use anyhow::{bail, Context};
use bytes::Bytes;
use clap::Parser;
use resumable_upload::chunk::DEFAULT_CHUNK_SIZE;
use resumable_upload::coordinator::{ProgressMode, UploadEvent, UploadOptions, UploadOutcome};
use resumable_upload::manager::UploadManager;
use resumable_upload::transport::{HttpTransport, RetryPolicy, UploadTransport};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Upload files to a resumable upload server.
#[derive(Parser, Debug)]
#[command(name = "upload-client", version)]
struct ClientArgs {
    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Server base URL
    #[arg(long, env = "UPLOAD_SERVER_URL", default_value = "http://127.0.0.1:3000")]
    server: String,

    /// Bytes per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Chunk sends in flight per file
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Attempts per chunk before giving up
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// MIME type sent with every file
    #[arg(long, default_value = "application/octet-stream")]
    file_type: String,

    /// Report progress by bytes instead of chunks
    #[arg(long)]
    byte_progress: bool,

    /// Skip the whole-file checksum on merge
    #[arg(long)]
    no_verify: bool,

    /// Upload each file in one request through a presigned URL
    #[arg(long)]
    presigned: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = ClientArgs::parse();
    let transport = HttpTransport::new(&args.server).context("failed to build HTTP client")?;

    if args.presigned {
        return upload_presigned(&transport, &args).await;
    }

    let options = UploadOptions {
        chunk_size: args.chunk_size,
        concurrency: args.concurrency,
        retry: RetryPolicy {
            max_attempts: args.max_attempts,
            ..RetryPolicy::default()
        },
        progress_mode: if args.byte_progress {
            ProgressMode::Bytes
        } else {
            ProgressMode::Chunks
        },
        verify_whole_file: !args.no_verify,
    };
    let transport: Arc<dyn UploadTransport> = Arc::new(transport);
    let manager = Arc::new(UploadManager::new(transport, options));

    let mut names: HashMap<String, String> = HashMap::new();
    for path in &args.files {
        let id = manager
            .add_file(path, Some(&args.file_type))
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        names.insert(id, path.display().to_string());
    }
    let labels = names.clone();

    let mut events = manager
        .take_events()
        .context("event receiver already taken")?;
    let printer_done = CancellationToken::new();
    let printer = tokio::spawn(print_events(events, names, printer_done.clone()));

    manager.start_all();

    let ctrl_c_manager = manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            for status in ctrl_c_manager.list() {
                let _ = ctrl_c_manager.cancel(&status.id);
            }
        }
    });

    let results = manager.wait_all().await;
    printer_done.cancel();
    let _ = printer.await;

    for (id, result) in &results {
        let name = labels.get(id).map(String::as_str).unwrap_or(id.as_str());
        match result {
            Ok(UploadOutcome::Completed { url }) => println!("✅ {name}: {url}"),
            Ok(UploadOutcome::Cancelled) => println!("⏹  {name}: cancelled"),
            Err(e) => println!("❌ {name}: {e}"),
        }
    }

    let failed = results
        .iter()
        .filter(|(_, result)| !matches!(result, Ok(UploadOutcome::Completed { .. })))
        .count();
    println!(
        "\n{} of {} files uploaded ({:.0}% overall)",
        results.len() - failed,
        results.len(),
        manager.aggregate_progress()
    );
    if failed > 0 {
        bail!("{failed} upload(s) did not complete");
    }
    Ok(())
}

/// Print progress until `done` fires, then flush whatever is still queued.
/// Returns how many events were consumed.
async fn print_events(
    mut events: UnboundedReceiver<UploadEvent>,
    names: HashMap<String, String>,
    done: CancellationToken,
) -> usize {
    let mut consumed = 0;
    loop {
        let event = tokio::select! {
            biased;
            event = events.recv() => event,
            _ = done.cancelled() => events.try_recv().ok(),
        };
        let Some(event) = event else { break };
        consumed += 1;

        let name = names.get(event.upload_id()).map(String::as_str).unwrap_or_default();
        match event {
            UploadEvent::Progress { percent, .. } => println!("{name}: {percent}%"),
            UploadEvent::ChunkComplete {
                index,
                total,
                skipped: true,
                ..
            } => println!("{name}: chunk {}/{total} already on server", index + 1),
            _ => {}
        }
    }
    consumed
}

async fn upload_presigned(transport: &HttpTransport, args: &ClientArgs) -> anyhow::Result<()> {
    for path in &args.files {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("path has no file name")?;

        let url = transport
            .upload_presigned(&file_name, &args.file_type, Bytes::from(data))
            .await
            .with_context(|| format!("presigned upload of {} failed", path.display()))?;
        println!("✅ {}: {url}", path.display());
    }
    Ok(())
}
