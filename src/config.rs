use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Upload server configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Where chunk bytes are kept until merge
    pub chunk_dir: PathBuf,
    /// Where merged objects are published
    pub objects_dir: PathBuf,
    pub database_url: String,
    /// Prefix of the URLs handed back for merged objects
    pub public_base_url: String,
    pub max_file_size: u64,
    pub max_chunk_size: u64,
    /// Accepted MIME type prefixes; empty accepts everything
    pub allowed_types: Vec<String>,
    pub session_ttl: Duration,
    pub presign_ttl: Duration,
    pub gc_interval: Duration,
    /// Keep chunks in memory instead of `chunk_dir`
    pub in_memory_chunks: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            chunk_dir: PathBuf::from("./data/chunks"),
            objects_dir: PathBuf::from("./data/objects"),
            database_url: "sqlite://./data/uploads.db".into(),
            public_base_url: "http://localhost:3000".into(),
            max_file_size: 10 * 1024 * 1024 * 1024,
            max_chunk_size: 64 * 1024 * 1024,
            allowed_types: Vec::new(),
            session_ttl: Duration::from_secs(24 * 60 * 60),
            presign_ttl: Duration::from_secs(15 * 60),
            gc_interval: Duration::from_secs(10 * 60),
            in_memory_chunks: false,
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable chunked upload server")]
pub struct ServerArgs {
    /// Host to bind to
    #[arg(long, env = "UPLOAD_SERVER_HOST")]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(long, env = "UPLOAD_SERVER_PORT")]
    pub port: Option<u16>,

    /// Root data directory; chunks go to `<data-dir>/chunks`, objects to `<data-dir>/objects`
    #[arg(long, env = "UPLOAD_SERVER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Directory for published objects (overrides the data-dir default)
    #[arg(long, env = "UPLOAD_SERVER_OBJECTS_DIR")]
    pub objects_dir: Option<PathBuf>,

    /// SQLite URL of the session database
    #[arg(long, env = "UPLOAD_SERVER_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Base of returned object URLs, e.g. https://uploads.example.com
    #[arg(long, env = "UPLOAD_SERVER_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Largest accepted file, in bytes
    #[arg(long, env = "UPLOAD_SERVER_MAX_FILE_SIZE")]
    pub max_file_size: Option<u64>,

    /// Largest accepted chunk, in bytes
    #[arg(long, env = "UPLOAD_SERVER_MAX_CHUNK_SIZE")]
    pub max_chunk_size: Option<u64>,

    /// Comma-separated MIME type prefixes to accept, e.g. `image/,application/pdf`
    #[arg(long, env = "UPLOAD_SERVER_ALLOWED_TYPES", value_delimiter = ',')]
    pub allowed_types: Vec<String>,

    /// Seconds an idle session is kept before garbage collection
    #[arg(long, env = "UPLOAD_SERVER_SESSION_TTL_SECS")]
    pub session_ttl_secs: Option<u64>,

    /// Seconds a presigned URL stays valid
    #[arg(long, env = "UPLOAD_SERVER_PRESIGN_TTL_SECS")]
    pub presign_ttl_secs: Option<u64>,

    /// Seconds between garbage collection sweeps
    #[arg(long, env = "UPLOAD_SERVER_GC_INTERVAL_SECS")]
    pub gc_interval_secs: Option<u64>,

    /// Keep chunks in memory (lost on restart)
    #[arg(long, env = "UPLOAD_SERVER_IN_MEMORY")]
    pub in_memory: bool,
}

impl ServerConfig {
    /// Parse environment variables + CLI args into a config.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(ServerArgs::parse())
    }

    pub fn from_args(args: ServerArgs) -> Result<Self> {
        let defaults = Self::default();

        let host = args.host.unwrap_or(defaults.host);
        let port = args.port.unwrap_or(defaults.port);
        let data_dir = args.data_dir.unwrap_or_else(|| PathBuf::from("./data"));
        let public_base_url = args
            .public_url
            .unwrap_or_else(|| format!("http://{}:{}", public_host(&host), port));

        let cfg = Self {
            chunk_dir: data_dir.join("chunks"),
            objects_dir: args.objects_dir.unwrap_or_else(|| data_dir.join("objects")),
            database_url: args.database_url.unwrap_or_else(|| {
                format!("sqlite://{}", data_dir.join("uploads.db").display())
            }),
            public_base_url,
            max_file_size: args.max_file_size.unwrap_or(defaults.max_file_size),
            max_chunk_size: args.max_chunk_size.unwrap_or(defaults.max_chunk_size),
            allowed_types: args
                .allowed_types
                .into_iter()
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            session_ttl: args
                .session_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_ttl),
            presign_ttl: args
                .presign_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.presign_ttl),
            gc_interval: args
                .gc_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.gc_interval),
            in_memory_chunks: args.in_memory,
            host,
            port,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.max_chunk_size > 0, "max chunk size must be positive");
        anyhow::ensure!(!self.gc_interval.is_zero(), "gc interval must be positive");
        url_host(&self.public_base_url)
            .with_context(|| format!("invalid public url `{}`", self.public_base_url))?;
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether `file_type` is accepted by the configured prefixes.
    pub fn accepts_type(&self, file_type: &str) -> bool {
        if self.allowed_types.is_empty() {
            return true;
        }
        let file_type = file_type.to_ascii_lowercase();
        self.allowed_types
            .iter()
            .any(|prefix| file_type.starts_with(prefix.as_str()))
    }
}

fn public_host(bind_host: &str) -> &str {
    match bind_host {
        "0.0.0.0" | "::" | "[::]" => "localhost",
        other => other,
    }
}

fn url_host(url: &str) -> Result<&str> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .context("scheme must be http or https")?;
    let host = rest.split('/').next().unwrap_or_default();
    anyhow::ensure!(!host.is_empty(), "missing host");
    Ok(host)
}
