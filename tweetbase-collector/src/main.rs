use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use tweetbase_collector::config::Settings;
use tweetbase_collector::error::{IngestError, StreamError};
use tweetbase_collector::rest::AccountRef;
use tweetbase_collector::{
    Database, HttpTransport, Ingestor, QueryRepository, RateLimitedClient, StreamEvent, StreamFilter,
    StreamingClient, SystemClock,
};

/// Collect posts from the platform APIs into a local SQLite store
#[derive(Parser, Debug)]
#[command(name = "tweetbase")]
#[command(about = "Collect posts into a normalized SQLite store", long_about = None)]
struct Cli {
    /// Path to the SQLite database file (overrides configuration)
    #[arg(short, long, global = true)]
    database: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database schema
    Init,
    /// Print row counts per entity type
    Counts,
    /// Import posts from a file with one JSON payload per line
    Import { file: PathBuf },
    /// Fetch and store every post id listed in a file that is not stored yet
    Hydrate { file: PathBuf },
    /// Store an account's archive, newest first
    Archive {
        /// Numeric id or handle
        account: String,
    },
    /// Store one page of search results
    Search { query: String },
    /// Store posts from the real-time feed until interrupted
    Stream {
        /// Phrases to track (repeatable)
        #[arg(long)]
        track: Vec<String>,
        /// Account ids to follow (repeatable)
        #[arg(long)]
        follow: Vec<i64>,
        /// Only count posts for this many seconds and store nothing
        #[arg(long, value_name = "SECS")]
        probe: Option<u64>,
    },
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default = if verbose {
        "tweetbase_collector=debug,tweetbase=debug"
    } else {
        "tweetbase_collector=info,tweetbase=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Flag raised on SIGINT or SIGTERM. A second signal while the flag is
/// already set exits immediately with status 1.
fn setup_signal_handlers() -> Result<Arc<AtomicBool>> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::flag;

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        // registered first, so it sees the flag as it was before this signal
        flag::register_conditional_shutdown(signal, 1, Arc::clone(&shutdown))
            .context("Failed to install signal handlers")?;
        flag::register(signal, Arc::clone(&shutdown)).context("Failed to install signal handlers")?;
    }
    Ok(shutdown)
}

fn read_ids(path: &PathBuf) -> Result<Vec<i64>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut ids = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line.parse() {
            Ok(id) => ids.push(id),
            Err(_) => warn!("Ignoring line {}: {:?} is not a post id", index + 1, line),
        }
    }
    Ok(ids)
}

fn rest_client(settings: &Settings) -> Result<RateLimitedClient<HttpTransport, SystemClock>> {
    let transport = HttpTransport::new(&settings.api, settings.stream.stall_timeout())?;
    Ok(RateLimitedClient::new(
        transport,
        SystemClock,
        settings.api.rest_base_url.clone(),
        &settings.rest,
    ))
}

fn run(cli: Cli, settings: Settings) -> Result<()> {
    let db = Database::open(&settings.database.path)?;
    let ingestor = Ingestor::new(db.clone());

    match cli.command {
        Command::Init => {
            info!("Database ready at {}", settings.database.path);
        }
        Command::Counts => {
            let counts = QueryRepository::new(db.pool.clone()).counts()?;
            println!("posts:    {}", counts.posts);
            println!("users:    {}", counts.users);
            println!("hashtags: {}", counts.hashtags);
            println!("urls:     {}", counts.urls);
        }
        Command::Import { file } => {
            let reader = BufReader::new(
                File::open(&file).with_context(|| format!("Failed to open {}", file.display()))?,
            );
            let report = ingestor.import_json_lines(reader)?;
            println!("stored {}, rejected {}", report.stored, report.rejected);
        }
        Command::Hydrate { file } => {
            let missing = ingestor.missing_ids(read_ids(&file)?)?;
            info!("{} posts to hydrate", missing.len());
            let mut client = rest_client(&settings)?;
            let mut stored = 0;
            for page in client.lookup_all(missing) {
                stored += ingestor.ingest_all(&page?)?.stored;
            }
            println!("stored {}", stored);
        }
        Command::Archive { account } => {
            let mut client = rest_client(&settings)?;
            let mut stored = 0;
            for page in client.archive(AccountRef::parse(&account)) {
                stored += ingestor.ingest_all(&page?)?.stored;
            }
            println!("stored {}", stored);
        }
        Command::Search { query } => {
            let mut client = rest_client(&settings)?;
            let page = client.search(&query)?;
            let report = ingestor.ingest_all(&page.statuses)?;
            println!("stored {}, rejected {}", report.stored, report.rejected);
        }
        Command::Stream { track, follow, probe } => {
            let shutdown = setup_signal_handlers()?;
            let transport = HttpTransport::new(&settings.api, settings.stream.stall_timeout())?;
            let mut client = StreamingClient::new(transport, SystemClock, settings.api.stream_base_url.clone())
                .with_shutdown(shutdown);

            if let Some(secs) = probe {
                let seen = client.probe(Duration::from_secs(secs))?;
                println!("saw {} posts in {}s", seen, secs);
                return Ok(());
            }

            let filter = StreamFilter::from_options(track, follow);
            let mut fault: Option<IngestError> = None;
            let mut handler = |event: StreamEvent| {
                if let StreamEvent::Post(payload) = event {
                    if let Err(e) = ingestor.store(&payload) {
                        error!("Storage failure, stopping stream: {}", e);
                        fault = Some(e);
                        return ControlFlow::Break(());
                    }
                }
                ControlFlow::Continue(())
            };

            match client.run(&filter, &mut handler) {
                Ok(()) | Err(StreamError::Interrupted) => {}
                Err(e) => return Err(e.into()),
            }
            if let Some(e) = fault {
                return Err(e.into());
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut settings = Settings::new().context("Failed to load settings")?;
    if let Some(path) = &cli.database {
        settings.database.path = path.clone();
    }

    run(cli, settings)
}
