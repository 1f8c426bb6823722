use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::path::{Path, PathBuf};

use reruns::config::Config;
use reruns::schedule::{OrderMode, Rebroadcaster, WriteOptions};

#[derive(Parser, Debug)]
#[command(
    name = "reruns",
    about = "Rebroadcast old RSS/Atom feed entries with fresh timestamps and identifiers"
)]
struct Args {
    /// Source feed: a local path, an http(s) URL, or `-` for stdin
    input: String,

    /// Write the modified feed here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Number of entries to rebroadcast
    #[arg(short = 'n', long, value_name = "N", conflicts_with = "all")]
    count: Option<usize>,

    /// Rebroadcast every remaining pending entry
    #[arg(long)]
    all: bool,

    /// Emit entries in shuffled order (takes effect at first initialization only)
    #[arg(long)]
    shuffle: bool,

    /// Start the queue over once every entry has been rebroadcast
    #[arg(long)]
    run_forever: bool,

    /// Strip reruns metadata and still-pending entries from the output
    #[arg(long)]
    public: bool,

    /// Disable pretty-printed indentation
    #[arg(long)]
    compact: bool,

    /// Prefix for the feed title
    #[arg(long, value_name = "TEXT")]
    title_prefix: Option<String>,

    /// Suffix for the feed title
    #[arg(long, value_name = "TEXT")]
    title_suffix: Option<String>,

    /// Prefix for entry titles; strftime directives expand against each
    /// entry's original publication date
    #[arg(long, value_name = "TEXT")]
    entry_prefix: Option<String>,

    /// Suffix for entry titles (same date expansion as --entry-prefix)
    #[arg(long, value_name = "TEXT")]
    entry_suffix: Option<String>,

    /// Configuration file (defaults to ./reruns.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("reruns.toml"));
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let mut options = config.init_options();
    if args.shuffle {
        options.order = OrderMode::Shuffled;
    }
    if args.run_forever {
        options.run_forever = true;
    }

    let xml = read_input(&args.input).await?;
    let mut feed = Rebroadcaster::from_xml(&xml, &options).context("Failed to load feed")?;
    tracing::info!(
        feed_type = ?feed.feed_type(),
        remaining = feed.num_remaining(),
        "feed loaded"
    );

    if args.title_prefix.is_some() || args.title_suffix.is_some() {
        feed.set_feed_title(args.title_prefix.as_deref(), args.title_suffix.as_deref())
            .context("Failed to set feed title")?;
    }
    if args.entry_prefix.is_some() || args.entry_suffix.is_some() {
        feed.set_entry_titles(args.entry_prefix.as_deref(), args.entry_suffix.as_deref())
            .context("Failed to set entry titles")?;
    }

    let count = if args.all {
        feed.num_remaining()
    } else {
        args.count.unwrap_or(0)
    };
    if count > 0 {
        let reran = feed.rebroadcast(count).context("Rebroadcast failed")?;
        eprintln!(
            "Rebroadcast {} entries ({} remaining).",
            reran.len(),
            feed.num_remaining()
        );
    }

    let write_options = WriteOptions {
        pretty: !args.compact,
        with_reruns_data: !args.public,
    };
    match &args.output {
        Some(path) => {
            feed.write_to(path, &write_options)
                .with_context(|| format!("Failed to write feed to {}", path.display()))?;
            eprintln!("Wrote feed to {}", path.display());
        }
        None => {
            let xml = feed
                .to_xml_string(&write_options)
                .context("Failed to serialize feed")?;
            println!("{xml}");
        }
    }

    Ok(())
}

/// Resolve the input argument to feed XML. Network fetching lives here at
/// the binary boundary, a single GET with no retry or backoff, so the
/// library core stays I/O-free.
async fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read feed from stdin")?;
        return Ok(buffer);
    }

    if input.starts_with("http://") || input.starts_with("https://") {
        tracing::debug!(url = input, "fetching source feed");
        let response = reqwest::get(input)
            .await
            .with_context(|| format!("Failed to fetch {input}"))?
            .error_for_status()
            .with_context(|| format!("Request for {input} returned an error status"))?;
        return response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {input}"));
    }

    std::fs::read_to_string(Path::new(input))
        .with_context(|| format!("Failed to read feed file {input}"))
}
