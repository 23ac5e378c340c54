use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser as ClapParser;
use crawlzilla_core::config::CrawlerConfig;
use crawlzilla_core::langid::LanguageIdentifier;
use crawlzilla_core::parse::Parser as DocumentParser;
use crawlzilla_core::records::open_line_reader;
use crawlzilla_core::round::RoundCoordinator;
use reqwest::Client;
use std::time::Duration;
use tracing_subscriber::prelude::*;

/// Crawl the web for natural-language text in target languages,
/// starting from a set of seed URLs.
#[derive(ClapParser, Debug)]
#[command(name = "crawler")]
#[command(about = "Harvest target-language text from seed websites")]
struct Cli {
    /// Gzip- or plain-text file of seed URLs, one per line.
    #[arg(long)]
    seed_file: Option<PathBuf>,

    /// A single seed URL, as an alternative to `--seed_file`.
    #[arg(long)]
    seed_url: Option<String>,

    /// Target language tag (e.g. `kin_Latn`). Repeat for more than one.
    #[arg(long = "language", required = true)]
    languages: Vec<String>,

    #[arg(long, default_value = "./outputs")]
    output_folder: PathBuf,

    /// How many rounds to download and parse. Negative means unbounded.
    #[arg(long, default_value_t = -1)]
    num_rounds: i64,

    #[arg(long, default_value_t = 1000)]
    round_size: usize,

    #[arg(long, default_value_t = 250)]
    download_batch_size: usize,

    #[arg(long, default_value_t = 10)]
    download_n_threads: usize,

    /// Remove all previously crawled data under `output_folder` first.
    #[arg(long, default_value_t = false)]
    start_fresh: bool,

    #[arg(long, default_value_t = false)]
    dont_compress_outputs: bool,

    #[arg(long, default_value_t = false)]
    delete_html: bool,

    #[arg(long, default_value_t = false)]
    delete_parsed: bool,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, default_value = "models/lid.176.bin")]
    lid_model_path: PathBuf,

    /// Minimum crawl-delay applied to every fetch, regardless of what
    /// the origin's robots.txt requests (milliseconds).
    #[arg(long, default_value_t = 0)]
    crawl_delay_ms_floor: u64,
}

fn init_logging(output_folder: &std::path::Path, log_level: &str) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(output_folder)?;
    let file_appender = tracing_appender::rolling::never(output_folder, "log.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let stdout_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
    let file_layer = tracing_subscriber::fmt::layer().with_writer(file_writer).with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn load_seed_urls(cli: &Cli) -> Result<Vec<String>> {
    match (&cli.seed_file, &cli.seed_url) {
        (Some(_), Some(_)) => bail!("pass exactly one of --seed_file or --seed_url, not both"),
        (None, None) => bail!("one of --seed_file or --seed_url is required"),
        (Some(path), None) => {
            let reader = open_line_reader(path)
                .with_context(|| format!("reading seed file {}", path.display()))?;
            let mut urls = Vec::new();
            for line in reader.lines() {
                let line = line?;
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    urls.push(trimmed.to_string());
                }
            }
            Ok(urls)
        }
        (None, Some(url)) => Ok(vec![url.clone()]),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.start_fresh && cli.output_folder.exists() {
        std::fs::remove_dir_all(&cli.output_folder)
            .with_context(|| format!("removing {}", cli.output_folder.display()))?;
    }

    let _log_guard = init_logging(&cli.output_folder, &cli.log_level)?;
    tracing::info!("starting crawl");

    let seed_urls = load_seed_urls(&cli)?;
    tracing::info!(seeds = seed_urls.len(), languages = ?cli.languages, "loaded seeds");

    let mut config = CrawlerConfig::new(cli.output_folder.clone(), cli.languages.clone());
    config.num_rounds = cli.num_rounds;
    config.round_size = cli.round_size;
    config.download_batch_size = cli.download_batch_size;
    config.download_n_threads = cli.download_n_threads;
    config.dont_compress_outputs = cli.dont_compress_outputs;
    config.delete_html = cli.delete_html;
    config.delete_parsed = cli.delete_parsed;
    config.lid_model_path = cli.lid_model_path.clone();
    config.crawl_delay_ms_floor = cli.crawl_delay_ms_floor;

    let client = Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()
        .context("building HTTP client")?;

    let langid = LanguageIdentifier::new(config.lid_model_path.clone());
    let parser = DocumentParser::new(&config, langid);

    let mut coordinator = RoundCoordinator::new(config, client, parser);
    coordinator.bootstrap(seed_urls).context("bootstrapping crawl state")?;
    coordinator.run().await.context("running crawl")?;

    tracing::info!("crawl finished");
    Ok(())
}
