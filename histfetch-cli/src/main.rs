//! HistFetch CLI — download historical market data and manage the
//! instrument catalog.
//!
//! Commands:
//! - `download` — fetch candles for a set of symbols and persist CSV/Parquet
//! - `instruments` — refresh the broker's instrument dump

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use histfetch_core::auth::resolve_credentials;
use histfetch_core::broker::KiteClient;
use histfetch_core::cancel::CancelToken;
use histfetch_core::config::AppConfig;
use histfetch_core::domain::Interval;
use histfetch_core::fetch::{Downloader, StdoutEvents, TimeWindow};
use histfetch_core::instruments::InstrumentCatalog;
use histfetch_core::store::{CandleSink, CsvStore, ParquetStore};

#[derive(Parser)]
#[command(
    name = "histfetch",
    about = "Download historical market data from the broker and save it as CSV or Parquet"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download historical candles for the given symbols.
    Download {
        /// Symbols to download (e.g. INFY RELIANCE TCS).
        symbols: Vec<String>,

        /// File containing symbols, one per line.
        #[arg(long)]
        symbol_file: Option<PathBuf>,

        /// Start date (YYYY-MM-DD). Mutually exclusive with --days.
        #[arg(long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        to: Option<String>,

        /// Number of days to fetch, counting back from the end date.
        #[arg(long)]
        days: Option<i64>,

        /// Candle interval: minute, hour, or day.
        #[arg(long)]
        interval: Option<String>,

        /// Path to the TOML config file.
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,

        /// Output directory for CSV files.
        #[arg(long)]
        output_dir: Option<String>,

        /// Also write Parquet output.
        #[arg(long, default_value_t = false)]
        parquet: bool,

        /// Output directory for Parquet files.
        #[arg(long)]
        parquet_dir: Option<String>,

        /// Delay between requests in milliseconds.
        #[arg(long)]
        request_delay: Option<u64>,

        /// Maximum retries for failed requests.
        #[arg(long)]
        max_retries: Option<u32>,
    },
    /// Refresh the broker's instrument dump.
    Instruments {
        /// Path to the TOML config file.
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,

        /// Override the dump URL.
        #[arg(long)]
        url: Option<String>,

        /// Override the local dump path.
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Download {
            symbols,
            symbol_file,
            from,
            to,
            days,
            interval,
            config,
            output_dir,
            parquet,
            parquet_dir,
            request_delay,
            max_retries,
        } => run_download(DownloadArgs {
            symbols,
            symbol_file,
            from,
            to,
            days,
            interval,
            config,
            output_dir,
            parquet,
            parquet_dir,
            request_delay,
            max_retries,
        }),
        Commands::Instruments { config, url, path } => run_instruments(&config, url, path),
    }
}

struct DownloadArgs {
    symbols: Vec<String>,
    symbol_file: Option<PathBuf>,
    from: Option<String>,
    to: Option<String>,
    days: Option<i64>,
    interval: Option<String>,
    config: PathBuf,
    output_dir: Option<String>,
    parquet: bool,
    parquet_dir: Option<String>,
    request_delay: Option<u64>,
    max_retries: Option<u32>,
}

fn run_download(args: DownloadArgs) -> Result<()> {
    let mut config = AppConfig::load(&args.config)?;

    // CLI flags override file and environment.
    if let Some(interval) = args.interval {
        config.historical.interval = interval;
    }
    if let Some(days) = args.days {
        config.historical.days_to_fetch = days;
    }
    if let Some(output_dir) = args.output_dir {
        config.historical.output_dir = output_dir;
    }
    if args.parquet {
        config.historical.parquet_enabled = true;
    }
    if let Some(parquet_dir) = args.parquet_dir {
        config.historical.parquet_dir = parquet_dir;
    }
    if let Some(request_delay) = args.request_delay {
        config.historical.request_delay_ms = request_delay;
    }
    if let Some(max_retries) = args.max_retries {
        config.historical.max_retries = max_retries;
    }

    let interval: Interval = config
        .historical
        .interval
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let window = resolve_window(
        args.from.as_deref(),
        args.to.as_deref(),
        args.days,
        config.historical.days_to_fetch,
    )?;
    let symbols = resolve_symbols(args.symbols, args.symbol_file.as_deref())?;

    // Fail fast on credentials before touching the batch.
    let credentials = resolve_credentials(&config.auth).context("failed to resolve credentials")?;

    let instruments_path = Path::new(&config.historical.instruments_path);
    if !instruments_path.exists() {
        println!("Instrument dump missing, downloading...");
        InstrumentCatalog::download(&config.broker.instruments_url, instruments_path)?;
    }
    let catalog = InstrumentCatalog::load(instruments_path, &config.broker.exchange)?;

    let (instruments, unknown) = catalog.for_symbols(&symbols);
    for symbol in &unknown {
        eprintln!("Warning: instrument not found, skipping: {symbol}");
    }
    if instruments.is_empty() {
        bail!("no valid instruments found for the specified symbols");
    }
    println!("Found {} instruments to download", instruments.len());

    let broker = KiteClient::with_base_url(&credentials, &config.broker.api_base_url);
    let mut sinks: Vec<Box<dyn CandleSink>> =
        vec![Box::new(CsvStore::new(&config.historical.output_dir))];
    if config.historical.parquet_enabled {
        sinks.push(Box::new(ParquetStore::new(&config.historical.parquet_dir)));
    }

    let events = StdoutEvents;
    let downloader = Downloader::new(
        &broker,
        &sinks,
        config.historical.fetch_policy(),
        &events,
    );
    let outcomes = downloader.run(&instruments, window, interval, &CancelToken::new())?;

    if outcomes.iter().all(|o| !o.is_success()) {
        bail!("every instrument failed to download");
    }
    Ok(())
}

fn run_instruments(config_path: &Path, url: Option<String>, path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    let url = url.unwrap_or(config.broker.instruments_url);
    let path = path.unwrap_or_else(|| PathBuf::from(&config.historical.instruments_path));

    println!("Downloading instrument dump from {url}...");
    InstrumentCatalog::download(&url, &path)?;

    let catalog = InstrumentCatalog::load(&path, &config.broker.exchange)?;
    println!(
        "Saved {} {} instruments to {}",
        catalog.len(),
        config.broker.exchange,
        path.display()
    );
    Ok(())
}

/// Build the total window from --from/--to/--days, defaulting to the
/// configured look-back ending now.
fn resolve_window(
    from: Option<&str>,
    to: Option<&str>,
    days_flag: Option<i64>,
    days_config: i64,
) -> Result<TimeWindow> {
    if from.is_some() && days_flag.is_some() {
        bail!("--from and --days are mutually exclusive");
    }

    let end = match to {
        Some(s) => parse_date(s)?
            .succ_opt()
            .context("end date out of range")?
            .and_hms_opt(0, 0, 0)
            .unwrap(),
        None => chrono::Local::now().naive_local(),
    };

    let start = match from {
        Some(s) => parse_date(s)?.and_hms_opt(0, 0, 0).unwrap(),
        None => end - chrono::Duration::days(days_flag.unwrap_or(days_config)),
    };

    TimeWindow::new(start, end).map_err(|e| anyhow::anyhow!(e))
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}'"))
}

/// Symbols come from positional arguments or a one-per-line file.
fn resolve_symbols(symbols: Vec<String>, symbol_file: Option<&Path>) -> Result<Vec<String>> {
    if !symbols.is_empty() {
        return Ok(symbols);
    }
    let Some(path) = symbol_file else {
        bail!("no symbols specified: pass them as arguments or use --symbol-file");
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read symbol file {}", path.display()))?;
    let symbols: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();
    if symbols.is_empty() {
        bail!("symbol file {} is empty", path.display());
    }
    Ok(symbols)
}
