use anyhow::Context;
use barvault::{
    run_ingestion, universe, AssetClass, Config, DateRange, InstrumentRef, IngestionReport,
    IngestionStatus, SqliteStore, StopSignal, YahooFinanceClient,
};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Daily OHLCV ingestion into SQLite.
#[derive(Debug, Parser)]
#[command(name = "barvault", version, about)]
struct Cli {
    /// SQLite database file (overrides DATABASE_PATH).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch and store history for every instrument in the universe file.
    Ingest {
        /// Universe CSV with `ticker` and `type` columns.
        #[arg(long)]
        universe: Option<PathBuf>,
        /// First day of the window (default DEFAULT_START_DATE).
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last day of the window, inclusive (default today).
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Instruments processed in parallel (default INGEST_CONCURRENCY).
        #[arg(long)]
        concurrency: Option<usize>,
        /// Print the full report as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List stored symbols for an asset class.
    Tickers {
        #[arg(value_parser = parse_asset_class)]
        class: AssetClass,
    },
    /// Print stored bars for one instrument.
    Show {
        symbol: String,
        #[arg(value_parser = parse_asset_class)]
        class: AssetClass,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
}

fn parse_asset_class(s: &str) -> Result<AssetClass, String> {
    AssetClass::parse(s).ok_or_else(|| format!("unknown asset class '{}' (stock, etf, crypto)", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "barvault=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env().context("invalid configuration")?;
    if let Some(db) = cli.db {
        config.store.path = db;
    }

    let store = Arc::new(
        SqliteStore::open(&config.store)
            .await
            .with_context(|| format!("failed to open {}", config.store.path.display()))?,
    );

    match cli.command {
        Command::Ingest {
            universe: universe_path,
            start,
            end,
            concurrency,
            json,
        } => {
            let path = universe_path.unwrap_or_else(|| config.universe_path.clone());
            let instruments = universe::load_universe(&path)
                .with_context(|| format!("failed to load universe {}", path.display()))?;
            let window = window(&config, start, end)?;
            let concurrency = concurrency.unwrap_or(config.ingest.concurrency);
            let source = YahooFinanceClient::new(&config.source)?;

            let stop = StopSignal::new();
            let ctrl_c = stop.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Ctrl-C received, finishing in-flight instruments");
                    ctrl_c.stop();
                }
            });

            let report = run_ingestion(
                Arc::new(source),
                store.clone(),
                &config.ingest,
                instruments,
                window,
                concurrency,
                stop,
            )
            .await?;

            print_report(&report, json)?;
        }
        Command::Tickers { class } => {
            for ticker in store.available_tickers(class).await? {
                println!("{}", ticker);
            }
        }
        Command::Show {
            symbol,
            class,
            start,
            end,
        } => {
            let window = window(&config, start, end)?;
            let instrument = InstrumentRef::new(symbol, class);
            let bars = store.load_bars(&instrument, window).await?;
            info!("{} bars for {}", bars.len(), instrument);

            println!("date,open,high,low,close,volume,dividends,stock_splits,capital_gains");
            for bar in bars {
                println!(
                    "{},{},{},{},{},{},{},{},{}",
                    bar.date,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.dividends,
                    bar.stock_splits,
                    bar.capital_gains.map(|g| g.to_string()).unwrap_or_default()
                );
            }
        }
    }

    store.close();
    Ok(())
}

fn window(
    config: &Config,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> anyhow::Result<DateRange> {
    let start = start.unwrap_or(config.default_start_date);
    let end = end.unwrap_or_else(|| Utc::now().date_naive());
    Ok(DateRange::new(start, end)?)
}

fn print_report(report: &IngestionReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("{}", report.summary());
    for outcome in report.outcomes() {
        if let IngestionStatus::Failed(failure) = &outcome.status {
            println!(
                "  {} ({} attempts): {}",
                outcome.instrument, outcome.attempts, failure
            );
        }
    }
    Ok(())
}
