//! airfreight CLI
//!
//! Watches the Incheon airport cargo schedule for one counterpart airport and
//! reports changes to a Discord webhook.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use airfreight::{
    error::{AppError, Result},
    models::{Config, DateRange, Direction, Snapshot, WEBHOOK_ENV, yyyymmdd},
    pipeline::{self, CycleContext, DaemonSchedule, PayloadKind, Trigger},
    services::{AirportScheduleClient, DiscordWebhook, LogNotifier, Notifier},
    storage::LocalStorage,
    utils::log,
};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};

/// airfreight - Incheon cargo schedule watcher
#[derive(Parser, Debug)]
#[command(
    name = "airfreight",
    version,
    about = "Watches Incheon airport cargo schedules and reports changes"
)]
struct Cli {
    /// Path to storage directory containing config and cache
    #[arg(short, long, default_value = "storage", global = true)]
    storage_dir: PathBuf,

    /// Config file (default: {storage_dir}/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Counterpart airport code (overrides schedule.airport)
    #[arg(long, global = true)]
    airport: Option<String>,

    /// Number of days to fetch, starting today (overrides schedule.days)
    #[arg(long, global = true)]
    days: Option<u32>,

    /// Direction to process; repeat for both (overrides schedule.directions)
    #[arg(long = "direction", global = true)]
    directions: Vec<Direction>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compare the schedule with the cache and notify changes
    Check,

    /// Notify the full schedule window
    Notify,

    /// Fetch and print the schedule without touching the cache
    Fetch {
        /// Single date to fetch (YYYYMMDD or YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,

        /// Write the snapshots as JSON instead of printing them
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show the cached baselines
    Show,

    /// Validate configuration
    Validate,

    /// Run the daily listing and periodic checks until stopped
    Daemon,
}

fn parse_date(s: &str) -> std::result::Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, yyyymmdd::FORMAT)
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .map_err(|_| format!("'{s}' is not a date (expected YYYYMMDD)"))
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Everything a command needs, resolved from config and flags.
struct App {
    config: Arc<Config>,
    storage: LocalStorage,
    source: AirportScheduleClient,
    notifier: Box<dyn Notifier>,
    airport: String,
    days: u32,
    directions: Vec<Direction>,
}

impl App {
    fn new(cli: &Cli, mut config: Config) -> Result<Self> {
        if let Some(airport) = &cli.airport {
            config.schedule.airport = airport.clone();
        }
        config.schedule.airport = config.schedule.airport.trim().to_uppercase();
        if let Some(days) = cli.days {
            config.schedule.days = days;
        }
        if !cli.directions.is_empty() {
            config.schedule.directions = cli.directions.clone();
        }
        config.validate()?;

        let cache_dir = resolve_dir(&cli.storage_dir, &config.storage.cache_dir);
        let storage = LocalStorage::new(cache_dir)
            .with_lock_stale(Duration::from_secs(config.storage.lock_stale_secs));

        let source = AirportScheduleClient::new(Arc::new(config.fetcher.clone()))?;

        let notifier: Box<dyn Notifier> = match config.webhook_url() {
            Some(url) => Box::new(DiscordWebhook::new(url, Arc::new(config.notifier.clone()))?),
            None => {
                log::warn!(
                    "No webhook configured (set {} or notifier.webhook_url); notifications are logged only",
                    WEBHOOK_ENV
                );
                Box::new(LogNotifier)
            }
        };

        Ok(Self {
            airport: config.schedule.airport.clone(),
            days: config.schedule.days,
            directions: config.schedule.directions.clone(),
            config: Arc::new(config),
            storage,
            source,
            notifier,
        })
    }

    /// Window starting today, local time.
    fn range(&self) -> DateRange {
        DateRange::starting(Local::now().date_naive(), self.days)
    }

    fn context(&self) -> CycleContext<'_> {
        CycleContext {
            source: &self.source,
            store: &self.storage,
            notifier: self.notifier.as_ref(),
            airport: self.airport.clone(),
            range: self.range(),
            request_delay: Duration::from_millis(self.config.fetcher.request_delay_ms),
        }
    }

    /// Run one cycle per direction; fails if any direction failed.
    async fn run_cycles(&self, kind: PayloadKind) -> Result<()> {
        let title = match kind {
            PayloadKind::Changes => "Schedule check",
            PayloadKind::FullListing => "Schedule listing",
        };
        log::header(&format!("{} for {}", title, self.airport));

        let outcomes = self.context().run_directions(&self.directions, kind).await;

        let mut failures = Vec::new();
        for (direction, outcome) in &outcomes {
            match outcome {
                Ok(report) => {
                    if let Some(e) = &report.dispatch_error {
                        failures.push(format!("{direction}: {e}"));
                    }
                }
                Err(e) => failures.push(format!("{direction}: {e}")),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AppError::validation(format!(
                "{} of {} cycles had errors: {}",
                failures.len(),
                outcomes.len(),
                failures.join("; ")
            )))
        }
    }

    async fn fetch(&self, date: Option<NaiveDate>, output: Option<&Path>) -> Result<()> {
        let range = date.map(DateRange::single).unwrap_or_else(|| self.range());
        let delay = Duration::from_millis(self.config.fetcher.request_delay_ms);

        let mut snapshots = Vec::new();
        for &direction in &self.directions {
            let snapshot =
                pipeline::fetch_snapshot(&self.source, &self.airport, direction, range, delay)
                    .await?;
            snapshots.push(snapshot);
        }

        match output {
            Some(path) => {
                let json = serde_json::to_string_pretty(&snapshots)?;
                std::fs::write(path, json)?;
                log::info!("Schedule saved to {}", path.display());
            }
            None => snapshots.iter().for_each(print_snapshot),
        }
        Ok(())
    }

    async fn show(&self) -> Result<()> {
        log::info!("Cache directory: {}", self.storage.root_dir().display());
        for &direction in &self.directions {
            match self.storage.load_entry(&self.airport, direction).await? {
                Some(entry) => log::summary(
                    &entry.key.to_string(),
                    &[
                        ("Range", entry.snapshot.range.to_string()),
                        ("Records", entry.snapshot.len().to_string()),
                        (
                            "Captured",
                            entry.snapshot.captured_at.with_timezone(&Local).to_rfc3339(),
                        ),
                        ("Saved", entry.saved_at.with_timezone(&Local).to_rfc3339()),
                        ("Checksum", entry.checksum.clone()),
                    ],
                ),
                None => log::info!("{} {}: no baseline yet", self.airport, direction),
            }
        }
        Ok(())
    }

    async fn daemon(&self) -> Result<()> {
        let schedule = DaemonSchedule {
            daily_at: self.config.schedule.daily_time()?,
            check_interval: Duration::from_secs(
                self.config.schedule.check_interval_mins.saturating_mul(60),
            ),
        };
        log::info!(
            "Daemon started: listing daily at {}, checking every {} min",
            self.config.schedule.daily_at,
            self.config.schedule.check_interval_mins
        );

        pipeline::run_daemon(schedule, move |trigger| async move {
            let kind = match trigger {
                Trigger::Daily => PayloadKind::FullListing,
                Trigger::Check => PayloadKind::Changes,
            };
            if let Err(e) = self.run_cycles(kind).await {
                log::error!("{}", e);
            }
            ControlFlow::Continue(())
        })
        .await;
        Ok(())
    }
}

fn resolve_dir(storage_dir: &Path, dir: &str) -> PathBuf {
    let dir = Path::new(dir);
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        storage_dir.join(dir)
    }
}

fn print_snapshot(snapshot: &Snapshot) {
    println!(
        "# {} {} {} ({} flights)",
        snapshot.direction,
        snapshot.airport,
        snapshot.range,
        snapshot.len()
    );
    for r in &snapshot.records {
        println!(
            "{}  {:<6} {:<8} {:<24} {:<16} {}",
            r.date.format("%Y/%m/%d"),
            r.scheduled_time,
            r.flight_number,
            r.airline.as_deref().unwrap_or("-"),
            r.location.as_deref().unwrap_or("-"),
            r.status.as_deref().unwrap_or("-"),
        );
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.storage_dir.join("config.toml"));
    let loaded = Config::load(&config_path);
    let level = loaded
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());
    init_logging(cli.verbose, &level);

    let config = match loaded {
        Ok(config) => {
            log::info!("Loaded configuration from {}", config_path.display());
            config
        }
        Err(e) => {
            log::warn!(
                "Config load failed from {}: {}. Using defaults.",
                config_path.display(),
                e
            );
            Config::default()
        }
    };

    if let Command::Validate = cli.command {
        log::info!("Validating configuration...");
        if let Err(e) = config.validate() {
            log::error!("Config validation failed: {}", e);
            return Err(e);
        }
        log::info!("✓ Config OK");
        match config.webhook_url() {
            Some(url) => {
                url::Url::parse(&url)?;
                log::info!("✓ Webhook URL set");
            }
            None => log::warn!("No webhook URL (set {})", WEBHOOK_ENV),
        }
        return Ok(());
    }

    let app = App::new(&cli, config)?;

    match cli.command {
        Command::Check => app.run_cycles(PayloadKind::Changes).await?,
        Command::Notify => app.run_cycles(PayloadKind::FullListing).await?,
        Command::Fetch { date, output } => app.fetch(date, output.as_deref()).await?,
        Command::Show => app.show().await?,
        Command::Daemon => app.daemon().await?,
        Command::Validate => {}
    }

    log::info!("Done!");

    Ok(())
}
