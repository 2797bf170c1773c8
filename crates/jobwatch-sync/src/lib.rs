//! Scrape cycle orchestration: configuration, the fetch → extract → reconcile →
//! export → notify pipeline, and the interval scheduler that drives it.

pub mod export;
pub mod notify;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use jobwatch_core::Listing;
use jobwatch_extract::{Extraction, ListingExtractor, SelectorSet};
use jobwatch_storage::{
    BackoffPolicy, HttpClientConfig, HttpFetcher, ListingStore, PageArchive, PageSource,
    DEFAULT_USER_AGENT,
};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

pub use export::SnapshotExporter;
pub use notify::{
    compose_digest, Digest, NoopNotifier, NotificationError, Notifier, SmtpConfig, SmtpNotifier,
};

pub const CRATE_NAME: &str = "jobwatch-sync";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub query: String,
    pub location: String,
    pub selectors_path: Option<PathBuf>,
    pub interval: Duration,
    pub snapshot_path: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub http_retries: usize,
    pub archive_dir: Option<PathBuf>,
    pub smtp: Option<SmtpConfig>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://jobwatch.db".to_string(),
            query: "developpeur web".to_string(),
            location: "France".to_string(),
            selectors_path: None,
            interval: Duration::from_secs(3600),
            snapshot_path: PathBuf::from("public/index.html"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout_secs: 30,
            http_retries: 0,
            archive_dir: None,
            smtp: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env_nonempty("DATABASE_URL").unwrap_or(defaults.database_url),
            query: env_nonempty("JOBWATCH_QUERY").unwrap_or(defaults.query),
            location: env_nonempty("JOBWATCH_LOCATION").unwrap_or(defaults.location),
            selectors_path: env_nonempty("JOBWATCH_SELECTORS_PATH").map(PathBuf::from),
            interval: env_parse::<u64>("JOBWATCH_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            snapshot_path: env_nonempty("JOBWATCH_SNAPSHOT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_path),
            user_agent: env_nonempty("JOBWATCH_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: env_parse("JOBWATCH_HTTP_TIMEOUT_SECS")
                .unwrap_or(defaults.http_timeout_secs),
            http_retries: env_parse("JOBWATCH_HTTP_RETRIES").unwrap_or(defaults.http_retries),
            archive_dir: env_nonempty("JOBWATCH_ARCHIVE_DIR").map(PathBuf::from),
            smtp: smtp_from_env(),
        }
    }

    /// `{base}/jobs?q=<query>&l=<location>`, form-encoded.
    pub fn search_url(&self, base_url: &Url) -> Result<Url, url::ParseError> {
        let mut url = base_url.join("/jobs")?;
        url.query_pairs_mut()
            .clear()
            .append_pair("q", &self.query)
            .append_pair("l", &self.location);
        Ok(url)
    }
}

fn smtp_from_env() -> Option<SmtpConfig> {
    let host = env_nonempty("SMTP_HOST")?;
    let to = env_nonempty("NOTIFY_TO")?;
    let username = env_nonempty("SMTP_USERNAME").unwrap_or_default();
    Some(SmtpConfig {
        host,
        port: env_parse("SMTP_PORT").unwrap_or(587),
        password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
        from: env_nonempty("NOTIFY_FROM").unwrap_or_else(|| username.clone()),
        username,
        to,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: bool,
    pub extracted: usize,
    pub skipped_cards: usize,
    pub inserted: Vec<Listing>,
    pub refreshed: usize,
    /// Set when the page skipped cards (or had none) and an archive is configured.
    pub kept_page: Option<PathBuf>,
    pub snapshot_path: Option<PathBuf>,
    pub notified: bool,
}

pub struct SyncPipeline {
    search_url: String,
    source: Box<dyn PageSource>,
    extractor: ListingExtractor,
    store: ListingStore,
    exporter: Option<SnapshotExporter>,
    notifier: Box<dyn Notifier>,
    archive: Option<PageArchive>,
}

impl SyncPipeline {
    pub fn new(
        search_url: impl Into<String>,
        source: Box<dyn PageSource>,
        extractor: ListingExtractor,
        store: ListingStore,
    ) -> Self {
        Self {
            search_url: search_url.into(),
            source,
            extractor,
            store,
            exporter: None,
            notifier: Box::<NoopNotifier>::default(),
            archive: None,
        }
    }

    pub fn with_exporter(mut self, exporter: SnapshotExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_archive(mut self, archive: PageArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Wire the production pipeline: HTTP fetcher, selector set, SQLite
    /// store, snapshot file and, when configured, SMTP and the drift page archive.
    pub async fn from_config(config: &SyncConfig) -> Result<Self> {
        let selectors = match &config.selectors_path {
            Some(path) => SelectorSet::from_yaml_file(path)
                .with_context(|| format!("loading selectors from {}", path.display()))?,
            None => SelectorSet::default(),
        };
        let extractor = ListingExtractor::new(selectors)
            .context("compiling selector set")?
            .with_offset(*Local::now().offset());
        let search_url = config
            .search_url(extractor.base_url())
            .context("building search url")?;

        let http = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: config.user_agent.clone(),
            backoff: BackoffPolicy {
                max_retries: config.http_retries,
                ..Default::default()
            },
            ..Default::default()
        })?;
        let store = ListingStore::connect(&config.database_url)
            .await
            .with_context(|| format!("opening listing store {}", config.database_url))?;

        let mut pipeline = Self::new(search_url, Box::new(http), extractor, store)
            .with_exporter(SnapshotExporter::new(&config.snapshot_path));
        if let Some(dir) = &config.archive_dir {
            pipeline = pipeline.with_archive(PageArchive::new(dir));
        }
        match &config.smtp {
            Some(smtp) => {
                let notifier = SmtpNotifier::new(smtp.clone()).context("configuring smtp notifier")?;
                pipeline = pipeline.with_notifier(Box::new(notifier));
            }
            None => info!("SMTP not configured; new listings are only logged"),
        }
        Ok(pipeline)
    }

    pub fn store(&self) -> &ListingStore {
        &self.store
    }

    pub fn search_url(&self) -> &str {
        &self.search_url
    }

    pub async fn run_once(&self) -> Result<CycleSummary> {
        self.run_once_at(Utc::now()).await
    }

    /// One cycle with `now` as the fetch time. Only a store failure is
    /// returned as an error; every other stage degrades and logs.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<CycleSummary> {
        let run_id = Uuid::new_v4();
        self.cycle(run_id, now)
            .instrument(info_span!("sync_cycle", %run_id))
            .await
    }

    async fn cycle(&self, run_id: Uuid, now: DateTime<Utc>) -> Result<CycleSummary> {
        let started_at = Utc::now();

        let html = match self.source.fetch_page(&self.search_url).await {
            Ok(html) => Some(html),
            Err(err) => {
                warn!(url = %self.search_url, error = %err, "fetch failed; no listings this cycle");
                None
            }
        };

        let extraction = html
            .as_deref()
            .map(|html| self.extractor.extract(html, now))
            .unwrap_or_else(Extraction::default);

        let kept_page = match (&self.archive, &html) {
            (Some(archive), Some(html))
                if PageArchive::should_keep(extraction.cards_seen(), extraction.failures.len()) =>
            {
                match archive.keep(now, extraction.failures.len(), html).await {
                    Ok(path) => Some(path),
                    Err(err) => {
                        warn!(error = ?err, "failed to keep result page");
                        None
                    }
                }
            }
            _ => None,
        };

        let outcome = self
            .store
            .upsert_all(&extraction.listings)
            .await
            .context("reconciling listings")?;
        let inserted = outcome.inserted;
        for listing in &inserted {
            info!(title = %listing.title, company = %listing.company, url = %listing.url, "new listing");
        }

        let snapshot_path = match &self.exporter {
            Some(exporter) => match self.export_snapshot(exporter, now).await {
                Ok(path) => Some(path),
                Err(err) => {
                    warn!(error = ?err, "snapshot export failed");
                    None
                }
            },
            None => None,
        };

        let notified = if inserted.is_empty() {
            false
        } else {
            match self.notifier.notify(&inserted).await {
                Ok(()) => true,
                Err(err) => {
                    error!(error = %err, count = inserted.len(), "notification failed");
                    false
                }
            }
        };

        let summary = CycleSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            fetched: html.is_some(),
            extracted: extraction.listings.len(),
            skipped_cards: extraction.failures.len(),
            inserted,
            refreshed: outcome.refreshed,
            kept_page,
            snapshot_path,
            notified,
        };
        info!(
            fetched = summary.fetched,
            extracted = summary.extracted,
            skipped = summary.skipped_cards,
            inserted = summary.inserted.len(),
            refreshed = summary.refreshed,
            "cycle complete"
        );
        Ok(summary)
    }

    async fn export_snapshot(&self, exporter: &SnapshotExporter, now: DateTime<Utc>) -> Result<PathBuf> {
        let listings = self.store.all().await.context("loading listings for snapshot")?;
        exporter.export(&listings, now).await
    }
}

/// Runs cycles back to back on a fixed interval until cancelled. Cancellation
/// is observed between cycles only.
#[derive(Debug, Clone)]
pub struct Scheduler {
    interval: Duration,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Returns the number of cycles that ran.
    pub async fn run(&self, pipeline: &SyncPipeline) -> usize {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0usize;

        info!(interval_secs = self.interval.as_secs_f64(), url = %pipeline.search_url(), "scheduler started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(err) = pipeline.run_once().await {
                error!(error = ?err, "cycle failed; waiting for next tick");
            }
            cycles += 1;
        }
        info!(cycles, "scheduler stopped");
        cycles
    }

    /// Like [`Scheduler::run`], cancelled by Ctrl-C or SIGTERM.
    pub async fn run_until_shutdown(&self, pipeline: &SyncPipeline) -> usize {
        let token = self.shutdown.clone();
        let watcher = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal() => {
                    info!("shutdown requested; finishing current cycle");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });
        let cycles = self.run(pipeline).await;
        self.shutdown.cancel();
        let _ = watcher.await;
        cycles
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

pub async fn run_sync_once_from_env() -> Result<CycleSummary> {
    let config = SyncConfig::from_env();
    let pipeline = SyncPipeline::from_config(&config).await?;
    pipeline.run_once().await
}
