//! Day Replay
//!
//! Reconstructs one trading day's stream offline: downloads the
//! per-subsource binary tick files for the configured date, merges them
//! into a single stream ordered by receive time, runs every tick through
//! the same frame codec as live mode, filters by the subscription
//! registry, and dispatches to the same callbacks.
//!
//! Unlike live mode, where the server filters by subscription, replay
//! filters locally: only symbols the registry covers are dispatched, and
//! quotes are dropped for trades-only channels.

mod download;
mod merge;
mod tick_file;

pub use download::ReplayDownloader;
pub use merge::{AsIfLivePacer, TickMerge};
pub use tick_file::{MAX_PAYLOAD, Tick, TickFileError, TickFileReader};

use std::path::PathBuf;
use std::sync::Arc;

use crate::client::{QuoteHandler, TradeHandler};
use crate::codec;
use crate::config::{Config, ConfigError, Credentials};
use crate::messages::StreamMessage;
use crate::subscription::SubscriptionRegistry;

/// Errors from the replay engine.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// Replay mode needs `replay_date` in the configuration.
    #[error("replay requires replay_date in the configuration")]
    MissingDate,

    /// The replay API rejected the access key (HTTP 401).
    #[error("unauthorized: the access key was rejected (HTTP 401)")]
    Unauthorized,

    /// The replay API answered with an unexpected status.
    #[error("replay API returned HTTP {0}")]
    UnexpectedStatus(u16),

    /// Transport-level HTTP failure.
    #[error("replay transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The HTTP client backing the downloader could not be built.
    #[error("failed to set up the replay downloader: {0}")]
    Setup(String),

    /// The replay manifest was not the expected JSON shape.
    #[error("malformed replay manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// File-system failure while storing or opening tick files.
    #[error("replay I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counters describing one finished replay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Ticks pulled out of the merge.
    pub ticks: u64,
    /// Messages handed to callbacks.
    pub dispatched: u64,
    /// Messages dropped by the registry filter or trades-only policy.
    pub filtered: u64,
    /// Tick-file records that failed to read or decode.
    pub source_errors: u64,
}

/// Offline replay driver sharing the live client's codec, registry and
/// callback contract.
pub struct ReplayClient {
    config: Config,
    credentials: Credentials,
    registry: Arc<SubscriptionRegistry>,
    on_trade: TradeHandler,
    on_quote: Option<QuoteHandler>,
    default_trades_only: bool,
}

impl std::fmt::Debug for ReplayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayClient")
            .field("provider", &self.config.provider)
            .field("replay_date", &self.config.replay_date)
            .field("channels", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl ReplayClient {
    /// Construct a replay client.
    ///
    /// The callback contract matches [`crate::Client::start`]: `on_trade`
    /// is required, and an absent `on_quote` forces trades-only.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty access key or an invalid
    /// configuration.
    pub fn new(
        access_key: impl Into<String>,
        on_trade: TradeHandler,
        on_quote: Option<QuoteHandler>,
        config: Config,
    ) -> Result<Self, ConfigError> {
        let credentials = Credentials::new(access_key)?;
        config.validate()?;
        let default_trades_only = config.trades_only || on_quote.is_none();

        Ok(Self {
            config,
            credentials,
            registry: Arc::new(SubscriptionRegistry::new()),
            on_trade,
            on_quote,
            default_trades_only,
        })
    }

    /// Register channels to dispatch, using the client-wide trades-only
    /// default. Replay has no server round-trip, so this never waits.
    pub fn join<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.join_with(symbols, false);
    }

    /// Register channels with an explicit per-call trades-only flag.
    pub fn join_with<I, S>(&self, symbols: I, trades_only: bool)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let effective = trades_only || self.default_trades_only;
        for symbol in symbols {
            self.registry.add(&symbol.into(), effective);
        }
    }

    /// Remove channels from the dispatch filter.
    pub fn leave<I, S>(&self, symbols: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for symbol in symbols {
            self.registry.remove(&symbol.into());
        }
    }

    /// Download the configured day's tick files and replay them.
    ///
    /// Files land in the system temp directory and are removed afterwards
    /// when `replay_delete_file_when_done` is set.
    ///
    /// # Errors
    ///
    /// Surfaces download and file-system failures; individual damaged
    /// records are logged and counted instead.
    pub async fn run(&self) -> Result<ReplaySummary, ReplayError> {
        let date = self.config.replay_date.ok_or(ReplayError::MissingDate)?;
        let downloader = ReplayDownloader::new(self.credentials.access_key())
            .map_err(|e| ReplayError::Setup(e.to_string()))?;
        self.run_with_downloader(&downloader, date).await
    }

    /// Like [`ReplayClient::run`] but against a caller-supplied
    /// downloader, e.g. one pointed at a different manifest endpoint.
    ///
    /// # Errors
    ///
    /// Same contract as [`ReplayClient::run`].
    pub async fn run_with_downloader(
        &self,
        downloader: &ReplayDownloader,
        date: chrono::NaiveDate,
    ) -> Result<ReplaySummary, ReplayError> {
        let dest_dir = std::env::temp_dir();
        let mut paths = Vec::new();
        for subsource in self.config.provider.replay_subsources().iter().copied() {
            paths.push(downloader.download(subsource, date, &dest_dir).await?);
        }

        let summary = self.replay_files(&paths).await;

        if self.config.replay_delete_file_when_done {
            for path in &paths {
                if let Err(error) = tokio::fs::remove_file(path).await {
                    tracing::warn!(path = %path.display(), %error, "failed to delete tick file");
                }
            }
        }

        summary
    }

    /// Replay already-downloaded tick files.
    ///
    /// # Errors
    ///
    /// Returns an error only when a file cannot be opened; damaged records
    /// inside a file are logged and counted in the summary.
    pub async fn replay_files(&self, paths: &[PathBuf]) -> Result<ReplaySummary, ReplayError> {
        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            tracing::info!(path = %path.display(), "opening tick file");
            sources.push(TickFileReader::open(path)?);
        }

        let merge = TickMerge::new(sources);
        let mut pacer = self
            .config
            .replay_as_if_live
            .then(AsIfLivePacer::new);

        let mut summary = ReplaySummary::default();

        for item in merge {
            let tick = match item {
                Ok(tick) => tick,
                Err(error) => {
                    tracing::warn!(%error, "tick source error");
                    summary.source_errors += 1;
                    continue;
                }
            };

            if let Some(pacer) = pacer.as_mut() {
                pacer.pace(tick.receive_time).await;
            }
            summary.ticks += 1;

            match codec::parse_frame(&tick.payload) {
                Ok(messages) => {
                    for message in messages {
                        self.dispatch(message, &mut summary);
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "malformed tick payload");
                    summary.source_errors += 1;
                }
            }
        }

        tracing::info!(
            ticks = summary.ticks,
            dispatched = summary.dispatched,
            filtered = summary.filtered,
            source_errors = summary.source_errors,
            "replay complete"
        );
        Ok(summary)
    }

    /// Apply the registry filter and trades-only policy, then invoke the
    /// matching callback.
    fn dispatch(&self, message: StreamMessage, summary: &mut ReplaySummary) {
        if !self.registry.matches(message.symbol()) {
            summary.filtered += 1;
            return;
        }

        let trades_only = self
            .registry
            .trades_only_for(message.symbol())
            .unwrap_or(false)
            || self.default_trades_only;

        match message {
            StreamMessage::Trade(trade) => {
                (self.on_trade)(trade);
                summary.dispatched += 1;
            }
            StreamMessage::Quote(quote) => {
                if trades_only {
                    summary.filtered += 1;
                    return;
                }
                match &self.on_quote {
                    Some(on_quote) => {
                        on_quote(quote);
                        summary.dispatched += 1;
                    }
                    None => summary.filtered += 1,
                }
            }
        }
    }
}
