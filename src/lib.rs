#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Intrinio Real-Time Equities Client
//!
//! A client library for Intrinio's real-time equities WebSocket feeds.
//! Maintains an authenticated WebSocket session against one of the provider
//! endpoints (IEX/MEMX real-time, delayed SIP, NASDAQ Basic, CBOE One, or a
//! manually specified host), subscribes to per-symbol or firehose channels,
//! decodes the binary frame format into trade and quote records, and hands
//! them to user-supplied callbacks.
//!
//! A separate replay mode reconstructs a full trading day by downloading the
//! per-subsource binary tick files from the REST API and merging them into a
//! single time-ordered stream, optionally paced to wall-clock.
//!
//! # Data Flow
//!
//! ```text
//! live:    auth ──► WebSocket ──► frame codec ──► on_trade / on_quote
//!                      ▲
//!            subscription registry (replayed on every reconnect)
//!
//! replay:  REST API ──► tick files ──► k-way merge ──► frame codec ──►
//!          registry filter ──► on_trade / on_quote
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use intrinio_realtime::{Client, Config};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let on_trade = Arc::new(|trade: intrinio_realtime::Trade| {
//!     println!("{} @ {}", trade.symbol, trade.price);
//! });
//!
//! let client = Client::start("YOUR_API_KEY", on_trade, None, Config::default())?;
//! client.join(["AAPL", "MSFT"]).await?;
//! # client.stop().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Little-endian byte readers for the wire format.
pub mod bytes;

/// Trade and quote record types.
pub mod messages;

/// Binary frame codec: parsing and control-frame construction.
pub mod codec;

/// Provider endpoints and URL construction.
pub mod provider;

/// Client configuration.
pub mod config;

/// Session-token acquisition.
pub mod auth;

/// Fixed-schedule backoff driver for self-healing.
pub mod backoff;

/// Desired-subscription registry.
pub mod subscription;

/// Live session controller.
pub mod client;

/// Day-replay engine.
pub mod replay;

// =============================================================================
// Re-exports
// =============================================================================

pub use auth::{AuthClient, AuthError};
pub use backoff::BackoffSchedule;
pub use client::{Client, QuoteHandler, SessionError, SessionState, TradeHandler};
pub use codec::CodecError;
pub use config::{Config, ConfigError, Credentials};
pub use messages::{Quote, QuoteKind, StreamMessage, SubProvider, Trade};
pub use provider::Provider;
pub use replay::{ReplayClient, ReplayError, ReplaySummary};
pub use subscription::{AddOutcome, SubscriptionEntry, SubscriptionRegistry};

/// SDK identification string sent as the `Client-Information` header and
/// WebSocket query parameter.
#[must_use]
pub fn client_information() -> String {
    format!("IntrinioRealtimeRustSDKv{}", env!("CARGO_PKG_VERSION"))
}
