//! Subscription Registry
//!
//! The desired set of channels and their trades-only flags. The registry is
//! the single source of truth: the server side is reconciled against it on
//! every (re)connect by replaying one join frame per entry, in registration
//! order.
//!
//! A channel is a ticker symbol or the reserved `$lobby` value meaning
//! "all symbols" (firehose; requires entitlement).

use parking_lot::Mutex;

/// Reserved channel meaning "all symbols".
pub const LOBBY_CHANNEL: &str = "$lobby";

/// Advisory upper bound on channel length, a legacy server limit.
pub const MAX_CHANNEL_LEN: usize = 20;

/// One desired subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEntry {
    /// Channel name: a symbol or [`LOBBY_CHANNEL`].
    pub channel: String,
    /// Whether bid/ask updates should be omitted for this channel.
    pub trades_only: bool,
}

/// Result of an [`SubscriptionRegistry::add`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The channel was not present and is now registered.
    Added,
    /// The channel was already registered; the original flag wins.
    AlreadyPresent,
    /// The channel failed validation and was not registered.
    Rejected,
}

/// Insertion-ordered registry of desired channels.
///
/// Entries persist across reconnects until removed; enumeration order is
/// registration order so reconnect replay matches the order the user
/// subscribed in.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<Vec<SubscriptionEntry>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel. Idempotent; the first call's flag wins.
    ///
    /// Empty channels are rejected. Channels longer than
    /// [`MAX_CHANNEL_LEN`] are accepted with a warning (the limit is
    /// advisory on current servers). Adding a symbol while `$lobby` is
    /// registered is accepted and logged as redundant.
    pub fn add(&self, channel: &str, trades_only: bool) -> AddOutcome {
        if channel.is_empty() {
            tracing::warn!("ignoring empty channel");
            return AddOutcome::Rejected;
        }
        if channel != LOBBY_CHANNEL && channel.len() > MAX_CHANNEL_LEN {
            tracing::warn!(
                channel,
                limit = MAX_CHANNEL_LEN,
                "channel exceeds the advisory length limit"
            );
        }

        let mut entries = self.entries.lock();

        if entries.iter().any(|e| e.channel == channel) {
            tracing::debug!(channel, "channel already registered");
            return AddOutcome::AlreadyPresent;
        }

        if channel != LOBBY_CHANNEL && entries.iter().any(|e| e.channel == LOBBY_CHANNEL) {
            tracing::warn!(channel, "redundant join: $lobby already covers all symbols");
        }

        entries.push(SubscriptionEntry {
            channel: channel.to_string(),
            trades_only,
        });
        AddOutcome::Added
    }

    /// Remove a channel. Idempotent; returns whether it was present.
    pub fn remove(&self, channel: &str) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.channel != channel);
        before != entries.len()
    }

    /// Stable snapshot in registration order, for reconnect replay.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SubscriptionEntry> {
        self.entries.lock().clone()
    }

    /// Whether `symbol` is covered: `$lobby` covers everything, otherwise
    /// only an exact entry matches. Used by replay to gate callbacks; live
    /// mode delegates filtering to the server.
    #[must_use]
    pub fn matches(&self, symbol: &str) -> bool {
        let entries = self.entries.lock();
        entries
            .iter()
            .any(|e| e.channel == LOBBY_CHANNEL || e.channel == symbol)
    }

    /// The trades-only flag covering `symbol`: the exact entry's flag if
    /// registered, otherwise the `$lobby` entry's flag if present.
    #[must_use]
    pub fn trades_only_for(&self, symbol: &str) -> Option<bool> {
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|e| e.channel == symbol)
            .or_else(|| entries.iter().find(|e| e.channel == LOBBY_CHANNEL))
            .map(|e| e.trades_only)
    }

    /// Whether a channel is registered.
    #[must_use]
    pub fn contains(&self, channel: &str) -> bool {
        self.entries.lock().iter().any(|e| e.channel == channel)
    }

    /// Number of registered channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent_and_first_flag_wins() {
        let registry = SubscriptionRegistry::new();

        assert_eq!(registry.add("AAPL", false), AddOutcome::Added);
        assert_eq!(registry.add("AAPL", true), AddOutcome::AlreadyPresent);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot[0].trades_only);
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        registry.add("AAPL", false);

        assert!(registry.remove("AAPL"));
        assert!(!registry.remove("AAPL"));
        assert!(registry.is_empty());
    }

    #[test]
    fn empty_channel_is_rejected() {
        let registry = SubscriptionRegistry::new();
        assert_eq!(registry.add("", false), AddOutcome::Rejected);
        assert!(registry.is_empty());
    }

    #[test]
    fn overlong_channel_is_accepted_with_warning() {
        let registry = SubscriptionRegistry::new();
        assert_eq!(
            registry.add("ABCDEFGHIJKLMNOPQRSTU", false),
            AddOutcome::Added
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_preserves_registration_order() {
        let registry = SubscriptionRegistry::new();
        registry.add("MSFT", false);
        registry.add("AAPL", true);
        registry.add("GOOG", false);

        let channels: Vec<_> = registry
            .snapshot()
            .into_iter()
            .map(|e| e.channel)
            .collect();
        assert_eq!(channels, vec!["MSFT", "AAPL", "GOOG"]);
    }

    #[test]
    fn lobby_matches_everything() {
        let registry = SubscriptionRegistry::new();
        registry.add(LOBBY_CHANNEL, false);

        assert!(registry.matches("AAPL"));
        assert!(registry.matches("ANYTHING"));
    }

    #[test]
    fn exact_symbol_matching_without_lobby() {
        let registry = SubscriptionRegistry::new();
        registry.add("AAPL", false);

        assert!(registry.matches("AAPL"));
        assert!(!registry.matches("MSFT"));
    }

    #[test]
    fn symbols_after_lobby_are_kept() {
        // The firehose wins operationally; the entry is still recorded so a
        // later leave of $lobby degrades gracefully.
        let registry = SubscriptionRegistry::new();
        registry.add(LOBBY_CHANNEL, false);
        registry.add("AAPL", true);

        assert_eq!(registry.len(), 2);
        registry.remove(LOBBY_CHANNEL);
        assert!(registry.matches("AAPL"));
        assert!(!registry.matches("MSFT"));
    }

    #[test]
    fn trades_only_resolution() {
        let registry = SubscriptionRegistry::new();
        registry.add("AAPL", true);
        registry.add(LOBBY_CHANNEL, false);

        assert_eq!(registry.trades_only_for("AAPL"), Some(true));
        // Covered only through the lobby entry.
        assert_eq!(registry.trades_only_for("MSFT"), Some(false));

        let empty = SubscriptionRegistry::new();
        assert_eq!(empty.trades_only_for("AAPL"), None);
    }
}
