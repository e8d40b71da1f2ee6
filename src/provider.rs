//! Provider Endpoints
//!
//! The upstream feed selection: which hosts to authenticate against and
//! stream from, and which replay subsources make up a trading day for that
//! feed. `Manual` substitutes a caller-supplied host and downgrades to
//! plaintext HTTP/WS for lab setups.

/// Upstream feed choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    /// IEX/MEMX real-time feed.
    #[default]
    Realtime,
    /// Delayed SIP composite feed.
    DelayedSip,
    /// NASDAQ Basic feed.
    NasdaqBasic,
    /// CBOE One feed.
    CboeOne,
    /// Caller-supplied host, plaintext HTTP/WS.
    Manual,
}

impl Provider {
    /// Provider name for logs and configuration.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Realtime => "REALTIME",
            Self::DelayedSip => "DELAYED_SIP",
            Self::NasdaqBasic => "NASDAQ_BASIC",
            Self::CboeOne => "CBOE_ONE",
            Self::Manual => "MANUAL",
        }
    }

    /// Parse a provider name, case-insensitively.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "REALTIME" => Some(Self::Realtime),
            "DELAYED_SIP" => Some(Self::DelayedSip),
            "NASDAQ_BASIC" => Some(Self::NasdaqBasic),
            "CBOE_ONE" => Some(Self::CboeOne),
            "MANUAL" => Some(Self::Manual),
            _ => None,
        }
    }

    /// Hostname serving both auth and the WebSocket for this provider.
    ///
    /// `Manual` has no fixed host; the caller supplies one.
    const fn host(&self) -> Option<&'static str> {
        match self {
            Self::Realtime => Some("realtime-mx.intrinio.com"),
            Self::DelayedSip => Some("realtime-delayed-sip.intrinio.com"),
            Self::NasdaqBasic => Some("realtime-nasdaq-basic.intrinio.com"),
            Self::CboeOne => Some("realtime-cboe-one.intrinio.com"),
            Self::Manual => None,
        }
    }

    /// Whether this provider uses TLS. `Manual` hosts are plaintext.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        !matches!(self, Self::Manual)
    }

    /// Authentication endpoint URL.
    ///
    /// `manual_host` is consulted only for [`Provider::Manual`] and may
    /// include a port.
    #[must_use]
    pub fn auth_url(&self, manual_host: Option<&str>) -> String {
        match self.host() {
            Some(host) => format!("https://{host}/auth"),
            None => format!("http://{}/auth", manual_host.unwrap_or("localhost")),
        }
    }

    /// WebSocket URL including the session token and client identification.
    #[must_use]
    pub fn websocket_url(
        &self,
        manual_host: Option<&str>,
        token: &str,
        client_info: &str,
        delayed: bool,
    ) -> String {
        let (scheme, host) = match self.host() {
            Some(host) => ("wss", host.to_string()),
            None => ("ws", manual_host.unwrap_or("localhost").to_string()),
        };
        let mut url = format!(
            "{scheme}://{host}/socket/websocket?vsn=1.0.0&token={token}&Client-Information={client_info}&UseNewEquitiesFormat=v2"
        );
        if delayed {
            url.push_str("&delayed=true");
        }
        url
    }

    /// Replay subsources that together make up one trading day on this feed.
    #[must_use]
    pub const fn replay_subsources(&self) -> &'static [&'static str] {
        match self {
            Self::Realtime | Self::Manual => &["iex"],
            Self::DelayedSip => &[
                "utp_delayed",
                "cta_a_delayed",
                "cta_b_delayed",
                "otc_delayed",
            ],
            Self::NasdaqBasic => &["nasdaq_basic"],
            Self::CboeOne => &["cboe_one"],
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
