//! Proxy selection for live capture.
//!
//! Candidates are tried in order; the first that answers wins. Channels on
//! the allow-list always connect directly.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProxyKind {
    /// Regular HTTP(S) proxy, passed to the downloader as `--http-proxy`.
    Http,
    /// Playlist proxy serving `{url}/playlist/{channel}.m3u8`.
    Playlist,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCandidate {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: ProxyKind,
}

#[derive(Debug, Clone, Default)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub candidates: Vec<ProxyCandidate>,
    /// Channel logins that never use a proxy.
    pub whitelist: Vec<String>,
    /// URL fetched through HTTP proxies to prove they work.
    pub test_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedProxy {
    Direct,
    Http(String),
    Playlist(String),
}

impl ResolvedProxy {
    /// Downloader arguments selecting this proxy.
    pub fn streamlink_args(&self) -> Vec<String> {
        match self {
            Self::Direct => Vec::new(),
            Self::Http(url) => vec!["--http-proxy".to_string(), url.clone()],
            Self::Playlist(url) => vec!["--twitch-proxy-playlist".to_string(), url.clone()],
        }
    }
}

/// Pick the proxy to use for `channel_login`.
pub async fn resolve_proxy(
    client: &reqwest::Client,
    config: &ProxyConfig,
    channel_login: &str,
) -> ResolvedProxy {
    if !config.enabled || config.candidates.is_empty() {
        return ResolvedProxy::Direct;
    }
    if config
        .whitelist
        .iter()
        .any(|login| login.eq_ignore_ascii_case(channel_login))
    {
        debug!(channel = channel_login, "Channel is whitelisted, not using a proxy");
        return ResolvedProxy::Direct;
    }

    for candidate in &config.candidates {
        let ok = match candidate.kind {
            ProxyKind::Playlist => probe_playlist_proxy(client, &candidate.url, channel_login).await,
            ProxyKind::Http => probe_http_proxy(&candidate.url, &config.test_url).await,
        };
        if ok {
            info!(channel = channel_login, proxy = %candidate.url, kind = %candidate.kind, "Using proxy");
            return match candidate.kind {
                ProxyKind::Http => ResolvedProxy::Http(candidate.url.clone()),
                ProxyKind::Playlist => ResolvedProxy::Playlist(candidate.url.clone()),
            };
        }
        warn!(proxy = %candidate.url, "Proxy failed health check");
    }

    warn!(channel = channel_login, "No working proxy found, connecting directly");
    ResolvedProxy::Direct
}

async fn probe_playlist_proxy(client: &reqwest::Client, base: &str, channel_login: &str) -> bool {
    let url = format!(
        "{}/playlist/{}.m3u8",
        base.trim_end_matches('/'),
        channel_login.to_lowercase()
    );
    let response = match client.get(&url).timeout(PROBE_TIMEOUT).send().await {
        Ok(resp) if resp.status().is_success() => resp,
        Ok(resp) => {
            debug!(url = %url, status = %resp.status(), "Playlist proxy returned error status");
            return false;
        }
        Err(e) => {
            debug!(url = %url, error = %e, "Playlist proxy request failed");
            return false;
        }
    };
    match response.text().await {
        Ok(body) => body.trim_start().starts_with("#EXTM3U"),
        Err(_) => false,
    }
}

async fn probe_http_proxy(proxy_url: &str, test_url: &str) -> bool {
    let client = match reqwest::Proxy::all(proxy_url).and_then(|proxy| {
        reqwest::Client::builder()
            .proxy(proxy)
            .timeout(PROBE_TIMEOUT)
            .build()
    }) {
        Ok(client) => client,
        Err(e) => {
            warn!(proxy = proxy_url, error = %e, "Invalid proxy URL");
            return false;
        }
    };
    match client.get(test_url).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            debug!(proxy = proxy_url, error = %e, "HTTP proxy request failed");
            false
        }
    }
}
