//! Normalisation and safety checks for caller-supplied callback URIs.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use reqwest::Url;
use tracing::{debug, warn};

use crate::error::{PaymentError, Result};

/// Parse `raw` into an absolute http(s) callback URI.
///
/// A missing scheme defaults to `https://`. Unless `allow_local` is set,
/// hosts that point back into this machine or a private network are
/// rejected, including hostnames that resolve there.
pub async fn normalize_callback_uri(raw: &str, allow_local: bool) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PaymentError::InvalidCallbackUri("callback uri is empty".to_string()));
    }

    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| PaymentError::InvalidCallbackUri(format!("{}: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PaymentError::InvalidCallbackUri(format!(
            "unsupported scheme {}",
            url.scheme()
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| PaymentError::InvalidCallbackUri(format!("{} has no host", raw)))?
        .to_string();

    if !allow_local {
        check_host(&url, &host).await?;
    }

    Ok(url.to_string())
}

async fn check_host(url: &Url, host: &str) -> Result<()> {
    let local = |reason: &str| -> Result<()> {
        warn!("Rejected callback host {}: {}", host, reason);
        Err(PaymentError::InvalidCallbackUri(format!("{} is a local address", host)))
    };

    let lowered = host.to_ascii_lowercase();
    if lowered == "localhost" || lowered.ends_with(".localhost") {
        return local("localhost name");
    }

    let literal = lowered
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .ok();
    if let Some(ip) = literal {
        return if is_local_ip(&ip) { local("local ip") } else { Ok(()) };
    }

    let port = url.port_or_known_default().unwrap_or(443);
    let resolved = tokio::net::lookup_host((lowered.as_str(), port))
        .await
        .map_err(|e| PaymentError::InvalidCallbackUri(format!("{} does not resolve: {}", host, e)))?;

    for addr in resolved {
        debug!("Callback host {} resolves to {}", host, addr.ip());
        if is_local_ip(&addr.ip()) {
            return local("resolves to a local ip");
        }
    }
    Ok(())
}

pub fn is_local_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_local_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_local_v4(&v4),
            None => is_local_v6(v6),
        },
    }
}

fn is_local_v4(ip: &Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_unspecified() || ip.is_private() || ip.is_link_local() || ip.is_broadcast()
}

fn is_local_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    // fc00::/7 unique local, fe80::/10 link local
    ip.is_loopback() || ip.is_unspecified() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}
