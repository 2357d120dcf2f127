//! DNS resolution probe.
//!
//! Resolves the cluster domain through the system resolver. Success means
//! at least one A or AAAA record came back within the timeout.

use std::net::IpAddr;
use std::time::Duration;

use tracing::debug;

use super::ProbeError;

/// Resolve `domain` and return the first address.
///
/// # Errors
///
/// [`ProbeError::Dns`] on resolver failure, empty result, or timeout.
pub async fn resolve(domain: &str, timeout: Duration) -> Result<IpAddr, ProbeError> {
    let lookup = tokio::net::lookup_host((domain, 443u16));

    let addrs = tokio::time::timeout(timeout, lookup)
        .await
        .map_err(|_| ProbeError::Dns {
            domain: domain.to_string(),
            reason: format!("timeout after {}s", timeout.as_secs()),
        })?
        .map_err(|e| ProbeError::Dns {
            domain: domain.to_string(),
            reason: e.to_string(),
        })?;

    let mut count = 0usize;
    let mut first: Option<IpAddr> = None;
    for addr in addrs {
        if first.is_none() {
            first = Some(addr.ip());
        }
        count += 1;
    }

    match first {
        Some(ip) => {
            debug!(domain, %ip, records = count, "dns resolution succeeded");
            Ok(ip)
        }
        None => Err(ProbeError::Dns {
            domain: domain.to_string(),
            reason: "no address records".to_string(),
        }),
    }
}
