//! Endpoint resolution and ordering.
//!
//! Turns configuration into the endpoint set a run operates on: explicit
//! endpoints, DNS SRV discovery, or the cluster membership list. Also places
//! the raft leader last so it is maintained after its followers.

use std::net::{IpAddr, Ipv4Addr};

use tracing::{debug, warn};

use crate::config::DefragConfig;
use crate::error::{DefragError, Result};
use crate::service::{with_timeout, ClusterService, EndpointStatus, NameService};

const ACCEPTED_SCHEMES: [&str; 2] = ["http", "https"];

/// Canonical form used for membership-derived dedup: trimmed, without
/// trailing slashes, scheme and authority lowercased.
pub fn normalize(endpoint: &str) -> String {
    let trimmed = endpoint.trim().trim_end_matches('/');
    match trimmed.split_once("://") {
        Some((scheme, rest)) => {
            let (authority, path) = match rest.find('/') {
                Some(idx) => rest.split_at(idx),
                None => (rest, ""),
            };
            format!(
                "{}://{}{}",
                scheme.to_ascii_lowercase(),
                authority.to_ascii_lowercase(),
                path
            )
        }
        None if trimmed.starts_with("unix:") || trimmed.starts_with("unixs:") => {
            trimmed.to_string()
        }
        None => trimmed.to_ascii_lowercase(),
    }
}

fn is_unix_socket(endpoint: &str) -> bool {
    endpoint.starts_with("unix:") || endpoint.starts_with("unixs:")
}

/// Reject endpoints whose URL carries a scheme this tool cannot speak.
pub fn check_scheme(endpoint: &str) -> Result<()> {
    if is_unix_socket(endpoint) {
        return Ok(());
    }
    if let Some((scheme, _)) = endpoint.split_once("://") {
        if !ACCEPTED_SCHEMES.contains(&scheme.to_ascii_lowercase().as_str()) {
            return Err(DefragError::BadScheme {
                endpoint: endpoint.to_string(),
            });
        }
    }
    Ok(())
}

/// Extract the host part of `host[:port]`, `[v6]:port` or a bare IPv6 literal.
fn split_host(endpoint: &str, authority: &str) -> Result<String> {
    let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);
    if authority.is_empty() {
        return Err(DefragError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: "missing host".to_string(),
        });
    }

    if let Some(rest) = authority.strip_prefix('[') {
        return match rest.split_once(']') {
            Some((host, _)) => Ok(host.to_string()),
            None => Err(DefragError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "missing ']' in address".to_string(),
            }),
        };
    }

    match authority.matches(':').count() {
        0 => Ok(authority.to_string()),
        1 => Ok(authority
            .split_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_default()),
        // unbracketed IPv6 literal without port
        _ => Ok(authority.to_string()),
    }
}

/// `127.1` and `127.0.1` style shorthand.
fn parse_ipv4_shorthand(host: &str) -> Option<Ipv4Addr> {
    let parts: Vec<&str> = host.split('.').collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    let nums: Vec<u32> = parts
        .iter()
        .map(|p| p.parse::<u32>().ok())
        .collect::<Option<Vec<_>>>()?;
    let (head, last) = nums.split_at(nums.len() - 1);
    if head.iter().any(|n| *n > 255) {
        return None;
    }
    let tail_bits = 8 * (4 - head.len() as u32);
    if tail_bits < 32 && last[0] >= (1u32 << tail_bits) {
        return None;
    }
    let mut value = last[0];
    for (i, octet) in head.iter().enumerate() {
        value |= octet << (24 - 8 * i as u32);
    }
    Some(Ipv4Addr::from(value))
}

fn is_loopback_host(host: &str) -> bool {
    let host = host.trim_end_matches('.');
    if host.eq_ignore_ascii_case("localhost") || host.to_ascii_lowercase().ends_with(".localhost") {
        return true;
    }
    // zone index, e.g. fe80::1%eth0
    let host = host.split('%').next().unwrap_or(host);
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => v4.is_loopback(),
        Ok(IpAddr::V6(v6)) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
        Err(_) => parse_ipv4_shorthand(host).is_some_and(|v4| v4.is_loopback()),
    }
}

/// True when `endpoint` addresses this host: `localhost`, a loopback IP or a
/// Unix socket. Unsupported URL schemes are an error.
pub fn is_local_endpoint(endpoint: &str) -> Result<bool> {
    if is_unix_socket(endpoint) {
        return Ok(true);
    }

    let authority = match endpoint.split_once("://") {
        Some((_, rest)) => {
            check_scheme(endpoint)?;
            rest.split('/').next().unwrap_or(rest)
        }
        None => endpoint,
    };

    let host = split_host(endpoint, authority)?;
    Ok(is_loopback_host(&host))
}

/// Endpoints advertised by the name service, minus plaintext ones unless
/// insecure discovery is allowed.
pub async fn endpoints_from_discovery(
    config: &DefragConfig,
    names: &dyn NameService,
) -> Result<Vec<String>> {
    let Some(domain) = config.discovery_domain() else {
        return Ok(Vec::new());
    };
    let service = config.dns_service.as_deref().unwrap_or_default();

    let discovered = with_timeout(
        "discovery",
        config.command_timeout,
        names.lookup(domain, service),
    )
    .await
    .map_err(|source| DefragError::Discovery {
        domain: domain.to_string(),
        source,
    })?;

    if config.insecure_discovery {
        return Ok(discovered);
    }

    Ok(discovered
        .into_iter()
        .filter(|ep| {
            let plaintext = ep.to_ascii_lowercase().starts_with("http://");
            if plaintext {
                warn!("ignoring discovered insecure endpoint {:?}", ep);
            }
            !plaintext
        })
        .collect())
}

/// Endpoints named on the command line: discovery results when available,
/// otherwise the explicit list.
pub async fn endpoints_from_cmd(
    config: &DefragConfig,
    names: &dyn NameService,
) -> Result<Vec<String>> {
    let mut eps = endpoints_from_discovery(config, names).await?;
    if eps.is_empty() {
        eps = config
            .endpoints
            .iter()
            .filter(|ep| !ep.trim().is_empty())
            .cloned()
            .collect();
    }
    if eps.is_empty() {
        return Err(DefragError::NoEndpoints);
    }
    for ep in &eps {
        check_scheme(ep)?;
    }
    Ok(eps)
}

/// Client URLs of every voting member, sorted and deduplicated.
pub async fn endpoints_from_cluster(
    config: &DefragConfig,
    cluster: &dyn ClusterService,
    names: &dyn NameService,
) -> Result<Vec<String>> {
    let bootstrap = endpoints_from_cmd(config, names).await?;
    let members = with_timeout(
        "member list",
        config.command_timeout,
        cluster.list_members(&bootstrap),
    )
    .await
    .map_err(DefragError::MembershipQuery)?;

    let mut eps = Vec::new();
    // learners only serve status and serializable reads
    for member in members.iter().filter(|m| !m.is_learner) {
        for url in &member.client_urls {
            check_scheme(url)?;
            if config.exclude_localhost && is_local_endpoint(url)? {
                debug!("excluding local endpoint {} of member {:x}", url, member.id);
                continue;
            }
            eps.push(normalize(url));
        }
    }

    eps.sort();
    eps.dedup();

    if eps.is_empty() {
        return Err(DefragError::NoEndpoints);
    }
    Ok(eps)
}

/// Resolve the endpoints a maintenance run operates on.
pub async fn resolve(
    config: &DefragConfig,
    cluster: &dyn ClusterService,
    names: &dyn NameService,
) -> Result<Vec<String>> {
    if config.use_cluster_endpoints {
        endpoints_from_cluster(config, cluster, names).await
    } else {
        endpoints_from_cmd(config, names).await
    }
}

/// Resolve the endpoints to health-check: every voting member, or only the
/// explicit endpoints when cluster-wide checking is skipped.
pub async fn resolve_for_health_check(
    config: &DefragConfig,
    cluster: &dyn ClusterService,
    names: &dyn NameService,
) -> Result<Vec<String>> {
    if config.skip_healthcheck_cluster_endpoints {
        endpoints_from_cmd(config, names).await
    } else {
        endpoints_from_cluster(config, cluster, names).await
    }
}

/// Reorder so endpoints reporting themselves as raft leader come last.
/// Relative order within leaders and non-leaders is preserved.
pub fn order_with_leader_last(endpoints: &[String], statuses: &[EndpointStatus]) -> Vec<String> {
    if endpoints.len() <= 1 {
        return endpoints.to_vec();
    }

    let is_leader = |ep: &String| {
        statuses
            .iter()
            .any(|s| &s.endpoint == ep && s.is_leader())
    };

    let (leaders, mut ordered): (Vec<String>, Vec<String>) =
        endpoints.iter().cloned().partition(|ep| is_leader(ep));
    ordered.extend(leaders);
    ordered
}
