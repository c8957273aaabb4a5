use std::net::{IpAddr, Ipv4Addr};

use crate::errors::ApiError;

/// Rejects webhook URLs that could be used to reach internal network services.
///
/// No DNS resolution is performed here: hostnames are checked by literal suffix
/// match only, IP literals are checked against the documented blocklists. See
/// DESIGN.md for why resolving arbitrary hostnames is left as a follow-up.
pub fn validate_webhook_url(raw: &str, test_allowlist: &[String]) -> Result<(), ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request(
            "INVALID_WEBHOOK_URL",
            "Webhook URL must not be empty",
        ));
    }

    let (scheme, rest) = trimmed.split_once("://").ok_or_else(|| {
        ApiError::bad_request("INVALID_WEBHOOK_URL", "Webhook URL must include a scheme")
    })?;

    if scheme != "http" && scheme != "https" {
        return Err(ApiError::bad_request(
            "INVALID_WEBHOOK_URL",
            format!("Unsupported scheme '{scheme}': only http and https are allowed"),
        ));
    }

    let host_part = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or("")
        .rsplit_once('@')
        .map(|(_, h)| h)
        .unwrap_or(rest.split(['/', '?', '#']).next().unwrap_or(""));

    let host = host_part.rsplit_once(':').map(|(h, _)| h).unwrap_or(host_part);
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if host.is_empty() {
        return Err(ApiError::bad_request(
            "INVALID_WEBHOOK_URL",
            "Webhook URL must include a host",
        ));
    }

    if test_allowlist.iter().any(|allowed| allowed == host) {
        return Ok(());
    }

    if host.eq_ignore_ascii_case("localhost") || host.to_ascii_lowercase().ends_with(".local") {
        return Err(blocked(host));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_blocked_ip(ip) {
            return Err(blocked(host));
        }
        return Ok(());
    }

    // Not an IP literal and not test-allowlisted: accept by hostname alone.
    // Resolving to an IP to defeat DNS rebinding is not performed (DESIGN.md).
    Ok(())
}

fn blocked(host: &str) -> ApiError {
    ApiError::bad_request(
        "INVALID_WEBHOOK_URL",
        format!("Webhook URL host '{host}' resolves to a disallowed network range"),
    )
}

fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => {
            if v6.is_loopback() || v6.is_unspecified() {
                return true;
            }
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_blocked_v4(v4);
            }
            // fe80::/10 link-local
            let segments = v6.segments();
            (segments[0] & 0xffc0) == 0xfe80
        }
    }
}

fn is_blocked_v4(ip: Ipv4Addr) -> bool {
    if ip.is_loopback() || ip.is_link_local() || ip.is_unspecified() || ip.is_private() {
        return true;
    }
    // 169.254.0.0/16 is also covered by is_link_local(), kept explicit for clarity.
    let octets = ip.octets();
    octets[0] == 169 && octets[1] == 254
}
