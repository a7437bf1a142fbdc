//! URL and event-type validation for endpoint registration.
//!
//! Webhook URLs are screened against private/internal destinations so a
//! registered endpoint cannot be used to probe the deployment's own
//! network (SSRF). Event type names are validated by shape rather than
//! catalog membership — the catalog is advisory.

use std::net::IpAddr;

use crate::catalog::WebhookEventType;
use crate::error::WebhookError;

/// Maximum accepted event type name length.
const MAX_EVENT_TYPE_LEN: usize = 128;

/// Validate a webhook delivery URL.
///
/// Checks:
/// 1. URL is parseable
/// 2. Scheme is HTTPS (or HTTP if `allow_http` is set for dev/test)
/// 3. Host is not a private/internal address
///
/// `allow_http` marks a development deployment; it also relaxes the
/// internal-host screen so loopback endpoints can be registered.
pub fn validate_webhook_url(url: &str, allow_http: bool) -> Result<(), WebhookError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| WebhookError::InvalidUrl(format!("Invalid URL format: {e}")))?;

    match parsed.scheme() {
        "https" => {}
        "http" if allow_http => {}
        "http" => {
            return Err(WebhookError::InvalidUrl(
                "Webhook URLs must use HTTPS".to_string(),
            ));
        }
        scheme => {
            return Err(WebhookError::InvalidUrl(format!(
                "Unsupported URL scheme: {scheme}"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| WebhookError::InvalidUrl("URL must have a host".to_string()))?;

    if !allow_http {
        validate_host_not_internal(host)?;
    }

    Ok(())
}

/// Validate that a host is not a private/internal address.
///
/// Blocks loopback, private networks, link-local (cloud metadata),
/// CGNAT, IPv6 loopback/unspecified, and internal hostnames.
pub fn validate_host_not_internal(host: &str) -> Result<(), WebhookError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_internal_ip(&ip) {
            return Err(WebhookError::SsrfDetected(format!(
                "Destination host {host} is a private/internal address"
            )));
        }
    }

    let lower = host.to_ascii_lowercase();
    if lower == "localhost"
        || lower == "metadata.google.internal"
        || lower.ends_with(".internal")
        || lower.ends_with(".local")
    {
        return Err(WebhookError::SsrfDetected(format!(
            "Destination host {host} is a restricted internal hostname"
        )));
    }

    Ok(())
}

fn is_internal_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64) // 100.64.0.0/10 (CGNAT)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

/// Validate a single event type name by shape.
///
/// Accepted form: dot-separated segments of lowercase ASCII letters,
/// digits and underscores, e.g. `document.uploaded`. Names outside the
/// catalog are accepted but logged, so a typo is visible without
/// blocking a feature module that ships a new event.
pub fn validate_event_type(event_type: &str) -> Result<(), WebhookError> {
    if event_type.is_empty() {
        return Err(WebhookError::Validation(
            "Event type must not be empty".to_string(),
        ));
    }
    if event_type.len() > MAX_EVENT_TYPE_LEN {
        return Err(WebhookError::Validation(format!(
            "Event type exceeds {MAX_EVENT_TYPE_LEN} characters"
        )));
    }

    let well_formed = event_type.split('.').all(|segment| {
        !segment.is_empty()
            && segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    });
    if !well_formed {
        return Err(WebhookError::Validation(format!(
            "Malformed event type: {event_type}"
        )));
    }

    if !WebhookEventType::is_recognized(event_type) {
        tracing::debug!(
            target: "webhook_registry",
            event_type = %event_type,
            "Event type is not in the catalog"
        );
    }

    Ok(())
}

/// Validate a list of event type names.
///
/// Returns the first invalid entry found.
pub fn validate_event_types(event_types: &[String]) -> Result<(), WebhookError> {
    if event_types.is_empty() {
        return Err(WebhookError::Validation(
            "At least one event type is required".to_string(),
        ));
    }
    for et in event_types {
        validate_event_type(et)?;
    }
    Ok(())
}
