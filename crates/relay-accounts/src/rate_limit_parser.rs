//! Rate-Limit Parser (C3, spec §4.3): classifies a vendor error response
//! and extracts the cooldown delay it implies.

use once_cell::sync::Lazy;
use regex::Regex;
use relay_core::RateLimitReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedRateLimit {
    pub reason: RateLimitReason,
    pub retry_after_ms: i64,
}

const CLAMP_FLOOR_MS: i64 = 2_000;

/// Returns `None` when `status` isn't a rate-limit-shaped response at all.
pub fn parse_rate_limit(
    status: u16,
    retry_after_header: Option<&str>,
    body_text: &str,
) -> Option<ParsedRateLimit> {
    let reason = classify(status, body_text)?;
    let extracted = extract_delay_ms(retry_after_header, body_text);
    let retry_after_ms = extracted
        .map(|ms| ms.max(CLAMP_FLOOR_MS))
        .unwrap_or_else(|| reason.default_delay_ms());
    Some(ParsedRateLimit {
        reason,
        retry_after_ms,
    })
}

fn classify(status: u16, body_text: &str) -> Option<RateLimitReason> {
    match status {
        429 => Some(classify_429(body_text)),
        500 | 503 | 529 => Some(RateLimitReason::ServerError),
        _ => None,
    }
}

fn classify_429(body_text: &str) -> RateLimitReason {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body_text) {
        if let Some(detail_reason) = value
            .pointer("/error/details/0/reason")
            .and_then(|v| v.as_str())
        {
            match detail_reason {
                "QUOTA_EXHAUSTED" => return RateLimitReason::QuotaExhausted,
                "RATE_LIMIT_EXCEEDED" => return RateLimitReason::RateLimitExceeded,
                _ => {}
            }
        }
    }
    let lower = body_text.to_ascii_lowercase();
    if lower.contains("exhausted") || lower.contains("quota") {
        RateLimitReason::QuotaExhausted
    } else if lower.contains("rate limit") || lower.contains("too many requests") {
        RateLimitReason::RateLimitExceeded
    } else {
        RateLimitReason::Unknown
    }
}

fn extract_delay_ms(retry_after_header: Option<&str>, body_text: &str) -> Option<i64> {
    if let Some(header) = retry_after_header {
        if let Ok(seconds) = header.trim().parse::<i64>() {
            return Some(seconds * 1000);
        }
    }

    let json = serde_json::from_str::<serde_json::Value>(body_text).ok();

    if let Some(json) = &json {
        if let Some(delay) = json
            .pointer("/error/details")
            .and_then(|v| v.as_array())
            .and_then(|details| {
                details
                    .iter()
                    .find_map(|d| d.get("metadata")?.get("quotaResetDelay")?.as_str())
            })
            .and_then(parse_duration_string)
        {
            return Some(delay);
        }

        if let Some(delay) = json
            .pointer("/error/details")
            .and_then(|v| v.as_array())
            .and_then(|details| {
                details.iter().find_map(|d| {
                    let is_retry_info = d
                        .get("@type")
                        .and_then(|t| t.as_str())
                        .map(|t| t.contains("RetryInfo"))
                        .unwrap_or(false);
                    if !is_retry_info {
                        return None;
                    }
                    d.get("retryDelay")?.as_str()
                })
            })
            .and_then(parse_duration_string)
        {
            return Some(delay);
        }

        if let Some(seconds) = json.pointer("/error/retry_after").and_then(|v| v.as_i64()) {
            return Some(seconds * 1000);
        }
    }

    extract_from_free_text(body_text)
}

static PATTERN_MIN_SEC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)try again in (\d+)m\s*(\d+)s").unwrap());
static PATTERN_SEC: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)try again in (\d+)s").unwrap());
static PATTERN_QUOTA_RESET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)quota will reset in (\d+) second").unwrap());
static PATTERN_RETRY_AFTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)retry after (\d+) second").unwrap());
static PATTERN_WAIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\(wait (\d+)s\)").unwrap());

fn extract_from_free_text(body_text: &str) -> Option<i64> {
    if let Some(caps) = PATTERN_MIN_SEC.captures(body_text) {
        let minutes: i64 = caps[1].parse().ok()?;
        let seconds: i64 = caps[2].parse().ok()?;
        return Some((minutes * 60 + seconds) * 1000);
    }
    for pattern in [
        &*PATTERN_SEC,
        &*PATTERN_QUOTA_RESET,
        &*PATTERN_RETRY_AFTER,
        &*PATTERN_WAIT,
    ] {
        if let Some(caps) = pattern.captures(body_text) {
            let seconds: i64 = caps[1].parse().ok()?;
            return Some(seconds * 1000);
        }
    }
    None
}

/// Parses a `(Hh)?(Mm)?(S(.S)?s)?(Nms)?` duration string (protobuf-Duration
/// flavored, as used by `quotaResetDelay`/`retryDelay`). Fractional seconds
/// round up before summation. Returns `None` if the string matches no
/// component at all.
fn parse_duration_string(raw: &str) -> Option<i64> {
    static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"^(?:(\d+)h)?(?:(\d+)m)?(?:(\d+(?:\.\d+)?)s)?(?:(\d+)ms)?$").unwrap()
    });
    let caps = DURATION_RE.captures(raw.trim())?;
    if caps.iter().skip(1).all(|g| g.is_none()) {
        return None;
    }
    let hours: i64 = caps.get(1).map(|m| m.as_str().parse().unwrap_or(0)).unwrap_or(0);
    let minutes: i64 = caps.get(2).map(|m| m.as_str().parse().unwrap_or(0)).unwrap_or(0);
    let seconds: f64 = caps
        .get(3)
        .map(|m| m.as_str().parse().unwrap_or(0.0))
        .unwrap_or(0.0);
    let millis: i64 = caps.get(4).map(|m| m.as_str().parse().unwrap_or(0)).unwrap_or(0);
    let whole_seconds = seconds.ceil() as i64;
    Some(hours * 3_600_000 + minutes * 60_000 + whole_seconds * 1000 + millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_exhausted_with_explicit_reset_delay() {
        let body = r#"{"error":{"details":[{"reason":"QUOTA_EXHAUSTED","metadata":{"quotaResetDelay":"2h1m30s"}}]}}"#;
        let parsed = parse_rate_limit(429, None, body).unwrap();
        assert_eq!(parsed.reason, RateLimitReason::QuotaExhausted);
        assert_eq!(parsed.retry_after_ms, 7_290_000);
    }

    #[test]
    fn free_text_minutes_seconds_phrase() {
        let body = "please try again in 1m 20s and contact support if this persists";
        let parsed = parse_rate_limit(429, None, body).unwrap();
        assert_eq!(parsed.reason, RateLimitReason::Unknown);
        assert_eq!(parsed.retry_after_ms, 80_000);
    }

    #[test]
    fn sub_floor_delay_is_clamped_to_two_seconds() {
        let body = "retry after 0 second";
        let parsed = parse_rate_limit(429, None, body).unwrap();
        assert_eq!(parsed.retry_after_ms, CLAMP_FLOOR_MS);
    }

    #[test]
    fn retry_after_header_takes_precedence_over_body() {
        let body = r#"{"error":{"retry_after": 999}}"#;
        let parsed = parse_rate_limit(429, Some("15"), body).unwrap();
        assert_eq!(parsed.retry_after_ms, 15_000);
    }

    #[test]
    fn server_error_status_without_body_uses_default_delay() {
        let parsed = parse_rate_limit(503, None, "upstream unavailable").unwrap();
        assert_eq!(parsed.reason, RateLimitReason::ServerError);
        assert_eq!(parsed.retry_after_ms, RateLimitReason::ServerError.default_delay_ms());
    }

    #[test]
    fn non_rate_limit_status_yields_none() {
        assert!(parse_rate_limit(404, None, "not found").is_none());
    }

    #[test]
    fn retry_info_detail_is_used_when_quota_reset_delay_absent() {
        let body = r#"{"error":{"details":[{"@type":"type.googleapis.com/google.rpc.RetryInfo","retryDelay":"5s"}]}}"#;
        let parsed = parse_rate_limit(429, None, body).unwrap();
        assert_eq!(parsed.retry_after_ms, 5_000);
    }

    #[test]
    fn duration_string_rejects_non_matching_input() {
        assert_eq!(parse_duration_string("not-a-duration"), None);
    }
}
