use std::collections::HashMap;
use std::env;
use std::sync::Mutex;
use std::time::Instant;

use rocket::http::Header;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;

/// Configurable rate limit values, read from environment variables with
/// sensible defaults.
///
/// Environment variables:
/// - `RATE_LIMIT_BOOTSTRAP` — bootstraps per hour per IP (default: 10)
/// - `RATE_LIMIT_APIKEY_CREATE` — API-key creations per minute per workspace (default: 10)
/// - `RATE_LIMIT_CAPABILITY_READ` — capability-URL reads per minute per key (default: 1000)
/// - `RATE_LIMIT_WORKSPACE_MUTATION` — catch-all mutating calls per minute per workspace (default: 120)
pub struct RateLimitConfig {
    pub bootstrap_max: usize,
    pub bootstrap_window_secs: u64,
    pub apikey_create_max: usize,
    pub apikey_create_window_secs: u64,
    pub capability_read_max: usize,
    pub capability_read_window_secs: u64,
    pub workspace_mutation_max: usize,
    pub workspace_mutation_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            bootstrap_max: 10,
            bootstrap_window_secs: 3600,
            apikey_create_max: 10,
            apikey_create_window_secs: 60,
            capability_read_max: 1000,
            capability_read_window_secs: 60,
            workspace_mutation_max: 120,
            workspace_mutation_window_secs: 60,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("RATE_LIMIT_BOOTSTRAP")
            && let Ok(n) = val.parse::<usize>()
        {
            config.bootstrap_max = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_APIKEY_CREATE")
            && let Ok(n) = val.parse::<usize>()
        {
            config.apikey_create_max = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_CAPABILITY_READ")
            && let Ok(n) = val.parse::<usize>()
        {
            config.capability_read_max = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_WORKSPACE_MUTATION")
            && let Ok(n) = val.parse::<usize>()
        {
            config.workspace_mutation_max = n;
        }

        config
    }
}

pub struct RateLimiter {
    limits: Mutex<HashMap<String, Vec<Instant>>>,
}

/// Wrapper that adds standard rate limit headers to any JSON response.
/// Headers: X-RateLimit-Limit, X-RateLimit-Remaining, X-RateLimit-Reset
pub struct RateLimited<T> {
    pub inner: Json<T>,
    pub info: RateLimitInfo,
}

impl<T> RateLimited<T> {
    pub fn new(inner: Json<T>, info: RateLimitInfo) -> Self {
        Self { inner, info }
    }
}

impl<'r, 'o: 'r, T: serde::Serialize + 'o> Responder<'r, 'o> for RateLimited<T> {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let mut response = Response::build_from(self.inner.respond_to(req)?)
            .header(Header::new(
                "X-RateLimit-Limit",
                self.info.limit.to_string(),
            ))
            .header(Header::new(
                "X-RateLimit-Remaining",
                self.info.remaining.to_string(),
            ))
            .header(Header::new(
                "X-RateLimit-Reset",
                self.info.retry_after_secs.to_string(),
            ))
            .finalize();

        if !self.info.allowed {
            response.set_header(Header::new(
                "Retry-After",
                self.info.retry_after_secs.to_string(),
            ));
        }

        Ok(response)
    }
}

/// Error responder for rate-limited (429) responses, matching the uniform
/// `{ok:false, error:{code, message, details}}` envelope.
pub struct RateLimitedError {
    pub info: RateLimitInfo,
    pub message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for RateLimitedError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let body = Json(serde_json::json!({
            "ok": false,
            "error": {
                "code": "RATE_LIMITED",
                "message": self.message,
                "details": {
                    "retryAfterSeconds": self.info.retry_after_secs,
                    "limit": self.info.limit,
                }
            }
        }));

        Response::build_from(body.respond_to(req)?)
            .status(rocket::http::Status::TooManyRequests)
            .header(Header::new(
                "X-RateLimit-Limit",
                self.info.limit.to_string(),
            ))
            .header(Header::new("X-RateLimit-Remaining", "0".to_string()))
            .header(Header::new(
                "X-RateLimit-Reset",
                self.info.retry_after_secs.to_string(),
            ))
            .header(Header::new(
                "Retry-After",
                self.info.retry_after_secs.to_string(),
            ))
            .ok()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Information about rate limit status for a given key.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Seconds until the oldest request in the window expires (i.e. a slot opens).
    /// 0 if there's remaining capacity.
    pub retry_after_secs: u64,
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            limits: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str, max: usize, window_secs: u64) -> bool {
        self.check_with_info(key, max, window_secs).allowed
    }

    /// Check rate limit and return detailed info for response headers.
    /// `key` is typically "action:scope", `max` is max requests, `window_secs` is the time window.
    pub fn check_with_info(&self, key: &str, max: usize, window_secs: u64) -> RateLimitInfo {
        let mut limits = self.limits.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let window = std::time::Duration::from_secs(window_secs);

        let entries = limits.entry(key.to_string()).or_default();

        entries.retain(|t| now.duration_since(*t) < window);

        if entries.len() >= max {
            let oldest = match entries.iter().min() {
                Some(t) => t,
                None => {
                    return RateLimitInfo {
                        allowed: false,
                        remaining: 0,
                        limit: max,
                        retry_after_secs: 1,
                    }
                }
            };
            let elapsed = now.duration_since(*oldest);
            let retry_after = if elapsed < window {
                (window - elapsed).as_secs() + 1
            } else {
                1
            };

            return RateLimitInfo {
                allowed: false,
                limit: max,
                remaining: 0,
                retry_after_secs: retry_after,
            };
        }

        entries.push(now);
        let remaining = max - entries.len();

        RateLimitInfo {
            allowed: true,
            limit: max,
            remaining,
            retry_after_secs: 0,
        }
    }
}
