//! HTTP liveness prober
//!
//! Each candidate URL of a platform (health paths first, base URL last) is
//! fetched until one answers healthy. A transport failure stops the walk:
//! the other paths live on the same host.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tracing::debug;
use vigil_core::{PlatformSpec, ProbeOutcome, ProbeResult, ProbeSettings, Result, VigilError};

use crate::prober::Prober;

/// Lowercase markers of a credential problem in a 4xx body
const AUTH_MARKERS: &[&str] = &[
    "unauthorized",
    "unauthenticated",
    "invalid token",
    "invalid_token",
    "token expired",
    "api key",
    "api_key",
    "apikey",
    "authentication",
    "credentials",
];

const MAX_DETAIL_CHARS: usize = 120;

/// reqwest-backed [`Prober`]
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    /// Build a client with the per-probe timeout and user agent from settings
    pub fn new(settings: &ProbeSettings) -> Result<Self> {
        Self::with_timeout(settings.per_probe_timeout(), &settings.user_agent)
    }

    pub fn with_timeout(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| VigilError::Probe(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn check_url(&self, url: &str, expect_json: bool) -> (ProbeOutcome, String) {
        let response = match self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return classify_error(&e),
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        classify_response(status.as_u16(), &body, expect_json)
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, platform: &PlatformSpec) -> ProbeResult {
        let started = Instant::now();
        let mut outcome = ProbeOutcome::Unreachable;
        let mut details = Vec::new();

        for url in platform.probe_urls() {
            let (url_outcome, detail) = self.check_url(&url, platform.expect_json).await;
            debug!(platform = %platform.id, %url, outcome = %url_outcome, %detail, "Probed URL");

            outcome = url_outcome;
            if outcome.is_ok() {
                details = vec![format!("{}: {}", url, detail)];
                break;
            }
            details.push(format!("{}: {}", url, detail));
            if matches!(outcome, ProbeOutcome::Timeout | ProbeOutcome::Unreachable) {
                break;
            }
        }

        ProbeResult::new(
            &platform.id,
            outcome,
            started.elapsed().as_millis() as u64,
            details.join("; "),
        )
    }
}

/// Classify a received response
pub fn classify_response(status: u16, body: &str, expect_json: bool) -> (ProbeOutcome, String) {
    match status {
        200..=299 => {
            if expect_json && serde_json::from_str::<serde_json::Value>(body).is_err() {
                (
                    ProbeOutcome::HttpError,
                    format!("HTTP {} with non-JSON body", status),
                )
            } else {
                (ProbeOutcome::Ok, format!("HTTP {}", status))
            }
        }
        401 | 403 | 407 => (
            ProbeOutcome::AuthError,
            format!("HTTP {}: {}", status, snippet(body)),
        ),
        400..=499 if looks_like_auth_failure(body) => (
            ProbeOutcome::AuthError,
            format!("HTTP {}: {}", status, snippet(body)),
        ),
        _ => (
            ProbeOutcome::HttpError,
            format!("HTTP {}: {}", status, snippet(body)),
        ),
    }
}

fn classify_error(e: &reqwest::Error) -> (ProbeOutcome, String) {
    if e.is_timeout() {
        (ProbeOutcome::Timeout, format!("no response: {}", e))
    } else if e.is_connect() {
        (ProbeOutcome::Unreachable, format!("connection failed: {}", e))
    } else {
        (ProbeOutcome::Unreachable, format!("transport error: {}", e))
    }
}

fn looks_like_auth_failure(body: &str) -> bool {
    let body = body.to_lowercase();
    AUTH_MARKERS.iter().any(|m| body.contains(m))
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_DETAIL_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(MAX_DETAIL_CHARS).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn prober() -> HttpProber {
        HttpProber::with_timeout(Duration::from_millis(500), "vigil-test").unwrap()
    }

    #[test]
    fn test_classify_status_codes() {
        assert_eq!(classify_response(200, "", false).0, ProbeOutcome::Ok);
        assert_eq!(classify_response(204, "", false).0, ProbeOutcome::Ok);
        assert_eq!(classify_response(401, "", false).0, ProbeOutcome::AuthError);
        assert_eq!(classify_response(403, "", false).0, ProbeOutcome::AuthError);
        assert_eq!(classify_response(407, "", false).0, ProbeOutcome::AuthError);
        assert_eq!(classify_response(404, "not here", false).0, ProbeOutcome::HttpError);
        assert_eq!(classify_response(503, "", false).0, ProbeOutcome::HttpError);
    }

    #[test]
    fn test_credential_shaped_4xx_is_auth_error() {
        let (outcome, detail) =
            classify_response(400, r#"{"error":"Invalid API key supplied"}"#, false);
        assert_eq!(outcome, ProbeOutcome::AuthError);
        assert!(detail.starts_with("HTTP 400"));

        // a 5xx mentioning tokens is still a server problem
        assert_eq!(
            classify_response(500, "invalid token", false).0,
            ProbeOutcome::HttpError
        );
    }

    #[test]
    fn test_expect_json() {
        assert_eq!(classify_response(200, "<html>", true).0, ProbeOutcome::HttpError);
        assert_eq!(classify_response(200, r#"{"ok":true}"#, true).0, ProbeOutcome::Ok);
        assert_eq!(classify_response(200, "<html>", false).0, ProbeOutcome::Ok);
    }

    #[test]
    fn test_snippet_truncates() {
        let long = "x".repeat(500);
        assert_eq!(snippet(&long).len(), MAX_DETAIL_CHARS + 3);
        assert_eq!(snippet("  short  "), "short");
    }

    #[tokio::test]
    async fn test_probe_ok() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/");
            then.status(200).body("hello");
        });

        let platform = PlatformSpec::new("p1", server.url("/"));
        let result = prober().probe(&platform).await;

        mock.assert();
        assert_eq!(result.platform_id, "p1");
        assert_eq!(result.outcome, ProbeOutcome::Ok);
    }

    #[tokio::test]
    async fn test_health_path_fallback() {
        let server = MockServer::start();
        let missing = server.mock(|when, then| {
            when.method(GET).path("/agent.json");
            then.status(404);
        });
        let well_known = server.mock(|when, then| {
            when.method(GET).path("/.well-known/agent.json");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"name":"p1"}"#);
        });
        let base = server.mock(|when, then| {
            when.method(GET).path("/");
            then.status(200);
        });

        let mut platform = PlatformSpec::new("p1", server.base_url())
            .with_health_paths(&["/agent.json", "/.well-known/agent.json"]);
        platform.expect_json = true;
        let result = prober().probe(&platform).await;

        missing.assert();
        well_known.assert();
        base.assert_hits(0);
        assert_eq!(result.outcome, ProbeOutcome::Ok);
        assert!(result.detail.contains(".well-known"));
    }

    #[tokio::test]
    async fn test_auth_error_reported_from_base_url() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/agent.json");
            then.status(404);
        });
        server.mock(|when, then| {
            when.method(GET).path("/");
            then.status(401).body("Unauthorized");
        });

        let platform =
            PlatformSpec::new("p2", server.base_url()).with_health_paths(&["agent.json"]);
        let result = prober().probe(&platform).await;

        assert_eq!(result.outcome, ProbeOutcome::AuthError);
        assert!(result.detail.contains("404"));
        assert!(result.detail.contains("401"));
    }

    #[tokio::test]
    async fn test_slow_response_is_timeout() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/");
            then.status(200).delay(Duration::from_secs(2));
        });

        let platform = PlatformSpec::new("slow", server.base_url());
        let result = prober().probe(&platform).await;
        assert_eq!(result.outcome, ProbeOutcome::Timeout);
    }

    #[tokio::test]
    async fn test_refused_connection_is_unreachable() {
        let platform = PlatformSpec::new("gone", "http://127.0.0.1:9");
        let result = prober().probe(&platform).await;
        assert_eq!(result.outcome, ProbeOutcome::Unreachable);
    }
}
