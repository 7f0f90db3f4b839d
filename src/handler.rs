//! Transport-agnostic handling of `/metrics` scrape requests.
//!
//! The handler takes a plain [`MetricsRequest`] and produces a
//! [`MetricsResponse`], so it can sit behind any HTTP server. Supported
//! requests are:
//!
//! - `GET /metrics`: every scope
//! - `GET /metrics?scope=<scope>`: one scope
//! - `GET /metrics?name=<name>`: one metric name across scopes
//! - `GET /metrics?scope=<scope>&name=<name>`: one metric name in one scope

use tracing::{trace, warn};

use crate::error::MetricsError;
use crate::export::{Exporter, PrometheusExporter};
use crate::shared::SharedMetricRegistries;

/// Default path the handler is mounted at.
pub const DEFAULT_CONTEXT_ROOT: &str = "/metrics";

const TEXT_PLAIN: &str = "text/plain";
const STAR_STAR: &str = "*/*";
const SCOPE_PARAM: &str = "scope";
const NAME_PARAM: &str = "name";

const EXPECTED_REQUESTS: &str = "The expected requests are /metrics, /metric?scope=<scope>, \
                                 /metric?name=<name> or /metrics?scope=<scope>&name=<name>";

const CORS_HEADERS: [(&str, &str); 4] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Headers", "origin, content-type, accept, authorization"),
    ("Access-Control-Allow-Credentials", "true"),
    ("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS, HEAD"),
];

/// An incoming scrape request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsRequest {
    method: String,
    path: String,
    accept: Vec<String>,
    params: Vec<(String, String)>,
}

impl MetricsRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    /// Add an `Accept` header value, e.g. `"text/plain;q=0.9, */*;q=0.1"`.
    pub fn accept(mut self, header: impl Into<String>) -> Self {
        self.accept.push(header.into());
        self
    }

    /// Add a query parameter. Repeated keys keep every value in order.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    fn first_param(&self, key: &str) -> Option<&str> {
        let mut values = self.params.iter().filter(|(k, _)| k == key).map(|(_, v)| v.as_str());
        let first = values.next()?;
        if values.next().is_some() {
            warn!(param = key, value = first, "parameter repeated, using the first value");
        }
        Some(first)
    }
}

/// The handler's answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsResponse {
    pub status: u16,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl MetricsResponse {
    fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: Vec::new(),
        }
    }

    fn ok(body: String, content_type: &str) -> Self {
        let mut headers = vec![
            ("Content-Type".to_string(), content_type.to_string()),
            ("Access-Control-Max-Age".to_string(), "1209600".to_string()),
        ];
        headers.extend(
            CORS_HEADERS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string())),
        );
        Self {
            status: 200,
            body,
            headers,
        }
    }

    /// Value of header `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Serves scrape requests from a set of shared registries.
#[derive(Debug, Clone)]
pub struct MetricsRequestHandler {
    registries: SharedMetricRegistries,
    context_root: String,
}

impl MetricsRequestHandler {
    pub fn new(registries: SharedMetricRegistries) -> Self {
        Self {
            registries,
            context_root: DEFAULT_CONTEXT_ROOT.to_string(),
        }
    }

    pub fn with_context_root(mut self, root: impl Into<String>) -> Self {
        self.context_root = root.into();
        self
    }

    pub fn handle(&self, request: &MetricsRequest) -> MetricsResponse {
        let exporter = match self.exporter(request) {
            Ok(exporter) => exporter,
            Err(response) => return response,
        };

        let Some(rest) = request.path.strip_prefix(self.context_root.as_str()) else {
            return MetricsResponse::new(
                500,
                format!(
                    "The expected context root of metrics is {}, but a request with a different path was routed to MetricsRequestHandler",
                    self.context_root
                ),
            );
        };
        if !rest.is_empty() && rest != "/" {
            warn!(path = %request.path, "{EXPECTED_REQUESTS}");
            return MetricsResponse::new(404, EXPECTED_REQUESTS);
        }

        let scope = request.first_param(SCOPE_PARAM);
        if let Some(scope) = scope {
            if !self.registries.exists(scope) {
                warn!(scope, "scope not found");
                return MetricsResponse::new(404, format!("Scope {scope} not found"));
            }
        }
        let name = request.first_param(NAME_PARAM);

        let output = match (scope, name) {
            (None, None) => {
                trace!("exporting all metrics");
                exporter.export_all_scopes().map(|exposition| exposition.body)
            }
            (Some(scope), None) => {
                trace!(scope, "exporting scope");
                exporter.export_one_scope(scope)
            }
            (Some(scope), Some(name)) => {
                trace!(scope, name, "exporting metric in scope");
                exporter.export_metrics_by_name(scope, name)
            }
            (None, Some(name)) => {
                trace!(name, "exporting metric across scopes");
                match exporter.export_one_metric_across_scopes(name) {
                    Ok(body) if body.is_empty() => {
                        warn!(name, "metric not found in any scope");
                        return MetricsResponse::new(404, format!("Metric {name} not found in any scope"));
                    }
                    other => other,
                }
            }
        };

        match output {
            Ok(body) => MetricsResponse::ok(body, exporter.content_type()),
            Err(e) => error_response(e),
        }
    }

    fn exporter(&self, request: &MetricsRequest) -> Result<PrometheusExporter, MetricsResponse> {
        if request.method != "GET" {
            return Err(MetricsResponse::new(405, "Only GET method is accepted."));
        }
        if best_media_type(&request.accept).is_none() {
            warn!(accept = ?request.accept, "no suitable media type");
            return Err(MetricsResponse::new(
                406,
                "Couldn't determine a suitable media type for the given Accept header.",
            ));
        }
        self.registries.exporter().map_err(|e| {
            warn!(%e, "the /metrics endpoint is not supported");
            MetricsResponse::new(501, "The /metrics endpoint is not supported.")
        })
    }
}

fn error_response(error: MetricsError) -> MetricsResponse {
    match error {
        MetricsError::ScopeNotFound(scope) => {
            warn!(%scope, "scope not found");
            MetricsResponse::new(404, format!("Scope {scope} not found"))
        }
        MetricsError::ScopeEmpty(scope) => {
            warn!(%scope, "no data in scope");
            MetricsResponse::new(204, format!("No data in scope {scope}"))
        }
        MetricsError::MetricNotFound { scope, name } => {
            warn!(%scope, %name, "metric not found in scope");
            MetricsResponse::new(404, format!("Metric {name} not found in scope {scope}"))
        }
        other => {
            warn!(e = %other, "failed to export metrics");
            MetricsResponse::new(500, other.to_string())
        }
    }
}

/// Pick the media type to answer with from `Accept` header values.
///
/// Only `text/plain` and `*/*` are served. Ties prefer `text/plain`. No
/// header at all means `text/plain`.
pub fn best_media_type(headers: &[String]) -> Option<&'static str> {
    let candidates: Vec<(f32, &str)> = headers
        .iter()
        .flat_map(|header| header.split(','))
        .map(|entry| {
            let mut parts = entry.split(';').map(str::trim);
            let media_type = parts.next().unwrap_or_default();
            let weight = parts
                .find_map(|p| p.strip_prefix("q="))
                .map_or(1.0, |q| q.trim().parse().unwrap_or(0.0));
            (weight, media_type)
        })
        .collect();
    if candidates.is_empty() {
        return Some(TEXT_PLAIN);
    }

    let mut best: Option<(f32, &str)> = None;
    for (weight, media_type) in candidates {
        if media_type != TEXT_PLAIN && media_type != STAR_STAR {
            continue;
        }
        best = match best {
            Some((w, _)) if weight > w => Some((weight, media_type)),
            Some((w, t)) if weight == w && t != TEXT_PLAIN && media_type == TEXT_PLAIN => {
                Some((weight, media_type))
            }
            None => Some((weight, media_type)),
            keep => keep,
        };
    }
    match best {
        Some((weight, _)) if weight > 0.0 => Some(TEXT_PLAIN),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_best_media_type() {
        assert_eq!(best_media_type(&[]), Some("text/plain"));
        assert_eq!(best_media_type(&headers(&["text/plain"])), Some("text/plain"));
        assert_eq!(best_media_type(&headers(&["*/*"])), Some("text/plain"));
        assert_eq!(
            best_media_type(&headers(&["application/json, */*;q=0.1"])),
            Some("text/plain")
        );
        assert_eq!(best_media_type(&headers(&["application/json"])), None);
        assert_eq!(best_media_type(&headers(&["text/plain;q=0"])), None);
        assert_eq!(best_media_type(&headers(&["text/plain;q=bogus"])), None);
    }

    #[test]
    fn test_method_not_allowed() {
        let handler = MetricsRequestHandler::new(SharedMetricRegistries::new());
        let response = handler.handle(&MetricsRequest::new("POST", "/metrics"));
        assert_eq!(response.status, 405);
        assert_eq!(response.body, "Only GET method is accepted.");
    }

    #[test]
    fn test_wrong_context_root() {
        let handler = MetricsRequestHandler::new(SharedMetricRegistries::new());
        let response = handler.handle(&MetricsRequest::get("/health"));
        assert_eq!(response.status, 500);
        assert!(response.body.contains("/metrics"));

        let response = handler.handle(&MetricsRequest::get("/metrics/base"));
        assert_eq!(response.status, 404);
    }

    #[test]
    fn test_ok_headers() {
        let registries = SharedMetricRegistries::new();
        registries.application().counter("c").unwrap().inc();
        let handler = MetricsRequestHandler::new(registries);

        for path in ["/metrics", "/metrics/"] {
            let response = handler.handle(&MetricsRequest::get(path));
            assert_eq!(response.status, 200);
            assert_eq!(response.header("content-type"), Some("text/plain; version=0.0.4"));
            assert_eq!(response.header("Access-Control-Max-Age"), Some("1209600"));
            assert_eq!(response.header("Access-Control-Allow-Origin"), Some("*"));
            assert!(response.body.contains("c_total"));
        }
    }

    #[test]
    fn test_custom_context_root() {
        let handler =
            MetricsRequestHandler::new(SharedMetricRegistries::new()).with_context_root("/q/metrics");
        assert_eq!(handler.handle(&MetricsRequest::get("/q/metrics")).status, 200);
        assert_eq!(handler.handle(&MetricsRequest::get("/metrics")).status, 500);
    }
}
