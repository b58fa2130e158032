use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::cache::QueryCache;
use crate::status::StatusBoard;

pub type AdminResponse = Response<BoxBody<Bytes, hyper::Error>>;

/// Status and administration endpoints
pub struct AdminApi {
    board: StatusBoard,
    cache: Option<Arc<QueryCache>>,
}

impl AdminApi {
    pub fn new(board: StatusBoard) -> Self {
        Self { board, cache: None }
    }

    pub fn with_cache(mut self, cache: Arc<QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Handle admin API request
    pub async fn handle<B>(&self, req: Request<B>) -> AdminResponse {
        let path = req.uri().path().trim_end_matches('/');
        let query = req.uri().query().unwrap_or_default();

        match (req.method().as_str(), path) {
            ("GET", "/api/health") => self.json_response(&self.board.dashboard()),
            ("GET", "/api/summary") => self.json_response(&self.board.summary()),
            ("GET", "/api/badges") => self.json_response(&self.board.badges()),
            ("GET", "/api/cache") => self.cache_stats(),
            ("GET", path) if path.starts_with("/api/health/") => {
                let name = &path["/api/health/".len()..];
                self.service_health(name)
            }
            ("POST", path) if path.starts_with("/api/services/") => {
                let rest = &path["/api/services/".len()..];
                match rest.rsplit_once('/') {
                    Some((name, "check")) => self.check_now(name).await,
                    Some((name, "maintenance")) => self.maintenance(name, query),
                    _ => self.not_found(),
                }
            }
            ("GET", "/ping") => Self::response(StatusCode::OK, "text/plain", "OK"),
            ("GET", "") | ("GET", "/dashboard") => self.dashboard(),
            _ => self.not_found(),
        }
    }

    fn service_health(&self, name: &str) -> AdminResponse {
        match self.board.monitor().health(name) {
            Some(health) => self.json_response(&health),
            None => self.error_response(StatusCode::NOT_FOUND, &format!("Unknown service '{}'", name)),
        }
    }

    async fn check_now(&self, name: &str) -> AdminResponse {
        match self.board.monitor().check_once(name).await {
            Some(result) => self.json_response(&result),
            None => self.error_response(StatusCode::NOT_FOUND, &format!("Unknown service '{}'", name)),
        }
    }

    fn maintenance(&self, name: &str, query: &str) -> AdminResponse {
        let on = url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == "on")
            .map(|(_, value)| value.into_owned());
        let on = match on.as_deref() {
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            _ => {
                return self.error_response(StatusCode::BAD_REQUEST, "Expected ?on=true or ?on=false");
            }
        };

        if !self.board.monitor().set_maintenance(name, on) {
            return self.error_response(StatusCode::NOT_FOUND, &format!("Unknown service '{}'", name));
        }
        info!("Maintenance for {} set to {} via admin API", name, on);
        match self.board.badge(name) {
            Some(badge) => self.json_response(&badge),
            None => self.not_found(),
        }
    }

    fn cache_stats(&self) -> AdminResponse {
        match &self.cache {
            Some(cache) => self.json_response(&cache.stats()),
            None => self.error_response(StatusCode::NOT_FOUND, "Query cache is not attached"),
        }
    }

    fn dashboard(&self) -> AdminResponse {
        let html = r#"<!DOCTYPE html>
<html>
<head>
    <title>Clinic Service Status</title>
    <style>
        body { font-family: system-ui, sans-serif; margin: 20px; background: #f5f5f5; }
        h1 { color: #333; }
        .card { background: white; border-radius: 8px; padding: 20px; margin: 10px 0; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }
        table { width: 100%; border-collapse: collapse; }
        th, td { text-align: left; padding: 8px; border-bottom: 1px solid #eee; }
        .badge { padding: 2px 8px; border-radius: 4px; color: white; font-size: 12px; }
        .green { background: #28a745; } .yellow { background: #d39e00; } .red { background: #dc3545; }
        .blue { background: #007bff; } .gray { background: #6c757d; }
    </style>
</head>
<body>
    <h1>Clinic Service Status</h1>
    <div class="card"><h2 id="summary">Loading...</h2><p id="critical"></p></div>
    <div class="card"><table id="services"></table></div>
    <script>
        async function load() {
            const summary = await fetch('/api/summary').then(r => r.json());
            document.getElementById('summary').textContent =
                `${summary.healthyCount} of ${summary.totalCount} services healthy`;
            document.getElementById('critical').textContent = summary.criticalServicesDown.length
                ? `Critical services down: ${summary.criticalServicesDown.join(', ')}` : '';

            const badges = await fetch('/api/badges').then(r => r.json());
            document.getElementById('services').innerHTML =
                '<tr><th>Service</th><th>Status</th><th>Criticality</th><th>Uptime</th></tr>' +
                badges.map(b => `<tr><td>${b.displayName}</td>
                    <td><span class="badge ${b.color}">${b.label}</span></td>
                    <td>${b.criticality}</td><td>${b.uptime.toFixed(1)}%</td></tr>`).join('');
        }
        load();
        setInterval(load, 15000);
    </script>
</body>
</html>"#;

        Self::response(StatusCode::OK, "text/html; charset=utf-8", html)
    }

    fn not_found(&self) -> AdminResponse {
        Self::response(StatusCode::NOT_FOUND, "application/json", r#"{"error":"Not Found"}"#)
    }

    fn error_response(&self, status: StatusCode, message: &str) -> AdminResponse {
        #[derive(Serialize)]
        struct ErrorResponse<'a> {
            error: &'a str,
        }
        let body = serde_json::to_string(&ErrorResponse { error: message })
            .unwrap_or_else(|_| r#"{"error":"Internal Error"}"#.to_string());
        Self::response(status, "application/json", body)
    }

    fn json_response<T: Serialize>(&self, data: &T) -> AdminResponse {
        match serde_json::to_string(data) {
            Ok(json) => Self::response(StatusCode::OK, "application/json", json),
            Err(_) => Self::response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "application/json",
                r#"{"error":"Serialization failed"}"#,
            ),
        }
    }

    fn response<T: Into<Bytes>>(status: StatusCode, content_type: &'static str, body: T) -> AdminResponse {
        let mut response = Response::new(Self::full_body(body));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        response
    }

    #[inline]
    fn full_body<T: Into<Bytes>>(content: T) -> BoxBody<Bytes, hyper::Error> {
        Full::new(content.into())
            .map_err(|never| match never {})
            .boxed()
    }
}
