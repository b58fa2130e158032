use super::{Backend, BackendConnector, Query};
use crate::error::{DataError, DataResult};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Error body returned by PostgREST-style APIs
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    hint: Option<String>,
}

/// Backend handle speaking the PostgREST dialect over HTTPS
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestBackend {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> DataResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataError::Connection(format!("Failed to build client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    pub(crate) fn table_url(&self, query: &Query) -> DataResult<Url> {
        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.base_url, query.table))
            .map_err(|e| DataError::Connection(format!("Invalid backend url: {}", e)))?;
        {
            let mut pairs = url.query_pairs_mut();
            for filter in &query.filters {
                pairs.append_pair(&filter.column, &format!("{}.{}", filter.op.as_str(), filter.value));
            }
            if let Some(order) = &query.order {
                let dir = if order.descending { "desc" } else { "asc" };
                pairs.append_pair("order", &format!("{}.{}", order.column, dir));
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
        }
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url, body: Option<Value>) -> DataResult<Vec<Value>> {
        debug!("Backend {} {}", method, url.path());

        let mut request = self
            .client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("accept", "application/json")
            .header("prefer", "return=representation");
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DataError::Connection(format!("Backend timed out: {}", e))
            } else {
                DataError::Connection(format!("Backend unreachable: {}", e))
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return response.json::<Vec<Value>>().await.map_err(|e| DataError::Decode {
                entity: "backend response",
                message: e.to_string(),
            });
        }

        let text = response.text().await.unwrap_or_default();
        Err(error_from_response(status, &text))
    }
}

pub(crate) fn error_from_response(status: StatusCode, text: &str) -> DataError {
    let body: ErrorBody = serde_json::from_str(text).unwrap_or_default();
    let message = body
        .message
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => DataError::Authentication(message),
        _ => DataError::Backend {
            message,
            code: body.code.or_else(|| Some(status.as_u16().to_string())),
            details: body.details,
            hint: body.hint,
        },
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn insert(&self, table: &str, row: Value) -> DataResult<Value> {
        let url = self.table_url(&Query::table(table))?;
        let mut rows = self.send(Method::POST, url, Some(row)).await?;
        if rows.is_empty() {
            return Err(DataError::backend(format!("Insert into {} returned no row", table)));
        }
        Ok(rows.swap_remove(0))
    }

    async fn select(&self, query: &Query) -> DataResult<Vec<Value>> {
        let url = self.table_url(query)?;
        self.send(Method::GET, url, None).await
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> DataResult<Option<Value>> {
        let url = self.table_url(&Query::table(table).eq("id", id))?;
        let rows = self.send(Method::PATCH, url, Some(patch)).await?;
        Ok(rows.into_iter().next())
    }

    fn backend_type(&self) -> &'static str {
        "rest"
    }
}

/// Builds one REST client per pool key
pub struct RestConnector {
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl RestConnector {
    pub fn new(base_url: String, api_key: String, timeout: Duration) -> Self {
        Self {
            base_url,
            api_key,
            timeout,
        }
    }
}

impl BackendConnector for RestConnector {
    fn connect(&self, key: &str) -> DataResult<Arc<dyn Backend>> {
        debug!("Opening backend client for '{}'", key);
        let backend = RestBackend::new(self.base_url.clone(), self.api_key.clone(), self.timeout)?;
        Ok(Arc::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> RestBackend {
        RestBackend::new("https://db.example.com/", "key", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_table_url() {
        let query = Query::table("appointments")
            .eq("patient_id", "abc")
            .gte("scheduled_at", "2024-05-01T00:00:00Z")
            .order_by("scheduled_at", true)
            .limit(10);
        let url = backend().table_url(&query).unwrap();

        assert_eq!(url.path(), "/rest/v1/appointments");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("patient_id".to_string(), "eq.abc".to_string()),
                ("scheduled_at".to_string(), "gte.2024-05-01T00:00:00Z".to_string()),
                ("order".to_string(), "scheduled_at.desc".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn test_error_mapping() {
        let err = error_from_response(
            StatusCode::CONFLICT,
            r#"{"code":"23505","message":"duplicate key","details":"Key (email) exists","hint":null}"#,
        );
        match err {
            DataError::Backend { message, code, details, .. } => {
                assert_eq!(message, "duplicate key");
                assert_eq!(code.as_deref(), Some("23505"));
                assert_eq!(details.as_deref(), Some("Key (email) exists"));
            }
            other => panic!("unexpected error: {:?}", other),
        }

        assert!(matches!(
            error_from_response(StatusCode::UNAUTHORIZED, "{}"),
            DataError::Authentication(_)
        ));

        let plain = error_from_response(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert_eq!(plain.code(), Some("502"));
        assert!(plain.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_connection_error() {
        let backend = RestBackend::new("http://127.0.0.1:9", "key", Duration::from_secs(2)).unwrap();
        let err = backend.select(&Query::table("patients")).await.unwrap_err();
        assert!(matches!(err, DataError::Connection(_)));
    }
}
