use std::time::Duration;

use async_trait::async_trait;
use nlq_core::backend::{ApiBackend, BackendError};
use nlq_core::model::{
    Connection, ConnectionId, ConnectionTestOutcome, ExecutionResult, GeneratedQuery,
    NewConnection, TableSchema,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum HttpBackendError {
    #[error("API base URL is empty")]
    EmptyBaseUrl,
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    tables: Vec<TableSchema>,
}

#[derive(Debug, Serialize)]
struct GenerateSqlBody<'a> {
    connection_id: ConnectionId,
    natural_language_query: &'a str,
}

#[derive(Debug, Serialize)]
struct ExecuteSqlBody<'a> {
    connection_id: ConnectionId,
    sql: &'a str,
}

/// [`ApiBackend`] over the JSON HTTP API rooted at `base_url` (for example
/// `http://127.0.0.1:8000/api`).
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, HttpBackendError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(HttpBackendError::EmptyBaseUrl);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = detail_message(&body).unwrap_or_else(|| status_line(status));
        debug!(%status, %message, "backend returned an error status");
        Err(BackendError::new(message))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, BackendError> {
        self.send(request)
            .await?
            .json::<T>()
            .await
            .map_err(|error| BackendError::new(format!("invalid response from backend: {error}")))
    }
}

#[async_trait]
impl ApiBackend for HttpBackend {
    async fn list_connections(&self) -> Result<Vec<Connection>, BackendError> {
        self.send_json(self.client.get(self.url("/connections")))
            .await
    }

    async fn create_connection(&self, draft: &NewConnection) -> Result<Connection, BackendError> {
        self.send_json(self.client.post(self.url("/connections")).json(draft))
            .await
    }

    async fn delete_connection(&self, id: ConnectionId) -> Result<(), BackendError> {
        self.send(self.client.delete(self.url(&format!("/connections/{id}"))))
            .await?;
        Ok(())
    }

    async fn test_connection(
        &self,
        id: ConnectionId,
    ) -> Result<ConnectionTestOutcome, BackendError> {
        self.send_json(
            self.client
                .post(self.url(&format!("/connections/{id}/test"))),
        )
        .await
    }

    async fn fetch_schema(&self, id: ConnectionId) -> Result<Vec<TableSchema>, BackendError> {
        let response: SchemaResponse = self
            .send_json(
                self.client
                    .get(self.url(&format!("/connections/{id}/schema"))),
            )
            .await?;
        Ok(response.tables)
    }

    async fn generate_sql(
        &self,
        id: ConnectionId,
        natural_language_query: &str,
    ) -> Result<GeneratedQuery, BackendError> {
        let body = GenerateSqlBody {
            connection_id: id,
            natural_language_query,
        };
        self.send_json(self.client.post(self.url("/generate-sql")).json(&body))
            .await
    }

    async fn execute_sql(&self, id: ConnectionId, sql: &str) -> Result<ExecutionResult, BackendError> {
        let body = ExecuteSqlBody {
            connection_id: id,
            sql,
        };
        self.send_json(self.client.post(self.url("/execute-sql")).json(&body))
            .await
    }
}

/// Pulls the human-readable `detail` out of an error body. Validation failures carry a
/// structured detail, which is passed through as compact JSON.
fn detail_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("request failed with status {} {reason}", status.as_u16()),
        None => format!("request failed with status {}", status.as_u16()),
    }
}

fn transport_error(error: reqwest::Error) -> BackendError {
    if error.is_timeout() {
        BackendError::new("request timed out")
    } else if error.is_connect() {
        BackendError::new(format!("could not reach backend: {error}"))
    } else {
        BackendError::new(error.to_string())
    }
}
