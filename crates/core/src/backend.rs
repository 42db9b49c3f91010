use async_trait::async_trait;
use thiserror::Error;

use crate::model::{
    Connection, ConnectionId, ConnectionTestOutcome, ExecutionResult, GeneratedQuery,
    NewConnection, TableSchema,
};

/// Any failed backend call, reduced to the message shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Request/response contract of the query service.
#[async_trait]
pub trait ApiBackend: Send + Sync {
    async fn list_connections(&self) -> Result<Vec<Connection>, BackendError>;

    async fn create_connection(&self, draft: &NewConnection) -> Result<Connection, BackendError>;

    async fn delete_connection(&self, id: ConnectionId) -> Result<(), BackendError>;

    async fn test_connection(&self, id: ConnectionId)
        -> Result<ConnectionTestOutcome, BackendError>;

    async fn fetch_schema(&self, id: ConnectionId) -> Result<Vec<TableSchema>, BackendError>;

    async fn generate_sql(
        &self,
        id: ConnectionId,
        natural_language_query: &str,
    ) -> Result<GeneratedQuery, BackendError>;

    async fn execute_sql(&self, id: ConnectionId, sql: &str)
        -> Result<ExecutionResult, BackendError>;
}
