use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::backend::{ApiBackend, BackendError};
use crate::model::{
    Connection, ConnectionId, ConnectionTestOutcome, ExecutionResult, GeneratedQuery,
    NewConnection, TableSchema,
};
use crate::orchestrator::{ExecuteRequest, GenerateRequest, RequestTicket};
use crate::schema_cache::SchemaTicket;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one backend call, delivered back to the session that issued it.
#[derive(Debug, Clone)]
pub enum Completion {
    Connections(Result<Vec<Connection>, BackendError>),
    Created(Result<Connection, BackendError>),
    Deleted(ConnectionId, Result<(), BackendError>),
    Tested(ConnectionId, Result<ConnectionTestOutcome, BackendError>),
    Schema(SchemaTicket, Result<Vec<TableSchema>, BackendError>),
    Generated(RequestTicket, Result<GeneratedQuery, BackendError>),
    Executed(RequestTicket, Result<ExecutionResult, BackendError>),
}

/// Runs backend calls on a tokio runtime and reports each one as a [`Completion`].
///
/// Calls are never cancelled; every call ends in exactly one completion, either the backend's
/// answer or a timeout error.
#[derive(Clone)]
pub struct Dispatcher {
    backend: Arc<dyn ApiBackend>,
    runtime: Handle,
    timeout: Duration,
    sender: UnboundedSender<Completion>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        backend: Arc<dyn ApiBackend>,
        runtime: Handle,
        timeout: Duration,
    ) -> (Self, UnboundedReceiver<Completion>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                backend,
                runtime,
                timeout,
                sender,
            },
            receiver,
        )
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn list_connections(&self) {
        let backend = Arc::clone(&self.backend);
        self.spawn(
            "list_connections",
            async move { backend.list_connections().await },
            Completion::Connections,
        );
    }

    pub fn create_connection(&self, draft: NewConnection) {
        let backend = Arc::clone(&self.backend);
        self.spawn(
            "create_connection",
            async move { backend.create_connection(&draft).await },
            Completion::Created,
        );
    }

    pub fn delete_connection(&self, id: ConnectionId) {
        let backend = Arc::clone(&self.backend);
        self.spawn(
            "delete_connection",
            async move { backend.delete_connection(id).await },
            move |result| Completion::Deleted(id, result),
        );
    }

    pub fn test_connection(&self, id: ConnectionId) {
        let backend = Arc::clone(&self.backend);
        self.spawn(
            "test_connection",
            async move { backend.test_connection(id).await },
            move |result| Completion::Tested(id, result),
        );
    }

    pub fn fetch_schema(&self, ticket: SchemaTicket) {
        let backend = Arc::clone(&self.backend);
        self.spawn(
            "fetch_schema",
            async move { backend.fetch_schema(ticket.connection_id).await },
            move |result| Completion::Schema(ticket, result),
        );
    }

    pub fn generate_sql(&self, request: GenerateRequest) {
        let backend = Arc::clone(&self.backend);
        let GenerateRequest {
            ticket,
            natural_language_query,
        } = request;
        self.spawn(
            "generate_sql",
            async move {
                backend
                    .generate_sql(ticket.connection_id, &natural_language_query)
                    .await
            },
            move |result| Completion::Generated(ticket, result),
        );
    }

    pub fn execute_sql(&self, request: ExecuteRequest) {
        let backend = Arc::clone(&self.backend);
        let ExecuteRequest { ticket, sql } = request;
        self.spawn(
            "execute_sql",
            async move { backend.execute_sql(ticket.connection_id, &sql).await },
            move |result| Completion::Executed(ticket, result),
        );
    }

    fn spawn<T, Fut, W>(&self, operation: &'static str, call: Fut, wrap: W)
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, BackendError>> + Send + 'static,
        W: FnOnce(Result<T, BackendError>) -> Completion + Send + 'static,
    {
        let sender = self.sender.clone();
        let limit = self.timeout;
        debug!(operation, "backend call dispatched");
        self.runtime.spawn(async move {
            let result = match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(operation, ?limit, "backend call timed out");
                    Err(BackendError::new(format!(
                        "request timed out after {limit:?}"
                    )))
                }
            };
            if let Err(error) = &result {
                warn!(operation, %error, "backend call failed");
            }
            if sender.send(wrap(result)).is_err() {
                debug!(operation, "session dropped before completion arrived");
            }
        });
    }
}
