use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, info};

use crate::backend::BackendError;
use crate::model::{Connection, ConnectionId, ConnectionTestOutcome, NewConnection};
use crate::notifications::{NotificationSink, Severity};

pub const CONNECTION_SCHEME: &str = "postgresql://";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("connection name is required")]
    MissingName,
    #[error("connection string is required")]
    MissingConnectionString,
    #[error("connection string must start with `postgresql://`")]
    InvalidScheme,
}

/// Client-side checks run before any create request. Returns the trimmed draft or every
/// field error found.
pub fn validate_new_connection(
    name: &str,
    connection_string: &str,
) -> Result<NewConnection, Vec<ValidationError>> {
    let name = name.trim();
    let connection_string = connection_string.trim();
    let mut errors = Vec::new();

    if name.is_empty() {
        errors.push(ValidationError::MissingName);
    }
    if connection_string.is_empty() {
        errors.push(ValidationError::MissingConnectionString);
    } else if !connection_string.starts_with(CONNECTION_SCHEME) {
        errors.push(ValidationError::InvalidScheme);
    }

    if errors.is_empty() {
        Ok(NewConnection {
            name: name.to_string(),
            connection_string: connection_string.to_string(),
        })
    } else {
        Err(errors)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestStatus {
    Testing,
    Passed(String),
    Failed(String),
}

/// Pending request to delete a connection. Nothing is sent until it is confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteConfirmation {
    token: u64,
    pub connection_id: ConnectionId,
    pub connection_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionStore {
    connections: Vec<Connection>,
    loading: bool,
    creating: bool,
    test_status: HashMap<ConnectionId, TestStatus>,
    nonce: u64,
    pending_deletes: HashMap<u64, ConnectionId>,
}

impl ConnectionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    #[must_use]
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|connection| connection.id == id)
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    #[must_use]
    pub fn is_creating(&self) -> bool {
        self.creating
    }

    #[must_use]
    pub fn test_status(&self, id: ConnectionId) -> Option<&TestStatus> {
        self.test_status.get(&id)
    }

    /// Returns `false` when a refresh is already in flight.
    pub fn begin_refresh(&mut self) -> bool {
        if self.loading {
            return false;
        }
        self.loading = true;
        true
    }

    pub fn apply_connections(
        &mut self,
        result: Result<Vec<Connection>, BackendError>,
        notifications: &mut NotificationSink,
    ) {
        self.loading = false;
        match result {
            Ok(connections) => {
                debug!(count = connections.len(), "connections loaded");
                notifications.push(
                    Severity::Info,
                    format!("Loaded {} connections", connections.len()),
                );
                self.connections = connections;
                self.test_status
                    .retain(|id, _| self.connections.iter().any(|conn| conn.id == *id));
            }
            Err(error) => {
                notifications.error(format!("Failed to load connections: {error}"));
            }
        }
    }

    pub fn begin_create(&mut self, draft: NewConnection) -> Option<NewConnection> {
        if self.creating {
            return None;
        }
        self.creating = true;
        Some(draft)
    }

    pub fn apply_created(
        &mut self,
        result: Result<Connection, BackendError>,
        notifications: &mut NotificationSink,
    ) -> Option<ConnectionId> {
        self.creating = false;
        match result {
            Ok(connection) => {
                info!(id = %connection.id, name = %connection.name, "connection created");
                notifications.success(format!("Connection `{}` added", connection.name));
                let id = connection.id;
                self.connections.retain(|existing| existing.id != id);
                self.connections.push(connection);
                Some(id)
            }
            Err(error) => {
                notifications.error(format!("Failed to add connection: {error}"));
                None
            }
        }
    }

    pub fn request_delete(&mut self, id: ConnectionId) -> Option<DeleteConfirmation> {
        let connection = self.connection(id)?;
        let connection_name = connection.name.clone();
        self.nonce = self.nonce.saturating_add(1);
        self.pending_deletes.insert(self.nonce, id);
        Some(DeleteConfirmation {
            token: self.nonce,
            connection_id: id,
            connection_name,
        })
    }

    /// Consumes the confirmation; returns the id to delete if it was still pending.
    pub fn confirm_delete(&mut self, confirmation: &DeleteConfirmation) -> Option<ConnectionId> {
        let id = self.pending_deletes.remove(&confirmation.token)?;
        (id == confirmation.connection_id).then_some(id)
    }

    pub fn decline_delete(&mut self, confirmation: &DeleteConfirmation) {
        self.pending_deletes.remove(&confirmation.token);
    }

    pub fn apply_deleted(
        &mut self,
        id: ConnectionId,
        result: Result<(), BackendError>,
        notifications: &mut NotificationSink,
    ) -> bool {
        match result {
            Ok(()) => {
                info!(%id, "connection deleted");
                self.connections.retain(|connection| connection.id != id);
                self.test_status.remove(&id);
                notifications.success("Connection deleted");
                true
            }
            Err(error) => {
                notifications.error(format!("Failed to delete connection: {error}"));
                false
            }
        }
    }

    /// Returns `false` when this connection is already being tested.
    pub fn begin_test(&mut self, id: ConnectionId) -> bool {
        if matches!(self.test_status.get(&id), Some(TestStatus::Testing)) {
            return false;
        }
        self.test_status.insert(id, TestStatus::Testing);
        true
    }

    pub fn apply_tested(
        &mut self,
        id: ConnectionId,
        result: Result<ConnectionTestOutcome, BackendError>,
        notifications: &mut NotificationSink,
    ) {
        let status = match result {
            Ok(outcome) if outcome.success => {
                notifications.success(outcome.message.clone());
                TestStatus::Passed(outcome.message)
            }
            Ok(outcome) => {
                notifications.error(outcome.message.clone());
                TestStatus::Failed(outcome.message)
            }
            Err(error) => {
                notifications.error(format!("Connection test failed: {error}"));
                TestStatus::Failed(error.message().to_string())
            }
        };
        if self.connection(id).is_some() {
            self.test_status.insert(id, status);
        } else {
            self.test_status.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{validate_new_connection, ConnectionStore, TestStatus, ValidationError};
    use crate::backend::BackendError;
    use crate::model::{Connection, ConnectionId, ConnectionTestOutcome};
    use crate::notifications::{NotificationSink, Severity};

    fn connection(id: i64, name: &str) -> Connection {
        Connection {
            id: ConnectionId(id),
            name: name.to_string(),
            connection_string: format!("postgresql://u:p@localhost/{name}"),
            created_at: "2024-01-01T00:00:00".to_string(),
        }
    }

    fn loaded_store(sink: &mut NotificationSink) -> ConnectionStore {
        let mut store = ConnectionStore::new();
        assert!(store.begin_refresh());
        store.apply_connections(Ok(vec![connection(1, "prod"), connection(2, "dev")]), sink);
        store
    }

    #[test]
    fn validation_trims_and_reports_every_field() {
        let draft = validate_new_connection("  prod ", " postgresql://u:p@h/db ")
            .expect("draft should be valid");
        assert_eq!(draft.name, "prod");
        assert_eq!(draft.connection_string, "postgresql://u:p@h/db");

        assert_eq!(
            validate_new_connection(" ", ""),
            Err(vec![
                ValidationError::MissingName,
                ValidationError::MissingConnectionString
            ])
        );
        assert_eq!(
            validate_new_connection("x", "mysql://root@h/db"),
            Err(vec![ValidationError::InvalidScheme])
        );
    }

    #[test]
    fn refresh_is_single_flight_and_reports_outcome() {
        let mut sink = NotificationSink::default();
        let mut store = ConnectionStore::new();
        assert!(store.begin_refresh());
        assert!(!store.begin_refresh());
        assert!(store.is_loading());

        store.apply_connections(Err(BackendError::new("offline")), &mut sink);
        assert!(!store.is_loading());
        assert_eq!(sink.latest().map(|entry| entry.severity), Some(Severity::Error));
    }

    #[test]
    fn create_appends_connection_once() {
        let mut sink = NotificationSink::default();
        let mut store = loaded_store(&mut sink);
        let draft = validate_new_connection("stage", "postgresql://u:p@h/stage")
            .expect("draft should be valid");

        let draft = store.begin_create(draft).expect("create should start");
        assert!(store.begin_create(draft).is_none());

        let created = store.apply_created(Ok(connection(3, "stage")), &mut sink);
        assert_eq!(created, Some(ConnectionId(3)));
        assert_eq!(store.connections().len(), 3);
        assert!(!store.is_creating());
    }

    #[test]
    fn delete_needs_confirmation_and_decline_is_silent() {
        let mut sink = NotificationSink::default();
        let mut store = loaded_store(&mut sink);
        let before = sink.len();

        let confirmation = store
            .request_delete(ConnectionId(1))
            .expect("known connection");
        assert_eq!(confirmation.connection_name, "prod");
        store.decline_delete(&confirmation);
        assert_eq!(store.confirm_delete(&confirmation), None);
        assert_eq!(sink.len(), before);
        assert_eq!(store.connections().len(), 2);

        assert!(store.request_delete(ConnectionId(99)).is_none());
    }

    #[test]
    fn confirmed_delete_removes_connection_on_success() {
        let mut sink = NotificationSink::default();
        let mut store = loaded_store(&mut sink);
        let confirmation = store
            .request_delete(ConnectionId(2))
            .expect("known connection");

        let id = store
            .confirm_delete(&confirmation)
            .expect("confirmation should be pending");
        assert_eq!(store.confirm_delete(&confirmation), None);

        assert!(store.apply_deleted(id, Ok(()), &mut sink));
        assert!(store.connection(ConnectionId(2)).is_none());
    }

    #[test]
    fn failed_delete_keeps_connection() {
        let mut sink = NotificationSink::default();
        let mut store = loaded_store(&mut sink);
        assert!(!store.apply_deleted(ConnectionId(1), Err(BackendError::new("locked")), &mut sink));
        assert!(store.connection(ConnectionId(1)).is_some());
        assert!(sink
            .latest()
            .is_some_and(|entry| entry.text.contains("locked")));
    }

    #[test]
    fn test_outcomes_map_to_status_and_severity() {
        let mut sink = NotificationSink::default();
        let mut store = loaded_store(&mut sink);

        assert!(store.begin_test(ConnectionId(1)));
        assert!(!store.begin_test(ConnectionId(1)));
        store.apply_tested(
            ConnectionId(1),
            Ok(ConnectionTestOutcome {
                success: false,
                message: "password authentication failed".to_string(),
            }),
            &mut sink,
        );
        assert_eq!(
            store.test_status(ConnectionId(1)),
            Some(&TestStatus::Failed(
                "password authentication failed".to_string()
            ))
        );
        assert_eq!(sink.latest().map(|entry| entry.severity), Some(Severity::Error));

        assert!(store.begin_test(ConnectionId(2)));
        store.apply_tested(
            ConnectionId(2),
            Ok(ConnectionTestOutcome {
                success: true,
                message: "Connection successful".to_string(),
            }),
            &mut sink,
        );
        assert_eq!(
            store.test_status(ConnectionId(2)),
            Some(&TestStatus::Passed("Connection successful".to_string()))
        );
        assert_eq!(
            sink.latest().map(|entry| entry.severity),
            Some(Severity::Success)
        );
    }
}
