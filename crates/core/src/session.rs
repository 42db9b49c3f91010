use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

use crate::backend::ApiBackend;
use crate::connection_store::{
    validate_new_connection, ConnectionStore, DeleteConfirmation, ValidationError,
};
use crate::dispatch::{Completion, Dispatcher, DEFAULT_REQUEST_TIMEOUT};
use crate::export::{self, ExportArtifact, ExportError, ExportFormat};
use crate::model::ConnectionId;
use crate::notifications::{NotificationId, NotificationSink, DEFAULT_NOTIFICATION_TTL};
use crate::orchestrator::QueryOrchestrator;
use crate::settings::ClientSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub request_timeout: Duration,
    pub notification_ttl: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            notification_ttl: DEFAULT_NOTIFICATION_TTL,
        }
    }
}

impl From<&ClientSettings> for SessionOptions {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            request_timeout: settings.request_timeout(),
            notification_ttl: settings.notification_ttl(),
        }
    }
}

/// The single actor that owns all client state.
///
/// User actions start backend calls through the dispatcher; their completions come back on a
/// channel and are applied here one at a time, so no state is shared with the running calls.
#[derive(Debug)]
pub struct Session {
    store: ConnectionStore,
    orchestrator: QueryOrchestrator,
    notifications: NotificationSink,
    dispatcher: Dispatcher,
    completions: UnboundedReceiver<Completion>,
}

impl Session {
    #[must_use]
    pub fn new(backend: Arc<dyn ApiBackend>, runtime: Handle, options: SessionOptions) -> Self {
        let (dispatcher, completions) = Dispatcher::new(backend, runtime, options.request_timeout);
        Self {
            store: ConnectionStore::new(),
            orchestrator: QueryOrchestrator::new(),
            notifications: NotificationSink::new(options.notification_ttl),
            dispatcher,
            completions,
        }
    }

    #[must_use]
    pub fn store(&self) -> &ConnectionStore {
        &self.store
    }

    #[must_use]
    pub fn orchestrator(&self) -> &QueryOrchestrator {
        &self.orchestrator
    }

    #[must_use]
    pub fn notifications(&self) -> &NotificationSink {
        &self.notifications
    }

    pub fn refresh_connections(&mut self) -> bool {
        if !self.store.begin_refresh() {
            return false;
        }
        self.dispatcher.list_connections();
        true
    }

    /// Validation failures are returned to the caller and never reach the notification sink.
    /// `Ok(false)` means a create is already in flight.
    pub fn create_connection(
        &mut self,
        name: &str,
        connection_string: &str,
    ) -> Result<bool, Vec<ValidationError>> {
        let draft = validate_new_connection(name, connection_string)?;
        let Some(draft) = self.store.begin_create(draft) else {
            return Ok(false);
        };
        self.dispatcher.create_connection(draft);
        Ok(true)
    }

    pub fn request_delete(&mut self, id: ConnectionId) -> Option<DeleteConfirmation> {
        self.store.request_delete(id)
    }

    pub fn confirm_delete(&mut self, confirmation: &DeleteConfirmation) -> bool {
        let Some(id) = self.store.confirm_delete(confirmation) else {
            return false;
        };
        self.dispatcher.delete_connection(id);
        true
    }

    pub fn decline_delete(&mut self, confirmation: &DeleteConfirmation) {
        self.store.decline_delete(confirmation);
    }

    pub fn test_connection(&mut self, id: ConnectionId) -> bool {
        if self.store.connection(id).is_none() || !self.store.begin_test(id) {
            return false;
        }
        self.dispatcher.test_connection(id);
        true
    }

    /// Only connections present in the store can be selected.
    pub fn select_connection(&mut self, id: ConnectionId) -> bool {
        if self.store.connection(id).is_none() {
            debug!(%id, "ignoring selection of unknown connection");
            return false;
        }
        let Some(ticket) = self.orchestrator.select_connection(id) else {
            return false;
        };
        self.dispatcher.fetch_schema(ticket);
        true
    }

    pub fn refresh_schema(&mut self) -> bool {
        let Some(ticket) = self.orchestrator.refresh_schema() else {
            return false;
        };
        self.dispatcher.fetch_schema(ticket);
        true
    }

    pub fn generate(&mut self, natural_language_query: &str) -> bool {
        let Some(request) = self.orchestrator.begin_generate(natural_language_query) else {
            return false;
        };
        self.dispatcher.generate_sql(request);
        true
    }

    pub fn edit_sql(&mut self, sql: impl Into<String>) {
        self.orchestrator.edit_sql(sql);
    }

    pub fn execute(&mut self, sql: &str) -> bool {
        let Some(request) = self.orchestrator.begin_execute(sql) else {
            return false;
        };
        self.dispatcher.execute_sql(request);
        true
    }

    pub fn execute_current(&mut self) -> bool {
        let Some(request) = self.orchestrator.begin_execute_current() else {
            return false;
        };
        self.dispatcher.execute_sql(request);
        true
    }

    /// Encodes the current result set.
    pub fn export(&self, format: ExportFormat) -> Result<ExportArtifact, ExportError> {
        let result = self
            .orchestrator
            .result()
            .ok_or(ExportError::NothingToExport)?;
        export::export(format, &result.columns, &result.rows)
    }

    /// Lets callers outside the session report their own outcomes, such as a saved export.
    pub fn notifications_mut(&mut self) -> &mut NotificationSink {
        &mut self.notifications
    }

    pub fn dismiss(&mut self, id: NotificationId) -> bool {
        self.notifications.dismiss(id)
    }

    pub fn dismiss_latest(&mut self) -> Option<NotificationId> {
        self.notifications.dismiss_latest()
    }

    pub fn sweep_notifications(&mut self) -> usize {
        self.notifications.sweep()
    }

    pub fn apply(&mut self, completion: Completion) {
        match completion {
            Completion::Connections(result) => {
                let loaded = result.is_ok();
                self.store
                    .apply_connections(result, &mut self.notifications);
                if let Some(selected) = self.orchestrator.selected_connection() {
                    if loaded && self.store.connection(selected).is_none() {
                        info!(%selected, "selected connection no longer exists");
                        self.orchestrator.clear_selection();
                    }
                }
            }
            Completion::Created(result) => {
                self.store.apply_created(result, &mut self.notifications);
            }
            Completion::Deleted(id, result) => {
                let deleted = self
                    .store
                    .apply_deleted(id, result, &mut self.notifications);
                if deleted && self.orchestrator.selected_connection() == Some(id) {
                    self.orchestrator.clear_selection();
                }
            }
            Completion::Tested(id, result) => {
                self.store.apply_tested(id, result, &mut self.notifications);
            }
            Completion::Schema(ticket, result) => {
                self.orchestrator
                    .apply_schema(ticket, result, &mut self.notifications);
            }
            Completion::Generated(ticket, result) => {
                self.orchestrator
                    .apply_generate(ticket, result, &mut self.notifications);
            }
            Completion::Executed(ticket, result) => {
                self.orchestrator
                    .apply_execute(ticket, result, &mut self.notifications);
            }
        }
    }

    /// Applies every completion that has already arrived without waiting for more.
    pub fn drain_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions.try_recv() {
            self.apply(completion);
            applied += 1;
        }
        applied
    }

    /// Waits for the next completion and applies it.
    pub async fn next_completion(&mut self) -> bool {
        match self.completions.recv().await {
            Some(completion) => {
                self.apply(completion);
                true
            }
            None => false,
        }
    }
}
