use tracing::{debug, info};

use crate::backend::BackendError;
use crate::model::{ConnectionId, ExecutionResult, GeneratedQuery, TableSchema};
use crate::notifications::{NotificationSink, Severity};
use crate::schema_cache::{SchemaApply, SchemaCache, SchemaState, SchemaTicket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NoConnection,
    Idle,
    Generating,
    Generated,
    Executing,
    Executed,
}

/// Identifies one generate or execute call. Sequence numbers are shared by both kinds, so a
/// ticket can only ever match the call it was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    pub connection_id: ConnectionId,
    seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRequest {
    pub ticket: RequestTicket,
    pub natural_language_query: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub ticket: RequestTicket,
    pub sql: String,
}

/// State machine behind the query screen.
///
/// Every mutation goes through one of the methods below. `begin_*` methods enforce the
/// preconditions and the single-flight guard and hand back what must be sent to the backend;
/// `apply_*` methods take the completion and decide whether it is still current.
#[derive(Debug, Clone, Default)]
pub struct QueryOrchestrator {
    selected: Option<ConnectionId>,
    schema: SchemaCache,
    generated: Option<GeneratedQuery>,
    sql: String,
    result: Option<ExecutionResult>,
    next_seq: u64,
    generating: Option<RequestTicket>,
    executing: Option<RequestTicket>,
}

impl QueryOrchestrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn selected_connection(&self) -> Option<ConnectionId> {
        self.selected
    }

    #[must_use]
    pub fn schema(&self) -> &SchemaCache {
        &self.schema
    }

    #[must_use]
    pub fn schema_state(&self) -> SchemaState {
        self.schema.state()
    }

    #[must_use]
    pub fn tables(&self) -> &[TableSchema] {
        self.schema.tables()
    }

    #[must_use]
    pub fn generated(&self) -> Option<&GeneratedQuery> {
        self.generated.as_ref()
    }

    /// SQL currently held for execution, either generated or edited by the user.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    #[must_use]
    pub fn result(&self) -> Option<&ExecutionResult> {
        self.result.as_ref()
    }

    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.generating.is_some()
    }

    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.executing.is_some()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        if self.selected.is_none() {
            Phase::NoConnection
        } else if self.generating.is_some() {
            Phase::Generating
        } else if self.executing.is_some() {
            Phase::Executing
        } else if self.result.is_some() {
            Phase::Executed
        } else if self.generated.is_some() {
            Phase::Generated
        } else {
            Phase::Idle
        }
    }

    /// Switches to `connection_id`, dropping everything that described the previous database.
    /// Re-selecting the current connection is a no-op.
    pub fn select_connection(&mut self, connection_id: ConnectionId) -> Option<SchemaTicket> {
        if self.selected == Some(connection_id) {
            return None;
        }

        info!(%connection_id, previous = ?self.selected, "connection selected");
        self.reset_query_state();
        self.selected = Some(connection_id);
        Some(self.schema.begin(connection_id))
    }

    pub fn clear_selection(&mut self) {
        if let Some(previous) = self.selected.take() {
            info!(%previous, "connection deselected");
        }
        self.reset_query_state();
        self.schema.invalidate();
    }

    pub fn refresh_schema(&mut self) -> Option<SchemaTicket> {
        let connection_id = self.selected?;
        Some(self.schema.begin(connection_id))
    }

    /// Returns whether the response was applied.
    pub fn apply_schema(
        &mut self,
        ticket: SchemaTicket,
        result: Result<Vec<TableSchema>, BackendError>,
        notifications: &mut NotificationSink,
    ) -> bool {
        match self.schema.apply(ticket, result) {
            SchemaApply::Loaded(count) => {
                notifications.push(Severity::Info, format!("Schema loaded: {count} tables"));
                true
            }
            SchemaApply::Failed(error) => {
                notifications.error(format!("Failed to load schema: {error}"));
                true
            }
            SchemaApply::Discarded => false,
        }
    }

    pub fn begin_generate(&mut self, natural_language_query: &str) -> Option<GenerateRequest> {
        let connection_id = self.selected?;
        let text = natural_language_query.trim();
        if text.is_empty() {
            return None;
        }
        if self.generating.is_some() {
            debug!("generate already in flight, ignoring");
            return None;
        }

        let ticket = self.issue_ticket(connection_id);
        self.generating = Some(ticket);
        debug!(%connection_id, seq = ticket.seq, "generate started");
        Some(GenerateRequest {
            ticket,
            natural_language_query: text.to_string(),
        })
    }

    pub fn apply_generate(
        &mut self,
        ticket: RequestTicket,
        result: Result<GeneratedQuery, BackendError>,
        notifications: &mut NotificationSink,
    ) -> bool {
        if !self.is_current(self.generating, ticket) {
            debug!(
                connection_id = %ticket.connection_id,
                seq = ticket.seq,
                "discarding stale generate response"
            );
            return false;
        }

        self.generating = None;
        match result {
            Ok(query) => {
                self.sql.clone_from(&query.sql);
                self.generated = Some(query);
                self.result = None;
                notifications.success("SQL generated");
            }
            Err(error) => {
                notifications.error(format!("Failed to generate SQL: {error}"));
            }
        }
        true
    }

    /// Replaces the held SQL. Existing results stay until the next successful execution.
    pub fn edit_sql(&mut self, sql: impl Into<String>) {
        self.sql = sql.into();
    }

    pub fn begin_execute(&mut self, sql: &str) -> Option<ExecuteRequest> {
        let connection_id = self.selected?;
        let sql = sql.trim();
        if sql.is_empty() {
            return None;
        }
        if self.executing.is_some() {
            debug!("execute already in flight, ignoring");
            return None;
        }

        let ticket = self.issue_ticket(connection_id);
        self.executing = Some(ticket);
        debug!(%connection_id, seq = ticket.seq, "execute started");
        Some(ExecuteRequest {
            ticket,
            sql: sql.to_string(),
        })
    }

    pub fn begin_execute_current(&mut self) -> Option<ExecuteRequest> {
        let sql = self.sql.clone();
        self.begin_execute(&sql)
    }

    pub fn apply_execute(
        &mut self,
        ticket: RequestTicket,
        result: Result<ExecutionResult, BackendError>,
        notifications: &mut NotificationSink,
    ) -> bool {
        if !self.is_current(self.executing, ticket) {
            debug!(
                connection_id = %ticket.connection_id,
                seq = ticket.seq,
                "discarding stale execute response"
            );
            return false;
        }

        self.executing = None;
        match result {
            Ok(result) => {
                let result = result.normalized();
                notifications.success(format!(
                    "Query succeeded, returned {} rows",
                    result.row_count
                ));
                self.result = Some(result);
            }
            Err(error) => {
                notifications.error(format!("Failed to execute SQL: {error}"));
            }
        }
        true
    }

    fn is_current(&self, outstanding: Option<RequestTicket>, ticket: RequestTicket) -> bool {
        outstanding == Some(ticket) && self.selected == Some(ticket.connection_id)
    }

    fn issue_ticket(&mut self, connection_id: ConnectionId) -> RequestTicket {
        self.next_seq += 1;
        RequestTicket {
            connection_id,
            seq: self.next_seq,
        }
    }

    fn reset_query_state(&mut self) {
        self.generated = None;
        self.sql.clear();
        self.result = None;
        self.generating = None;
        self.executing = None;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Phase, QueryOrchestrator};
    use crate::backend::BackendError;
    use crate::model::{ColumnSchema, ConnectionId, ExecutionResult, GeneratedQuery, TableSchema};
    use crate::notifications::{NotificationSink, Severity};
    use crate::schema_cache::SchemaState;

    fn users_table() -> TableSchema {
        TableSchema {
            name: "users".to_string(),
            columns: vec![ColumnSchema {
                name: "email".to_string(),
                data_type: "text".to_string(),
                nullable: false,
            }],
        }
    }

    fn emails_result() -> ExecutionResult {
        ExecutionResult::new(
            vec!["email".to_string()],
            vec![vec![json!("a@x.com")], vec![json!("b@x.com")]],
        )
    }

    fn generated(sql: &str) -> GeneratedQuery {
        GeneratedQuery {
            sql: sql.to_string(),
            explanation: "because".to_string(),
        }
    }

    /// Orchestrator on connection 1 with a generated query and a result.
    fn populated() -> (QueryOrchestrator, NotificationSink) {
        let mut orchestrator = QueryOrchestrator::new();
        let mut sink = NotificationSink::default();
        let schema = orchestrator
            .select_connection(ConnectionId(1))
            .expect("first selection fetches schema");
        orchestrator.apply_schema(schema, Ok(vec![users_table()]), &mut sink);

        let generate = orchestrator
            .begin_generate("emails")
            .expect("generate should start");
        orchestrator.apply_generate(generate.ticket, Ok(generated("SELECT 1")), &mut sink);
        let execute = orchestrator
            .begin_execute_current()
            .expect("execute should start");
        orchestrator.apply_execute(execute.ticket, Ok(emails_result()), &mut sink);
        (orchestrator, sink)
    }

    #[test]
    fn starts_without_connection() {
        let orchestrator = QueryOrchestrator::new();
        assert_eq!(orchestrator.phase(), Phase::NoConnection);
        assert_eq!(orchestrator.schema_state(), SchemaState::Idle);
    }

    #[test]
    fn switching_connection_clears_query_state_and_loads_schema() {
        let (mut orchestrator, _sink) = populated();
        assert_eq!(orchestrator.phase(), Phase::Executed);

        let ticket = orchestrator.select_connection(ConnectionId(2));
        assert!(ticket.is_some());
        assert!(orchestrator.generated().is_none());
        assert!(orchestrator.result().is_none());
        assert_eq!(orchestrator.sql(), "");
        assert_eq!(orchestrator.schema_state(), SchemaState::Loading);
        assert_eq!(orchestrator.phase(), Phase::Idle);
    }

    #[test]
    fn reselecting_current_connection_keeps_state() {
        let (mut orchestrator, _sink) = populated();
        assert!(orchestrator.select_connection(ConnectionId(1)).is_none());
        assert!(orchestrator.result().is_some());
        assert_eq!(orchestrator.schema_state(), SchemaState::Ready);
    }

    #[test]
    fn late_schema_for_previous_connection_never_lands() {
        let mut orchestrator = QueryOrchestrator::new();
        let mut sink = NotificationSink::default();
        let for_a = orchestrator
            .select_connection(ConnectionId(1))
            .expect("schema ticket for A");
        let for_b = orchestrator
            .select_connection(ConnectionId(2))
            .expect("schema ticket for B");

        assert!(!orchestrator.apply_schema(for_a, Ok(vec![users_table()]), &mut sink));
        assert_eq!(orchestrator.schema_state(), SchemaState::Loading);
        assert!(orchestrator.tables().is_empty());
        assert!(sink.is_empty(), "stale responses are not reported");

        assert!(orchestrator.apply_schema(for_b, Ok(Vec::new()), &mut sink));
        assert_eq!(orchestrator.schema_state(), SchemaState::Ready);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn schema_failure_leaves_session_usable() {
        let mut orchestrator = QueryOrchestrator::new();
        let mut sink = NotificationSink::default();
        let ticket = orchestrator
            .select_connection(ConnectionId(1))
            .expect("schema ticket");
        orchestrator.apply_schema(ticket, Err(BackendError::new("no route")), &mut sink);

        assert_eq!(orchestrator.schema_state(), SchemaState::Empty);
        assert_eq!(sink.latest().map(|entry| entry.severity), Some(Severity::Error));
        assert!(orchestrator.begin_generate("anything").is_some());
    }

    #[test]
    fn empty_input_is_a_no_op() {
        let (mut orchestrator, _sink) = populated();
        let before_sql = orchestrator.sql().to_string();

        assert!(orchestrator.begin_generate("").is_none());
        assert!(orchestrator.begin_generate("  \n").is_none());
        assert!(orchestrator.begin_execute("   ").is_none());
        assert!(!orchestrator.is_generating());
        assert!(!orchestrator.is_executing());
        assert_eq!(orchestrator.sql(), before_sql);
        assert!(orchestrator.result().is_some());
    }

    #[test]
    fn actions_require_a_selected_connection() {
        let mut orchestrator = QueryOrchestrator::new();
        assert!(orchestrator.begin_generate("all users").is_none());
        assert!(orchestrator.begin_execute("SELECT 1").is_none());
        assert!(orchestrator.refresh_schema().is_none());
    }

    #[test]
    fn generate_is_single_flight_and_trims_input() {
        let mut orchestrator = QueryOrchestrator::new();
        orchestrator.select_connection(ConnectionId(1));

        let request = orchestrator
            .begin_generate("  all user emails ")
            .expect("generate should start");
        assert_eq!(request.natural_language_query, "all user emails");
        assert_eq!(orchestrator.phase(), Phase::Generating);
        assert!(orchestrator.begin_generate("again").is_none());
    }

    #[test]
    fn generate_success_replaces_sql_and_clears_result() {
        let (mut orchestrator, mut sink) = populated();
        let request = orchestrator
            .begin_generate("count users")
            .expect("generate should start");
        assert!(orchestrator.result().is_some(), "results stay while generating");

        orchestrator.apply_generate(
            request.ticket,
            Ok(generated("SELECT count(*) FROM users")),
            &mut sink,
        );
        assert_eq!(orchestrator.sql(), "SELECT count(*) FROM users");
        assert!(orchestrator.result().is_none());
        assert!(!orchestrator.is_generating());
        assert_eq!(orchestrator.phase(), Phase::Generated);
    }

    #[test]
    fn generate_failure_keeps_previous_state() {
        let (mut orchestrator, mut sink) = populated();
        let before = sink.len();
        let request = orchestrator
            .begin_generate("count users")
            .expect("generate should start");
        orchestrator.apply_generate(request.ticket, Err(BackendError::new("llm down")), &mut sink);

        assert!(!orchestrator.is_generating());
        assert_eq!(orchestrator.sql(), "SELECT 1");
        assert!(orchestrator.result().is_some());
        assert_eq!(sink.len(), before + 1);
        assert!(sink
            .latest()
            .is_some_and(|entry| entry.text.contains("llm down")));
    }

    #[test]
    fn execute_failure_keeps_previous_result() {
        let (mut orchestrator, mut sink) = populated();
        let request = orchestrator
            .begin_execute("SELECT broken")
            .expect("execute should start");
        assert!(orchestrator.begin_execute("SELECT 2").is_none());

        orchestrator.apply_execute(request.ticket, Err(BackendError::new("syntax")), &mut sink);
        assert!(!orchestrator.is_executing());
        assert_eq!(orchestrator.result(), Some(&emails_result()));
    }

    #[test]
    fn execute_success_reports_row_count() {
        let mut orchestrator = QueryOrchestrator::new();
        let mut sink = NotificationSink::default();
        orchestrator.select_connection(ConnectionId(1));
        let request = orchestrator
            .begin_execute(" SELECT email FROM users ")
            .expect("execute should start");
        assert_eq!(request.sql, "SELECT email FROM users");

        assert!(orchestrator.apply_execute(request.ticket, Ok(emails_result()), &mut sink));
        assert_eq!(orchestrator.result().map(|result| result.row_count), Some(2));
        let latest = sink.latest().expect("notification expected");
        assert_eq!(latest.severity, Severity::Success);
        assert!(latest.text.contains('2'));
    }

    #[test]
    fn editing_sql_does_not_touch_results() {
        let (mut orchestrator, _sink) = populated();
        orchestrator.edit_sql("SELECT 42");
        assert_eq!(orchestrator.sql(), "SELECT 42");
        assert_eq!(orchestrator.result(), Some(&emails_result()));
        assert!(orchestrator.generated().is_some());
    }

    #[test]
    fn responses_for_deselected_connection_are_discarded() {
        let mut orchestrator = QueryOrchestrator::new();
        let mut sink = NotificationSink::default();
        orchestrator.select_connection(ConnectionId(1));
        let generate = orchestrator
            .begin_generate("emails")
            .expect("generate should start");
        let execute = orchestrator
            .begin_execute("SELECT 1")
            .expect("execute should start");

        orchestrator.select_connection(ConnectionId(2));
        assert!(!orchestrator.is_generating());
        assert!(!orchestrator.is_executing());

        assert!(!orchestrator.apply_generate(generate.ticket, Ok(generated("SELECT a")), &mut sink));
        assert!(!orchestrator.apply_execute(execute.ticket, Ok(emails_result()), &mut sink));
        assert_eq!(orchestrator.sql(), "");
        assert!(orchestrator.result().is_none());
        assert!(sink.is_empty());
    }

    #[test]
    fn tickets_cannot_complete_the_other_request_kind() {
        let mut orchestrator = QueryOrchestrator::new();
        let mut sink = NotificationSink::default();
        orchestrator.select_connection(ConnectionId(1));
        let generate = orchestrator
            .begin_generate("emails")
            .expect("generate should start");
        let execute = orchestrator
            .begin_execute("SELECT 1")
            .expect("execute should start");

        assert!(!orchestrator.apply_execute(generate.ticket, Ok(emails_result()), &mut sink));
        assert!(!orchestrator.apply_generate(execute.ticket, Ok(generated("x")), &mut sink));
        assert!(orchestrator.is_generating());
        assert!(orchestrator.is_executing());
    }

    #[test]
    fn duplicate_completion_is_applied_once() {
        let mut orchestrator = QueryOrchestrator::new();
        let mut sink = NotificationSink::default();
        orchestrator.select_connection(ConnectionId(1));
        let request = orchestrator
            .begin_execute("SELECT 1")
            .expect("execute should start");

        assert!(orchestrator.apply_execute(request.ticket, Ok(emails_result()), &mut sink));
        assert!(!orchestrator.apply_execute(request.ticket, Ok(emails_result()), &mut sink));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn clear_selection_returns_to_no_connection() {
        let (mut orchestrator, _sink) = populated();
        orchestrator.clear_selection();
        assert_eq!(orchestrator.phase(), Phase::NoConnection);
        assert_eq!(orchestrator.schema_state(), SchemaState::Idle);
        assert!(orchestrator.result().is_none());
    }
}
