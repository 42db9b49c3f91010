use tracing::{debug, info};

use crate::backend::BackendError;
use crate::model::{ColumnSchema, ConnectionId, TableSchema};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaState {
    Idle,
    Loading,
    Ready,
    Empty,
}

/// Identifies one schema fetch. A result is only applied while its ticket is the cache's
/// outstanding fetch for the currently selected connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaTicket {
    pub connection_id: ConnectionId,
    seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaApply {
    Loaded(usize),
    Failed(BackendError),
    Discarded,
}

/// Last fetched schema snapshot of the selected connection. Snapshots are replaced wholesale.
#[derive(Debug, Clone)]
pub struct SchemaCache {
    connection_id: Option<ConnectionId>,
    state: SchemaState,
    tables: Vec<TableSchema>,
    next_seq: u64,
    pending: Option<SchemaTicket>,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connection_id: None,
            state: SchemaState::Idle,
            tables: Vec::new(),
            next_seq: 0,
            pending: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> SchemaState {
        self.state
    }

    #[must_use]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state == SchemaState::Loading
    }

    #[must_use]
    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|table| table.name == name)
    }

    #[must_use]
    pub fn list_tables(&self) -> Vec<String> {
        self.tables.iter().map(|table| table.name.clone()).collect()
    }

    #[must_use]
    pub fn list_columns(&self, table_name: &str) -> Vec<ColumnSchema> {
        self.table(table_name)
            .map(|table| table.columns.clone())
            .unwrap_or_default()
    }

    /// Drops the current snapshot and starts tracking a fetch for `connection_id`.
    pub fn begin(&mut self, connection_id: ConnectionId) -> SchemaTicket {
        self.next_seq += 1;
        let ticket = SchemaTicket {
            connection_id,
            seq: self.next_seq,
        };
        self.connection_id = Some(connection_id);
        self.state = SchemaState::Loading;
        self.tables.clear();
        self.pending = Some(ticket);
        debug!(%connection_id, seq = ticket.seq, "schema fetch started");
        ticket
    }

    pub fn invalidate(&mut self) {
        self.connection_id = None;
        self.state = SchemaState::Idle;
        self.tables.clear();
        self.pending = None;
    }

    pub fn apply(
        &mut self,
        ticket: SchemaTicket,
        result: Result<Vec<TableSchema>, BackendError>,
    ) -> SchemaApply {
        if self.connection_id != Some(ticket.connection_id) || self.pending != Some(ticket) {
            debug!(
                connection_id = %ticket.connection_id,
                seq = ticket.seq,
                "discarding stale schema response"
            );
            return SchemaApply::Discarded;
        }

        self.pending = None;
        match result {
            Ok(tables) => {
                info!(
                    connection_id = %ticket.connection_id,
                    tables = tables.len(),
                    "schema loaded"
                );
                let count = tables.len();
                self.tables = tables;
                self.state = SchemaState::Ready;
                SchemaApply::Loaded(count)
            }
            Err(error) => {
                self.tables.clear();
                self.state = SchemaState::Empty;
                SchemaApply::Failed(error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SchemaApply, SchemaCache, SchemaState};
    use crate::backend::BackendError;
    use crate::model::{ColumnSchema, ConnectionId, TableSchema};

    fn table(name: &str, columns: &[&str]) -> TableSchema {
        TableSchema {
            name: name.to_string(),
            columns: columns
                .iter()
                .map(|column| ColumnSchema {
                    name: (*column).to_string(),
                    data_type: "text".to_string(),
                    nullable: true,
                })
                .collect(),
        }
    }

    #[test]
    fn loads_snapshot_for_current_connection() {
        let mut cache = SchemaCache::new();
        let ticket = cache.begin(ConnectionId(1));
        assert_eq!(cache.state(), SchemaState::Loading);

        let applied = cache.apply(
            ticket,
            Ok(vec![table("users", &["id", "email"]), table("orders", &["id"])]),
        );
        assert_eq!(applied, SchemaApply::Loaded(2));
        assert_eq!(cache.state(), SchemaState::Ready);
        assert_eq!(cache.list_tables(), vec!["users", "orders"]);
        assert_eq!(cache.list_columns("users").len(), 2);
        assert!(cache.list_columns("missing").is_empty());
    }

    #[test]
    fn response_for_previous_connection_is_discarded() {
        let mut cache = SchemaCache::new();
        let first = cache.begin(ConnectionId(1));
        let second = cache.begin(ConnectionId(2));

        assert_eq!(
            cache.apply(first, Ok(vec![table("from_a", &["x"])])),
            SchemaApply::Discarded
        );
        assert_eq!(cache.state(), SchemaState::Loading);
        assert!(cache.tables().is_empty());

        cache.apply(second, Ok(vec![table("from_b", &["y"])]));
        assert_eq!(cache.list_tables(), vec!["from_b"]);
    }

    #[test]
    fn superseded_refresh_for_same_connection_is_discarded() {
        let mut cache = SchemaCache::new();
        let first = cache.begin(ConnectionId(1));
        let second = cache.begin(ConnectionId(1));

        assert_eq!(cache.apply(first, Ok(Vec::new())), SchemaApply::Discarded);
        assert_eq!(
            cache.apply(second, Ok(vec![table("t", &[])])),
            SchemaApply::Loaded(1)
        );
    }

    #[test]
    fn failure_empties_the_snapshot() {
        let mut cache = SchemaCache::new();
        let ticket = cache.begin(ConnectionId(3));
        let applied = cache.apply(ticket, Err(BackendError::new("boom")));

        assert_eq!(applied, SchemaApply::Failed(BackendError::new("boom")));
        assert_eq!(cache.state(), SchemaState::Empty);
        assert!(cache.tables().is_empty());
    }

    #[test]
    fn invalidate_discards_pending_fetch() {
        let mut cache = SchemaCache::new();
        let ticket = cache.begin(ConnectionId(4));
        cache.invalidate();

        assert_eq!(cache.apply(ticket, Ok(Vec::new())), SchemaApply::Discarded);
        assert_eq!(cache.state(), SchemaState::Idle);
        assert_eq!(cache.connection_id(), None);
    }
}
