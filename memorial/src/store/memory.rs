use super::{now_millis, Filter, Order, RecordStore, Row, Table};
use crate::error::GatewayError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Insert,
    Select,
    Delete,
    Update,
}

#[derive(Default)]
struct Inner {
    tables: HashMap<Table, Vec<Row>>,
    next_id: i64,
    last_created: i64,
    failures: HashSet<(Op, Table)>,
    recording: bool,
    calls: Vec<(Op, Table)>,
}

/// Process-local record store.
///
/// Used for the `memory` backend and as a test double: any (operation, table)
/// pair can be switched to fail, and a store built with [`recording`] keeps a
/// log of every call.
///
/// [`recording`]: MemoryRecordStore::recording
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: Mutex<Inner>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that logs every call for [`calls`](Self::calls) and [`writes`](Self::writes).
    pub fn recording() -> Self {
        let store = Self::default();
        store.inner.lock().recording = true;
        store
    }

    /// Make every later `op` against `table` fail with a transport error.
    pub fn fail(&self, op: Op, table: Table) {
        self.inner.lock().failures.insert((op, table));
    }

    pub fn heal(&self, op: Op, table: Table) {
        self.inner.lock().failures.remove(&(op, table));
    }

    pub fn calls(&self) -> Vec<(Op, Table)> {
        self.inner.lock().calls.clone()
    }

    /// Number of recorded calls that could have changed data.
    pub fn writes(&self) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|(op, _)| *op != Op::Select)
            .count()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().calls.clear();
    }

    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.inner
            .lock()
            .tables
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    fn begin(&self, op: Op, table: Table) -> Result<parking_lot::MutexGuard<'_, Inner>, GatewayError> {
        let mut guard = self.inner.lock();
        if guard.recording {
            guard.calls.push((op, table));
        }
        if guard.failures.contains(&(op, table)) {
            return Err(GatewayError::Transport(format!(
                "injected {:?} failure on {}",
                op,
                table.name()
            )));
        }
        Ok(guard)
    }
}

fn matches(row: &Row, filters: &[Filter]) -> bool {
    filters
        .iter()
        .all(|f| row.get(f.column).map(|v| same(v, &f.value)).unwrap_or(false))
}

fn same(a: &Value, b: &Value) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .unwrap_or_default()
            .partial_cmp(&y.as_f64().unwrap_or_default())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None, Some(_)) | (Some(Value::Null), Some(_)) => Ordering::Less,
        (Some(_), None) | (Some(_), Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

fn require_filter(table: Table, filters: &[Filter]) -> Result<(), GatewayError> {
    if filters.is_empty() {
        return Err(GatewayError::Rejected {
            status: 400,
            message: format!("unfiltered write on {}", table.name()),
        });
    }
    if let Some(f) = filters.iter().find(|f| !table.has_column(f.column)) {
        return Err(GatewayError::Rejected {
            status: 400,
            message: format!("unknown column {}.{}", table.name(), f.column),
        });
    }
    Ok(())
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert(&self, table: Table, mut row: Row) -> Result<Row, GatewayError> {
        let mut guard = self.begin(Op::Insert, table)?;
        table.check_row(&row)?;
        if table == Table::Comments {
            let parent = row.get("tribute_id").cloned().unwrap_or(Value::Null);
            let exists = guard
                .tables
                .get(&Table::Tributes)
                .map(|rows| rows.iter().any(|t| t.get("id").map(|id| same(id, &parent)).unwrap_or(false)))
                .unwrap_or(false);
            if !exists {
                return Err(GatewayError::Rejected {
                    status: 409,
                    message: "comment references a missing tribute".into(),
                });
            }
        }
        guard.next_id += 1;
        let created = now_millis().max(guard.last_created + 1);
        guard.last_created = created;
        row.insert("id".into(), Value::from(guard.next_id));
        row.insert("created_at".into(), Value::from(created));
        guard.tables.entry(table).or_default().push(row.clone());
        Ok(row)
    }

    async fn select(
        &self,
        table: Table,
        filters: &[Filter],
        order: &[Order],
    ) -> Result<Vec<Row>, GatewayError> {
        let guard = self.begin(Op::Select, table)?;
        let mut rows: Vec<Row> = guard
            .tables
            .get(&table)
            .map(|rows| rows.iter().filter(|r| matches(r, filters)).cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| {
            order
                .iter()
                .map(|o| {
                    let ord = compare(a.get(o.column), b.get(o.column));
                    if o.ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                })
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        Ok(rows)
    }

    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<usize, GatewayError> {
        let mut guard = self.begin(Op::Delete, table)?;
        require_filter(table, filters)?;
        let rows = guard.tables.entry(table).or_default();
        let before = rows.len();
        rows.retain(|r| !matches(r, filters));
        Ok(before - rows.len())
    }

    async fn update(
        &self,
        table: Table,
        filters: &[Filter],
        patch: Row,
    ) -> Result<usize, GatewayError> {
        let mut guard = self.begin(Op::Update, table)?;
        require_filter(table, filters)?;
        table.check_row(&patch)?;
        let mut changed = 0;
        for row in guard.tables.entry(table).or_default().iter_mut() {
            if matches(row, filters) {
                for (k, v) in &patch {
                    row.insert(k.clone(), v.clone());
                }
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Records;
    use std::sync::Arc;

    #[tokio::test]
    async fn assigns_ids_and_orders() {
        let store = Arc::new(MemoryRecordStore::new());
        let records = Records::new(store.clone());
        let a = records.insert_tribute("A", "one", "").await.unwrap();
        let b = records.insert_tribute("B", "two", "").await.unwrap();
        assert!(b.id > a.id);
        assert!(b.created_at > a.created_at);
        let all = records.list_tributes().await.unwrap();
        assert_eq!(all[0].id, b.id);
        assert_eq!(all[1].id, a.id);
    }

    #[tokio::test]
    async fn comments_need_a_parent() {
        let store = Arc::new(MemoryRecordStore::new());
        let records = Records::new(store.clone());
        assert!(records.insert_comment(99, "K", "hi").await.is_err());
        let t = records.insert_tribute("A", "one", "").await.unwrap();
        records.insert_comment(t.id, "K", "first").await.unwrap();
        records.insert_comment(t.id, "L", "second").await.unwrap();
        let comments = records.list_comments(t.id).await.unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].message, "first");
    }

    #[tokio::test]
    async fn injected_failures_and_call_log() {
        let store = Arc::new(MemoryRecordStore::recording());
        let records = Records::new(store.clone());
        store.fail(Op::Select, Table::Tributes);
        assert!(records.list_tributes().await.is_err());
        store.heal(Op::Select, Table::Tributes);
        assert!(records.list_tributes().await.unwrap().is_empty());
        assert_eq!(store.calls().len(), 2);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn plain_store_keeps_no_call_log() {
        let store = Arc::new(MemoryRecordStore::new());
        let records = Records::new(store.clone());
        for _ in 0..50 {
            records.list_tributes().await.unwrap();
        }
        records.insert_tribute("A", "one", "").await.unwrap();
        assert!(store.calls().is_empty());
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn unfiltered_delete_is_refused() {
        let store = MemoryRecordStore::new();
        assert!(store.delete(Table::Comments, &[]).await.is_err());
    }
}
