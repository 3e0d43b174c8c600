use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use sage_api::{Error, RemoteStore, Select, Table, Time, Uuid};
use serde_json::Value;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

mod auth;
pub use auth::MockAuth;

/// In-memory stand-in for the hosted store, with failure injection
pub struct MockServer {
    db: Mutex<Db>,
    write_gate: Arc<RwLock<()>>,
}

#[derive(Debug, Default)]
struct Db {
    tables: BTreeMap<Table, Vec<Value>>,
    last_time: Option<Time>,
    offline: bool,
    failing_writes: usize,
    selects: BTreeMap<Table, usize>,
}

impl Db {
    /// Strictly increasing clock, so that rows inserted back-to-back keep their order
    fn now(&mut self) -> Time {
        let mut now = Utc::now();
        if let Some(last) = self.last_time {
            if now <= last {
                now = last + chrono::Duration::microseconds(1);
            }
        }
        self.last_time = Some(now);
        now
    }

    fn check_online(&self) -> Result<(), Error> {
        match self.offline {
            true => Err(Error::Network(String::from("mock server is offline"))),
            false => Ok(()),
        }
    }

    fn check_write(&mut self) -> Result<(), Error> {
        self.check_online()?;
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(Error::Network(String::from("injected write failure")));
        }
        Ok(())
    }

    fn complete_row(&mut self, table: Table, mut row: Value) -> Result<Value, Error> {
        let now = Value::String(self.now().to_rfc3339_opts(SecondsFormat::Micros, true));
        let obj = row.as_object_mut().ok_or_else(|| {
            Error::Malformed(format!("inserting a non-object row into {}", table.name()))
        })?;
        obj.entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        if !matches!(table, Table::UserProfiles | Table::EmailSubscriptions) {
            obj.entry("created_at").or_insert_with(|| now.clone());
            obj.entry("updated_at").or_insert(now);
        }
        if table.soft_deletes() {
            obj.entry("is_deleted").or_insert(Value::Bool(false));
        }
        Ok(row)
    }

    fn check_unique_active(&self, table: Table, row: &Value) -> Result<(), Error> {
        let (a, b) = match table {
            Table::CommentLikes => ("comment_id", "user_id"),
            Table::FeatureReactions => ("feature_id", "user_id"),
            _ => return Ok(()),
        };
        let clash = self.tables.get(&table).into_iter().flatten().any(|r| {
            r.get("is_deleted") == Some(&Value::Bool(false))
                && r.get(a) == row.get(a)
                && r.get(b) == row.get(b)
        });
        match clash {
            true => Err(Error::Conflict(format!(
                "active row for ({a}, {b}) already exists in {}",
                table.name()
            ))),
            false => Ok(()),
        }
    }

    fn insert(&mut self, table: Table, row: Value) -> Result<Value, Error> {
        let row = self.complete_row(table, row)?;
        self.check_unique_active(table, &row)?;
        self.tables.entry(table).or_default().push(row.clone());
        Ok(row)
    }
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer {
            db: Mutex::new(Db::default()),
            write_gate: Arc::new(RwLock::new(())),
        }
    }

    /// Insert a row directly, bypassing failure injection
    pub fn test_seed(&self, table: Table, row: Value) -> Value {
        self.db
            .lock()
            .insert(table, row)
            .unwrap_or_else(|e| panic!("seeding {}: {e}", table.name()))
    }

    /// All rows of a table, including soft-deleted ones
    pub fn test_rows(&self, table: Table) -> Vec<Value> {
        self.db
            .lock()
            .tables
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `select` calls received for a table
    pub fn test_select_count(&self, table: Table) -> usize {
        self.db.lock().selects.get(&table).copied().unwrap_or(0)
    }

    /// While offline, every call fails with a network error
    pub fn set_offline(&self, offline: bool) {
        self.db.lock().offline = offline;
    }

    pub fn fail_next_writes(&self, n: usize) {
        self.db.lock().failing_writes = n;
    }

    /// Writes wait until the returned guard is dropped
    pub async fn hold_writes(&self) -> OwnedRwLockWriteGuard<()> {
        self.write_gate.clone().write_owned().await
    }
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

#[async_trait]
impl RemoteStore for MockServer {
    async fn insert(&self, table: Table, row: Value) -> Result<Value, Error> {
        let _open = self.write_gate.read().await;
        let mut db = self.db.lock();
        db.check_write()?;
        db.insert(table, row)
    }

    async fn select(&self, table: Table, query: &Select) -> Result<Vec<Value>, Error> {
        let mut db = self.db.lock();
        db.check_online()?;
        *db.selects.entry(table).or_default() += 1;
        let rows = db.tables.get(&table).cloned().unwrap_or_default();
        Ok(query.apply(rows))
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value, Error> {
        let _open = self.write_gate.read().await;
        let mut db = self.db.lock();
        db.check_write()?;
        let patch = match patch {
            Value::Object(patch) => patch,
            _ => {
                return Err(Error::Malformed(format!(
                    "patching {} with a non-object",
                    table.name()
                )))
            }
        };
        let row = db
            .tables
            .get_mut(&table)
            .into_iter()
            .flatten()
            .find(|r| r.get("id").and_then(Value::as_str) == Some(id))
            .ok_or_else(|| Error::Unknown(format!("no row {id} in {}", table.name())))?;
        if let Some(obj) = row.as_object_mut() {
            obj.extend(patch);
        }
        Ok(row.clone())
    }
}
