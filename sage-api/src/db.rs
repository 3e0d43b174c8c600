use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{Error, Select, Table};

/// The hosted relational store, seen as JSON rows.
///
/// Rows are never physically deleted: soft deletes go through `update`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn insert(&self, table: Table, row: Value) -> Result<Value, Error>;
    async fn select(&self, table: Table, query: &Select) -> Result<Vec<Value>, Error>;
    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value, Error>;
}

#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    async fn insert(&self, table: Table, row: Value) -> Result<Value, Error> {
        (**self).insert(table, row).await
    }

    async fn select(&self, table: Table, query: &Select) -> Result<Vec<Value>, Error> {
        (**self).select(table, query).await
    }

    async fn update(&self, table: Table, id: &str, patch: Value) -> Result<Value, Error> {
        (**self).update(table, id, patch).await
    }
}
