//! Structured logging around record queries.
//!
//! [`with_logging`] wraps a store once, at construction; every failed query is logged with
//! its operation, collection and arguments and the original error is handed back unchanged.

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, warn};

use crate::backend::{DataStore, Query, QueryError};

struct LoggingStore {
    inner: Arc<dyn DataStore>,
}

pub fn with_logging(inner: Arc<dyn DataStore>) -> Arc<dyn DataStore> {
    Arc::new(LoggingStore { inner })
}

fn log_failure(operation: &'static str, collection: &str, args: &dyn Display, err: &QueryError) {
    match err {
        QueryError::Unauthorized { .. } => warn!(
            operation,
            collection,
            args = %args,
            error = %err,
            "record query rejected"
        ),
        _ => error!(
            operation,
            collection,
            args = %args,
            error = %err,
            "record query failed"
        ),
    }
}

fn describe_query(query: &Query) -> String {
    let mut parts = query
        .filters
        .iter()
        .map(|filter| format!("{}.{}={}", filter.column, filter.op.as_str(), filter.value))
        .collect::<Vec<_>>();
    if let Some(order) = &query.order {
        parts.push(format!("order={}.{:?}", order.column, order.direction));
    }
    if let Some(limit) = query.limit {
        parts.push(format!("limit={limit}"));
    }
    parts.join("&")
}

#[async_trait]
impl DataStore for LoggingStore {
    async fn select(
        &self,
        bearer: Option<&str>,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<Value>, QueryError> {
        let result = self.inner.select(bearer, collection, query).await;
        if let Err(err) = &result {
            log_failure("select", collection, &describe_query(query), err);
        }
        result
    }

    async fn insert(
        &self,
        bearer: Option<&str>,
        collection: &str,
        record: Value,
    ) -> Result<Value, QueryError> {
        let args = record.to_string();
        let result = self.inner.insert(bearer, collection, record).await;
        if let Err(err) = &result {
            log_failure("insert", collection, &args, err);
        }
        result
    }

    async fn upsert(
        &self,
        bearer: Option<&str>,
        collection: &str,
        record: Value,
    ) -> Result<Value, QueryError> {
        let args = record.to_string();
        let result = self.inner.upsert(bearer, collection, record).await;
        if let Err(err) = &result {
            log_failure("upsert", collection, &args, err);
        }
        result
    }

    async fn delete(
        &self,
        bearer: Option<&str>,
        collection: &str,
        query: &Query,
    ) -> Result<u64, QueryError> {
        let result = self.inner.delete(bearer, collection, query).await;
        if let Err(err) = &result {
            log_failure("delete", collection, &describe_query(query), err);
        }
        result
    }
}
