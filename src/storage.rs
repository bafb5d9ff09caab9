//! CRUD layered over per-service storage lists.
//!
//! Each installed service owns the storage lists it declared; records are
//! JSON objects with a generated `_id`, kept in insertion order. Indices in
//! the user-facing operations are 1-based.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::state::{StateError, StateManager};

/// Storage operation failure.
#[derive(Debug, Error)]
pub enum StorageError {
    /// State access failed (unknown chat/service/storage).
    #[error(transparent)]
    State(#[from] StateError),
    /// Records must be JSON objects.
    #[error("storage records must be objects")]
    NotAnObject,
}

/// Aggregation operator for [`StorageManager::aggregate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    /// Sum of the field across matching records.
    Sum,
    /// Arithmetic mean of the field.
    Avg,
    /// Smallest field value.
    Min,
    /// Largest field value.
    Max,
    /// Number of matching records.
    Count,
}

impl FromStr for AggregateOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            other => Err(format!("unknown aggregate op '{other}'")),
        }
    }
}

/// Whether a record satisfies an equality-only filter.
fn matches_filter(record: &Value, filter: Option<&Value>) -> bool {
    let Some(Value::Object(fields)) = filter else {
        return true;
    };
    fields
        .iter()
        .all(|(k, expected)| record.get(k) == Some(expected))
}

/// CRUD over `(chat, service, storage-name)`-scoped record lists.
#[derive(Clone)]
pub struct StorageManager {
    state: Arc<StateManager>,
}

impl StorageManager {
    /// Build a manager over the shared state.
    pub fn new(state: Arc<StateManager>) -> Self {
        Self { state }
    }

    /// Append a record, assigning a unique `_id`. Returns the stored record.
    pub async fn add(
        &self,
        chat_id: &str,
        service: &str,
        name: &str,
        item: Value,
    ) -> Result<Value, StorageError> {
        let Value::Object(mut fields) = item else {
            return Err(StorageError::NotAnObject);
        };
        fields.insert("_id".to_owned(), Value::from(Uuid::new_v4().to_string()));
        let record = Value::Object(fields);
        let stored = record.clone();
        self.state
            .with_storage(chat_id, service, name, move |list| list.push(record))
            .await?;
        Ok(stored)
    }

    /// Fetch a record by `_id`.
    pub async fn get(
        &self,
        chat_id: &str,
        service: &str,
        name: &str,
        id: &str,
    ) -> Result<Option<Value>, StorageError> {
        Ok(self
            .state
            .read_storage(chat_id, service, name, |list| {
                list.iter().find(|r| record_id(r) == Some(id)).cloned()
            })
            .await?)
    }

    /// Fetch a record by 1-based position.
    pub async fn get_by_index(
        &self,
        chat_id: &str,
        service: &str,
        name: &str,
        index: usize,
    ) -> Result<Option<Value>, StorageError> {
        Ok(self
            .state
            .read_storage(chat_id, service, name, |list| {
                index
                    .checked_sub(1)
                    .and_then(|i| list.get(i))
                    .cloned()
            })
            .await?)
    }

    /// Shallow-merge `patch` into the record with `_id`. Returns the new
    /// record, or `None` when no record matched.
    pub async fn update(
        &self,
        chat_id: &str,
        service: &str,
        name: &str,
        id: &str,
        patch: Value,
    ) -> Result<Option<Value>, StorageError> {
        let Value::Object(patch) = patch else {
            return Err(StorageError::NotAnObject);
        };
        Ok(self
            .state
            .with_storage(chat_id, service, name, move |list| {
                let record = list.iter_mut().find(|r| record_id(r) == Some(id))?;
                merge_into(record, &patch);
                Some(record.clone())
            })
            .await?)
    }

    /// Shallow-merge `patch` into the record at a 1-based position.
    pub async fn update_by_index(
        &self,
        chat_id: &str,
        service: &str,
        name: &str,
        index: usize,
        patch: Value,
    ) -> Result<Option<Value>, StorageError> {
        let Value::Object(patch) = patch else {
            return Err(StorageError::NotAnObject);
        };
        Ok(self
            .state
            .with_storage(chat_id, service, name, move |list| {
                let record = index.checked_sub(1).and_then(|i| list.get_mut(i))?;
                merge_into(record, &patch);
                Some(record.clone())
            })
            .await?)
    }

    /// Delete the record with `_id`. Returns whether one was removed.
    pub async fn delete(
        &self,
        chat_id: &str,
        service: &str,
        name: &str,
        id: &str,
    ) -> Result<bool, StorageError> {
        Ok(self
            .state
            .with_storage(chat_id, service, name, move |list| {
                let before = list.len();
                list.retain(|r| record_id(r) != Some(id));
                list.len() < before
            })
            .await?)
    }

    /// Delete the record at a 1-based position. Returns whether one was
    /// removed.
    pub async fn delete_by_index(
        &self,
        chat_id: &str,
        service: &str,
        name: &str,
        index: usize,
    ) -> Result<bool, StorageError> {
        Ok(self
            .state
            .with_storage(chat_id, service, name, move |list| {
                match index.checked_sub(1) {
                    Some(i) if i < list.len() => {
                        list.remove(i);
                        true
                    }
                    _ => false,
                }
            })
            .await?)
    }

    /// Remove every record.
    pub async fn clear(
        &self,
        chat_id: &str,
        service: &str,
        name: &str,
    ) -> Result<(), StorageError> {
        Ok(self
            .state
            .with_storage(chat_id, service, name, |list| list.clear())
            .await?)
    }

    /// Records matching an equality-only filter, in storage order.
    pub async fn query(
        &self,
        chat_id: &str,
        service: &str,
        name: &str,
        filter: Option<&Value>,
    ) -> Result<Vec<Value>, StorageError> {
        Ok(self
            .state
            .read_storage(chat_id, service, name, |list| {
                list.iter()
                    .filter(|r| matches_filter(r, filter))
                    .cloned()
                    .collect()
            })
            .await?)
    }

    /// Number of records matching the filter.
    pub async fn count(
        &self,
        chat_id: &str,
        service: &str,
        name: &str,
        filter: Option<&Value>,
    ) -> Result<usize, StorageError> {
        Ok(self
            .state
            .read_storage(chat_id, service, name, |list| {
                list.iter().filter(|r| matches_filter(r, filter)).count()
            })
            .await?)
    }

    /// One page of records, 1-based page numbers.
    pub async fn paginate(
        &self,
        chat_id: &str,
        service: &str,
        name: &str,
        page: usize,
        limit: usize,
    ) -> Result<Vec<Value>, StorageError> {
        let start = page.saturating_sub(1).saturating_mul(limit);
        Ok(self
            .state
            .read_storage(chat_id, service, name, |list| {
                list.iter().skip(start).take(limit).cloned().collect()
            })
            .await?)
    }

    /// Aggregate a numeric field over matching records.
    ///
    /// `Count` ignores the field; the numeric ops skip records where the
    /// field is absent or not a number. `Avg`/`Min`/`Max` over zero numeric
    /// values yield `null`.
    pub async fn aggregate(
        &self,
        chat_id: &str,
        service: &str,
        name: &str,
        field: &str,
        op: AggregateOp,
        filter: Option<&Value>,
    ) -> Result<Value, StorageError> {
        Ok(self
            .state
            .read_storage(chat_id, service, name, |list| {
                let matching = list.iter().filter(|r| matches_filter(r, filter));
                if op == AggregateOp::Count {
                    return Value::from(matching.count());
                }
                let numbers: Vec<f64> = matching
                    .filter_map(|r| r.get(field).and_then(Value::as_f64))
                    .collect();
                match op {
                    AggregateOp::Sum => Value::from(numbers.iter().sum::<f64>()),
                    AggregateOp::Avg => {
                        if numbers.is_empty() {
                            Value::Null
                        } else {
                            let n = f64::from(u32::try_from(numbers.len()).unwrap_or(u32::MAX));
                            Value::from(numbers.iter().sum::<f64>() / n)
                        }
                    }
                    AggregateOp::Min => numbers
                        .iter()
                        .copied()
                        .fold(None, |acc: Option<f64>, v| {
                            Some(acc.map_or(v, |a| a.min(v)))
                        })
                        .map(Value::from)
                        .unwrap_or(Value::Null),
                    AggregateOp::Max => numbers
                        .iter()
                        .copied()
                        .fold(None, |acc: Option<f64>, v| {
                            Some(acc.map_or(v, |a| a.max(v)))
                        })
                        .map(Value::from)
                        .unwrap_or(Value::Null),
                    AggregateOp::Count => Value::Null, // handled above
                }
            })
            .await?)
    }
}

fn record_id(record: &Value) -> Option<&str> {
    record.get("_id").and_then(Value::as_str)
}

fn merge_into(record: &mut Value, patch: &Map<String, Value>) {
    if let Value::Object(fields) = record {
        for (k, v) in patch {
            // The generated id is immutable.
            if k != "_id" {
                fields.insert(k.clone(), v.clone());
            }
        }
    }
}
