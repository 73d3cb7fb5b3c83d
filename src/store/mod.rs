//! Document store abstraction and its change log.
//!
//! Calculators only talk to [`DocumentStore`]. Every write produces a
//! [`ChangeEntry`] stamped with a strictly increasing timestamp; calculators
//! tail those entries to find out which of their inputs moved since their
//! last successful run.

mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored document. Field order is preserved as written.
pub type Document = serde_json::Map<String, Value>;

/// Kind of write recorded in the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Insert,
    Update,
    Delete,
}

/// One entry of the append-only change log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    pub ts: u64,
    pub op: Op,
    pub collection: String,
    /// Pre-image for updates and deletes.
    pub before: Option<Document>,
    /// Post-image for inserts and updates.
    pub after: Option<Document>,
}

impl ChangeEntry {
    /// Every document image carried by the entry (post-image first).
    pub fn images(&self) -> impl Iterator<Item = &Document> {
        self.after.iter().chain(self.before.iter())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Eq(String, Value),
    In(String, Vec<Value>),
}

/// Conjunction of field conditions. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Eq(field.to_string(), value.into()));
        self
    }

    pub fn is_in(mut self, field: &str, values: Vec<Value>) -> Self {
        self.conditions.push(Condition::In(field.to_string(), values));
        self
    }

    /// Builds an equality filter on `keys` using the values carried by `doc`.
    /// Returns `None` when `doc` lacks one of the keys.
    pub fn from_keys(doc: &Document, keys: &[String]) -> Option<Self> {
        let mut filter = Filter::all();
        for key in keys {
            let value = doc.get(key).filter(|v| !v.is_null())?;
            filter = filter.eq(key, value.clone());
        }
        Some(filter)
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|condition| match condition {
            Condition::Eq(field, expected) => doc
                .get(field)
                .is_some_and(|actual| values_equal(actual, expected)),
            Condition::In(field, options) => doc
                .get(field)
                .is_some_and(|actual| options.iter().any(|o| values_equal(actual, o))),
        })
    }

    /// Fields the filter pins to a single value; used to seed upserted documents.
    fn pinned_fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.conditions.iter().filter_map(|c| match c {
            Condition::Eq(field, value) => Some((field, value)),
            Condition::In(..) => None,
        })
    }
}

/// JSON equality that treats `1` and `1.0` as the same number.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Typed access to a shared document store with change-log tailing.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<()>;

    /// Merges `doc` into the first document matching `filter`, inserting when none matches.
    ///
    /// Fields absent from `doc` keep their stored value. Several calculators
    /// write disjoint columns of one document (`obj_team` carries AutoPaths'
    /// compatibility fractions), so a writer must emit every field it owns on
    /// each write; a field it stops producing is only cleared by a rebuild.
    async fn upsert(&self, collection: &str, filter: &Filter, doc: Document) -> Result<()>;

    /// Merges `fields` into every document matching `filter`. Returns the match count.
    async fn update_fields(&self, collection: &str, filter: &Filter, fields: Document)
    -> Result<usize>;

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize>;

    /// Change-log entries strictly newer than `since` that touch one of `collections`.
    async fn changes_since(&self, since: u64, collections: &[&str]) -> Result<Vec<ChangeEntry>>;

    /// Timestamp of the newest change-log entry, 0 when the log is empty.
    async fn latest_timestamp(&self) -> Result<u64>;
}
