//! Calculator contract and the change-log bookkeeping every calculator shares.

use crate::error::{Error, Result};
use crate::schema::{Coefficients, SchemaSet};
use crate::store::{ChangeEntry, Document, DocumentStore, Filter, values_equal};
use crate::tba::MatchDataApi;
use async_trait::async_trait;
use std::collections::BTreeSet;
use tracing::{debug, error};

/// Everything a calculator may read during one cycle.
pub struct PipelineContext<'a> {
    pub store: &'a dyn DocumentStore,
    pub match_data: &'a dyn MatchDataApi,
    pub schemas: &'a SchemaSet,
    pub coefficients: &'a Coefficients,
    /// Optional roster restriction supplied by the operator.
    pub teams: Option<&'a [String]>,
}

/// One stage of the pipeline.
#[async_trait]
pub trait Calculator: Send {
    fn name(&self) -> &'static str;

    /// Collections this calculator owns; cleared by a full rebuild.
    fn output_collections(&self) -> &[&'static str];

    /// Forgets the remembered timestamp so the next run regenerates everything.
    fn reset(&mut self);

    async fn run(&mut self, ctx: &PipelineContext<'_>) -> Result<()>;
}

/// Change-log entries read for one run plus the high-water mark to commit.
pub struct ChangeBatch {
    pub entries: Vec<ChangeEntry>,
    pub high_water: u64,
    /// No timestamp was remembered: the run must regenerate every output.
    pub full: bool,
}

impl ChangeBatch {
    /// Keys extracted from every image of every entry.
    pub fn affected<K: Ord>(&self, key: impl Fn(&Document) -> Option<K>) -> BTreeSet<K> {
        self.entries
            .iter()
            .flat_map(|e| e.images())
            .filter_map(key)
            .collect()
    }

    /// Like [`ChangeBatch::affected`], restricted to one collection.
    pub fn affected_in<K: Ord>(
        &self,
        collection: &str,
        key: impl Fn(&Document) -> Option<K>,
    ) -> BTreeSet<K> {
        self.entries
            .iter()
            .filter(|e| e.collection == collection)
            .flat_map(|e| e.images())
            .filter_map(key)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Timestamp tracking and watched-collection filtering.
///
/// The remembered timestamp only moves in [`BaseCalculator::commit`], which a
/// calculator calls after a successful run, so a failed run re-reads the same
/// entries next cycle.
#[derive(Debug, Clone)]
pub struct BaseCalculator {
    watched: Vec<&'static str>,
    last_timestamp: Option<u64>,
}

impl BaseCalculator {
    pub fn new(watched: &[&'static str]) -> Self {
        Self {
            watched: watched.to_vec(),
            last_timestamp: None,
        }
    }

    pub fn last_timestamp(&self) -> Option<u64> {
        self.last_timestamp
    }

    pub fn reset(&mut self) {
        self.last_timestamp = None;
    }

    /// Entries newer than the remembered timestamp touching a watched collection.
    pub async fn entries_since_last(&self, store: &dyn DocumentStore) -> Result<ChangeBatch> {
        let high_water = store.latest_timestamp().await?;
        let since = self.last_timestamp.unwrap_or(0);
        let entries: Vec<ChangeEntry> = store
            .changes_since(since, &self.watched)
            .await?
            .into_iter()
            .filter(|e| e.ts <= high_water)
            .collect();
        debug!(since, high_water, count = entries.len(), "Read change log");
        Ok(ChangeBatch {
            entries,
            high_water,
            full: self.last_timestamp.is_none(),
        })
    }

    pub fn commit(&mut self, batch: &ChangeBatch) {
        self.last_timestamp = Some(batch.high_water);
    }
}

/// Upserts `doc` keyed on `key_fields` with the store's merge semantics. A
/// document the store rejects is logged and dropped; `Ok(false)` reports the drop.
pub async fn write_output(
    store: &dyn DocumentStore,
    collection: &str,
    key_fields: &[String],
    doc: Document,
) -> Result<bool> {
    let Some(filter) = Filter::from_keys(&doc, key_fields) else {
        error!(collection, "Dropping document without its natural key");
        return Ok(false);
    };
    match store.upsert(collection, &filter, doc).await {
        Ok(()) => Ok(true),
        Err(Error::ValidationRejected(reason)) => {
            error!(collection, %reason, "Dropping rejected document");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Deletes stored documents whose natural key is absent from `current`.
/// Used by calculators that recompute their whole output every run.
pub async fn remove_stale(
    store: &dyn DocumentStore,
    collection: &str,
    key_fields: &[String],
    current: &[Document],
) -> Result<usize> {
    let same_key = |a: &Document, b: &Document| {
        key_fields.iter().all(|k| match (a.get(k), b.get(k)) {
            (Some(x), Some(y)) => values_equal(x, y),
            _ => false,
        })
    };
    let mut removed = 0;
    for existing in store.find(collection, &Filter::all()).await? {
        if current.iter().any(|doc| same_key(doc, &existing)) {
            continue;
        }
        if let Some(filter) = Filter::from_keys(&existing, key_fields) {
            removed += store.delete_many(collection, &filter).await?;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_entries_since_last_filters_and_commits() {
        let store = MemoryStore::new();
        store
            .insert_many("obj_tim", vec![doc(json!({"match_number": 1}))])
            .await
            .unwrap();
        store
            .insert_many("raw_qr", vec![doc(json!({"_id": "a"}))])
            .await
            .unwrap();

        let mut base = BaseCalculator::new(&["obj_tim"]);
        let batch = base.entries_since_last(&store).await.unwrap();
        assert!(batch.full);
        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.high_water, 2);
        base.commit(&batch);

        let batch = base.entries_since_last(&store).await.unwrap();
        assert!(!batch.full);
        assert!(batch.is_empty());

        store
            .insert_many("obj_tim", vec![doc(json!({"match_number": 2}))])
            .await
            .unwrap();
        let batch = base.entries_since_last(&store).await.unwrap();
        let matches = batch.affected(crate::model::match_number);
        assert_eq!(matches.into_iter().collect::<Vec<_>>(), vec![2]);
    }

    #[tokio::test]
    async fn test_uncommitted_batch_is_reread() {
        let store = MemoryStore::new();
        store
            .insert_many("obj_tim", vec![doc(json!({"match_number": 1}))])
            .await
            .unwrap();
        let mut base = BaseCalculator::new(&["obj_tim"]);
        let first = base.entries_since_last(&store).await.unwrap();
        base.commit(&first);

        store
            .insert_many("obj_tim", vec![doc(json!({"match_number": 2}))])
            .await
            .unwrap();
        let failed = base.entries_since_last(&store).await.unwrap();
        assert_eq!(failed.entries.len(), 1);
        // no commit: the next run sees the same entry
        let retry = base.entries_since_last(&store).await.unwrap();
        assert_eq!(retry.entries, failed.entries);

        base.reset();
        assert!(base.last_timestamp().is_none());
    }

    #[tokio::test]
    async fn test_write_output_drops_keyless_documents() {
        let store = MemoryStore::new();
        let keys = vec!["team_number".to_string()];
        let written = write_output(&store, "obj_team", &keys, doc(json!({"x": 1})))
            .await
            .unwrap();
        assert!(!written);
        let written = write_output(&store, "obj_team", &keys, doc(json!({"team_number": "1"})))
            .await
            .unwrap();
        assert!(written);
    }

    #[tokio::test]
    async fn test_remove_stale_keeps_current_keys() {
        let store = MemoryStore::new();
        let keys = vec!["team_number".to_string()];
        store
            .insert_many(
                "predicted_team",
                vec![doc(json!({"team_number": "1"})), doc(json!({"team_number": "2"}))],
            )
            .await
            .unwrap();
        let current = vec![doc(json!({"team_number": "2", "predicted_rank": 1}))];
        let removed = remove_stale(&store, "predicted_team", &keys, &current).await.unwrap();
        assert_eq!(removed, 1);
        let left = store.find("predicted_team", &Filter::all()).await.unwrap();
        assert_eq!(left, vec![doc(json!({"team_number": "2"}))]);
    }
}
