use super::{ChangeEntry, Document, DocumentStore, Filter, Op};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Vec<Document>>,
    log: Vec<ChangeEntry>,
    clock: u64,
}

impl Inner {
    fn record(&mut self, op: Op, collection: &str, before: Option<Document>, after: Option<Document>) {
        self.clock += 1;
        self.log.push(ChangeEntry {
            ts: self.clock,
            op,
            collection: collection.to_string(),
            before,
            after,
        });
    }
}

/// In-process document store with an append-only change log.
///
/// Natural keys registered through [`MemoryStore::with_keys`] are enforced on
/// every write: a document missing a key field is rejected, and inserting a
/// second document under an existing key is reported as inconsistent state.
/// Writes that leave a document unchanged are not logged.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    keys: HashMap<String, Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the natural key of each collection.
    pub fn with_keys(mut self, keys: HashMap<String, Vec<String>>) -> Self {
        self.keys = keys;
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::InconsistentState("document store lock poisoned".into()))
    }

    fn validate(&self, collection: &str, doc: &Document) -> Result<()> {
        if let Some(keys) = self.keys.get(collection) {
            for key in keys {
                if doc.get(key).is_none_or(|v| v.is_null()) {
                    return Err(Error::ValidationRejected(format!(
                        "{collection} document is missing natural key '{key}'"
                    )));
                }
            }
        }
        Ok(())
    }

    fn key_filter(&self, collection: &str, doc: &Document) -> Option<Filter> {
        self.keys
            .get(collection)
            .and_then(|keys| Filter::from_keys(doc, keys))
    }

    /// Loads every `<collection>.json` array found in `dir`. Loading writes no change entries.
    pub fn load_dir(dir: &Path, keys: HashMap<String, Vec<String>>) -> Result<Self> {
        let store = MemoryStore::new().with_keys(keys);
        if !dir.exists() {
            info!(dir = %dir.display(), "Snapshot directory absent, starting empty");
            return Ok(store);
        }

        {
            let mut inner = store.lock()?;
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                let docs: Vec<Document> = serde_json::from_str(&fs::read_to_string(&path)?)?;
                debug!(collection = name, count = docs.len(), "Loaded collection");
                inner.collections.insert(name.to_string(), docs);
            }
        }
        Ok(store)
    }

    /// Writes one pretty-printed JSON array per collection into `dir`.
    pub fn save_dir(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let inner = self.lock()?;
        for (name, docs) in &inner.collections {
            let path = dir.join(format!("{name}.json"));
            fs::write(path, serde_json::to_string_pretty(docs)?)?;
        }
        Ok(())
    }
}

fn merge(target: &mut Document, fields: &Document) {
    for (k, v) in fields {
        target.insert(k.clone(), v.clone());
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let inner = self.lock()?;
        Ok(inner
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<()> {
        for doc in &docs {
            self.validate(collection, doc)?;
        }

        let mut inner = self.lock()?;
        for doc in docs {
            if let Some(key) = self.key_filter(collection, &doc) {
                let existing = inner.collections.get(collection);
                if existing.is_some_and(|docs| docs.iter().any(|d| key.matches(d))) {
                    return Err(Error::InconsistentState(format!(
                        "duplicate natural key inserted into {collection}"
                    )));
                }
            }
            inner
                .collections
                .entry(collection.to_string())
                .or_default()
                .push(doc.clone());
            inner.record(Op::Insert, collection, None, Some(doc));
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, filter: &Filter, doc: Document) -> Result<()> {
        let mut inner = self.lock()?;
        let docs = inner.collections.entry(collection.to_string()).or_default();

        match docs.iter_mut().find(|d| filter.matches(d)) {
            Some(existing) => {
                let mut updated = existing.clone();
                merge(&mut updated, &doc);
                if updated == *existing {
                    return Ok(());
                }
                self.validate(collection, &updated)?;
                let before = std::mem::replace(existing, updated.clone());
                inner.record(Op::Update, collection, Some(before), Some(updated));
            }
            None => {
                let mut created = Document::new();
                for (field, value) in filter.pinned_fields() {
                    created.insert(field.clone(), value.clone());
                }
                merge(&mut created, &doc);
                self.validate(collection, &created)?;
                docs.push(created.clone());
                inner.record(Op::Insert, collection, None, Some(created));
            }
        }
        Ok(())
    }

    async fn update_fields(
        &self,
        collection: &str,
        filter: &Filter,
        fields: Document,
    ) -> Result<usize> {
        let mut inner = self.lock()?;
        let mut changes = Vec::new();
        let mut matched = 0;

        if let Some(docs) = inner.collections.get_mut(collection) {
            for existing in docs.iter_mut().filter(|d| filter.matches(d)) {
                matched += 1;
                let before = existing.clone();
                merge(existing, &fields);
                if *existing != before {
                    changes.push((before, existing.clone()));
                }
            }
        }

        for (before, after) in changes {
            inner.record(Op::Update, collection, Some(before), Some(after));
        }
        Ok(matched)
    }

    async fn delete_many(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let mut inner = self.lock()?;
        let Some(docs) = inner.collections.get_mut(collection) else {
            return Ok(0);
        };

        let (removed, kept): (Vec<Document>, Vec<Document>) =
            docs.drain(..).partition(|d| filter.matches(d));
        *docs = kept;

        let count = removed.len();
        for doc in removed {
            inner.record(Op::Delete, collection, Some(doc), None);
        }
        Ok(count)
    }

    async fn changes_since(&self, since: u64, collections: &[&str]) -> Result<Vec<ChangeEntry>> {
        let inner = self.lock()?;
        let start = inner.log.partition_point(|e| e.ts <= since);
        Ok(inner.log[start..]
            .iter()
            .filter(|e| collections.contains(&e.collection.as_str()))
            .cloned()
            .collect())
    }

    async fn latest_timestamp(&self) -> Result<u64> {
        Ok(self.lock()?.clock)
    }
}
