//! Re-emits static input collections into the change log every cycle.

use super::base::{Calculator, PipelineContext};
use crate::error::Result;
use crate::store::{DocumentStore, Filter};
use async_trait::async_trait;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct Reinsert;

impl Reinsert {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Calculator for Reinsert {
    fn name(&self) -> &'static str {
        "reinsert"
    }

    /// Inputs are never deleted by a full rebuild.
    fn output_collections(&self) -> &[&'static str] {
        &[]
    }

    fn reset(&mut self) {}

    async fn run(&mut self, ctx: &PipelineContext<'_>) -> Result<()> {
        let mut total = 0;
        for collection in &ctx.schemas.collections.reinsert {
            total += reinsert_collection(ctx.store, collection).await?;
        }
        info!(
            collections = ctx.schemas.collections.reinsert.len(),
            documents = total,
            "Re-inserted static inputs"
        );
        Ok(())
    }
}

/// Deletes and re-inserts every document of `collection`, leaving its
/// contents unchanged. Returns the number of documents re-inserted.
pub async fn reinsert_collection(store: &dyn DocumentStore, collection: &str) -> Result<usize> {
    let docs = store.find(collection, &Filter::all()).await?;
    if docs.is_empty() {
        debug!(collection, "Nothing to re-insert");
        return Ok(0);
    }
    let count = docs.len();
    store.delete_many(collection, &Filter::all()).await?;
    store.insert_many(collection, docs).await?;
    Ok(count)
}
