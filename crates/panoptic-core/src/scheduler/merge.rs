//! Merging sub-sources discovered at runtime into configured jobs

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tracing::debug;

use crate::error::Result;
use crate::protocol::{JobSpec, SubSource, SubSourceKind};

/// Data store holding sub-sources added outside the job configuration
#[async_trait::async_trait]
pub trait TargetStore: Send + Sync {
    /// Sources whose stored sub-sources are merged into every matching job
    async fn mergeable_source_ids(&self) -> Result<HashSet<String>>;

    /// Stored sub-sources of `source_id`, ordered by name
    async fn sub_sources(&self, source_id: &str) -> Result<Vec<SubSource>>;
}

/// [`TargetStore`] kept in memory
#[derive(Debug, Default)]
pub struct InMemoryTargetStore {
    sources: RwLock<HashMap<String, Vec<SubSource>>>,
    mergeable: RwLock<HashSet<String>>,
}

impl InMemoryTargetStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sub-source to `source_id`. `mergeable` marks the source for
    /// merging into every job that crawls it.
    pub fn insert(&self, source_id: &str, sub_source: SubSource, mergeable: bool) {
        self.sources
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(source_id.to_string())
            .or_default()
            .push(sub_source);
        if mergeable {
            self.mergeable
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(source_id.to_string());
        }
    }
}

#[async_trait::async_trait]
impl TargetStore for InMemoryTargetStore {
    async fn mergeable_source_ids(&self) -> Result<HashSet<String>> {
        Ok(self
            .mergeable
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    async fn sub_sources(&self, source_id: &str) -> Result<Vec<SubSource>> {
        let mut subs = self
            .sources
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(source_id)
            .cloned()
            .unwrap_or_default();
        subs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(subs)
    }
}

/// Append stored sub-sources to every spec that accepts them.
///
/// A spec accepts stored sub-sources when it sets
/// `accept_dynamic_sub_sources` or its source is listed as mergeable. Only
/// sub-sources whose name is not already in the spec are added; stored
/// entries without a kind are treated as user feeds.
pub async fn merge_dynamic_targets(
    mut specs: Vec<JobSpec>,
    store: &dyn TargetStore,
) -> Result<Vec<JobSpec>> {
    let mergeable = store.mergeable_source_ids().await?;

    for spec in &mut specs {
        let params = &mut spec.task_params;
        if !params.accept_dynamic_sub_sources && !mergeable.contains(&params.source_id) {
            continue;
        }

        let existing: HashSet<String> = params.sub_sources.iter().map(|s| s.name.clone()).collect();
        let mut added = 0usize;
        for mut sub in store.sub_sources(&params.source_id).await? {
            if existing.contains(&sub.name) {
                continue;
            }
            if sub.kind == SubSourceKind::Unspecified {
                sub.kind = SubSourceKind::Users;
            }
            params.sub_sources.push(sub);
            added += 1;
        }
        if added > 0 {
            debug!(job = %spec.name, added, "Merged stored sub-sources");
        }
    }

    Ok(specs)
}
