//! Archival lifecycle tracking.
//!
//! The chain follower reports archived nodes by content hash. The tracker
//! records each node's ledger location, decides when every node of an object
//! is archived, and then (through an `object-archived` task) warms the read
//! cache, flags the object archived and prunes the local payloads, in that
//! order. All steps are idempotent so that duplicate or out-of-order
//! deliveries converge on the same state.

use crate::cache::CacheWarmer;
use crate::dispatcher::{DispatchError, Task, TaskHandler, TaskKind, TaskPublisher};
use crate::metrics;
use archivist_core::config::ArchivalConfig;
use archivist_core::{Cid, ContentHash};
use archivist_metadata::models::{ArchivingData, NodeCountFilter};
use archivist_metadata::{MetadataError, MetadataStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ArchivalError {
    #[error("node store error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Core(#[from] archivist_core::Error),

    #[error("incomplete publish receipt for node {cid}: missing {missing}")]
    IncompleteReceipt { cid: String, missing: &'static str },

    #[error("object {root_cid} is not fully archived")]
    NotFullyArchived { root_cid: String },

    #[error("cache warm-up for {root_cid} timed out after {timeout_secs}s")]
    WarmTimeout { root_cid: String, timeout_secs: u64 },

    #[error("cache warm-up for {root_cid} failed: {source:#}")]
    WarmFailed {
        root_cid: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type ArchivalResult<T> = std::result::Result<T, ArchivalError>;

/// One archival confirmation: the node with this content hash now lives at
/// `(piece_index, piece_offset)` in the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedEntry {
    /// Hex-encoded SHA-256 of the encoded node.
    #[serde(with = "hex_hash")]
    pub content_hash: ContentHash,
    pub piece_index: i64,
    pub piece_offset: i64,
}

impl ArchivedEntry {
    pub fn new(content_hash: ContentHash, piece_index: i64, piece_offset: i64) -> Self {
        Self {
            content_hash,
            piece_index,
            piece_offset,
        }
    }

    /// The node's cid, derived from its content hash.
    pub fn cid(&self) -> Cid {
        Cid::from_content_hash(self.content_hash)
    }
}

mod hex_hash {
    use archivist_core::ContentHash;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &ContentHash, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hash.to_hex())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<ContentHash, D::Error> {
        let s = String::deserialize(d)?;
        ContentHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Outcome of [`ArchivalTracker::process_node_archived`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProcessSummary {
    /// Nodes whose location was recorded by this call.
    pub newly_archived: usize,
    /// Nodes that already had a location.
    pub replayed: usize,
    /// Entries for cids the node store does not know (yet).
    pub unknown: usize,
    /// Roots that became fully archived; one task was published for each.
    pub completed_roots: Vec<String>,
    /// Touched roots that are not valid cids and were never published.
    pub invalid_roots: usize,
}

/// Roots that do not parse can never be warmed, so no task is published for
/// them.
fn is_valid_root(root_cid: &str) -> bool {
    match Cid::parse(root_cid) {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(root_cid = %root_cid, error = %e, "Skipping object with invalid root cid");
            false
        }
    }
}

/// Block and transaction that published a node to the ledger.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub block_number: Option<i64>,
    pub tx_hash: Option<String>,
}

pub struct ArchivalTracker {
    metadata: Arc<dyn MetadataStore>,
    publisher: Arc<dyn TaskPublisher>,
    warmer: Arc<dyn CacheWarmer>,
    config: ArchivalConfig,
}

impl ArchivalTracker {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        publisher: Arc<dyn TaskPublisher>,
        warmer: Arc<dyn CacheWarmer>,
        config: ArchivalConfig,
    ) -> Self {
        Self {
            metadata,
            publisher,
            warmer,
            config,
        }
    }

    /// Record archival locations and publish `object-archived` for every root
    /// this batch completed.
    ///
    /// Replaying entries only re-asserts locations that are already set, and
    /// a root is reported complete only by the call that archived one of its
    /// nodes, so a duplicate batch publishes nothing.
    pub async fn process_node_archived(
        &self,
        entries: &[ArchivedEntry],
    ) -> ArchivalResult<ProcessSummary> {
        let mut summary = ProcessSummary::default();
        let mut touched_roots = BTreeSet::new();

        for entry in entries {
            let cid = entry.cid().to_string();
            let data = ArchivingData {
                cid: cid.clone(),
                piece_index: entry.piece_index,
                piece_offset: entry.piece_offset,
            };
            if let Some(root_cid) = self.metadata.set_node_archiving_data(&data).await? {
                summary.newly_archived += 1;
                touched_roots.insert(root_cid);
            } else if self.metadata.get_node(&cid).await?.is_some() {
                summary.replayed += 1;
            } else {
                tracing::warn!(cid = %cid, piece_index = entry.piece_index, "Archival confirmation for unknown node");
                summary.unknown += 1;
            }
        }

        for root_cid in touched_roots {
            if !is_valid_root(&root_cid) {
                summary.invalid_roots += 1;
                continue;
            }
            if self.has_all_nodes_archived(&root_cid).await? {
                summary.completed_roots.push(root_cid);
            }
        }

        metrics::NODES_ARCHIVED.inc_by(summary.newly_archived as u64);
        metrics::ARCHIVAL_REPLAYS.inc_by(summary.replayed as u64);
        metrics::ARCHIVAL_UNKNOWN_NODES.inc_by(summary.unknown as u64);

        self.publish_object_archived(summary.completed_roots.iter())
            .await?;

        tracing::info!(
            newly_archived = summary.newly_archived,
            replayed = summary.replayed,
            unknown = summary.unknown,
            completed_roots = summary.completed_roots.len(),
            invalid_roots = summary.invalid_roots,
            "Processed archival confirmations"
        );
        Ok(summary)
    }

    /// True iff the root has at least one node and all of them are archived.
    pub async fn has_all_nodes_archived(&self, root_cid: &str) -> ArchivalResult<bool> {
        let count = self
            .metadata
            .get_node_count(&NodeCountFilter::by_root_cid(root_cid))
            .await?;
        Ok(count.is_fully_archived())
    }

    /// Sweep every object not yet flagged archived and publish one
    /// `object-archived` task per root that is now complete.
    pub async fn check_objects_archival_status(&self) -> ArchivalResult<BTreeSet<String>> {
        let started = Instant::now();
        let limit = self.config.sweep_batch_limit.max(1);
        let mut ready = BTreeSet::new();
        let mut after: Option<String> = None;
        let mut scanned = 0usize;
        let mut skipped = 0usize;

        loop {
            let page = self
                .metadata
                .get_non_archived_objects(after.as_deref(), limit)
                .await?;
            let Some(last) = page.last() else {
                break;
            };
            after = Some(last.root_cid.clone());
            scanned += page.len();

            for object in &page {
                if !is_valid_root(&object.root_cid) {
                    skipped += 1;
                    continue;
                }
                if self.has_all_nodes_archived(&object.root_cid).await? {
                    ready.insert(object.root_cid.clone());
                }
            }
            if page.len() < limit as usize {
                break;
            }
        }

        self.publish_object_archived(ready.iter()).await?;

        metrics::SWEEP_RUNS.inc();
        metrics::SWEEP_DURATION.observe(started.elapsed().as_secs_f64());
        tracing::info!(scanned, skipped, ready = ready.len(), "Archival sweep finished");
        Ok(ready)
    }

    /// Warm the cache, flag the object archived, then prune its payloads.
    ///
    /// Any failure leaves the object unflagged or unpruned, and running it
    /// again completes the remaining steps. An object that is already
    /// flagged was warmed by an earlier delivery, so only the prune is
    /// repeated. Only archived nodes are pruned. Returns the number of
    /// payloads cleared by this call.
    pub async fn on_object_archived(&self, root_cid: &str) -> ArchivalResult<u64> {
        let cid = Cid::parse(root_cid)?;
        let not_archived = || ArchivalError::NotFullyArchived {
            root_cid: root_cid.to_string(),
        };

        if !self.has_all_nodes_archived(root_cid).await? {
            return Err(not_archived());
        }

        let flagged = self
            .metadata
            .get_object(root_cid)
            .await?
            .is_some_and(|object| object.archived);
        let cached_bytes = if flagged {
            tracing::debug!(root_cid = %root_cid, "Object already flagged archived, skipping cache warm-up");
            0
        } else {
            let bytes = self.warm_cache(&cid).await?;
            // Nodes saved under the root during the warm-up keep it open.
            if !self.metadata.set_object_archived(root_cid).await? {
                return Err(not_archived());
            }
            metrics::OBJECTS_ARCHIVED.inc();
            bytes
        };

        let pruned = self.metadata.remove_node_data_by_root_cid(root_cid).await?;
        metrics::NODES_PRUNED.inc_by(pruned);

        tracing::info!(root_cid = %root_cid, cached_bytes, pruned, "Object archived");
        Ok(pruned)
    }

    async fn warm_cache(&self, cid: &Cid) -> ArchivalResult<u64> {
        let timeout = self.config.cache_warm_timeout();
        match tokio::time::timeout(timeout, self.warmer.warm(cid)).await {
            Ok(Ok(bytes)) => {
                metrics::CACHE_WARM_BYTES.inc_by(bytes);
                Ok(bytes)
            }
            Ok(Err(source)) => {
                metrics::CACHE_WARM_FAILURES.inc();
                Err(ArchivalError::WarmFailed {
                    root_cid: cid.to_string(),
                    source,
                })
            }
            Err(_) => {
                metrics::CACHE_WARM_FAILURES.inc();
                Err(ArchivalError::WarmTimeout {
                    root_cid: cid.to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Publish one `archive-objects` task carrying the whole batch.
    pub async fn schedule_node_archiving(&self, entries: Vec<ArchivedEntry>) -> ArchivalResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let count = entries.len();
        let params = serde_json::to_value(ArchiveObjectsParams { entries }).map_err(|e| {
            DispatchError::InvalidParams {
                kind: TaskKind::ArchiveObjects,
                message: e.to_string(),
            }
        })?;
        self.publisher
            .publish(vec![Task::new(TaskKind::ArchiveObjects, params)])
            .await?;
        tracing::debug!(entries = count, "Scheduled node archiving");
        Ok(())
    }

    /// Record a node's publish receipt. Incomplete receipts are rejected.
    pub async fn set_published_on(
        &self,
        cid: &str,
        receipt: &PublishReceipt,
    ) -> ArchivalResult<()> {
        let incomplete = |missing| ArchivalError::IncompleteReceipt {
            cid: cid.to_string(),
            missing,
        };
        let block_number = receipt.block_number.ok_or_else(|| incomplete("block_number"))?;
        let tx_hash = receipt
            .tx_hash
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| incomplete("tx_hash"))?;

        self.metadata
            .update_node_published_on(cid, block_number, tx_hash)
            .await?;
        Ok(())
    }

    async fn publish_object_archived<'a>(
        &self,
        roots: impl Iterator<Item = &'a String>,
    ) -> ArchivalResult<()> {
        let tasks: Vec<Task> = roots
            .map(|root_cid| {
                Task::new(
                    TaskKind::ObjectArchived,
                    serde_json::json!({ "root_cid": root_cid }),
                )
            })
            .collect();
        if !tasks.is_empty() {
            self.publisher.publish(tasks).await?;
        }
        Ok(())
    }
}

/// Run [`ArchivalTracker::check_objects_archival_status`] every `interval`
/// until cancelled. A failed sweep is logged and retried on the next tick.
pub fn spawn_sweep_loop(tracker: Arc<ArchivalTracker>, cancel: CancellationToken) -> JoinHandle<()> {
    let interval = tracker.config.sweep_interval();
    tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "Archival sweep loop started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = tracker.check_objects_archival_status().await {
                        tracing::error!(error = %e, "Archival sweep failed");
                    }
                }
            }
        }
        tracing::info!("Archival sweep loop stopped");
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct ArchiveObjectsParams {
    entries: Vec<ArchivedEntry>,
}

#[derive(Debug, Deserialize)]
struct ObjectArchivedParams {
    root_cid: String,
}

fn parse_params<T: serde::de::DeserializeOwned>(
    kind: TaskKind,
    params: serde_json::Value,
) -> Result<T, DispatchError> {
    serde_json::from_value(params).map_err(|e| DispatchError::InvalidParams {
        kind,
        message: e.to_string(),
    })
}

/// Handles `archive-objects`. Fails while any entry names an unknown node so
/// that confirmations racing ahead of their upload are retried.
pub struct ArchiveObjectsHandler {
    tracker: Arc<ArchivalTracker>,
}

impl ArchiveObjectsHandler {
    pub fn new(tracker: Arc<ArchivalTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl TaskHandler for ArchiveObjectsHandler {
    async fn handle(&self, params: serde_json::Value) -> anyhow::Result<()> {
        let params: ArchiveObjectsParams = parse_params(TaskKind::ArchiveObjects, params)?;
        let summary = self.tracker.process_node_archived(&params.entries).await?;
        if summary.unknown > 0 {
            anyhow::bail!(
                "{} of {} archival confirmations reference unknown nodes",
                summary.unknown,
                params.entries.len()
            );
        }
        Ok(())
    }
}

/// Handles `object-archived`.
pub struct ObjectArchivedHandler {
    tracker: Arc<ArchivalTracker>,
}

impl ObjectArchivedHandler {
    pub fn new(tracker: Arc<ArchivalTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl TaskHandler for ObjectArchivedHandler {
    async fn handle(&self, params: serde_json::Value) -> anyhow::Result<()> {
        let params: ObjectArchivedParams = parse_params(TaskKind::ObjectArchived, params)?;
        self.tracker.on_object_archived(&params.root_cid).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archived_entry_wire_format() {
        let hash = ContentHash::compute(b"node");
        let entry = ArchivedEntry::new(hash, 4, 128);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["content_hash"], hash.to_hex());
        assert_eq!(json["piece_index"], 4);

        let back: ArchivedEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
        assert_eq!(back.cid(), Cid::compute(b"node"));
    }

    #[test]
    fn test_archived_entry_rejects_bad_hash() {
        let result: Result<ArchivedEntry, _> = serde_json::from_value(serde_json::json!({
            "content_hash": "not-hex",
            "piece_index": 1,
            "piece_offset": 1,
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_incomplete_receipt_names_cid() {
        let err = ArchivalError::IncompleteReceipt {
            cid: "uNODE".to_string(),
            missing: "tx_hash",
        };
        assert!(err.to_string().contains("uNODE"));
    }
}
