//! The meta engine: the single owner of the segment map.
//!
//! Every mutating operation follows the same discipline: take the engine
//! write lock, prepare clones and a metric buffer, persist through the
//! catalog, and only then install the clones and commit the metrics. A
//! failed catalog write leaves memory and metrics untouched.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use strata_core::metrics::{
    COMPACTED_SEGMENT_SIZE, DELETE_FILE_LABEL, FLUSHED_SEGMENT_FILE_NUM, INDEX_FILE_LABEL,
    INSERT_FILE_LABEL, NUM_COLLECTIONS, NUM_SEGMENTS, STATS_FILE_LABEL, STORED_BINLOG_SIZE,
    STORED_ROWS, STORED_ROWS_TOTAL,
};
use strata_core::segment::{binlog_count, merge_field_binlogs};
use strata_core::traits::BinlogsIncrement;
use strata_core::{
    compacted_segment_size, Allocation, Catalog, CollectionHandler, CollectionId, CompactionPlan,
    CompactionPlanResult, FieldBinlog, FieldId, IndexId, IndexMeta, IndexState, LogId, MetaError,
    MetaResult, PartitionId, SegmentId, SegmentIndexMeta, SegmentLevel, SegmentRecord,
    SegmentState, StreamPosition,
};
use strata_core::{Binlog, CollectionInfo};
use strata_storage::{delta_log_path, BlobStore};

use crate::checkpoint::ChannelCheckpointManager;
use crate::entry::SegmentEntry;
use crate::metric_mutation::{apply_state_change, MetricMutation};
use crate::operators::{OperatorOutcome, UpdateOperator, UpdatePack};
use crate::store::SegmentStore;
use crate::transforms::SegmentTransform;

/// Deadline for one schema lookup inside candidate filtering.
const SCHEMA_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Segments of one (partition, channel) group.
#[derive(Debug, Clone)]
pub struct ChanPartSegments {
    pub collection_id: CollectionId,
    pub partition_id: PartitionId,
    pub channel: String,
    pub segments: Vec<Arc<SegmentEntry>>,
}

/// Identity of one compaction candidate group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupLabel {
    pub collection_id: CollectionId,
    pub partition_id: PartitionId,
    pub channel: String,
}

#[derive(Default)]
struct IndexRegistry {
    /// collection -> index id -> definition
    indexes: HashMap<CollectionId, HashMap<IndexId, IndexMeta>>,
    /// segment -> index id -> build record
    segment_indexes: HashMap<SegmentId, HashMap<IndexId, SegmentIndexMeta>>,
}

/// The public facade over the segment map, collection cache, index
/// registry, and channel checkpoints.
pub struct MetaEngine {
    catalog: Arc<dyn Catalog>,
    blob_store: Arc<dyn BlobStore>,
    store: SegmentStore,
    collections: parking_lot::RwLock<HashMap<CollectionId, CollectionInfo>>,
    index_registry: parking_lot::RwLock<IndexRegistry>,
    checkpoints: ChannelCheckpointManager,
    /// Serializes every mutating operation across its catalog call.
    write_lock: Mutex<()>,
}

impl MetaEngine {
    /// Builds the engine and reloads all state from the catalog.
    ///
    /// # Errors
    ///
    /// Returns the catalog error when any of the startup listings fail.
    pub async fn new(
        catalog: Arc<dyn Catalog>,
        blob_store: Arc<dyn BlobStore>,
    ) -> MetaResult<Self> {
        let engine = Self {
            checkpoints: ChannelCheckpointManager::new(catalog.clone()),
            catalog,
            blob_store,
            store: SegmentStore::new(),
            collections: parking_lot::RwLock::new(HashMap::new()),
            index_registry: parking_lot::RwLock::new(IndexRegistry::default()),
            write_lock: Mutex::new(()),
        };
        engine.reload().await?;
        Ok(engine)
    }

    /// Loads segments, checkpoints, and index listings from the catalog and
    /// rebuilds the segment metrics.
    async fn reload(&self) -> MetaResult<()> {
        let started = std::time::Instant::now();
        let segments = self.catalog.list_segments().await?;

        NUM_SEGMENTS.reset();
        let mut stored_rows = 0i64;
        for record in segments {
            NUM_SEGMENTS
                .with_label_values(&[record.state.as_str(), record.level.as_str()])
                .inc();
            if record.state == SegmentState::Flushed {
                stored_rows += record.num_of_rows;
                FLUSHED_SEGMENT_FILE_NUM
                    .with_label_values(&[INSERT_FILE_LABEL])
                    .observe(binlog_count(&record.binlogs) as f64);
                FLUSHED_SEGMENT_FILE_NUM
                    .with_label_values(&[STATS_FILE_LABEL])
                    .observe(binlog_count(&record.statslogs) as f64);
                FLUSHED_SEGMENT_FILE_NUM
                    .with_label_values(&[DELETE_FILE_LABEL])
                    .observe(binlog_count(&record.deltalogs) as f64);
            }
            self.store.set(SegmentEntry::new(record));
        }
        STORED_ROWS.set(stored_rows);
        if stored_rows > 0 {
            STORED_ROWS_TOTAL.inc_by(stored_rows as u64);
        }

        self.checkpoints.load().await?;

        let indexes = self.catalog.list_indexes().await?;
        let segment_indexes = self.catalog.list_segment_indexes().await?;
        {
            let mut registry = self.index_registry.write();
            for index in indexes {
                registry
                    .indexes
                    .entry(index.collection_id)
                    .or_default()
                    .insert(index.index_id, index);
            }
            for seg_index in segment_indexes {
                FLUSHED_SEGMENT_FILE_NUM
                    .with_label_values(&[INDEX_FILE_LABEL])
                    .observe(seg_index.index_file_keys.len() as f64);
                registry
                    .segment_indexes
                    .entry(seg_index.segment_id)
                    .or_default()
                    .insert(seg_index.index_id, seg_index);
            }
        }

        info!(
            segments = self.store.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "meta reload from catalog done"
        );
        Ok(())
    }

    // ---- collection cache ----------------------------------------------

    /// Caches collection metadata. Collections are not persisted by this
    /// engine; the upstream coordinator owns them.
    pub fn add_collection(&self, collection: CollectionInfo) {
        debug!(collection_id = %collection.id, "meta update: add collection");
        let mut collections = self.collections.write();
        collections.insert(collection.id, collection);
        NUM_COLLECTIONS.set(collections.len() as i64);
    }

    /// A clone of the cached collection metadata, if present.
    #[must_use]
    pub fn get_collection(&self, collection_id: CollectionId) -> Option<CollectionInfo> {
        self.collections.read().get(&collection_id).cloned()
    }

    // ---- segment lifecycle ---------------------------------------------

    /// Persists and installs a new segment.
    pub async fn add_segment(&self, entry: SegmentEntry) -> MetaResult<()> {
        info!(segment_id = %entry.id(), "meta update: adding segment");
        let _guard = self.write_lock.lock().await;

        self.catalog.add_segment(&entry.record).await.map_err(|e| {
            warn!(segment_id = %entry.id(), error = %e, "meta update: adding segment failed");
            e
        })?;
        NUM_SEGMENTS
            .with_label_values(&[entry.record.state.as_str(), entry.record.level.as_str()])
            .inc();
        self.store.set(entry);
        Ok(())
    }

    /// Removes a segment from the catalog and the map. Missing segments
    /// succeed, so crash-safe retries are cheap.
    pub async fn drop_segment(&self, segment_id: SegmentId) -> MetaResult<()> {
        debug!(segment_id = %segment_id, "meta update: dropping segment");
        let _guard = self.write_lock.lock().await;

        let Some(entry) = self.store.get(segment_id) else {
            warn!(segment_id = %segment_id, "meta update: dropping segment - not found");
            return Ok(());
        };
        self.catalog.drop_segment(&entry.record).await?;
        NUM_SEGMENTS
            .with_label_values(&[entry.record.state.as_str(), entry.record.level.as_str()])
            .dec();
        self.store.drop_segment(segment_id);
        Ok(())
    }

    /// Moves a segment to `target` state, persisting first. Dropping a
    /// missing segment succeeds; any other missing target fails. Unhealthy
    /// segments and backward transitions are silent no-ops.
    pub async fn set_state(&self, segment_id: SegmentId, target: SegmentState) -> MetaResult<()> {
        debug!(segment_id = %segment_id, target = target.as_str(),
            "meta update: setting segment state");
        let _guard = self.write_lock.lock().await;

        let Some(current) = self.store.get(segment_id) else {
            warn!(segment_id = %segment_id, target = target.as_str(),
                "meta update: setting segment state - segment not found");
            if target == SegmentState::Dropped {
                return Ok(());
            }
            return Err(MetaError::not_found("segment", segment_id.to_string()));
        };

        if !current.is_healthy() {
            return Ok(());
        }
        if !current.record.state.can_transition_to(target) {
            warn!(segment_id = %segment_id,
                from = current.record.state.as_str(),
                to = target.as_str(),
                "meta update: rejecting backward state transition");
            return Ok(());
        }

        let mut cloned = SegmentEntry::clone(&current);
        let mut mutation = MetricMutation::new();
        apply_state_change(&mut cloned.record, target, &mut mutation);

        self.catalog
            .alter_segments(std::slice::from_ref(&cloned.record), &[])
            .await
            .map_err(|e| {
                warn!(segment_id = %segment_id, error = %e,
                    "meta update: setting segment state - failed to alter segment");
                e
            })?;
        mutation.commit();
        self.store.set(cloned);
        Ok(())
    }

    /// Applies transforms to a clone of one segment and persists it; when
    /// no transform changes anything, the write is skipped.
    pub async fn update_segment(
        &self,
        segment_id: SegmentId,
        transforms: &[SegmentTransform],
    ) -> MetaResult<()> {
        let _guard = self.write_lock.lock().await;

        let Some(current) = self.store.get(segment_id) else {
            warn!(segment_id = %segment_id, "meta update: update segment - not found");
            return Err(MetaError::not_found("segment", segment_id.to_string()));
        };
        let mut cloned = SegmentEntry::clone(&current);

        let mut updated = false;
        for transform in transforms {
            updated |= transform(&mut cloned);
        }
        if !updated {
            warn!(segment_id = %segment_id, "meta update: update segment skipped, no change");
            return Ok(());
        }

        self.catalog
            .alter_segments(std::slice::from_ref(&cloned.record), &[])
            .await?;
        self.store.set(cloned);
        info!(segment_id = %segment_id, "meta update: update segment complete");
        Ok(())
    }

    /// Runs the operator pipeline as one transaction: all dirtied segments
    /// are persisted in a single catalog call and installed together. An
    /// `Abort` from any operator abandons the transaction without error.
    pub async fn update_segments_info(&self, operators: Vec<UpdateOperator>) -> MetaResult<()> {
        let _guard = self.write_lock.lock().await;

        let mut pack = UpdatePack::new(&self.store);
        let mut any_dirty = false;
        for operator in operators {
            match operator(&mut pack) {
                OperatorOutcome::Abort => {
                    warn!("meta update: operator aborted, whole transaction skipped");
                    return Ok(());
                }
                OperatorOutcome::Dirty => any_dirty = true,
                OperatorOutcome::Clean => {}
            }
        }
        if !any_dirty || pack.segments.is_empty() {
            return Ok(());
        }

        let records: Vec<SegmentRecord> =
            pack.segments.values().map(|e| e.record.clone()).collect();
        let increments: Vec<BinlogsIncrement> = pack
            .increments
            .iter()
            .filter_map(|id| pack.segments.get(id))
            .map(|e| BinlogsIncrement {
                segment: e.record.clone(),
            })
            .collect();

        self.catalog
            .alter_segments(&records, &increments)
            .await
            .map_err(|e| {
                warn!(error = %e, "meta update: failed to persist segment transaction");
                e
            })?;
        pack.metric_mutation.commit();
        for (_, entry) in pack.segments {
            self.store.set(entry);
        }
        debug!("meta update: segment transaction complete");
        Ok(())
    }

    /// Final bookkeeping when a channel is dropped: buffered logs are
    /// merged into their records (or admitted as new records), every
    /// segment on the channel moves to Dropped, and the whole batch plus
    /// the channel-deletion marker persists atomically.
    pub async fn update_drop_channel_segment_info(
        &self,
        channel: &str,
        flushed: Vec<SegmentEntry>,
    ) -> MetaResult<()> {
        debug!(channel, "meta update: drop channel segment info");
        let _guard = self.write_lock.lock().await;

        let mut mutation = MetricMutation::new();
        let mut mod_segments: HashMap<SegmentId, SegmentEntry> = HashMap::new();

        for buffered in flushed {
            if let Some(merged) = self.merge_drop_segment(buffered, &mut mutation) {
                mod_segments.insert(merged.id(), merged);
            }
        }

        for entry in self.store.select(|e| e.record.insert_channel == channel) {
            if mod_segments.contains_key(&entry.id()) {
                continue;
            }
            let mut cloned = SegmentEntry::clone(&entry);
            apply_state_change(&mut cloned.record, SegmentState::Dropped, &mut mutation);
            mod_segments.insert(cloned.id(), cloned);
        }

        let records: Vec<SegmentRecord> =
            mod_segments.values().map(|e| e.record.clone()).collect();
        let result = async {
            self.catalog.save_dropped_segments_in_batch(&records).await?;
            self.catalog.mark_channel_deleted(channel).await
        }
        .await;
        if let Err(e) = result {
            warn!(channel, error = %e, "meta update: drop channel segment info failed");
            return Err(e);
        }

        for (_, entry) in mod_segments {
            self.store.set(entry);
        }
        mutation.commit();
        info!(channel, "meta update: drop channel segment info complete");
        Ok(())
    }

    /// Folds one buffered segment into its meta record. Unhealthy records
    /// are skipped (idempotent retries); unknown segments are admitted as
    /// new dropped records.
    fn merge_drop_segment(
        &self,
        buffered: SegmentEntry,
        mutation: &mut MetricMutation,
    ) -> Option<SegmentEntry> {
        let Some(existing) = self.store.get(buffered.id()) else {
            let mut created = buffered;
            created.record.num_of_rows = created.curr_rows;
            created.record.state = SegmentState::Dropped;
            mutation.add_new_seg(SegmentState::Dropped, created.record.level, 0);
            return Some(created);
        };
        if !existing.is_healthy() {
            warn!(segment_id = %existing.id(), state = existing.record.state.as_str(),
                "drop channel: skipping unhealthy segment");
            return None;
        }

        let mut cloned = SegmentEntry::clone(&existing);
        apply_state_change(&mut cloned.record, SegmentState::Dropped, mutation);

        let record = &mut cloned.record;
        record.binlogs = merge_field_binlogs(
            std::mem::take(&mut record.binlogs),
            buffered.record.binlogs,
        );
        record.statslogs = merge_field_binlogs(
            std::mem::take(&mut record.statslogs),
            buffered.record.statslogs,
        );
        record.deltalogs.extend(buffered.record.deltalogs);
        if buffered.record.start_position.is_some() {
            record.start_position = buffered.record.start_position;
        }
        if buffered.record.dml_position.is_some() {
            record.dml_position = buffered.record.dml_position;
        }
        cloned.curr_rows = buffered.curr_rows;
        cloned.record.num_of_rows = buffered.curr_rows;
        Some(cloned)
    }

    /// Clears the bulk-import flag, persisting when the segment is healthy.
    pub async fn unset_is_importing(&self, segment_id: SegmentId) -> MetaResult<()> {
        debug!(segment_id = %segment_id, "meta update: unsetting isImporting");
        let _guard = self.write_lock.lock().await;

        let Some(current) = self.store.get(segment_id) else {
            return Err(MetaError::not_found("segment", segment_id.to_string()));
        };
        let mut cloned = SegmentEntry::clone(&current);
        cloned.record.is_importing = false;
        if cloned.is_healthy() {
            self.catalog
                .alter_segments(std::slice::from_ref(&cloned.record), &[])
                .await?;
        }
        self.store.set_is_importing(segment_id, false);
        Ok(())
    }

    // ---- in-memory-only bookkeeping ------------------------------------

    /// Appends an allocation; never persisted.
    pub async fn add_allocation(
        &self,
        segment_id: SegmentId,
        allocation: Allocation,
    ) -> MetaResult<()> {
        let _guard = self.write_lock.lock().await;
        if self.store.get(segment_id).is_none() {
            return Err(MetaError::not_found("segment", segment_id.to_string()));
        }
        self.store.add_allocation(segment_id, allocation);
        Ok(())
    }

    /// Replaces all allocations; never persisted.
    pub async fn set_allocations(&self, segment_id: SegmentId, allocations: Vec<Allocation>) {
        let _guard = self.write_lock.lock().await;
        self.store.set_allocations(segment_id, allocations);
    }

    /// Sets the writer-reported running row count; never persisted.
    pub async fn set_current_rows(&self, segment_id: SegmentId, rows: i64) {
        let _guard = self.write_lock.lock().await;
        self.store.set_current_rows(segment_id, rows);
    }

    /// Stamps the last flush time; never persisted.
    pub async fn set_last_flush_time(&self, segment_id: SegmentId, at: DateTime<Utc>) {
        let _guard = self.write_lock.lock().await;
        self.store.set_flush_time(segment_id, at);
    }

    /// Sets the allocation-expiry fence; in-memory only (a global fence
    /// makes per-segment persistence unnecessary).
    ///
    /// # Errors
    ///
    /// Returns `MetaError::NotFound` for unknown segments.
    pub async fn set_last_expire(&self, segment_id: SegmentId, last_expire: u64) -> MetaResult<()> {
        let _guard = self.write_lock.lock().await;
        let Some(current) = self.store.get(segment_id) else {
            return Err(MetaError::not_found("segment", segment_id.to_string()));
        };
        let mut cloned = SegmentEntry::clone(&current);
        cloned.record.last_expire_time = last_expire;
        self.store.set(cloned);
        Ok(())
    }

    /// Marks or clears compaction participation; never persisted.
    pub async fn set_segment_compacting(&self, segment_id: SegmentId, compacting: bool) {
        let _guard = self.write_lock.lock().await;
        self.store.set_is_compacting(segment_id, compacting);
    }

    /// Marks or clears the bulk-import flag in memory only; the persisted
    /// clear lives in [`Self::unset_is_importing`].
    pub async fn set_segment_importing(&self, segment_id: SegmentId, importing: bool) {
        let _guard = self.write_lock.lock().await;
        self.store.set_is_importing(segment_id, importing);
    }

    // ---- read views -----------------------------------------------------

    /// The segment, regardless of health.
    #[must_use]
    pub fn get_segment(&self, segment_id: SegmentId) -> Option<Arc<SegmentEntry>> {
        self.store.get(segment_id)
    }

    /// The segment, only when healthy.
    #[must_use]
    pub fn get_healthy_segment(&self, segment_id: SegmentId) -> Option<Arc<SegmentEntry>> {
        self.store.get(segment_id).filter(|e| e.is_healthy())
    }

    /// Snapshot of every segment, including unhealthy ones.
    #[must_use]
    pub fn get_all_segments(&self) -> Vec<Arc<SegmentEntry>> {
        self.store.get_segments()
    }

    /// Segments matching `predicate`.
    #[must_use]
    pub fn select_segments<P>(&self, predicate: P) -> Vec<Arc<SegmentEntry>>
    where
        P: Fn(&SegmentEntry) -> bool,
    {
        self.store.select(predicate)
    }

    /// Healthy segments of one channel.
    #[must_use]
    pub fn get_segments_by_channel(&self, channel: &str) -> Vec<Arc<SegmentEntry>> {
        self.store
            .select(|e| e.is_healthy() && e.record.insert_channel == channel)
    }

    /// Healthy segments of one collection.
    #[must_use]
    pub fn get_segments_of_collection(&self, collection_id: CollectionId) -> Vec<Arc<SegmentEntry>> {
        self.store
            .select(|e| e.is_healthy() && e.record.collection_id == collection_id)
    }

    /// Ids of healthy segments of one collection.
    #[must_use]
    pub fn get_segment_ids_of_collection(&self, collection_id: CollectionId) -> Vec<SegmentId> {
        self.get_segments_of_collection(collection_id)
            .into_iter()
            .map(|e| e.id())
            .collect()
    }

    /// Ids of all segments of one collection, dropped included.
    #[must_use]
    pub fn get_segment_ids_of_collection_with_dropped(
        &self,
        collection_id: CollectionId,
    ) -> Vec<SegmentId> {
        self.store
            .select(|e| {
                e.record.state != SegmentState::None
                    && e.record.state != SegmentState::NotExist
                    && e.record.collection_id == collection_id
            })
            .into_iter()
            .map(|e| e.id())
            .collect()
    }

    /// Ids of healthy segments of one partition.
    #[must_use]
    pub fn get_segment_ids_of_partition(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
    ) -> Vec<SegmentId> {
        self.store
            .select(|e| {
                e.is_healthy()
                    && e.record.collection_id == collection_id
                    && e.record.partition_id == partition_id
            })
            .into_iter()
            .map(|e| e.id())
            .collect()
    }

    /// Live row count of one collection.
    #[must_use]
    pub fn get_num_rows_of_collection(&self, collection_id: CollectionId) -> i64 {
        self.get_segments_of_collection(collection_id)
            .iter()
            .map(|e| e.record.num_of_rows)
            .sum()
    }

    /// Live row count of one partition.
    #[must_use]
    pub fn get_num_rows_of_partition(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
    ) -> i64 {
        self.store
            .select(|e| {
                e.is_healthy()
                    && e.record.collection_id == collection_id
                    && e.record.partition_id == partition_id
            })
            .iter()
            .map(|e| e.record.num_of_rows)
            .sum()
    }

    /// Total binlog bytes and the per-collection breakdown; refreshes the
    /// per-segment stored-size gauge as a side effect.
    #[must_use]
    pub fn get_collection_binlog_size(&self) -> (i64, HashMap<CollectionId, i64>) {
        let mut per_collection: HashMap<CollectionId, i64> = HashMap::new();
        let mut total = 0;
        for entry in self.store.get_segments() {
            if !entry.is_healthy() {
                continue;
            }
            let size = entry.record.total_log_size();
            total += size;
            *per_collection.entry(entry.record.collection_id).or_default() += size;
            STORED_BINLOG_SIZE
                .with_label_values(&[
                    &entry.record.collection_id.to_string(),
                    &entry.record.id.to_string(),
                ])
                .set(size);
        }
        (total, per_collection)
    }

    /// Segments whose state is neither Flushing nor Flushed.
    #[must_use]
    pub fn get_unflushed_segments(&self) -> Vec<Arc<SegmentEntry>> {
        self.store.select(|e| {
            e.record.state == SegmentState::Growing || e.record.state == SegmentState::Sealed
        })
    }

    /// Segments currently flushing.
    #[must_use]
    pub fn get_flushing_segments(&self) -> Vec<Arc<SegmentEntry>> {
        self.store.select(|e| e.record.state == SegmentState::Flushing)
    }

    /// Errors when any listed segment is absent from the map.
    pub fn has_segments(&self, segment_ids: &[SegmentId]) -> MetaResult<bool> {
        for id in segment_ids {
            if self.store.get(*id).is_none() {
                return Err(MetaError::not_found("segment", id.to_string()));
            }
        }
        Ok(true)
    }

    /// Groups matching segments by (partition, channel).
    #[must_use]
    pub fn get_segments_chan_part<P>(&self, predicate: P) -> Vec<ChanPartSegments>
    where
        P: Fn(&SegmentEntry) -> bool,
    {
        let mut groups: HashMap<(PartitionId, String), ChanPartSegments> = HashMap::new();
        for entry in self.store.select(predicate) {
            let key = (
                entry.record.partition_id,
                entry.record.insert_channel.clone(),
            );
            groups
                .entry(key)
                .or_insert_with(|| ChanPartSegments {
                    collection_id: entry.record.collection_id,
                    partition_id: entry.record.partition_id,
                    channel: entry.record.insert_channel.clone(),
                    segments: Vec::new(),
                })
                .segments
                .push(entry);
        }
        groups.into_values().collect()
    }

    /// The segment whose `compaction_from` contains `segment_id`, if any.
    #[must_use]
    pub fn get_compaction_to(&self, segment_id: SegmentId) -> Option<Arc<SegmentEntry>> {
        self.store
            .get_segments()
            .into_iter()
            .find(|e| e.record.compaction_from.contains(&segment_id))
    }

    /// Healthy, Flushed, non-importing, non-compacting segments grouped by
    /// collection: the raw compaction candidate pool.
    #[must_use]
    pub fn get_compactable_segments_group_by_collection(
        &self,
    ) -> HashMap<CollectionId, Vec<Arc<SegmentEntry>>> {
        let candidates = self.store.select(|e| {
            e.is_healthy()
                && e.record.state == SegmentState::Flushed
                && !e.is_compacting
                && !e.record.is_importing
        });
        let mut grouped: HashMap<CollectionId, Vec<Arc<SegmentEntry>>> = HashMap::new();
        for entry in candidates {
            grouped
                .entry(entry.record.collection_id)
                .or_default()
                .push(entry);
        }
        grouped
    }

    /// The earliest start position among growing segments of one group.
    #[must_use]
    pub fn get_earliest_start_position_of_growing_segments(
        &self,
        label: &GroupLabel,
    ) -> Option<StreamPosition> {
        self.store
            .select(|e| {
                e.record.state == SegmentState::Growing
                    && e.record.collection_id == label.collection_id
                    && e.record.partition_id == label.partition_id
                    && e.record.insert_channel == label.channel
            })
            .iter()
            .filter_map(|e| e.record.start_position.clone())
            .min_by_key(|p| p.timestamp)
    }

    // ---- index registry -------------------------------------------------

    /// Registers (or replaces) an index definition.
    pub fn add_index(&self, index: IndexMeta) {
        self.index_registry
            .write()
            .indexes
            .entry(index.collection_id)
            .or_default()
            .insert(index.index_id, index);
    }

    /// Records the build state of one index on one segment.
    pub fn update_segment_index(&self, segment_index: SegmentIndexMeta) {
        self.index_registry
            .write()
            .segment_indexes
            .entry(segment_index.segment_id)
            .or_default()
            .insert(segment_index.index_id, segment_index);
    }

    /// Index definitions of one collection.
    #[must_use]
    pub fn indexes_of_collection(&self, collection_id: CollectionId) -> Vec<IndexMeta> {
        self.index_registry
            .read()
            .indexes
            .get(&collection_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Index build records of one segment.
    #[must_use]
    pub fn segment_indexes(&self, segment_id: SegmentId) -> Vec<SegmentIndexMeta> {
        self.index_registry
            .read()
            .segment_indexes
            .get(&segment_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Build state of the index covering `field_id` on one segment;
    /// `Unissued` when no index is defined or no build exists.
    #[must_use]
    pub fn get_segment_index_state_on_field(
        &self,
        collection_id: CollectionId,
        segment_id: SegmentId,
        field_id: FieldId,
    ) -> IndexState {
        let registry = self.index_registry.read();
        let Some(indexes) = registry.indexes.get(&collection_id) else {
            return IndexState::Unissued;
        };
        for index in indexes.values() {
            if index.is_deleted || index.field_id != field_id {
                continue;
            }
            return registry
                .segment_indexes
                .get(&segment_id)
                .and_then(|m| m.get(&index.index_id))
                .map_or(IndexState::Unissued, |s| s.state);
        }
        IndexState::Unissued
    }

    /// Keeps only segments whose every vector field has a finished index,
    /// looking up each collection's schema with a short deadline. Segments
    /// that are neither flush-state nor dropped are filtered out.
    pub async fn filter_in_indexed_segments(
        &self,
        handler: &dyn CollectionHandler,
        segments: Vec<Arc<SegmentEntry>>,
    ) -> Vec<Arc<SegmentEntry>> {
        if segments.is_empty() {
            return Vec::new();
        }

        let mut vector_fields: HashMap<CollectionId, Vec<FieldId>> = HashMap::new();
        let collection_ids: HashSet<CollectionId> =
            segments.iter().map(|e| e.record.collection_id).collect();
        for collection_id in collection_ids {
            let lookup =
                tokio::time::timeout(SCHEMA_LOOKUP_TIMEOUT, handler.get_collection(collection_id))
                    .await;
            match lookup {
                Ok(Ok(info)) => {
                    vector_fields.insert(collection_id, info.schema.vector_field_ids());
                }
                Ok(Err(e)) => {
                    warn!(collection_id = %collection_id, error = %e,
                        "failed to get collection schema");
                }
                Err(_) => {
                    warn!(collection_id = %collection_id, "collection schema lookup timed out");
                }
            }
        }

        segments
            .into_iter()
            .filter(|entry| {
                let state = entry.record.state;
                if !state.is_flush_state() && state != SegmentState::Dropped {
                    return false;
                }
                vector_fields
                    .get(&entry.record.collection_id)
                    .map_or(true, |fields| {
                        fields.iter().all(|field| {
                            self.get_segment_index_state_on_field(
                                entry.record.collection_id,
                                entry.id(),
                                *field,
                            ) == IndexState::Finished
                        })
                    })
            })
            .collect()
    }

    // ---- compaction completion -----------------------------------------

    /// Applies the result of a finished plan: sources drop, late deltas are
    /// copied to the target's address, the target installs, all under one
    /// catalog write. Returns the installed target.
    pub async fn complete_compaction_mutation(
        &self,
        plan: &CompactionPlan,
        result: &CompactionPlanResult,
    ) -> MetaResult<SegmentEntry> {
        let _guard = self.write_lock.lock().await;
        debug!(plan_id = %plan.plan_id, "meta update: complete compaction mutation");

        let mut mutation = MetricMutation::new();
        let mut sources: Vec<SegmentEntry> = Vec::with_capacity(plan.segment_binlogs.len());
        let mut source_ids: Vec<SegmentId> = Vec::with_capacity(plan.segment_binlogs.len());
        for segment_binlogs in &plan.segment_binlogs {
            let Some(current) = self.store.get(segment_binlogs.segment_id) else {
                return Err(MetaError::not_found(
                    "segment",
                    segment_binlogs.segment_id.to_string(),
                ));
            };
            let mut cloned = SegmentEntry::clone(&current);
            cloned.record.dropped_at = crate::operators::now_unix_nanos();
            cloned.record.compacted = true;
            apply_state_change(&mut cloned.record, SegmentState::Dropped, &mut mutation);
            source_ids.push(cloned.id());
            sources.push(cloned);
        }

        let mut plan_log_ids: HashSet<LogId> = HashSet::new();
        for segment_binlogs in &plan.segment_binlogs {
            for field_log in &segment_binlogs.deltalogs {
                for log in &field_log.logs {
                    plan_log_ids.insert(log.log_id);
                }
            }
        }

        // merge compaction produces exactly one target
        let compact_to = result
            .segments
            .first()
            .ok_or_else(|| MetaError::Parameter("compaction result has no segment".into()))?;

        let carried = self
            .copy_new_deltalogs(&sources, &plan_log_ids, compact_to.segment_id)
            .await?;
        let mut target_deltalogs = compact_to.deltalogs.clone();
        if !carried.is_empty() {
            target_deltalogs.push(FieldBinlog::new(FieldId::new(0), carried));
        }

        let first = &sources[0].record;
        let mut target_record = SegmentRecord {
            id: compact_to.segment_id,
            collection_id: first.collection_id,
            partition_id: first.partition_id,
            insert_channel: plan.channel.clone(),
            num_of_rows: compact_to.num_of_rows,
            state: SegmentState::Flushed,
            level: SegmentLevel::L1,
            max_row_num: first.max_row_num,
            binlogs: compact_to.insert_logs.clone(),
            statslogs: compact_to.statslogs.clone(),
            deltalogs: target_deltalogs,
            created_by_compaction: true,
            compaction_from: source_ids.clone(),
            last_expire_time: plan.start_time,
            start_position: min_position(
                sources.iter().map(|s| s.record.start_position.as_ref()),
            ),
            dml_position: min_position(sources.iter().map(|s| s.record.dml_position.as_ref())),
            ..SegmentRecord::default()
        };

        // zero-row targets are stillborn: installed as Dropped, not counted
        if target_record.num_of_rows > 0 {
            mutation.add_new_seg(
                target_record.state,
                target_record.level,
                target_record.num_of_rows,
            );
        } else {
            target_record.state = SegmentState::Dropped;
        }

        info!(
            plan_id = %plan.plan_id,
            channel = %plan.channel,
            target_segment = %target_record.id,
            target_rows = target_record.num_of_rows,
            sources = ?source_ids,
            "meta update: altering meta store for compaction"
        );

        let mut records: Vec<SegmentRecord> =
            sources.iter().map(|s| s.record.clone()).collect();
        records.push(target_record.clone());
        self.catalog
            .alter_segments(
                &records,
                &[BinlogsIncrement {
                    segment: target_record.clone(),
                }],
            )
            .await
            .map_err(|e| {
                warn!(plan_id = %plan.plan_id, error = %e,
                    "failed to alter source and target segments");
                e
            })?;

        for segment in &result.segments {
            COMPACTED_SEGMENT_SIZE
                .with_label_values(&[])
                .observe(compacted_segment_size(segment) as f64);
        }

        let target = SegmentEntry::new(target_record);
        for source in sources {
            self.store.set(source);
        }
        self.store.set(target.clone());
        mutation.commit();

        info!(plan_id = %plan.plan_id, "meta update: compaction mutation complete");
        Ok(target)
    }

    /// Copies every delta log that is absent from the plan's captured set
    /// from its source address to the target's address. Returns the carried
    /// log descriptors, re-addressed.
    async fn copy_new_deltalogs(
        &self,
        sources: &[SegmentEntry],
        plan_log_ids: &HashSet<LogId>,
        target: SegmentId,
    ) -> MetaResult<Vec<Binlog>> {
        let root = self.blob_store.root_path().to_string();
        let mut carried = Vec::new();
        for source in sources {
            let record = &source.record;
            for field_log in &record.deltalogs {
                for log in &field_log.logs {
                    if plan_log_ids.contains(&log.log_id) {
                        continue;
                    }
                    let from = delta_log_path(
                        &root,
                        record.collection_id,
                        record.partition_id,
                        record.id,
                        field_log.field_id,
                        log.log_id,
                    );
                    let to = delta_log_path(
                        &root,
                        record.collection_id,
                        record.partition_id,
                        target,
                        field_log.field_id,
                        log.log_id,
                    );
                    warn!(
                        log_id = %log.log_id,
                        from_segment = %record.id,
                        to_segment = %target,
                        from_key = %from,
                        to_key = %to,
                        "found late deltalog in compaction source, copying"
                    );
                    let blob = self.blob_store.read(&from).await?;
                    self.blob_store.write(&to, blob).await?;

                    let mut moved = log.clone();
                    moved.log_path = to;
                    carried.push(moved);
                }
            }
        }
        Ok(carried)
    }

    // ---- channel checkpoints -------------------------------------------

    /// Advances the checkpoint of `channel`; stale positions are silent
    /// no-ops.
    pub async fn update_channel_checkpoint(
        &self,
        channel: &str,
        pos: StreamPosition,
    ) -> MetaResult<()> {
        self.checkpoints.update(channel, pos).await
    }

    /// The current checkpoint of `channel`, if any.
    #[must_use]
    pub fn get_channel_checkpoint(&self, channel: &str) -> Option<StreamPosition> {
        self.checkpoints.get(channel)
    }

    /// Removes the checkpoint of `channel`.
    pub async fn drop_channel_checkpoint(&self, channel: &str) -> MetaResult<()> {
        self.checkpoints.drop(channel).await
    }

    // ---- garbage collection --------------------------------------------

    /// Whether the catalog confirms blob GC may proceed for a partition.
    pub async fn gc_confirm(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
    ) -> MetaResult<bool> {
        self.catalog.gc_confirm(collection_id, partition_id).await
    }
}

fn min_position<'a, I>(positions: I) -> Option<StreamPosition>
where
    I: Iterator<Item = Option<&'a StreamPosition>>,
{
    positions.flatten().min_by_key(|p| p.timestamp).cloned()
}
