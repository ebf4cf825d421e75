//! Compaction trigger.
//!
//! Periodic and on-demand candidate selection: signals arrive on a channel,
//! a ticker raises a global signal every round, and each signal turns into
//! zero or more MixCompaction plans submitted to the external handler.
//! Every gate failure degrades to skipping work, never to an error that
//! stops the loop.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use strata_core::segment::binlog_count;
use strata_core::{
    tso, verify_response, Allocator, CollectionHandler, CollectionId, CollectionInfo,
    CompactionHandler, CompactionPlan, CompactionSignal, CompactionType, MetaResult,
    PartitionId, PlanId, PlanSegmentBinlogs, SegmentId, SegmentState, StrataConfig,
};
use strata_meta::{MetaEngine, SegmentEntry};

use crate::estimate::{collection_uses_disk_index, segment_max_rows};
use crate::policy::MergePolicy;

/// Deadline for one schema lookup inside a trigger round.
const COLLECTION_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);
const SIGNAL_BUFFER: usize = 100;

/// Expiry horizon of one trigger round.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactTime {
    /// Rows whose binlogs end before this cluster timestamp are expired.
    pub expire_time: u64,
    /// The collection TTL the horizon was derived from.
    pub ttl_secs: u64,
}

/// Periodic and on-demand compaction policy.
pub struct CompactionTrigger {
    meta: Arc<MetaEngine>,
    compaction_handler: Arc<dyn CompactionHandler>,
    allocator: Arc<dyn Allocator>,
    collection_handler: Arc<dyn CollectionHandler>,
    config: StrataConfig,
    current_index_engine_version: AtomicI32,
    signal_tx: mpsc::Sender<CompactionSignal>,
    signal_rx: parking_lot::Mutex<Option<mpsc::Receiver<CompactionSignal>>>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl CompactionTrigger {
    #[must_use]
    pub fn new(
        meta: Arc<MetaEngine>,
        compaction_handler: Arc<dyn CompactionHandler>,
        allocator: Arc<dyn Allocator>,
        collection_handler: Arc<dyn CollectionHandler>,
        config: StrataConfig,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_BUFFER);
        Self {
            meta,
            compaction_handler,
            allocator,
            collection_handler,
            config,
            current_index_engine_version: AtomicI32::new(0),
            signal_tx,
            signal_rx: parking_lot::Mutex::new(Some(signal_rx)),
            worker: parking_lot::Mutex::new(None),
        }
    }

    /// Advances the index-engine version used by the auto-upgrade trigger.
    pub fn set_index_engine_version(&self, version: i32) {
        self.current_index_engine_version
            .store(version, Ordering::Relaxed);
    }

    /// Starts the background loop: drains signals and raises one global
    /// signal per configured interval.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!("compaction trigger already running");
            return;
        }
        let Some(mut rx) = self.signal_rx.lock().take() else {
            warn!("compaction trigger signal channel already consumed");
            return;
        };

        let this = Arc::clone(self);
        let interval = Duration::from_secs(this.config.compaction.global_interval_secs.max(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the immediate first tick would race startup reloads
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = this.trigger_compaction().await {
                            warn!(error = %e, "periodic compaction trigger failed");
                        }
                    }
                    signal = rx.recv() => {
                        let Some(signal) = signal else { break };
                        let result = if signal.is_global {
                            this.handle_global_signal(&signal).await
                        } else {
                            this.handle_signal(&signal).await
                        };
                        if let Err(e) = result {
                            warn!(signal_id = signal.id, error = %e, "compaction signal failed");
                        }
                    }
                }
            }
        });
        *worker = Some(handle);
        info!(interval_secs = interval.as_secs(), "compaction trigger started");
    }

    /// Stops the background loop.
    pub fn stop(&self) {
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
            info!("compaction trigger stopped");
        }
    }

    /// Raises a global, non-forced signal.
    pub async fn trigger_compaction(&self) -> MetaResult<()> {
        let id = self.allocator.alloc_id().await?;
        self.send(CompactionSignal {
            id,
            is_global: true,
            ..CompactionSignal::default()
        })
        .await
    }

    /// Raises a forced signal for one collection, bypassing auto-compaction
    /// gating. Returns the signal id for task tracking.
    pub async fn force_trigger_compaction(&self, collection_id: CollectionId) -> MetaResult<i64> {
        let id = self.allocator.alloc_id().await?;
        self.send(CompactionSignal {
            id,
            is_force: true,
            is_global: true,
            collection_id: Some(collection_id),
            ..CompactionSignal::default()
        })
        .await?;
        Ok(id)
    }

    /// Raises a signal scoped to one segment.
    pub async fn trigger_single_compaction(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
        segment_id: SegmentId,
        channel: String,
    ) -> MetaResult<()> {
        let id = self.allocator.alloc_id().await?;
        self.send(CompactionSignal {
            id,
            collection_id: Some(collection_id),
            partition_id: Some(partition_id),
            segment_id: Some(segment_id),
            channel: Some(channel),
            ..CompactionSignal::default()
        })
        .await
    }

    async fn send(&self, signal: CompactionSignal) -> MetaResult<()> {
        self.signal_tx
            .send(signal)
            .await
            .map_err(|_| strata_core::MetaError::invalid_state("compaction trigger is stopped"))
    }

    /// Handles a global signal: every (partition, channel) group of every
    /// (matching) collection is considered.
    pub async fn handle_global_signal(&self, signal: &CompactionSignal) -> MetaResult<()> {
        if self.compaction_handler.is_full() {
            warn!(signal_id = signal.id, "compaction pool is full, skipping trigger round");
            return Ok(());
        }
        let Some(ts) = self.allocate_ts(signal).await else {
            return Ok(());
        };

        let groups = self.meta.get_segments_chan_part(|e| {
            is_candidate(e)
                && signal
                    .collection_id
                    .map_or(true, |c| c == e.record.collection_id)
                && signal
                    .partition_id
                    .map_or(true, |p| p == e.record.partition_id)
                && signal
                    .channel
                    .as_ref()
                    .map_or(true, |ch| *ch == e.record.insert_channel)
        });

        for group in groups {
            if self.compaction_handler.is_full() {
                warn!(signal_id = signal.id, "compaction pool filled up mid-round");
                break;
            }
            let Some(collection) = self.get_collection(group.collection_id).await else {
                continue;
            };
            if !self.compaction_allowed(&collection, signal.is_force) {
                continue;
            }
            self.plan_group(signal, &collection, group.segments, ts).await;
        }
        Ok(())
    }

    /// Handles a signal scoped to one segment's (partition, channel) group.
    pub async fn handle_signal(&self, signal: &CompactionSignal) -> MetaResult<()> {
        if self.compaction_handler.is_full() {
            warn!(signal_id = signal.id, "compaction pool is full, skipping signal");
            return Ok(());
        }
        let Some(segment_id) = signal.segment_id else {
            warn!(signal_id = signal.id, "segment signal without segment id, ignored");
            return Ok(());
        };
        let Some(segment) = self.meta.get_healthy_segment(segment_id) else {
            warn!(signal_id = signal.id, segment_id = %segment_id,
                "segment not found in meta, compaction signal ignored");
            return Ok(());
        };
        let Some(ts) = self.allocate_ts(signal).await else {
            return Ok(());
        };

        let collection_id = segment.record.collection_id;
        let partition_id = segment.record.partition_id;
        let channel = segment.record.insert_channel.clone();

        let Some(collection) = self.get_collection(collection_id).await else {
            return Ok(());
        };
        if !self.compaction_allowed(&collection, signal.is_force) {
            return Ok(());
        }

        let candidates = self.meta.select_segments(|e| {
            is_candidate(e)
                && e.record.collection_id == collection_id
                && e.record.partition_id == partition_id
                && e.record.insert_channel == channel
        });
        self.plan_group(signal, &collection, candidates, ts).await;
        Ok(())
    }

    async fn plan_group(
        &self,
        signal: &CompactionSignal,
        collection: &CollectionInfo,
        segments: Vec<Arc<SegmentEntry>>,
        ts: u64,
    ) {
        let indexes = self.meta.indexes_of_collection(collection.id);
        let is_disk_index = collection_uses_disk_index(&collection.schema, &indexes);
        let max_rows = match segment_max_rows(&collection.schema, &indexes, &self.config.segment) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(collection_id = %collection.id, error = %e,
                    "failed to estimate segment row capacity, skipping collection");
                return;
            }
        };
        let compact_time = match self.get_compact_time(ts, collection) {
            Ok(ct) => ct,
            Err(e) => {
                warn!(collection_id = %collection.id, error = %e,
                    "failed to derive compaction horizon, skipping collection");
                return;
            }
        };

        let indexed = self
            .meta
            .filter_in_indexed_segments(self.collection_handler.as_ref(), segments)
            .await;

        let policy = MergePolicy {
            max_rows,
            expansion_rate: self.config.segment.expansion_rate,
            min_segments_to_merge: self.config.compaction.min_segment_to_merge,
            max_segments_to_merge: self.config.compaction.max_segment_to_merge,
            small_proportion: self.config.compaction.segment_small_proportion,
            compactable_proportion: self.config.compaction.segment_compactable_proportion,
        };

        let mut prioritized = Vec::new();
        let mut small = Vec::new();
        for segment in indexed {
            if signal.is_force
                || self.should_do_single_compaction(&segment, is_disk_index, &compact_time)
            {
                prioritized.push(segment);
            } else if policy.is_small_segment(segment.record.num_of_rows) {
                small.push(segment);
            }
        }

        let bins = policy.pack(prioritized, small);
        self.submit_plans(signal, bins, ts, &compact_time).await;
    }

    async fn submit_plans(
        &self,
        signal: &CompactionSignal,
        bins: Vec<Vec<Arc<SegmentEntry>>>,
        ts: u64,
        compact_time: &CompactTime,
    ) {
        for bin in bins {
            let Some(first) = bin.first() else { continue };
            let plan_id = match self.allocator.alloc_id().await {
                Ok(id) => PlanId::new(id),
                Err(e) => {
                    warn!(signal_id = signal.id, error = %e,
                        "failed to allocate plan id, dropping bin");
                    continue;
                }
            };

            let plan = CompactionPlan {
                plan_id,
                segment_binlogs: bin.iter().map(|s| plan_binlogs(s)).collect(),
                compaction_type: CompactionType::MixCompaction,
                channel: first.record.insert_channel.clone(),
                start_time: ts,
                timeout_secs: self.config.compaction.plan_timeout_secs,
                collection_ttl_secs: compact_time.ttl_secs,
            };

            for segment in &bin {
                self.meta.set_segment_compacting(segment.id(), true).await;
            }
            let submitted = self
                .compaction_handler
                .exec_compaction_plan(signal, plan.clone())
                .await
                .and_then(verify_response);
            match submitted {
                Ok(_) => {
                    info!(
                        signal_id = signal.id,
                        plan_id = %plan.plan_id,
                        channel = %plan.channel,
                        segments = plan.segment_binlogs.len(),
                        "compaction plan submitted"
                    );
                }
                Err(e) => {
                    warn!(signal_id = signal.id, plan_id = %plan.plan_id, error = %e,
                        "failed to submit compaction plan");
                    for segment in &bin {
                        self.meta.set_segment_compacting(segment.id(), false).await;
                    }
                }
            }
        }
    }

    /// One timestamp per trigger round; allocation failure quietly aborts
    /// the signal.
    async fn allocate_ts(&self, signal: &CompactionSignal) -> Option<u64> {
        match self.allocator.alloc_timestamp().await {
            Ok(ts) => Some(ts),
            Err(e) => {
                warn!(signal_id = signal.id, error = %e,
                    "failed to allocate timestamp, compaction signal aborted");
                None
            }
        }
    }

    async fn get_collection(&self, collection_id: CollectionId) -> Option<CollectionInfo> {
        let lookup = tokio::time::timeout(
            COLLECTION_LOOKUP_TIMEOUT,
            self.collection_handler.get_collection(collection_id),
        )
        .await;
        match lookup {
            Ok(Ok(info)) => Some(info),
            Ok(Err(e)) => {
                warn!(collection_id = %collection_id, error = %e,
                    "failed to get collection info, skipping");
                None
            }
            Err(_) => {
                warn!(collection_id = %collection_id, "collection lookup timed out, skipping");
                None
            }
        }
    }

    fn compaction_allowed(&self, collection: &CollectionInfo, is_force: bool) -> bool {
        if is_force {
            return true;
        }
        match collection.auto_compaction_enabled(self.config.compaction.enable_auto_compaction) {
            Ok(true) => true,
            Ok(false) => {
                debug!(collection_id = %collection.id, "auto compaction disabled, skipping");
                false
            }
            Err(e) => {
                warn!(collection_id = %collection.id, error = %e,
                    "malformed auto-compaction property, skipping");
                false
            }
        }
    }

    /// The expiry horizon of this round for one collection.
    pub fn get_compact_time(
        &self,
        ts: u64,
        collection: &CollectionInfo,
    ) -> MetaResult<CompactTime> {
        let ttl_secs =
            collection.ttl_seconds(self.config.compaction.entity_expiration_ttl_secs)?;
        if ttl_secs > 0 {
            return Ok(CompactTime {
                expire_time: tso::sub_seconds(ts, ttl_secs),
                ttl_secs,
            });
        }
        Ok(CompactTime::default())
    }

    /// Whether a single segment is individually overdue for compaction.
    #[must_use]
    pub fn should_do_single_compaction(
        &self,
        segment: &SegmentEntry,
        is_disk_index: bool,
        compact_time: &CompactTime,
    ) -> bool {
        let record = &segment.record;
        let cfg = &self.config.compaction;

        // too many delete log files
        if binlog_count(&record.deltalogs) > cfg.single_deltalog_max_num {
            info!(segment_id = %record.id, "segment has too many delta log files");
            return true;
        }

        // too many stats log files; segments already produced by compaction
        // would only churn
        if record.compaction_from.is_empty() {
            let max_size_mb = if is_disk_index {
                self.config.segment.disk_max_size_mb
            } else {
                self.config.segment.max_size_mb
            };
            let max_files = (max_size_mb * 1024 * 1024 / self.config.segment.binlog_max_size)
                as usize;
            if binlog_count(&record.statslogs) > max_files * 2 {
                info!(segment_id = %record.id, "segment has too many stats log files");
                return true;
            }
        }

        // enough expired rows or bytes behind the TTL horizon
        let mut expired_rows = 0i64;
        let mut expired_size = 0i64;
        for field_log in &record.binlogs {
            for log in &field_log.logs {
                if log.timestamp_to < compact_time.expire_time {
                    expired_rows += log.entries_num;
                    expired_size += log.log_size;
                }
            }
        }
        if record.num_of_rows > 0
            && expired_rows as f64 / record.num_of_rows as f64 >= cfg.single_ratio_threshold
        {
            info!(segment_id = %record.id, expired_rows, "segment has too many expired rows");
            return true;
        }
        if expired_size > cfg.single_expired_log_max_size as i64 {
            info!(segment_id = %record.id, expired_size, "segment has too many expired bytes");
            return true;
        }

        // enough tombstoned rows or bytes
        let mut deleted_rows = 0i64;
        let mut delete_size = 0i64;
        for field_log in &record.deltalogs {
            for log in &field_log.logs {
                deleted_rows += log.entries_num;
                delete_size += log.log_size;
            }
        }
        if record.num_of_rows > 0
            && deleted_rows as f64 / record.num_of_rows as f64 >= cfg.single_ratio_threshold
        {
            info!(segment_id = %record.id, deleted_rows, "segment has too many deleted rows");
            return true;
        }
        if delete_size > cfg.single_deltalog_max_size as i64 {
            info!(segment_id = %record.id, delete_size, "segment has too many delete bytes");
            return true;
        }

        // index built by an older engine version
        if cfg.auto_upgrade_segment_index {
            let current = self.current_index_engine_version.load(Ordering::Relaxed);
            for seg_index in self.meta.segment_indexes(record.id) {
                if current > seg_index.current_index_version
                    && !seg_index.index_file_keys.is_empty()
                {
                    info!(segment_id = %record.id,
                        index_version = seg_index.current_index_version,
                        engine_version = current,
                        "segment index engine version is outdated");
                    return true;
                }
            }
        }

        false
    }
}

fn is_candidate(e: &SegmentEntry) -> bool {
    e.is_healthy()
        && e.record.state == SegmentState::Flushed
        && !e.is_compacting
        && !e.record.is_importing
}

fn plan_binlogs(segment: &SegmentEntry) -> PlanSegmentBinlogs {
    PlanSegmentBinlogs {
        segment_id: segment.id(),
        field_binlogs: segment.record.binlogs.clone(),
        statslogs: segment.record.statslogs.clone(),
        deltalogs: segment.record.deltalogs.clone(),
        level: segment.record.level,
    }
}
