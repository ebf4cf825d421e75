//! Engine-level coverage: flush pipeline, compaction completion with late
//! deltas, checkpoint monotonicity, and catalog-failure rollback.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use strata_catalog::{CatalogOp, MemoryCatalog};
use strata_core::{
    Binlog, Catalog, CollectionHandler, CollectionId, CollectionInfo, CollectionSchema,
    CompactionPlan, CompactionPlanResult, CompactionSegment, CompactionState, CompactionType,
    DataType, FieldBinlog, FieldId, FieldSchema, IndexMeta, IndexState, LogId, MetaError,
    MetaResult, PartitionId, PlanId, PlanSegmentBinlogs, SegmentCheckpoint, SegmentId,
    SegmentIndexMeta, SegmentLevel, SegmentRecord, SegmentStartPosition, SegmentState,
    StreamPosition,
};
use strata_meta::{
    create_l0, update_binlogs, update_checkpoint, update_start_position, update_status,
    MetaEngine, SegmentEntry,
};
use strata_storage::{delta_log_path, BlobStore, MemoryBlobStore};

async fn engine() -> (MetaEngine, Arc<MemoryCatalog>, Arc<MemoryBlobStore>) {
    let catalog = Arc::new(MemoryCatalog::new());
    let blobs = Arc::new(MemoryBlobStore::new("files"));
    let engine = MetaEngine::new(catalog.clone(), blobs.clone()).await.unwrap();
    (engine, catalog, blobs)
}

fn segment(id: i64, state: SegmentState) -> SegmentEntry {
    let mut record = SegmentRecord::growing(
        SegmentId::new(id),
        CollectionId::new(100),
        PartitionId::new(10),
        "by-dev-ch-0",
        false,
    );
    record.state = state;
    SegmentEntry::new(record)
}

fn delta_field(log_ids: &[i64]) -> FieldBinlog {
    FieldBinlog::new(
        FieldId::new(0),
        log_ids
            .iter()
            .map(|id| Binlog {
                entries_num: 1,
                log_size: 16,
                log_id: LogId::new(*id),
                ..Binlog::default()
            })
            .collect(),
    )
}

#[tokio::test]
async fn test_flush_pipeline() {
    let (engine, catalog, _) = engine().await;

    let mut seg = segment(1, SegmentState::Growing);
    seg.record.binlogs = vec![FieldBinlog::new(
        FieldId::new(1),
        vec![Binlog {
            entries_num: 5,
            log_id: LogId::new(0),
            ..Binlog::default()
        }],
    )];
    engine.add_segment(seg).await.unwrap();
    engine.set_current_rows(SegmentId::new(1), 10).await;

    engine
        .update_segments_info(vec![
            update_status(SegmentId::new(1), SegmentState::Flushing),
            update_binlogs(
                SegmentId::new(1),
                vec![FieldBinlog::new(
                    FieldId::new(1),
                    vec![Binlog {
                        entries_num: 5,
                        log_id: LogId::new(1),
                        ..Binlog::default()
                    }],
                )],
                vec![],
                vec![delta_field(&[2])],
            ),
            update_start_position(vec![SegmentStartPosition {
                segment_id: SegmentId::new(1),
                position: StreamPosition::new("by-dev-ch-0", vec![1, 2, 3], 7),
            }]),
            update_checkpoint(
                SegmentId::new(1),
                false,
                vec![SegmentCheckpoint {
                    segment_id: SegmentId::new(1),
                    num_of_rows: 10,
                    position: StreamPosition::new("by-dev-ch-0", vec![4], 9),
                }],
            ),
        ])
        .await
        .unwrap();

    let seg = engine.get_segment(SegmentId::new(1)).unwrap();
    assert_eq!(seg.record.state, SegmentState::Flushing);
    assert_eq!(seg.record.num_of_rows, 10);
    assert_eq!(seg.record.binlogs.len(), 1);
    assert_eq!(
        seg.record.binlogs[0]
            .logs
            .iter()
            .map(|l| l.log_id.as_i64())
            .collect::<Vec<_>>(),
        vec![0, 1]
    );
    assert_eq!(
        seg.record.start_position.as_ref().unwrap().msg_id,
        vec![1, 2, 3]
    );
    assert_eq!(seg.record.deltalogs.len(), 1);
    assert_eq!(seg.record.dml_position.as_ref().unwrap().timestamp, 9);

    // the persisted record matches the installed one
    let persisted = catalog.persisted_segment(SegmentId::new(1)).unwrap();
    assert_eq!(persisted, seg.record);
}

#[tokio::test]
async fn test_operator_abort_discards_whole_transaction() {
    let (engine, catalog, _) = engine().await;
    engine.add_segment(segment(1, SegmentState::Growing)).await.unwrap();

    // second operator targets a missing segment: nothing may change
    engine
        .update_segments_info(vec![
            update_status(SegmentId::new(1), SegmentState::Flushing),
            update_status(SegmentId::new(404), SegmentState::Flushing),
        ])
        .await
        .unwrap();

    assert_eq!(
        engine.get_segment(SegmentId::new(1)).unwrap().record.state,
        SegmentState::Growing
    );
    assert_eq!(
        catalog.persisted_segment(SegmentId::new(1)).unwrap().state,
        SegmentState::Growing
    );
}

#[tokio::test]
async fn test_catalog_failure_rolls_back_memory() {
    let (engine, catalog, _) = engine().await;
    engine.add_segment(segment(1, SegmentState::Growing)).await.unwrap();

    catalog.fail_next(CatalogOp::AlterSegments);
    let err = engine
        .update_segments_info(vec![update_status(SegmentId::new(1), SegmentState::Flushed)])
        .await
        .unwrap_err();
    assert!(matches!(err, MetaError::Catalog(_)));

    let seg = engine.get_segment(SegmentId::new(1)).unwrap();
    assert_eq!(seg.record.state, SegmentState::Growing);
    assert_eq!(
        catalog.persisted_segment(SegmentId::new(1)).unwrap().state,
        SegmentState::Growing
    );
}

#[tokio::test]
async fn test_create_l0_operator_inserts_flushed_zero_rows() {
    let (engine, catalog, _) = engine().await;

    engine
        .update_segments_info(vec![create_l0(
            CollectionId::new(100),
            PartitionId::new(10),
            SegmentId::new(7),
            "by-dev-ch-0".into(),
        )])
        .await
        .unwrap();

    let seg = engine.get_segment(SegmentId::new(7)).unwrap();
    assert_eq!(seg.record.level, SegmentLevel::L0);
    assert_eq!(seg.record.state, SegmentState::Flushed);
    assert_eq!(seg.record.num_of_rows, 0);
    assert!(catalog.persisted_segment(SegmentId::new(7)).is_some());
}

fn compaction_fixture() -> (CompactionPlan, CompactionPlanResult) {
    let plan = CompactionPlan {
        plan_id: PlanId::new(1000),
        segment_binlogs: vec![
            PlanSegmentBinlogs {
                segment_id: SegmentId::new(1),
                deltalogs: vec![delta_field(&[30000])],
                ..PlanSegmentBinlogs::default()
            },
            PlanSegmentBinlogs {
                segment_id: SegmentId::new(2),
                deltalogs: vec![delta_field(&[31000])],
                ..PlanSegmentBinlogs::default()
            },
        ],
        compaction_type: CompactionType::MixCompaction,
        channel: "by-dev-ch-0".into(),
        start_time: 1 << 18,
        timeout_secs: 180,
        collection_ttl_secs: 0,
    };
    let result = CompactionPlanResult {
        plan_id: PlanId::new(1000),
        state: CompactionState::Completed,
        segments: vec![CompactionSegment {
            segment_id: SegmentId::new(3),
            num_of_rows: 2,
            insert_logs: vec![FieldBinlog::new(
                FieldId::new(1),
                vec![Binlog {
                    log_id: LogId::new(50000),
                    ..Binlog::default()
                }],
            )],
            statslogs: vec![FieldBinlog::new(
                FieldId::new(1),
                vec![Binlog {
                    log_id: LogId::new(50001),
                    ..Binlog::default()
                }],
            )],
            deltalogs: vec![],
            channel: "by-dev-ch-0".into(),
        }],
    };
    (plan, result)
}

async fn seed_compaction_sources(
    engine: &MetaEngine,
    blobs: &MemoryBlobStore,
) -> (SegmentId, SegmentId) {
    for (id, logs) in [(1, [30000, 30001]), (2, [31000, 31001])] {
        let mut seg = segment(id, SegmentState::Flushed);
        seg.record.num_of_rows = 100;
        seg.record.max_row_num = 300;
        seg.record.deltalogs = vec![delta_field(&logs)];
        seg.record.start_position =
            Some(StreamPosition::new("by-dev-ch-0", vec![1], 10 + id as u64));
        seg.record.dml_position =
            Some(StreamPosition::new("by-dev-ch-0", vec![2], 20 + id as u64));
        engine.add_segment(seg).await.unwrap();
        // late deltas exist as blobs at their source address
        for log_id in logs {
            let key = delta_log_path(
                blobs.root_path(),
                CollectionId::new(100),
                PartitionId::new(10),
                SegmentId::new(id),
                FieldId::new(0),
                LogId::new(log_id),
            );
            blobs.write(&key, Bytes::from("tombstones")).await.unwrap();
        }
    }
    (SegmentId::new(1), SegmentId::new(2))
}

#[tokio::test]
async fn test_complete_compaction_carries_late_deltas() {
    let (engine, catalog, blobs) = engine().await;
    let (s1, s2) = seed_compaction_sources(&engine, &blobs).await;

    let (plan, result) = compaction_fixture();
    let target = engine
        .complete_compaction_mutation(&plan, &result)
        .await
        .unwrap();

    assert_eq!(target.id(), SegmentId::new(3));
    assert_eq!(target.record.state, SegmentState::Flushed);
    assert_eq!(target.record.level, SegmentLevel::L1);
    assert!(target.record.created_by_compaction);
    assert_eq!(target.record.compaction_from, vec![s1, s2]);
    assert_eq!(target.record.max_row_num, 300);
    // minimum over sources: s1 contributed both positions
    assert_eq!(target.record.start_position.as_ref().unwrap().timestamp, 11);
    assert_eq!(target.record.dml_position.as_ref().unwrap().timestamp, 21);

    // exactly the two late deltas were carried over
    let carried: Vec<i64> = target
        .record
        .deltalogs
        .last()
        .unwrap()
        .logs
        .iter()
        .map(|l| l.log_id.as_i64())
        .collect();
    assert_eq!(carried, vec![30001, 31001]);

    // the blobs were copied to the target address before the catalog write
    for (source, log_id) in [(s1, 30001), (s2, 31001)] {
        let _ = source;
        let to = delta_log_path(
            blobs.root_path(),
            CollectionId::new(100),
            PartitionId::new(10),
            SegmentId::new(3),
            FieldId::new(0),
            LogId::new(log_id),
        );
        assert!(blobs.exists(&to).await.unwrap());
    }

    // sources dropped with a drop stamp, in memory and in the catalog
    for id in [s1, s2] {
        let seg = engine.get_segment(id).unwrap();
        assert_eq!(seg.record.state, SegmentState::Dropped);
        assert!(seg.record.compacted);
        assert!(seg.record.dropped_at > 0);
        assert_eq!(
            catalog.persisted_segment(id).unwrap().state,
            SegmentState::Dropped
        );
    }
    assert!(catalog.persisted_segment(SegmentId::new(3)).is_some());
}

#[tokio::test]
async fn test_complete_compaction_zero_rows_drops_target() {
    let (engine, _, blobs) = engine().await;
    seed_compaction_sources(&engine, &blobs).await;

    let (plan, mut result) = compaction_fixture();
    result.segments[0].num_of_rows = 0;
    let target = engine
        .complete_compaction_mutation(&plan, &result)
        .await
        .unwrap();

    assert_eq!(target.record.state, SegmentState::Dropped);
    assert!(target.record.created_by_compaction);
}

#[tokio::test]
async fn test_complete_compaction_missing_source_fails() {
    let (engine, _, _) = engine().await;
    let (plan, result) = compaction_fixture();
    let err = engine
        .complete_compaction_mutation(&plan, &result)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_complete_compaction_blob_failure_aborts_cleanly() {
    let (engine, catalog, blobs) = engine().await;
    let (s1, _) = seed_compaction_sources(&engine, &blobs).await;

    blobs.fail_next(strata_storage::BlobOp::Read);
    let (plan, result) = compaction_fixture();
    let err = engine
        .complete_compaction_mutation(&plan, &result)
        .await
        .unwrap_err();
    assert!(matches!(err, MetaError::Storage(_)));

    // no visible change anywhere
    assert_eq!(
        engine.get_segment(s1).unwrap().record.state,
        SegmentState::Flushed
    );
    assert!(engine.get_segment(SegmentId::new(3)).is_none());
    assert!(catalog.persisted_segment(SegmentId::new(3)).is_none());
}

#[tokio::test]
async fn test_stale_channel_checkpoint_is_noop() {
    let (engine, catalog, _) = engine().await;

    engine
        .update_channel_checkpoint("ch-0", StreamPosition::new("ch-0", vec![1], 1000))
        .await
        .unwrap();
    engine
        .update_channel_checkpoint("ch-0", StreamPosition::new("ch-0", vec![2], 999))
        .await
        .unwrap();

    assert_eq!(engine.get_channel_checkpoint("ch-0").unwrap().timestamp, 1000);
    let persisted = catalog.list_channel_checkpoints().await.unwrap();
    assert_eq!(persisted["ch-0"].timestamp, 1000);
}

#[tokio::test]
async fn test_channel_checkpoint_rejects_empty_msg_id() {
    let (engine, _, _) = engine().await;
    let err = engine
        .update_channel_checkpoint("ch-0", StreamPosition::new("ch-0", vec![], 5))
        .await
        .unwrap_err();
    assert!(matches!(err, MetaError::Parameter(_)));
}

#[tokio::test]
async fn test_drop_segment_is_idempotent() {
    let (engine, _, _) = engine().await;
    engine.add_segment(segment(1, SegmentState::Growing)).await.unwrap();

    engine.drop_segment(SegmentId::new(1)).await.unwrap();
    engine.drop_segment(SegmentId::new(1)).await.unwrap();
    assert!(engine.get_segment(SegmentId::new(1)).is_none());
}

#[tokio::test]
async fn test_set_state_policy() {
    let (engine, _, _) = engine().await;

    // dropping a missing segment succeeds, anything else fails
    engine
        .set_state(SegmentId::new(404), SegmentState::Dropped)
        .await
        .unwrap();
    assert!(engine
        .set_state(SegmentId::new(404), SegmentState::Sealed)
        .await
        .is_err());

    engine.add_segment(segment(1, SegmentState::Flushed)).await.unwrap();

    // backward transition is a silent no-op
    engine
        .set_state(SegmentId::new(1), SegmentState::Growing)
        .await
        .unwrap();
    assert_eq!(
        engine.get_segment(SegmentId::new(1)).unwrap().record.state,
        SegmentState::Flushed
    );

    engine
        .set_state(SegmentId::new(1), SegmentState::Dropped)
        .await
        .unwrap();
    // repeated drop on the (now unhealthy) segment is also a no-op
    engine
        .set_state(SegmentId::new(1), SegmentState::Dropped)
        .await
        .unwrap();
    assert_eq!(
        engine.get_segment(SegmentId::new(1)).unwrap().record.state,
        SegmentState::Dropped
    );
}

#[tokio::test]
async fn test_update_drop_channel_segment_info() {
    let (engine, catalog, _) = engine().await;

    // one segment known to meta, one only in the writer's buffer
    let mut known = segment(1, SegmentState::Growing);
    known.record.binlogs = vec![FieldBinlog::new(
        FieldId::new(1),
        vec![Binlog {
            log_id: LogId::new(0),
            ..Binlog::default()
        }],
    )];
    engine.add_segment(known).await.unwrap();
    engine.add_segment(segment(2, SegmentState::Growing)).await.unwrap();

    let mut buffered = segment(1, SegmentState::Growing);
    buffered.curr_rows = 5;
    buffered.record.binlogs = vec![FieldBinlog::new(
        FieldId::new(1),
        vec![Binlog {
            log_id: LogId::new(1),
            ..Binlog::default()
        }],
    )];
    let mut unknown = segment(9, SegmentState::Growing);
    unknown.curr_rows = 3;

    engine
        .update_drop_channel_segment_info("by-dev-ch-0", vec![buffered, unknown])
        .await
        .unwrap();

    // merged: both logs, dropped, rows from the buffer
    let merged = engine.get_segment(SegmentId::new(1)).unwrap();
    assert_eq!(merged.record.state, SegmentState::Dropped);
    assert_eq!(merged.record.num_of_rows, 5);
    assert_eq!(merged.record.binlogs[0].logs.len(), 2);

    // untouched channel member dropped too
    assert_eq!(
        engine.get_segment(SegmentId::new(2)).unwrap().record.state,
        SegmentState::Dropped
    );

    // unknown buffered segment admitted as a dropped record
    let admitted = engine.get_segment(SegmentId::new(9)).unwrap();
    assert_eq!(admitted.record.state, SegmentState::Dropped);
    assert_eq!(admitted.record.num_of_rows, 3);

    assert!(catalog.is_channel_deleted("by-dev-ch-0").await.unwrap());
}

#[tokio::test]
async fn test_unset_is_importing_persists() {
    let (engine, catalog, _) = engine().await;
    let mut seg = segment(1, SegmentState::Growing);
    seg.record.is_importing = true;
    engine.add_segment(seg).await.unwrap();

    engine.unset_is_importing(SegmentId::new(1)).await.unwrap();
    assert!(!engine.get_segment(SegmentId::new(1)).unwrap().record.is_importing);
    assert!(!catalog.persisted_segment(SegmentId::new(1)).unwrap().is_importing);

    assert!(engine.unset_is_importing(SegmentId::new(404)).await.is_err());
}

#[tokio::test]
async fn test_set_last_expire_unknown_segment() {
    let (engine, _, _) = engine().await;
    let err = engine
        .set_last_expire(SegmentId::new(404), 77)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_get_compaction_to() {
    let (engine, _, _) = engine().await;
    engine.add_segment(segment(1, SegmentState::Flushed)).await.unwrap();
    let mut target = segment(3, SegmentState::Flushed);
    target.record.compaction_from = vec![SegmentId::new(1), SegmentId::new(2)];
    engine.add_segment(target).await.unwrap();

    assert_eq!(
        engine.get_compaction_to(SegmentId::new(1)).unwrap().id(),
        SegmentId::new(3)
    );
    assert!(engine.get_compaction_to(SegmentId::new(5)).is_none());
}

#[tokio::test]
async fn test_get_segments_chan_part_groups() {
    let (engine, _, _) = engine().await;
    engine.add_segment(segment(1, SegmentState::Flushed)).await.unwrap();
    engine.add_segment(segment(2, SegmentState::Flushed)).await.unwrap();
    let mut other = segment(3, SegmentState::Flushed);
    other.record.insert_channel = "by-dev-ch-1".into();
    engine.add_segment(other).await.unwrap();

    let groups = engine.get_segments_chan_part(|e| e.is_healthy());
    assert_eq!(groups.len(), 2);
    let ch0 = groups
        .iter()
        .find(|g| g.channel == "by-dev-ch-0")
        .unwrap();
    assert_eq!(ch0.segments.len(), 2);
}

#[tokio::test]
async fn test_reload_roundtrip_reconstructs_map() {
    let catalog = Arc::new(MemoryCatalog::new());
    let blobs = Arc::new(MemoryBlobStore::new("files"));
    let engine = MetaEngine::new(catalog.clone(), blobs.clone()).await.unwrap();

    let mut seg = segment(1, SegmentState::Growing);
    seg.record.binlogs = vec![FieldBinlog::new(
        FieldId::new(1),
        vec![Binlog {
            entries_num: 10,
            log_id: LogId::new(0),
            ..Binlog::default()
        }],
    )];
    engine.add_segment(seg).await.unwrap();
    engine
        .update_segments_info(vec![update_status(SegmentId::new(1), SegmentState::Flushed)])
        .await
        .unwrap();
    engine
        .update_channel_checkpoint("by-dev-ch-0", StreamPosition::new("by-dev-ch-0", vec![1], 42))
        .await
        .unwrap();

    // a fresh engine over the same catalog sees identical records
    let reloaded = MetaEngine::new(catalog, blobs).await.unwrap();
    let before = engine.get_segment(SegmentId::new(1)).unwrap();
    let after = reloaded.get_segment(SegmentId::new(1)).unwrap();
    assert_eq!(before.record, after.record);
    assert_eq!(
        reloaded
            .get_channel_checkpoint("by-dev-ch-0")
            .unwrap()
            .timestamp,
        42
    );
}

struct StubHandler {
    info: CollectionInfo,
}

#[async_trait]
impl CollectionHandler for StubHandler {
    async fn get_collection(&self, collection_id: CollectionId) -> MetaResult<CollectionInfo> {
        if collection_id == self.info.id {
            Ok(self.info.clone())
        } else {
            Err(MetaError::not_found("collection", collection_id.to_string()))
        }
    }
}

fn vector_collection(id: i64) -> CollectionInfo {
    CollectionInfo {
        id: CollectionId::new(id),
        schema: CollectionSchema {
            name: "docs".into(),
            fields: vec![
                FieldSchema {
                    field_id: FieldId::new(1),
                    name: "pk".into(),
                    data_type: DataType::Int64,
                    dim: 0,
                },
                FieldSchema {
                    field_id: FieldId::new(101),
                    name: "embedding".into(),
                    data_type: DataType::FloatVector,
                    dim: 8,
                },
            ],
        },
        ..CollectionInfo::default()
    }
}

#[tokio::test]
async fn test_filter_in_indexed_segments() {
    let (engine, _, _) = engine().await;
    let handler = StubHandler {
        info: vector_collection(100),
    };

    engine.add_segment(segment(1, SegmentState::Flushed)).await.unwrap();
    engine.add_segment(segment(2, SegmentState::Flushed)).await.unwrap();

    engine.add_index(IndexMeta {
        index_id: strata_core::IndexId::new(500),
        collection_id: CollectionId::new(100),
        field_id: FieldId::new(101),
        ..IndexMeta::default()
    });
    // only segment 1 has a finished build
    engine.update_segment_index(SegmentIndexMeta {
        segment_id: SegmentId::new(1),
        collection_id: CollectionId::new(100),
        index_id: strata_core::IndexId::new(500),
        state: IndexState::Finished,
        index_file_keys: vec!["k1".into()],
        current_index_version: 1,
        ..SegmentIndexMeta::default()
    });

    let all = engine.get_all_segments();
    let indexed = engine.filter_in_indexed_segments(&handler, all).await;
    assert_eq!(indexed.len(), 1);
    assert_eq!(indexed[0].id(), SegmentId::new(1));
}

#[tokio::test]
async fn test_has_segments() {
    let (engine, _, _) = engine().await;
    engine.add_segment(segment(1, SegmentState::Growing)).await.unwrap();

    assert!(engine.has_segments(&[SegmentId::new(1)]).unwrap());
    assert!(engine
        .has_segments(&[SegmentId::new(1), SegmentId::new(2)])
        .is_err());
}

#[tokio::test]
async fn test_read_views() {
    let (engine, _, _) = engine().await;

    let mut growing = segment(1, SegmentState::Growing);
    growing.record.start_position = Some(StreamPosition::new("by-dev-ch-0", vec![1], 30));
    engine.add_segment(growing).await.unwrap();
    let mut growing2 = segment(2, SegmentState::Growing);
    growing2.record.start_position = Some(StreamPosition::new("by-dev-ch-0", vec![2], 20));
    engine.add_segment(growing2).await.unwrap();

    let mut flushed = segment(3, SegmentState::Flushed);
    flushed.record.num_of_rows = 50;
    flushed.record.binlogs = vec![FieldBinlog::new(
        FieldId::new(1),
        vec![Binlog {
            log_size: 4096,
            log_id: LogId::new(0),
            ..Binlog::default()
        }],
    )];
    engine.add_segment(flushed).await.unwrap();
    engine.add_segment(segment(4, SegmentState::Flushing)).await.unwrap();

    assert_eq!(engine.get_num_rows_of_collection(CollectionId::new(100)), 50);
    assert_eq!(
        engine.get_num_rows_of_partition(CollectionId::new(100), PartitionId::new(10)),
        50
    );
    assert_eq!(
        engine
            .get_segment_ids_of_collection(CollectionId::new(100))
            .len(),
        4
    );
    assert_eq!(
        engine
            .get_segment_ids_of_partition(CollectionId::new(100), PartitionId::new(10))
            .len(),
        4
    );
    assert_eq!(engine.get_unflushed_segments().len(), 2);
    assert_eq!(engine.get_flushing_segments().len(), 1);
    assert_eq!(engine.get_segments_by_channel("by-dev-ch-0").len(), 4);

    let (total, per_collection) = engine.get_collection_binlog_size();
    assert_eq!(total, 4096);
    assert_eq!(per_collection[&CollectionId::new(100)], 4096);

    let earliest = engine
        .get_earliest_start_position_of_growing_segments(&strata_meta::GroupLabel {
            collection_id: CollectionId::new(100),
            partition_id: PartitionId::new(10),
            channel: "by-dev-ch-0".into(),
        })
        .unwrap();
    assert_eq!(earliest.timestamp, 20);

    let compactable = engine.get_compactable_segments_group_by_collection();
    assert_eq!(compactable[&CollectionId::new(100)].len(), 1);
    assert_eq!(
        compactable[&CollectionId::new(100)][0].id(),
        SegmentId::new(3)
    );

    // live records block gc, dropping them unblocks it
    assert!(!engine
        .gc_confirm(CollectionId::new(100), PartitionId::new(10))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_update_segment_skips_unchanged() {
    let (engine, catalog, _) = engine().await;
    let mut seg = segment(1, SegmentState::Growing);
    seg.record.max_row_num = 100;
    engine.add_segment(seg).await.unwrap();

    catalog.fail_next(CatalogOp::AlterSegments);
    // a no-change transform never reaches the catalog, so the injected
    // failure stays armed
    engine
        .update_segment(
            SegmentId::new(1),
            &[strata_meta::transforms::set_max_row_num(100)],
        )
        .await
        .unwrap();

    let err = engine
        .update_segment(
            SegmentId::new(1),
            &[strata_meta::transforms::set_max_row_num(200)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MetaError::Catalog(_)));
    assert_eq!(
        engine.get_segment(SegmentId::new(1)).unwrap().record.max_row_num,
        100
    );
}
