//! Round-trip coverage for both catalog implementations: a reload after any
//! mutation sequence must reconstruct the same segment map, with no log
//! order lost.

use strata_catalog::{MemoryCatalog, SqliteCatalog};
use strata_core::traits::BinlogsIncrement;
use strata_core::{
    Binlog, Catalog, CollectionId, FieldBinlog, FieldId, LogId, PartitionId, SegmentId,
    SegmentLevel, SegmentRecord, SegmentState, StreamPosition,
};

fn sample_segment(id: i64, state: SegmentState) -> SegmentRecord {
    SegmentRecord {
        id: SegmentId::new(id),
        collection_id: CollectionId::new(100),
        partition_id: PartitionId::new(10),
        insert_channel: "by-dev-ch-0".into(),
        state,
        level: SegmentLevel::L1,
        num_of_rows: 1000,
        max_row_num: 4096,
        binlogs: vec![FieldBinlog::new(
            FieldId::new(1),
            vec![
                Binlog {
                    entries_num: 600,
                    timestamp_from: 1,
                    timestamp_to: 50,
                    log_size: 1024,
                    log_id: LogId::new(900),
                    log_path: String::new(),
                },
                Binlog {
                    entries_num: 400,
                    timestamp_from: 51,
                    timestamp_to: 99,
                    log_size: 2048,
                    log_id: LogId::new(901),
                    log_path: String::new(),
                },
            ],
        )],
        dml_position: Some(StreamPosition::new("by-dev-ch-0", vec![1, 2, 3], 99)),
        ..SegmentRecord::default()
    }
}

async fn run_roundtrip(catalog: &dyn Catalog) {
    catalog
        .add_segment(&sample_segment(1, SegmentState::Growing))
        .await
        .unwrap();
    catalog
        .add_segment(&sample_segment(2, SegmentState::Flushed))
        .await
        .unwrap();

    // flush segment 1 and attach one more insert log
    let mut flushed = sample_segment(1, SegmentState::Flushed);
    flushed.binlogs[0].logs.push(Binlog {
        entries_num: 50,
        log_id: LogId::new(902),
        ..Binlog::default()
    });
    catalog
        .alter_segments(
            std::slice::from_ref(&flushed),
            &[BinlogsIncrement {
                segment: flushed.clone(),
            }],
        )
        .await
        .unwrap();

    // drop segment 2 via the batch path
    let mut dropped = sample_segment(2, SegmentState::Dropped);
    dropped.dropped_at = 42;
    catalog
        .save_dropped_segments_in_batch(std::slice::from_ref(&dropped))
        .await
        .unwrap();
    catalog.mark_channel_deleted("by-dev-ch-0").await.unwrap();

    let mut reloaded = catalog.list_segments().await.unwrap();
    reloaded.sort_by_key(|s| s.id);
    assert_eq!(reloaded.len(), 2);
    assert_eq!(reloaded[0], flushed);
    assert_eq!(reloaded[1], dropped);
    assert_eq!(
        reloaded[0].binlogs[0]
            .logs
            .iter()
            .map(|l| l.log_id.as_i64())
            .collect::<Vec<_>>(),
        vec![900, 901, 902]
    );
    assert!(catalog.is_channel_deleted("by-dev-ch-0").await.unwrap());

    // checkpoints round-trip independently of segments
    let pos = StreamPosition::new("by-dev-ch-0", vec![9], 1234);
    catalog
        .save_channel_checkpoint("by-dev-ch-0", &pos)
        .await
        .unwrap();
    let checkpoints = catalog.list_channel_checkpoints().await.unwrap();
    assert_eq!(checkpoints.get("by-dev-ch-0"), Some(&pos));

    catalog.drop_channel_checkpoint("by-dev-ch-0").await.unwrap();
    assert!(catalog
        .list_channel_checkpoints()
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_memory_catalog_roundtrip() {
    let catalog = MemoryCatalog::new();
    run_roundtrip(&catalog).await;
}

#[tokio::test]
async fn test_sqlite_catalog_roundtrip() {
    let catalog = SqliteCatalog::connect("sqlite::memory:").await.unwrap();
    run_roundtrip(&catalog).await;
}

#[tokio::test]
async fn test_sqlite_gc_confirm_tracks_partition_rows() {
    let catalog = SqliteCatalog::connect("sqlite::memory:").await.unwrap();
    let seg = sample_segment(7, SegmentState::Flushed);
    catalog.add_segment(&seg).await.unwrap();

    assert!(!catalog
        .gc_confirm(seg.collection_id, seg.partition_id)
        .await
        .unwrap());

    catalog.drop_segment(&seg).await.unwrap();
    assert!(catalog
        .gc_confirm(seg.collection_id, seg.partition_id)
        .await
        .unwrap());
}
