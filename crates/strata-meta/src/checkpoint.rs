//! Channel checkpoint management.
//!
//! Positions live in a concurrent map; per-channel keyed locks make each
//! update atomic without serializing unrelated channels through one mutex.
//! A checkpoint only ever moves forward: stale positions are dropped
//! silently after a warn.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use strata_core::metrics::CHECKPOINT_UNIX_SECONDS;
use strata_core::tso::ts_to_datetime;
use strata_core::{Catalog, MetaError, MetaResult, StreamPosition};

/// Per-channel monotonic checkpoint positions backed by the catalog.
pub struct ChannelCheckpointManager {
    catalog: Arc<dyn Catalog>,
    positions: DashMap<String, StreamPosition>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ChannelCheckpointManager {
    #[must_use]
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            catalog,
            positions: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Loads every persisted checkpoint; called once at engine startup.
    pub async fn load(&self) -> MetaResult<()> {
        let checkpoints = self.catalog.list_channel_checkpoints().await?;
        for (channel, mut pos) in checkpoints {
            // older catalogs did not stamp the channel into the position
            pos.channel = channel.clone();
            self.positions.insert(channel, pos);
        }
        Ok(())
    }

    fn key_lock(&self, channel: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Advances the checkpoint of `channel` to `pos` when it is strictly
    /// newer; persists before installing. Stale positions are a silent
    /// no-op.
    ///
    /// # Errors
    ///
    /// - `MetaError::Parameter` when the position carries no message id
    /// - `MetaError::Catalog` when persistence fails (nothing is installed)
    pub async fn update(&self, channel: &str, pos: StreamPosition) -> MetaResult<()> {
        if pos.msg_id.is_empty() {
            return Err(MetaError::Parameter(format!(
                "channel checkpoint is nil, channel={channel}"
            )));
        }

        let lock = self.key_lock(channel);
        let _guard = lock.lock().await;

        let stale = self
            .positions
            .get(channel)
            .is_some_and(|current| current.timestamp >= pos.timestamp);
        if stale {
            warn!(channel, timestamp = pos.timestamp, "stale channel checkpoint, ignored");
            return Ok(());
        }

        self.catalog.save_channel_checkpoint(channel, &pos).await?;
        let at = ts_to_datetime(pos.timestamp);
        info!(
            channel,
            timestamp = pos.timestamp,
            time = %at,
            "channel checkpoint updated"
        );
        CHECKPOINT_UNIX_SECONDS
            .with_label_values(&[channel])
            .set(at.timestamp());
        self.positions.insert(channel.to_string(), pos);
        Ok(())
    }

    /// The current checkpoint of `channel`, if any.
    #[must_use]
    pub fn get(&self, channel: &str) -> Option<StreamPosition> {
        self.positions.get(channel).map(|p| p.clone())
    }

    /// Removes the checkpoint of `channel` from the catalog and memory.
    pub async fn drop(&self, channel: &str) -> MetaResult<()> {
        let lock = self.key_lock(channel);
        let _guard = lock.lock().await;

        self.catalog.drop_channel_checkpoint(channel).await?;
        self.positions.remove(channel);
        let _ = CHECKPOINT_UNIX_SECONDS.remove_label_values(&[channel]);
        debug!(channel, "channel checkpoint dropped");
        Ok(())
    }
}
