use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::proximity::ProximityEngine;

/// 定时清理过期位置，单次失败只记日志，下个周期重试
pub fn spawn_stale_location_reaper(
    engine: Arc<ProximityEngine>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match engine.cleanup_stale_locations().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!("Reaper removed {} stale locations", removed),
                Err(e) => tracing::error!("Failed to clean up stale locations: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy::{PrivacyLayer, PrivacySettings};
    use crate::proximity::EngineSettings;
    use crate::testing::{MemoryGeoCache, MemoryLocationStore, eventually, record};

    #[tokio::test]
    async fn reaper_purges_stale_records_and_survives_failures() {
        let store = Arc::new(MemoryLocationStore::default());
        let engine = Arc::new(ProximityEngine::new(
            store.clone(),
            Arc::new(MemoryGeoCache::default()),
            None,
            PrivacyLayer::new(PrivacySettings::default()),
            EngineSettings::default(),
        ));

        store.set_failing(true);
        let handle = spawn_stale_location_reaper(engine, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!handle.is_finished());

        store.set_failing(false);
        store.insert(record("fresh", 0.0, 0.0));
        store.insert(record("old", 0.0, 0.0));
        store.age("old", chrono::Duration::seconds(3600));

        eventually(|| store.get("old").is_none()).await;
        assert!(store.get("fresh").is_some());
        handle.abort();
    }
}
