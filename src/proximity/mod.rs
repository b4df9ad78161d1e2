// 附近用户引擎
// 写路径、双路径查询和后台缓存镜像

mod background;
mod engine;

pub use background::{BackgroundJob, BackgroundWriter, WriterSettings};
pub use engine::ProximityEngine;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// 查询半径上限（米）
    pub max_search_radius: f64,
    /// 未指定或非法半径时使用（米）
    pub default_search_radius: f64,
    pub max_nearby_results: usize,
    pub metadata_ttl_secs: u64,
    pub nearby_cache_ttl_secs: u64,
    /// 元数据并发读取上限
    pub fanout_width: usize,
    pub stale_threshold_secs: i64,
    pub background_queue_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_search_radius: 5000.0,
            default_search_radius: 1000.0,
            max_nearby_results: 100,
            metadata_ttl_secs: 60,
            nearby_cache_ttl_secs: 10,
            fanout_width: 50,
            stale_threshold_secs: 300,
            background_queue_capacity: 1024,
        }
    }
}
