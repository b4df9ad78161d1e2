// 缓存模块
// 包含缓存接口、缓存键、缓存数据结构和 Redis 实现

pub mod geo;
pub mod keys;
pub mod models;
pub mod operations;

// 重新导出常用类型，方便其他模块使用
pub use geo::{GeoCache, GeoMember};
pub use models::{CachedNearbyResult, CachedNearbyUser, LocationMetadata};
pub use operations::LocationCacheOperations;
