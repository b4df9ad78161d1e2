/// 缓存数据模型
/// 定义缓存数据的结构体
pub mod location;

pub use location::{CachedNearbyResult, CachedNearbyUser, LocationMetadata};
