/// 缓存键模块
/// 提供各种缓存键生成函数
pub mod location_keys;

pub use location_keys::{LOCATION_GEO_KEY, location_meta_key, nearby_result_key};
