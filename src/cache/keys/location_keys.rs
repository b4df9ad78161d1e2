/// 用户位置GEO索引键
pub const LOCATION_GEO_KEY: &str = "locations:geo";

/// 用户位置元数据缓存键前缀
const LOCATION_META_PREFIX: &str = "location:meta:";

/// 附近用户结果缓存键前缀
const NEARBY_RESULT_PREFIX: &str = "nearby:";

/// 生成用户位置元数据缓存键
pub fn location_meta_key(user_id: &str) -> String {
    format!("{}{}", LOCATION_META_PREFIX, user_id)
}

/// 生成附近用户结果缓存键，按请求用户区分
pub fn nearby_result_key(user_id: &str) -> String {
    format!("{}{}", NEARBY_RESULT_PREFIX, user_id)
}
