// 地理缓存接口
// 只提供尽力而为的镜像，任何时候数据都可能不存在

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::CacheError;

/// GEO 半径查询返回的成员
#[derive(Debug, Clone, PartialEq)]
pub struct GeoMember {
    pub member: String,
    pub longitude: f64,
    pub latitude: f64,
}

#[async_trait]
pub trait GeoCache: Send + Sync {
    async fn geo_add(
        &self,
        key: &str,
        longitude: f64,
        latitude: f64,
        member: &str,
    ) -> Result<(), CacheError>;

    /// 半径（米）内最近的 count 个成员，由近到远
    async fn geo_search(
        &self,
        key: &str,
        longitude: f64,
        latitude: f64,
        radius: f64,
        count: usize,
    ) -> Result<Vec<GeoMember>, CacheError>;

    async fn geo_remove(&self, key: &str, members: &[String]) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError>;

    async fn del(&self, key: &str) -> Result<(), CacheError>;

    /// 写入 hash 字段并设置整体过期时间
    async fn hset_ex(
        &self,
        key: &str,
        fields: &[(&'static str, String)],
        ttl_secs: u64,
    ) -> Result<(), CacheError>;

    /// 键不存在时返回空 map
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError>;
}
