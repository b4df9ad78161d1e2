// 持久化存储接口
// 引擎只依赖这些 trait，具体实现见 operations 模块

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::LocationRecord;

/// 用户位置的权威存储
#[async_trait]
pub trait LocationStore: Send + Sync {
    /// 按 user_id 插入或更新，保留首次创建时间，返回写入后的记录
    async fn upsert(&self, record: &LocationRecord) -> Result<LocationRecord, StoreError>;

    async fn find_by_user(&self, user_id: &str) -> Result<Option<LocationRecord>, StoreError>;

    /// 半径（米）内的用户，排除 exclude_user，最多 limit 条
    async fn find_nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius: f64,
        exclude_user: &str,
        limit: usize,
    ) -> Result<Vec<LocationRecord>, StoreError>;

    /// 删除超过 threshold_secs 未更新的记录，返回被删除的 user_id
    async fn delete_stale(&self, threshold_secs: i64) -> Result<Vec<String>, StoreError>;
}

/// 位置历史记录
#[async_trait]
pub trait LocationHistory: Send + Sync {
    async fn append(&self, record: &LocationRecord) -> Result<(), StoreError>;
}
