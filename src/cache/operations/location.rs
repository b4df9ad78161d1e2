use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient, aio::ConnectionManager};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::cache::geo::{GeoCache, GeoMember};
use crate::error::CacheError;

/// 基于 Redis 的地理缓存
///
/// 所有命令共用一个 ConnectionManager，首次使用时建立，断线后自动重连。
pub struct LocationCacheOperations {
    redis_client: Arc<RedisClient>,
    manager: OnceCell<ConnectionManager>,
}

impl LocationCacheOperations {
    /// 创建新的位置缓存操作实例
    pub fn new(redis_client: Arc<RedisClient>) -> Self {
        Self {
            redis_client,
            manager: OnceCell::new(),
        }
    }

    // 克隆只复制句柄，不会新建 TCP 连接
    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                tracing::info!("Opening Redis connection manager");
                self.redis_client.get_connection_manager().await
            })
            .await?;
        Ok(manager.clone())
    }
}

#[async_trait]
impl GeoCache for LocationCacheOperations {
    async fn geo_add(
        &self,
        key: &str,
        longitude: f64,
        latitude: f64,
        member: &str,
    ) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;

        // Redis的GEO命令参数顺序是 longitude, latitude
        let _: () = redis::cmd("GEOADD")
            .arg(key)
            .arg(longitude)
            .arg(latitude)
            .arg(member)
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn geo_search(
        &self,
        key: &str,
        longitude: f64,
        latitude: f64,
        radius: f64,
        count: usize,
    ) -> Result<Vec<GeoMember>, CacheError> {
        let mut conn = self.connection().await?;

        // 每个结果的格式为 [member, [lon, lat]]
        let results: Vec<(String, (f64, f64))> = redis::cmd("GEOSEARCH")
            .arg(key)
            .arg("FROMLONLAT")
            .arg(longitude)
            .arg(latitude)
            .arg("BYRADIUS")
            .arg(radius)
            .arg("m")
            .arg("ASC")
            .arg("COUNT")
            .arg(count.max(1))
            .arg("WITHCOORD")
            .query_async(&mut conn)
            .await?;

        Ok(results
            .into_iter()
            .map(|(member, (longitude, latitude))| GeoMember {
                member,
                longitude,
                latitude,
            })
            .collect())
    }

    async fn geo_remove(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let _: () = conn.zrem(key, members).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = conn.set_ex(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn hset_ex(
        &self,
        key: &str,
        fields: &[(&'static str, String)],
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;

        // 先删旧 hash，避免残留上一次写入的可选字段
        let _: () = redis::pipe()
            .atomic()
            .del(key)
            .ignore()
            .hset_multiple(key, fields)
            .ignore()
            .expire(key, ttl_secs as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        let mut conn = self.connection().await?;
        let fields: HashMap<String, String> = conn.hgetall(key).await?;
        Ok(fields)
    }
}
