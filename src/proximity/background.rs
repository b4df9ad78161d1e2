//! 后台写入队列
//!
//! 缓存镜像、结果缓存失效和历史记录都不阻塞调用方，统一放进一个有界队列，
//! 由单个 worker 按入队顺序执行。队列满时直接丢弃任务并记录警告，
//! 缓存本身就是尽力而为的，下一次位置更新会重新写入。
//!
//! 所有任务都必须是幂等的：连接断开不会取消已经入队的任务，
//! 同一条位置可能被重复镜像。

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::cache::keys::{LOCATION_GEO_KEY, location_meta_key, nearby_result_key};
use crate::cache::{CachedNearbyResult, CachedNearbyUser, GeoCache, LocationMetadata};
use crate::database::LocationHistory;
use crate::error::CacheError;
use crate::models::{LocationRecord, NearbyUser};

#[derive(Debug)]
pub enum BackgroundJob {
    /// 写入 GEO 索引和元数据 hash
    MirrorLocation(LocationRecord),
    /// 删除该用户的附近用户结果缓存
    InvalidateNearby(String),
    /// 缓存该用户的附近用户查询结果
    CacheNearby {
        user_id: String,
        radius: f64,
        users: Vec<NearbyUser>,
    },
    AppendHistory(LocationRecord),
    /// 从 GEO 索引移除已过期的用户
    ForgetMembers(Vec<String>),
}

impl BackgroundJob {
    fn kind(&self) -> &'static str {
        match self {
            BackgroundJob::MirrorLocation(_) => "mirror_location",
            BackgroundJob::InvalidateNearby(_) => "invalidate_nearby",
            BackgroundJob::CacheNearby { .. } => "cache_nearby",
            BackgroundJob::AppendHistory(_) => "append_history",
            BackgroundJob::ForgetMembers(_) => "forget_members",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WriterSettings {
    pub metadata_ttl_secs: u64,
    pub nearby_cache_ttl_secs: u64,
    pub capacity: usize,
}

#[derive(Clone)]
pub struct BackgroundWriter {
    tx: mpsc::Sender<BackgroundJob>,
    records_history: bool,
}

impl BackgroundWriter {
    /// 启动 worker，返回写入句柄和 worker 的 JoinHandle
    ///
    /// 所有 BackgroundWriter 句柄被丢弃后 worker 处理完剩余任务退出。
    pub fn spawn(
        cache: Arc<dyn GeoCache>,
        history: Option<Arc<dyn LocationHistory>>,
        settings: WriterSettings,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(settings.capacity.max(1));
        let records_history = history.is_some();
        let worker = Worker {
            cache,
            history,
            settings,
        };
        let handle = tokio::spawn(worker.run(rx));

        (
            Self {
                tx,
                records_history,
            },
            handle,
        )
    }

    pub fn records_history(&self) -> bool {
        self.records_history
    }

    /// 入队，不等待执行结果；队列已满或已关闭时返回 false
    pub fn submit(&self, job: BackgroundJob) -> bool {
        let kind = job.kind();
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(job = kind, "Background queue full, dropping job");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::warn!(job = kind, "Background worker stopped, dropping job");
                false
            }
        }
    }
}

struct Worker {
    cache: Arc<dyn GeoCache>,
    history: Option<Arc<dyn LocationHistory>>,
    settings: WriterSettings,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<BackgroundJob>) {
        while let Some(job) = rx.recv().await {
            let kind = job.kind();
            if let Err(e) = self.execute(job).await {
                tracing::warn!(job = kind, error = %e, "Background job failed");
            }
        }
        tracing::debug!("Background writer stopped");
    }

    async fn execute(&self, job: BackgroundJob) -> Result<(), CacheError> {
        match job {
            BackgroundJob::MirrorLocation(record) => {
                self.cache
                    .geo_add(
                        LOCATION_GEO_KEY,
                        record.longitude,
                        record.latitude,
                        &record.user_id,
                    )
                    .await?;
                let metadata = LocationMetadata::from(&record);
                self.cache
                    .hset_ex(
                        &location_meta_key(&record.user_id),
                        &metadata.to_fields(),
                        self.settings.metadata_ttl_secs,
                    )
                    .await?;
                tracing::debug!("Mirrored location to cache: {}", record.user_id);
            }
            BackgroundJob::InvalidateNearby(user_id) => {
                self.cache.del(&nearby_result_key(&user_id)).await?;
            }
            BackgroundJob::CacheNearby {
                user_id,
                radius,
                users,
            } => {
                let cached = CachedNearbyResult {
                    radius,
                    users: users.iter().map(CachedNearbyUser::from).collect(),
                };
                let json = serde_json::to_string(&cached)?;
                self.cache
                    .set_ex(
                        &nearby_result_key(&user_id),
                        &json,
                        self.settings.nearby_cache_ttl_secs,
                    )
                    .await?;
                tracing::debug!("Set nearby users to cache: {}", user_id);
            }
            BackgroundJob::AppendHistory(record) => {
                // 历史记录失败只记日志
                if let Some(history) = &self.history {
                    if let Err(e) = history.append(&record).await {
                        tracing::warn!(user_id = %record.user_id, error = %e, "Failed to append location history");
                    }
                }
            }
            BackgroundJob::ForgetMembers(user_ids) => {
                self.cache.geo_remove(LOCATION_GEO_KEY, &user_ids).await?;
                for user_id in &user_ids {
                    self.cache.del(&location_meta_key(user_id)).await?;
                }
            }
        }
        Ok(())
    }
}
