use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::sync::Semaphore;

use super::EngineSettings;
use super::background::{BackgroundJob, BackgroundWriter, WriterSettings};
use crate::cache::keys::{LOCATION_GEO_KEY, location_meta_key, nearby_result_key};
use crate::cache::{CachedNearbyResult, GeoCache, GeoMember, LocationMetadata};
use crate::database::{LocationHistory, LocationStore};
use crate::error::{CacheError, StoreError};
use crate::models::{GeoPoint, LocationRecord, LocationUpdate, NearbyUser};
use crate::privacy::PrivacyLayer;

/// 位置写入与附近用户查询
///
/// 写路径同步写数据库，缓存镜像交给后台队列；
/// 读路径依次尝试结果缓存、GEO 索引，最后降级到数据库。
pub struct ProximityEngine {
    store: Arc<dyn LocationStore>,
    cache: Arc<dyn GeoCache>,
    privacy: PrivacyLayer,
    settings: EngineSettings,
    fanout: Arc<Semaphore>,
    background: BackgroundWriter,
}

impl ProximityEngine {
    /// 需要在 tokio 运行时内调用，会启动后台写入 worker
    pub fn new(
        store: Arc<dyn LocationStore>,
        cache: Arc<dyn GeoCache>,
        history: Option<Arc<dyn LocationHistory>>,
        privacy: PrivacyLayer,
        settings: EngineSettings,
    ) -> Self {
        let (background, _worker) = BackgroundWriter::spawn(
            cache.clone(),
            history,
            WriterSettings {
                metadata_ttl_secs: settings.metadata_ttl_secs,
                nearby_cache_ttl_secs: settings.nearby_cache_ttl_secs,
                capacity: settings.background_queue_capacity,
            },
        );

        Self {
            store,
            cache,
            privacy,
            fanout: Arc::new(Semaphore::new(settings.fanout_width.max(1))),
            settings,
            background,
        }
    }

    /// 非法半径使用默认值，超过上限按上限处理
    pub fn clamp_radius(&self, radius: f64) -> f64 {
        if !radius.is_finite() || radius <= 0.0 {
            self.settings
                .default_search_radius
                .min(self.settings.max_search_radius)
        } else {
            radius.min(self.settings.max_search_radius)
        }
    }

    pub async fn update_user_location(
        &self,
        update: LocationUpdate,
    ) -> Result<LocationRecord, StoreError> {
        let now = Utc::now();
        let record = LocationRecord {
            avatar_id: self.privacy.avatar_id(&update.user_id),
            color: self.privacy.color(&update.user_id).to_string(),
            user_id: update.user_id,
            device_id: update.device_id,
            latitude: update.latitude,
            longitude: update.longitude,
            speed: update.speed,
            heading: update.heading,
            is_anonymous: update.is_anonymous,
            last_update: now,
            created_at: now,
        };

        let stored = self.store.upsert(&record).await?;
        tracing::debug!(user_id = %stored.user_id, "Location stored");

        self.background
            .submit(BackgroundJob::MirrorLocation(stored.clone()));
        self.background
            .submit(BackgroundJob::InvalidateNearby(stored.user_id.clone()));
        if self.background.records_history() {
            self.background
                .submit(BackgroundJob::AppendHistory(stored.clone()));
        }

        Ok(stored)
    }

    pub async fn get_nearby_users(
        &self,
        user_id: &str,
        latitude: f64,
        longitude: f64,
        radius: f64,
    ) -> Result<Vec<NearbyUser>, StoreError> {
        let radius = self.clamp_radius(radius);
        let origin = GeoPoint::new(latitude, longitude);

        if let Some(users) = self.cached_result(user_id, radius).await {
            tracing::debug!("Get nearby users from cache: {}", user_id);
            return Ok(users);
        }

        match self.search_cache(user_id, origin, radius).await {
            Ok(users) if !users.is_empty() => {
                self.background.submit(BackgroundJob::CacheNearby {
                    user_id: user_id.to_string(),
                    radius,
                    users: users.clone(),
                });
                return Ok(users);
            }
            Ok(_) => {
                tracing::debug!(user_id, "Geo index returned no members, querying store");
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Geo index search failed, falling back to store");
            }
        }

        let now = Utc::now();
        let records = self
            .store
            .find_nearby(
                latitude,
                longitude,
                radius,
                user_id,
                self.settings.max_nearby_results,
            )
            .await?;

        Ok(records
            .iter()
            .filter(|r| r.user_id != user_id)
            .take(self.settings.max_nearby_results)
            .map(|r| self.project_record(r, origin, now))
            .collect())
    }

    /// 用户自己的最后位置，未经隐私处理，只能返回给本人
    pub async fn get_user_location(
        &self,
        user_id: &str,
    ) -> Result<Option<LocationRecord>, StoreError> {
        self.store.find_by_user(user_id).await
    }

    /// 删除过期位置，返回删除条数
    pub async fn cleanup_stale_locations(&self) -> Result<usize, StoreError> {
        let deleted = self
            .store
            .delete_stale(self.settings.stale_threshold_secs)
            .await?;

        let count = deleted.len();
        if count > 0 {
            tracing::info!("Removed {} stale locations", count);
            self.background.submit(BackgroundJob::ForgetMembers(deleted));
        }
        Ok(count)
    }

    // 只有半径相同的缓存结果才能复用
    async fn cached_result(&self, user_id: &str, radius: f64) -> Option<Vec<NearbyUser>> {
        let json = match self.cache.get(&nearby_result_key(user_id)).await {
            Ok(Some(json)) => json,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to read nearby result cache");
                return None;
            }
        };

        match serde_json::from_str::<CachedNearbyResult>(&json) {
            Ok(cached) if cached.radius == radius => {
                Some(cached.users.into_iter().map(NearbyUser::from).collect())
            }
            Ok(cached) => {
                tracing::debug!(user_id, cached_radius = cached.radius, radius, "Nearby result cache radius mismatch");
                None
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Discarding undecodable nearby result cache");
                None
            }
        }
    }

    async fn search_cache(
        &self,
        user_id: &str,
        origin: GeoPoint,
        radius: f64,
    ) -> Result<Vec<NearbyUser>, CacheError> {
        let members = self
            .cache
            .geo_search(
                LOCATION_GEO_KEY,
                origin.longitude,
                origin.latitude,
                radius,
                self.search_window(),
            )
            .await?;

        let now = Utc::now();
        let fetches = members
            .into_iter()
            .filter(|m| m.member != user_id)
            .map(|m| self.fetch_member(m, origin, now));

        let mut users: Vec<NearbyUser> = join_all(fetches).await.into_iter().flatten().collect();
        users.truncate(self.settings.max_nearby_results);
        Ok(users)
    }

    // GEO 查询条数：结果上限，加上请求者本人和部分元数据已过期的成员
    fn search_window(&self) -> usize {
        let max = self.settings.max_nearby_results;
        max + 1 + max / 4
    }

    // 元数据缺失或读取失败的成员直接丢弃
    async fn fetch_member(
        &self,
        member: GeoMember,
        origin: GeoPoint,
        now: DateTime<Utc>,
    ) -> Option<NearbyUser> {
        let _permit = self.fanout.acquire().await.ok()?;

        let fields = match self.cache.hget_all(&location_meta_key(&member.member)).await {
            Ok(fields) => fields,
            Err(e) => {
                tracing::debug!(member = %member.member, error = %e, "Dropping member, metadata fetch failed");
                return None;
            }
        };
        let Some(metadata) = LocationMetadata::from_fields(&fields) else {
            tracing::debug!(member = %member.member, "Dropping member, metadata expired");
            return None;
        };

        let point = GeoPoint::new(member.latitude, member.longitude);
        Some(self.project(
            member.member,
            point,
            origin,
            now,
            Projected {
                avatar_id: metadata.avatar_id,
                color: metadata.color.clone(),
                speed: metadata.speed,
                heading: metadata.heading,
                last_update: metadata.last_update(),
                is_anonymous: metadata.is_anonymous,
            },
        ))
    }

    fn project_record(
        &self,
        record: &LocationRecord,
        origin: GeoPoint,
        now: DateTime<Utc>,
    ) -> NearbyUser {
        self.project(
            record.user_id.clone(),
            record.point(),
            origin,
            now,
            Projected {
                avatar_id: record.avatar_id,
                color: record.color.clone(),
                speed: record.speed,
                heading: record.heading,
                last_update: record.last_update,
                is_anonymous: record.is_anonymous,
            },
        )
    }

    fn project(
        &self,
        user_id: String,
        true_point: GeoPoint,
        origin: GeoPoint,
        now: DateTime<Utc>,
        fields: Projected,
    ) -> NearbyUser {
        let shown = self.privacy.perturb(&user_id, true_point, now);
        NearbyUser {
            anonymous_id: self.privacy.anonymous_id(&user_id),
            user_id,
            latitude: shown.latitude,
            longitude: shown.longitude,
            distance: origin.distance_to(&shown).round(),
            avatar_id: fields.avatar_id,
            color: fields.color,
            speed: fields.speed,
            heading: fields.heading,
            last_update: fields.last_update,
            is_anonymous: fields.is_anonymous,
        }
    }
}

struct Projected {
    avatar_id: i32,
    color: String,
    speed: Option<f64>,
    heading: Option<f64>,
    last_update: DateTime<Utc>,
    is_anonymous: bool,
}
