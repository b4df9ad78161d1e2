// 测试用的内存实现

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::cache::keys::{LOCATION_GEO_KEY, location_meta_key};
use crate::cache::{GeoCache, GeoMember, LocationMetadata};
use crate::database::{LocationHistory, LocationStore};
use crate::error::{CacheError, StoreError};
use crate::models::{GeoPoint, LocationRecord};

pub(crate) fn record(user_id: &str, latitude: f64, longitude: f64) -> LocationRecord {
    let now = Utc::now();
    LocationRecord {
        user_id: user_id.to_string(),
        device_id: None,
        latitude,
        longitude,
        speed: None,
        heading: None,
        avatar_id: 1,
        color: "#E57373".into(),
        is_anonymous: false,
        last_update: now,
        created_at: now,
    }
}

/// 轮询直到条件成立，给后台任务留出执行时间
pub(crate) async fn eventually<F: FnMut() -> bool>(mut check: F) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

#[derive(Default)]
pub(crate) struct MemoryLocationStore {
    records: Mutex<HashMap<String, LocationRecord>>,
    failing: AtomicBool,
}

impl MemoryLocationStore {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn insert(&self, record: LocationRecord) {
        self.records
            .lock()
            .unwrap()
            .insert(record.user_id.clone(), record);
    }

    pub(crate) fn get(&self, user_id: &str) -> Option<LocationRecord> {
        self.records.lock().unwrap().get(user_id).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    /// 把最后更新时间往前推
    pub(crate) fn age(&self, user_id: &str, by: chrono::Duration) {
        if let Some(r) = self.records.lock().unwrap().get_mut(user_id) {
            r.last_update = r.last_update - by;
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LocationStore for MemoryLocationStore {
    async fn upsert(&self, record: &LocationRecord) -> Result<LocationRecord, StoreError> {
        self.check()?;
        let mut records = self.records.lock().unwrap();
        let mut stored = record.clone();
        if let Some(existing) = records.get(&record.user_id) {
            stored.created_at = existing.created_at;
        }
        records.insert(stored.user_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Option<LocationRecord>, StoreError> {
        self.check()?;
        Ok(self.get(user_id))
    }

    async fn find_nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius: f64,
        exclude_user: &str,
        limit: usize,
    ) -> Result<Vec<LocationRecord>, StoreError> {
        self.check()?;
        let origin = GeoPoint::new(latitude, longitude);
        let mut found: Vec<(f64, LocationRecord)> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.user_id != exclude_user)
            .map(|r| (origin.distance_to(&r.point()), r.clone()))
            .filter(|(d, _)| *d <= radius)
            .collect();
        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(found.into_iter().take(limit).map(|(_, r)| r).collect())
    }

    async fn delete_stale(&self, threshold_secs: i64) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let cutoff = Utc::now() - chrono::Duration::seconds(threshold_secs);
        let mut records = self.records.lock().unwrap();
        let stale: Vec<String> = records
            .values()
            .filter(|r| r.last_update < cutoff)
            .map(|r| r.user_id.clone())
            .collect();
        for user_id in &stale {
            records.remove(user_id);
        }
        Ok(stale)
    }
}

#[derive(Default)]
pub(crate) struct MemoryHistory {
    entries: Mutex<Vec<LocationRecord>>,
}

impl MemoryHistory {
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl LocationHistory for MemoryHistory {
    async fn append(&self, record: &LocationRecord) -> Result<(), StoreError> {
        self.entries.lock().unwrap().push(record.clone());
        Ok(())
    }
}

#[derive(Default)]
struct CacheState {
    geo: HashMap<String, HashMap<String, GeoPoint>>,
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    ttls: HashMap<String, u64>,
}

/// 内存版地理缓存，TTL 只记录不生效，过期用 expire 模拟
#[derive(Default)]
pub(crate) struct MemoryGeoCache {
    state: Mutex<CacheState>,
    unreachable: AtomicBool,
    broken_hashes: Mutex<HashSet<String>>,
    hget_delay: Mutex<Option<Duration>>,
    hget_calls: AtomicUsize,
    hget_in_flight: AtomicUsize,
    hget_peak: AtomicUsize,
}

impl MemoryGeoCache {
    pub(crate) fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// 让某个 hash 的读取总是失败
    pub(crate) fn break_hash(&self, key: &str) {
        self.broken_hashes.lock().unwrap().insert(key.to_string());
    }

    pub(crate) fn expire(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        state.strings.remove(key);
        state.hashes.remove(key);
        state.ttls.remove(key);
    }

    pub(crate) fn clear_geo(&self) {
        self.state.lock().unwrap().geo.clear();
    }

    pub(crate) fn has_hash(&self, key: &str) -> bool {
        self.state.lock().unwrap().hashes.contains_key(key)
    }

    pub(crate) fn geo_contains(&self, key: &str, member: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .geo
            .get(key)
            .is_some_and(|members| members.contains_key(member))
    }

    pub(crate) fn ttl_of(&self, key: &str) -> Option<u64> {
        self.state.lock().unwrap().ttls.get(key).copied()
    }

    /// 直接写入 GEO 索引和元数据，不经过后台队列
    pub(crate) fn seed(&self, record: &LocationRecord) {
        let mut state = self.state.lock().unwrap();
        state
            .geo
            .entry(LOCATION_GEO_KEY.to_string())
            .or_default()
            .insert(record.user_id.clone(), record.point());
        let hash = LocationMetadata::from(record)
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        state.hashes.insert(location_meta_key(&record.user_id), hash);
    }

    /// 每次 hget_all 都先等待一段时间，用来观察并发
    pub(crate) fn slow_hashes(&self, delay: Duration) {
        *self.hget_delay.lock().unwrap() = Some(delay);
    }

    pub(crate) fn hget_calls(&self) -> usize {
        self.hget_calls.load(Ordering::SeqCst)
    }

    /// 同时进行中的 hget_all 最大数量
    pub(crate) fn hget_peak(&self) -> usize {
        self.hget_peak.load(Ordering::SeqCst)
    }

    pub(crate) fn put_string(&self, key: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .strings
            .insert(key.to_string(), value.to_string());
    }

    pub(crate) fn string(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().strings.get(key).cloned()
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("memory cache offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GeoCache for MemoryGeoCache {
    async fn geo_add(
        &self,
        key: &str,
        longitude: f64,
        latitude: f64,
        member: &str,
    ) -> Result<(), CacheError> {
        self.check()?;
        self.state
            .lock()
            .unwrap()
            .geo
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), GeoPoint::new(latitude, longitude));
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
        self.check()?;
        let origin = GeoPoint::new(latitude, longitude);
        let state = self.state.lock().unwrap();
        let mut found: Vec<(f64, GeoMember)> = state
            .geo
            .get(key)
            .map(|members| {
                members
                    .iter()
                    .map(|(member, point)| {
                        (
                            origin.distance_to(point),
                            GeoMember {
                                member: member.clone(),
                                longitude: point.longitude,
                                latitude: point.latitude,
                            },
                        )
                    })
                    .filter(|(d, _)| *d <= radius)
                    .collect()
            })
            .unwrap_or_default();
        found.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(found.into_iter().take(count).map(|(_, m)| m).collect())
    }

    async fn geo_remove(&self, key: &str, members: &[String]) -> Result<(), CacheError> {
        self.check()?;
        if let Some(index) = self.state.lock().unwrap().geo.get_mut(key) {
            for member in members {
                index.remove(member);
            }
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        Ok(self.string(key))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), CacheError> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        state.strings.insert(key.to_string(), value.to_string());
        state.ttls.insert(key.to_string(), ttl_secs);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.check()?;
        self.expire(key);
        Ok(())
    }

    async fn hset_ex(
        &self,
        key: &str,
        fields: &[(&'static str, String)],
        ttl_secs: u64,
    ) -> Result<(), CacheError> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let hash = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        state.hashes.insert(key.to_string(), hash);
        state.ttls.insert(key.to_string(), ttl_secs);
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, CacheError> {
        self.check()?;
        self.hget_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.hget_delay.lock().unwrap();
        if let Some(delay) = delay {
            let now = self.hget_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.hget_peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.hget_in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        if self.broken_hashes.lock().unwrap().contains(key) {
            return Err(CacheError::Unavailable(format!("hash {key} unreadable")));
        }
        Ok(self
            .state
            .lock()
            .unwrap()
            .hashes
            .get(key)
            .cloned()
            .unwrap_or_default())
    }
}
