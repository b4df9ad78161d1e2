use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{LocationRecord, NearbyUser};

/// 位置元数据，以 Redis hash 形式存放在 location:meta:{user_id}
#[derive(Debug, Clone, PartialEq)]
pub struct LocationMetadata {
    pub avatar_id: i32,
    pub color: String,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub is_anonymous: bool,
    pub last_update: i64, // Unix timestamp
    pub device_id: Option<String>,
}

impl LocationMetadata {
    /// 转成 HSET 字段，空值字段不写入
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("avatar_id", self.avatar_id.to_string()),
            ("color", self.color.clone()),
            ("is_anonymous", self.is_anonymous.to_string()),
            ("last_update", self.last_update.to_string()),
        ];
        if let Some(speed) = self.speed {
            fields.push(("speed", speed.to_string()));
        }
        if let Some(heading) = self.heading {
            fields.push(("heading", heading.to_string()));
        }
        if let Some(device_id) = &self.device_id {
            fields.push(("device_id", device_id.clone()));
        }
        fields
    }

    /// 从 HGETALL 结果解析，必需字段缺失或格式错误时返回 None
    pub fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        Some(Self {
            avatar_id: fields.get("avatar_id")?.parse().ok()?,
            color: fields.get("color")?.clone(),
            speed: fields.get("speed").and_then(|v| v.parse().ok()),
            heading: fields.get("heading").and_then(|v| v.parse().ok()),
            is_anonymous: fields.get("is_anonymous")?.parse().ok()?,
            last_update: fields.get("last_update")?.parse().ok()?,
            device_id: fields.get("device_id").cloned(),
        })
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_update, 0).unwrap_or_else(Utc::now)
    }
}

impl From<&LocationRecord> for LocationMetadata {
    fn from(record: &LocationRecord) -> Self {
        Self {
            avatar_id: record.avatar_id,
            color: record.color.clone(),
            speed: record.speed,
            heading: record.heading,
            is_anonymous: record.is_anonymous,
            last_update: record.last_update.timestamp(),
            device_id: record.device_id.clone(),
        }
    }
}

/// 附近用户结果缓存，记录计算时使用的半径
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CachedNearbyResult {
    pub radius: f64,
    pub users: Vec<CachedNearbyUser>,
}

/// 附近用户缓存数据模型，保留 user_id 以便回填
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CachedNearbyUser {
    pub user_id: String,
    pub anonymous_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub distance: f64,
    pub avatar_id: i32,
    pub color: String,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub last_update: i64, // Unix timestamp
    pub is_anonymous: bool,
}

impl From<&NearbyUser> for CachedNearbyUser {
    fn from(user: &NearbyUser) -> Self {
        Self {
            user_id: user.user_id.clone(),
            anonymous_id: user.anonymous_id.clone(),
            latitude: user.latitude,
            longitude: user.longitude,
            distance: user.distance,
            avatar_id: user.avatar_id,
            color: user.color.clone(),
            speed: user.speed,
            heading: user.heading,
            last_update: user.last_update.timestamp(),
            is_anonymous: user.is_anonymous,
        }
    }
}

impl From<CachedNearbyUser> for NearbyUser {
    fn from(cached: CachedNearbyUser) -> Self {
        Self {
            user_id: cached.user_id,
            anonymous_id: cached.anonymous_id,
            latitude: cached.latitude,
            longitude: cached.longitude,
            distance: cached.distance,
            avatar_id: cached.avatar_id,
            color: cached.color,
            speed: cached.speed,
            heading: cached.heading,
            last_update: DateTime::from_timestamp(cached.last_update, 0)
                .unwrap_or_else(Utc::now),
            is_anonymous: cached.is_anonymous,
        }
    }
}
