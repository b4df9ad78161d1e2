use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::AppError;

/// 地理坐标点
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// 到另一点的球面距离（米）
    pub fn distance_to(&self, other: &GeoPoint) -> f64 {
        crate::utils::calculate_distance(
            self.latitude,
            self.longitude,
            other.latitude,
            other.longitude,
        )
    }
}

/// 用户最后已知位置，对应 user_locations 表，每个用户只有一条
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LocationRecord {
    pub user_id: String,
    pub device_id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub avatar_id: i32,
    pub color: String,
    pub is_anonymous: bool,
    pub last_update: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl LocationRecord {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }
}

/// 写路径的输入参数
#[derive(Debug, Clone, Deserialize)]
pub struct LocationUpdate {
    pub user_id: String,
    pub device_id: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub is_anonymous: bool,
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), AppError> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(AppError::Validation("latitude必须在-90到90之间".into()));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(AppError::Validation("longitude必须在-180到180之间".into()));
    }
    Ok(())
}

/// 速度不能为负，航向必须是有限值
pub fn validate_motion(speed: Option<f64>, heading: Option<f64>) -> Result<(), AppError> {
    if speed.is_some_and(|s| !s.is_finite() || s < 0.0) {
        return Err(AppError::Validation("speed无效".into()));
    }
    if heading.is_some_and(|h| !h.is_finite()) {
        return Err(AppError::Validation("heading无效".into()));
    }
    Ok(())
}

/// 附近用户投影（经过隐私处理）
///
/// `user_id` 只用于调用方内部关联，不会序列化给任何客户端。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyUser {
    #[serde(skip_serializing, default)]
    pub user_id: String,
    pub anonymous_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub distance: f64,
    pub avatar_id: i32,
    pub color: String,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub last_update: DateTime<Utc>,
    pub is_anonymous: bool,
}
