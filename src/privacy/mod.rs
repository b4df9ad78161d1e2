//! 位置隐私处理：坐标偏移、匿名ID、头像与颜色分配
//!
//! 所有派生值都由 SHA-256 摘要确定，不依赖随机数状态。
//! 坐标偏移在同一时间窗口内对同一用户保持不变，避免客户端上的标记来回跳动；
//! 进入下一个窗口后偏移重新生成。

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::models::GeoPoint;
use crate::utils::EARTH_RADIUS_METERS;

/// 可选头像数量，头像编号范围 1..=AVATAR_COUNT
pub const AVATAR_COUNT: i32 = 12;

/// 地图标记颜色
pub const COLOR_PALETTE: [&str; 10] = [
    "#E57373", "#F06292", "#BA68C8", "#7986CB", "#4FC3F7", "#4DB6AC", "#81C784", "#FFD54F",
    "#FF8A65", "#A1887F",
];

#[derive(Debug, Clone)]
pub struct PrivacySettings {
    /// 最大偏移距离（米）
    pub max_offset_meters: f64,
    /// 偏移保持不变的时间窗口（秒）
    pub window_secs: i64,
    pub salt: String,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            max_offset_meters: 75.0,
            window_secs: 300,
            salt: "presence".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrivacyLayer {
    settings: PrivacySettings,
}

impl PrivacyLayer {
    pub fn new(settings: PrivacySettings) -> Self {
        Self { settings }
    }

    /// 对真实坐标做有界偏移
    pub fn perturb(&self, user_id: &str, point: GeoPoint, at: DateTime<Utc>) -> GeoPoint {
        let window = if self.settings.window_secs > 0 {
            at.timestamp().div_euclid(self.settings.window_secs)
        } else {
            0
        };

        let digest = Sha256::new()
            .chain_update(self.settings.salt.as_bytes())
            .chain_update(b"|offset|")
            .chain_update(user_id.as_bytes())
            .chain_update(window.to_be_bytes())
            .finalize();

        let bearing = unit_interval(&digest[0..8]) * std::f64::consts::TAU;
        // 开方保证偏移点在圆盘内均匀分布
        let distance = self.settings.max_offset_meters * unit_interval(&digest[8..16]).sqrt();

        destination_point(point, bearing, distance)
    }

    /// 匿名ID，同一个盐值下对同一用户恒定，不可逆
    pub fn anonymous_id(&self, user_id: &str) -> String {
        let digest = Sha256::new()
            .chain_update(self.settings.salt.as_bytes())
            .chain_update(b"|id|")
            .chain_update(user_id.as_bytes())
            .finalize();

        let hex: String = digest[..5].iter().map(|b| format!("{:02x}", b)).collect();
        format!("anon-{}", hex)
    }

    pub fn avatar_id(&self, user_id: &str) -> i32 {
        (identity_hash(user_id, b"avatar") % AVATAR_COUNT as u64) as i32 + 1
    }

    pub fn color(&self, user_id: &str) -> &'static str {
        COLOR_PALETTE[(identity_hash(user_id, b"color") % COLOR_PALETTE.len() as u64) as usize]
    }
}

// 头像和颜色不加盐，跨部署保持一致
fn identity_hash(user_id: &str, purpose: &[u8]) -> u64 {
    let digest = Sha256::new()
        .chain_update(purpose)
        .chain_update(b"|")
        .chain_update(user_id.as_bytes())
        .finalize();
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(buf)
}

/// 8 字节映射到 [0, 1)
fn unit_interval(bytes: &[u8]) -> f64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    (u64::from_be_bytes(buf) >> 11) as f64 / (1u64 << 53) as f64
}

/// 从起点沿给定方位角（弧度）移动 distance 米后的大圆终点
pub fn destination_point(origin: GeoPoint, bearing: f64, distance: f64) -> GeoPoint {
    let delta = distance / EARTH_RADIUS_METERS;
    let phi1 = origin.latitude.to_radians();
    let lambda1 = origin.longitude.to_radians();

    let phi2 = (phi1.sin() * delta.cos() + phi1.cos() * delta.sin() * bearing.cos()).asin();
    let lambda2 = lambda1
        + (bearing.sin() * delta.sin() * phi1.cos()).atan2(delta.cos() - phi1.sin() * phi2.sin());

    let longitude = (lambda2.to_degrees() + 540.0).rem_euclid(360.0) - 180.0;
    GeoPoint::new(phi2.to_degrees(), longitude)
}
