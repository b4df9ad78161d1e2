use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{NearbyUser, validate_coordinates, validate_motion};

// 上报位置请求参数
#[derive(Debug, Deserialize)]
pub struct UpdateLocationRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
}

// 上报位置响应
#[derive(Debug, Serialize)]
pub struct UpdateLocationResponse {
    pub last_update: DateTime<Utc>,
}

// 地理位置查询参数
#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct NearbyUsersResponse {
    pub users: Vec<NearbyUser>,
    pub radius: f64,
    pub total_count: usize,
}

// 本人位置，不做隐私处理
#[derive(Debug, Serialize)]
pub struct MyLocationResponse {
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub avatar_id: i32,
    pub color: String,
    pub is_anonymous: bool,
    pub last_update: DateTime<Utc>,
}

impl UpdateLocationRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        validate_coordinates(self.latitude, self.longitude)?;
        validate_motion(self.speed, self.heading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(latitude: f64, longitude: f64) -> UpdateLocationRequest {
        UpdateLocationRequest {
            latitude,
            longitude,
            speed: None,
            heading: None,
        }
    }

    #[test]
    fn accepts_valid_coordinates() {
        assert!(request(38.787, -9.181).validate().is_ok());
        assert!(request(-90.0, 180.0).validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(request(91.0, 0.0).validate().is_err());
        assert!(request(0.0, -180.5).validate().is_err());
        assert!(request(f64::NAN, 0.0).validate().is_err());

        let mut bad_speed = request(0.0, 0.0);
        bad_speed.speed = Some(-1.0);
        assert!(bad_speed.validate().is_err());

        let mut bad_heading = request(0.0, 0.0);
        bad_heading.heading = Some(f64::INFINITY);
        assert!(bad_heading.validate().is_err());
    }
}
