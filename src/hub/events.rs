//! WebSocket 消息格式
//!
//! 所有消息都是 `{ "event": string, "data": object }` 信封。
//! 入站事件在边界上一次性解析为 [`InboundEvent`]，未知事件名直接解析失败。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::NearbyUser;

pub const LOCATION_UPDATED: &str = "location_updated";
pub const NEARBY_USERS: &str = "nearby_users";
pub const NEW_ALERT: &str = "new_alert";
pub const REPORT_CREATED: &str = "report_created";
pub const ERROR: &str = "error";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum InboundEvent {
    UpdateLocation(UpdateLocationData),
    GetNearbyUsers(NearbyRequestData),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpdateLocationData {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub heading: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NearbyRequestData {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub radius: Option<f64>,
}

impl InboundEvent {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    event: &'a str,
    data: T,
}

/// 序列化出站消息
pub fn encode<T: Serialize>(event: &str, data: T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&Envelope { event, data })
}

#[derive(Debug, Serialize)]
pub struct LocationUpdatedPayload {
    pub latitude: f64,
    pub longitude: f64,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct NearbyUsersPayload<'a> {
    pub users: &'a [NearbyUser],
    pub radius: f64,
    pub total_count: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload<'a> {
    pub message: &'a str,
}
