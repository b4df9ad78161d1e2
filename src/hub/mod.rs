// 实时连接中心
// 维护在线连接，处理入站消息，定时推送附近用户，转发告警和通知

pub mod events;
pub mod registry;
pub mod socket;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};

use crate::error::AppError;
use crate::models::{
    CallerIdentity, GeoPoint, LocationUpdate, validate_coordinates, validate_motion,
};
use crate::proximity::ProximityEngine;
use events::{
    ErrorPayload, InboundEvent, LocationUpdatedPayload, NearbyRequestData, NearbyUsersPayload,
    UpdateLocationData,
};
pub use registry::{ConnectionId, ConnectionRegistry, ConnectionState, PushTarget};
pub use socket::ws_handler;

#[derive(Debug, Clone)]
pub struct HubSettings {
    pub max_search_radius: f64,
    pub default_search_radius: f64,
    pub outbound_queue_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            max_search_radius: 5000.0,
            default_search_radius: 1000.0,
            outbound_queue_capacity: 64,
        }
    }
}

pub struct Hub {
    registry: ConnectionRegistry,
    engine: Arc<ProximityEngine>,
    settings: HubSettings,
}

impl Hub {
    pub fn new(engine: Arc<ProximityEngine>, settings: HubSettings) -> Self {
        Self {
            registry: ConnectionRegistry::new(settings.outbound_queue_capacity),
            engine,
            settings,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn clamp_radius(&self, radius: Option<f64>) -> f64 {
        match radius {
            Some(r) if r.is_finite() && r > 0.0 => r.min(self.settings.max_search_radius),
            _ => self
                .settings
                .default_search_radius
                .min(self.settings.max_search_radius),
        }
    }

    /// 注册连接，返回连接ID、发送队列和注销信号
    pub async fn connect(
        &self,
        identity: &CallerIdentity,
    ) -> (
        ConnectionId,
        mpsc::Receiver<String>,
        oneshot::Receiver<()>,
    ) {
        self.registry
            .register(&identity.user_id, self.clamp_radius(None))
            .await
    }

    pub async fn disconnect(&self, id: ConnectionId) -> bool {
        self.registry.unregister(id).await
    }

    /// 处理一条文本消息，格式错误的消息记录后丢弃，连接保持
    pub async fn handle_message(&self, id: ConnectionId, identity: &CallerIdentity, text: &str) {
        match InboundEvent::decode(text) {
            Ok(event) => self.handle_event(id, identity, event).await,
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Discarding malformed message");
            }
        }
    }

    pub async fn handle_event(
        &self,
        id: ConnectionId,
        identity: &CallerIdentity,
        event: InboundEvent,
    ) {
        match event {
            InboundEvent::UpdateLocation(data) => self.on_update_location(id, identity, data).await,
            InboundEvent::GetNearbyUsers(data) => self.on_nearby_request(id, identity, data).await,
        }
    }

    async fn on_update_location(
        &self,
        id: ConnectionId,
        identity: &CallerIdentity,
        data: UpdateLocationData,
    ) {
        let checked = validate_coordinates(data.latitude, data.longitude)
            .and_then(|_| validate_motion(data.speed, data.heading));
        if let Err(e) = checked {
            self.reject(id, e).await;
            return;
        }

        self.registry
            .update_position(id, GeoPoint::new(data.latitude, data.longitude))
            .await;

        let update = LocationUpdate {
            user_id: identity.user_id.clone(),
            device_id: identity.device_id.clone(),
            latitude: data.latitude,
            longitude: data.longitude,
            speed: data.speed,
            heading: data.heading,
            is_anonymous: !identity.is_authenticated,
        };

        match self.engine.update_user_location(update).await {
            Ok(record) => {
                self.reply(
                    id,
                    events::LOCATION_UPDATED,
                    LocationUpdatedPayload {
                        latitude: record.latitude,
                        longitude: record.longitude,
                        last_update: record.last_update,
                    },
                )
                .await;
            }
            Err(e) => {
                tracing::error!(connection_id = %id, error = %e, "Failed to update location");
                self.reply(
                    id,
                    events::ERROR,
                    ErrorPayload {
                        message: "failed to update location",
                    },
                )
                .await;
            }
        }
    }

    async fn on_nearby_request(
        &self,
        id: ConnectionId,
        identity: &CallerIdentity,
        data: NearbyRequestData,
    ) {
        if let Err(e) = validate_coordinates(data.latitude, data.longitude) {
            self.reject(id, e).await;
            return;
        }

        let radius = self.clamp_radius(data.radius);
        self.registry.set_radius(id, radius).await;

        match self
            .engine
            .get_nearby_users(&identity.user_id, data.latitude, data.longitude, radius)
            .await
        {
            Ok(users) => {
                self.reply(
                    id,
                    events::NEARBY_USERS,
                    NearbyUsersPayload {
                        users: &users,
                        radius,
                        total_count: users.len(),
                    },
                )
                .await;
            }
            Err(e) => {
                tracing::error!(connection_id = %id, error = %e, "Failed to query nearby users");
                self.reply(
                    id,
                    events::ERROR,
                    ErrorPayload {
                        message: "failed to query nearby users",
                    },
                )
                .await;
            }
        }
    }

    // 非法参数只回复错误事件，连接保持
    async fn reject(&self, id: ConnectionId, error: AppError) {
        tracing::debug!(connection_id = %id, error = %error, "Rejected socket message");
        let message = error.to_string();
        self.reply(id, events::ERROR, ErrorPayload { message: &message })
            .await;
    }

    async fn reply<T: Serialize>(&self, id: ConnectionId, event: &str, data: T) -> bool {
        match events::encode(event, data) {
            Ok(text) => self.registry.send_to(id, text).await,
            Err(e) => {
                tracing::error!(event, error = %e, "Failed to encode outbound message");
                false
            }
        }
    }

    /// 对所有已知位置的连接各起一个任务重新查询并推送，返回成功推送数
    pub async fn push_nearby_once(self: &Arc<Self>) -> usize {
        let targets = self.registry.push_targets().await;
        if targets.is_empty() {
            return 0;
        }

        let mut tasks = JoinSet::new();
        for target in targets {
            let hub = Arc::clone(self);
            tasks.spawn(async move { hub.push_to(target).await });
        }

        let mut pushed = 0;
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(true) => pushed += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(error = %e, "Push task panicked"),
            }
        }
        pushed
    }

    async fn push_to(&self, target: PushTarget) -> bool {
        let users = match self
            .engine
            .get_nearby_users(
                &target.user_id,
                target.point.latitude,
                target.point.longitude,
                target.radius,
            )
            .await
        {
            Ok(users) => users,
            Err(e) => {
                tracing::warn!(connection_id = %target.connection_id, error = %e, "Skipping push, nearby query failed");
                return false;
            }
        };

        self.reply(
            target.connection_id,
            events::NEARBY_USERS,
            NearbyUsersPayload {
                users: &users,
                radius: target.radius,
                total_count: users.len(),
            },
        )
        .await
    }

    /// 启动定时推送循环
    pub fn spawn_push_loop(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let pushed = self.push_nearby_once().await;
                if pushed > 0 {
                    tracing::debug!("Pushed nearby users to {} connections", pushed);
                }
            }
        })
    }

    pub async fn broadcast_alert(
        &self,
        latitude: f64,
        longitude: f64,
        radius: f64,
        payload: Value,
    ) -> usize {
        self.broadcast_in_radius(events::NEW_ALERT, GeoPoint::new(latitude, longitude), radius, payload)
            .await
    }

    pub async fn broadcast_report(
        &self,
        latitude: f64,
        longitude: f64,
        radius: f64,
        payload: Value,
    ) -> usize {
        self.broadcast_in_radius(
            events::REPORT_CREATED,
            GeoPoint::new(latitude, longitude),
            radius,
            payload,
        )
        .await
    }

    /// 通知某个用户的所有连接
    pub async fn notify_user(&self, user_id: &str, event: &str, payload: Value) -> usize {
        let text = match events::encode(event, payload) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(event, error = %e, "Failed to encode notification");
                return 0;
            }
        };
        self.registry
            .broadcast(|c| c.user_id == user_id, &text)
            .await
    }

    async fn broadcast_in_radius(
        &self,
        event: &str,
        center: GeoPoint,
        radius: f64,
        payload: Value,
    ) -> usize {
        let text = match events::encode(event, payload) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(event, error = %e, "Failed to encode broadcast");
                return 0;
            }
        };

        let delivered = self
            .registry
            .broadcast(
                |c| {
                    c.last_known
                        .is_some_and(|point| point.distance_to(&center) <= radius)
                },
                &text,
            )
            .await;
        tracing::info!(event, radius, delivered, "Broadcast sent");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy::{PrivacyLayer, PrivacySettings};
    use crate::proximity::EngineSettings;
    use crate::testing::{MemoryGeoCache, MemoryLocationStore};
    use serde_json::json;

    fn hub_with(settings: HubSettings) -> (Arc<Hub>, Arc<MemoryLocationStore>) {
        let store = Arc::new(MemoryLocationStore::default());
        let engine = Arc::new(ProximityEngine::new(
            store.clone(),
            Arc::new(MemoryGeoCache::default()),
            None,
            PrivacyLayer::new(PrivacySettings::default()),
            EngineSettings::default(),
        ));
        (Arc::new(Hub::new(engine, settings)), store)
    }

    fn hub() -> (Arc<Hub>, Arc<MemoryLocationStore>) {
        hub_with(HubSettings::default())
    }

    async fn next_json(rx: &mut mpsc::Receiver<String>) -> Value {
        let text = rx.recv().await.expect("message");
        serde_json::from_str(&text).expect("json")
    }

    async fn send_location(hub: &Hub, id: ConnectionId, who: &CallerIdentity, lat: f64, lon: f64) {
        let text = json!({
            "event": "update_location",
            "data": {"latitude": lat, "longitude": lon}
        })
        .to_string();
        hub.handle_message(id, who, &text).await;
    }

    #[tokio::test]
    async fn update_location_is_stored_and_acknowledged() {
        let (hub, store) = hub();
        let alice = CallerIdentity::authenticated("alice", None);
        let (id, mut rx, _) = hub.connect(&alice).await;

        send_location(&hub, id, &alice, 38.787, -9.181).await;

        let ack = next_json(&mut rx).await;
        assert_eq!(ack["event"], "location_updated");
        assert_eq!(ack["data"]["latitude"], 38.787);
        let stored = store.get("alice").expect("stored");
        assert!(!stored.is_anonymous);
        assert_eq!(hub.registry().push_targets().await.len(), 1);
    }

    #[tokio::test]
    async fn anonymous_updates_are_marked_anonymous() {
        let (hub, store) = hub();
        let device = CallerIdentity::anonymous("phone-1");
        let (id, mut rx, _) = hub.connect(&device).await;

        send_location(&hub, id, &device, 1.0, 1.0).await;
        next_json(&mut rx).await;

        let stored = store.get("device:phone-1").expect("stored");
        assert!(stored.is_anonymous);
        assert_eq!(stored.device_id.as_deref(), Some("phone-1"));
    }

    #[tokio::test]
    async fn nearby_request_is_clamped_and_answered() {
        let (hub, _) = hub_with(HubSettings {
            max_search_radius: 800.0,
            ..HubSettings::default()
        });
        let alice = CallerIdentity::authenticated("alice", None);
        let bob = CallerIdentity::authenticated("bob", None);
        let (alice_id, mut alice_rx, _) = hub.connect(&alice).await;
        let (bob_id, mut bob_rx, _) = hub.connect(&bob).await;

        send_location(&hub, alice_id, &alice, 38.7870, -9.1810).await;
        next_json(&mut alice_rx).await;
        send_location(&hub, bob_id, &bob, 38.7875, -9.1812).await;
        next_json(&mut bob_rx).await;

        let request = json!({
            "event": "get_nearby_users",
            "data": {"latitude": 38.7875, "longitude": -9.1812, "radius": 100000}
        })
        .to_string();
        hub.handle_message(bob_id, &bob, &request).await;

        let reply = next_json(&mut bob_rx).await;
        assert_eq!(reply["event"], "nearby_users");
        assert_eq!(reply["data"]["radius"], 800.0);
        assert_eq!(reply["data"]["total_count"], 1);
        let user = &reply["data"]["users"][0];
        assert!(user.get("user_id").is_none());
        assert!(user["anonymous_id"].as_str().unwrap().starts_with("anon-"));
    }

    #[tokio::test]
    async fn malformed_message_keeps_connection_open() {
        let (hub, _) = hub();
        let alice = CallerIdentity::authenticated("alice", None);
        let (id, mut rx, _) = hub.connect(&alice).await;

        hub.handle_message(id, &alice, "{not json").await;
        hub.handle_message(id, &alice, r#"{"event":"teleport","data":{}}"#).await;

        assert!(hub.registry().contains(id).await);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn store_failure_is_reported_as_error_event() {
        let (hub, store) = hub();
        store.set_failing(true);
        let alice = CallerIdentity::authenticated("alice", None);
        let (id, mut rx, _) = hub.connect(&alice).await;

        send_location(&hub, id, &alice, 1.0, 1.0).await;
        let reply = next_json(&mut rx).await;
        assert_eq!(reply["event"], "error");
        assert!(hub.registry().contains(id).await);
    }

    #[tokio::test]
    async fn periodic_push_skips_connections_without_position() {
        let (hub, _) = hub();
        let alice = CallerIdentity::authenticated("alice", None);
        let bob = CallerIdentity::authenticated("bob", None);
        let (alice_id, mut alice_rx, _) = hub.connect(&alice).await;
        let (_bob_id, mut bob_rx, _) = hub.connect(&bob).await;

        send_location(&hub, alice_id, &alice, 1.0, 1.0).await;
        next_json(&mut alice_rx).await;

        assert_eq!(hub.push_nearby_once().await, 1);
        let pushed = next_json(&mut alice_rx).await;
        assert_eq!(pushed["event"], "nearby_users");
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn alert_reaches_only_connections_in_radius() {
        let (hub, _) = hub();
        let near = CallerIdentity::authenticated("near", None);
        let far = CallerIdentity::authenticated("far", None);
        let idle = CallerIdentity::authenticated("idle", None);
        let (near_id, mut near_rx, _) = hub.connect(&near).await;
        let (far_id, mut far_rx, _) = hub.connect(&far).await;
        let (_idle_id, mut idle_rx, _) = hub.connect(&idle).await;

        send_location(&hub, near_id, &near, 0.0, 0.001).await;
        next_json(&mut near_rx).await;
        send_location(&hub, far_id, &far, 0.0, 0.1).await;
        next_json(&mut far_rx).await;

        let reached = hub
            .broadcast_alert(0.0, 0.0, 500.0, json!({"kind": "fire"}))
            .await;
        assert_eq!(reached, 1);
        let alert = next_json(&mut near_rx).await;
        assert_eq!(alert["event"], "new_alert");
        assert_eq!(alert["data"]["kind"], "fire");
        assert!(far_rx.try_recv().is_err());
        assert!(idle_rx.try_recv().is_err());

        assert_eq!(
            hub.broadcast_report(0.0, 0.0, 50_000.0, json!({"id": 7})).await,
            2
        );
        assert_eq!(next_json(&mut far_rx).await["event"], "report_created");
    }

    #[tokio::test]
    async fn notify_user_reaches_every_connection_of_that_user() {
        let (hub, _) = hub();
        let alice = CallerIdentity::authenticated("alice", None);
        let bob = CallerIdentity::authenticated("bob", None);
        let (_, mut phone, _) = hub.connect(&alice).await;
        let (_, mut tablet, _) = hub.connect(&alice).await;
        let (_, mut bob_rx, _) = hub.connect(&bob).await;

        let reached = hub
            .notify_user("alice", "report_verified", json!({"report_id": 3}))
            .await;
        assert_eq!(reached, 2);
        assert_eq!(next_json(&mut phone).await["event"], "report_verified");
        assert_eq!(next_json(&mut tablet).await["event"], "report_verified");
        assert!(bob_rx.try_recv().is_err());

        assert_eq!(hub.notify_user("nobody", "x", json!({})).await, 0);
    }

    #[tokio::test]
    async fn disconnected_connection_gets_no_broadcasts() {
        let (hub, _) = hub();
        let alice = CallerIdentity::authenticated("alice", None);
        let (id, mut rx, _) = hub.connect(&alice).await;
        send_location(&hub, id, &alice, 0.0, 0.0).await;
        next_json(&mut rx).await;

        assert!(hub.disconnect(id).await);
        assert!(!hub.registry().contains(id).await);
        assert_eq!(hub.broadcast_alert(0.0, 0.0, 1000.0, json!({})).await, 0);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn invalid_socket_update_is_rejected_without_storing() {
        let (hub, store) = hub();
        let alice = CallerIdentity::authenticated("alice", None);
        let (id, mut rx, _) = hub.connect(&alice).await;

        let text = json!({
            "event": "update_location",
            "data": {"latitude": 1000.0, "longitude": -5000.0, "speed": -3.0}
        })
        .to_string();
        hub.handle_message(id, &alice, &text).await;

        let reply = next_json(&mut rx).await;
        assert_eq!(reply["event"], "error");
        assert!(store.get("alice").is_none());
        assert!(hub.registry().contains(id).await);
        assert!(hub.registry().push_targets().await.is_empty());

        send_location(&hub, id, &alice, 10.0, 10.0).await;
        assert_eq!(next_json(&mut rx).await["event"], "location_updated");
    }

    #[tokio::test]
    async fn invalid_nearby_request_is_rejected() {
        let (hub, _) = hub();
        let alice = CallerIdentity::authenticated("alice", None);
        let (id, mut rx, _) = hub.connect(&alice).await;

        let text = json!({
            "event": "get_nearby_users",
            "data": {"latitude": -95.0, "longitude": 0.0}
        })
        .to_string();
        hub.handle_message(id, &alice, &text).await;

        assert_eq!(next_json(&mut rx).await["event"], "error");
        assert!(hub.registry().contains(id).await);
    }
}
