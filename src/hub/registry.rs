//! 连接注册表
//!
//! 注册表是 Hub 里唯一长期共享的可变状态，所有访问都经过同一把读写锁。
//! 每个连接的发送队列只有注册表持有 Sender，移除条目即关闭队列，
//! 因此队列只会被关闭一次。
//!
//! 广播在读锁下用 `try_send` 投递，不会等待慢连接；队列已满或已关闭的连接
//! 在释放读锁后再取写锁统一清理。
//!
//! 每个条目还持有一个 oneshot 发送端，条目被移除时随之丢弃，
//! 连接任务据此得知自己已被注销，即使写循环卡在慢连接上也能退出。

use std::collections::HashMap;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc, oneshot};
use uuid::Uuid;

use crate::models::GeoPoint;

pub type ConnectionId = Uuid;

/// 连接生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Registered,
    Unregistering,
    Closed,
}

struct Connection {
    user_id: String,
    last_known: Option<GeoPoint>,
    radius: f64,
    tx: mpsc::Sender<String>,
    _evict: oneshot::Sender<()>,
}

/// 广播过滤时可见的连接信息
#[derive(Debug)]
pub struct ConnectionView<'a> {
    pub user_id: &'a str,
    pub last_known: Option<GeoPoint>,
}

/// 定时推送的目标
#[derive(Debug, Clone)]
pub struct PushTarget {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub point: GeoPoint,
    pub radius: f64,
}

pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    queue_capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// 注册新连接，返回连接ID、发送队列的接收端和注销信号
    ///
    /// 条目被移除后注销信号完成（接收端得到 `RecvError`）。
    pub async fn register(
        &self,
        user_id: &str,
        radius: f64,
    ) -> (ConnectionId, mpsc::Receiver<String>, oneshot::Receiver<()>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let (evict_tx, evict_rx) = oneshot::channel();
        let id = Uuid::new_v4();
        let connection = Connection {
            user_id: user_id.to_string(),
            last_known: None,
            radius,
            tx,
            _evict: evict_tx,
        };

        let mut connections = self.connections.write().await;
        connections.insert(id, connection);
        tracing::debug!(connection_id = %id, user_id, total = connections.len(), "Connection registered");
        (id, rx, evict_rx)
    }

    /// 移除连接；已移除时返回 false
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.write().await.remove(&id);
        if let Some(connection) = &removed {
            tracing::debug!(connection_id = %id, user_id = %connection.user_id, "Connection unregistered");
        }
        removed.is_some()
    }

    pub async fn update_position(&self, id: ConnectionId, point: GeoPoint) -> bool {
        match self.connections.write().await.get_mut(&id) {
            Some(connection) => {
                connection.last_known = Some(point);
                true
            }
            None => false,
        }
    }

    pub async fn set_radius(&self, id: ConnectionId, radius: f64) {
        if let Some(connection) = self.connections.write().await.get_mut(&id) {
            connection.radius = radius;
        }
    }

    /// 发送给单个连接；失败的连接会被移除
    pub async fn send_to(&self, id: ConnectionId, message: String) -> bool {
        let outcome = {
            let connections = self.connections.read().await;
            match connections.get(&id) {
                Some(connection) => connection.tx.try_send(message),
                None => return false,
            }
        };

        match outcome {
            Ok(()) => true,
            Err(e) => {
                log_send_failure(id, &e);
                self.prune(&[id]).await;
                false
            }
        }
    }

    /// 发送给所有满足条件的连接，返回成功投递数
    pub async fn broadcast<F>(&self, filter: F, message: &str) -> usize
    where
        F: Fn(&ConnectionView<'_>) -> bool,
    {
        let mut delivered = 0;
        let mut failed = Vec::new();
        {
            let connections = self.connections.read().await;
            for (id, connection) in connections.iter() {
                let view = ConnectionView {
                    user_id: &connection.user_id,
                    last_known: connection.last_known,
                };
                if !filter(&view) {
                    continue;
                }
                match connection.tx.try_send(message.to_string()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        log_send_failure(*id, &e);
                        failed.push(*id);
                    }
                }
            }
        }

        if !failed.is_empty() {
            self.prune(&failed).await;
        }
        delivered
    }

    /// 已上报过位置的连接快照
    pub async fn push_targets(&self) -> Vec<PushTarget> {
        self.connections
            .read()
            .await
            .iter()
            .filter_map(|(id, c)| {
                c.last_known.map(|point| PushTarget {
                    connection_id: *id,
                    user_id: c.user_id.clone(),
                    point,
                    radius: c.radius,
                })
            })
            .collect()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn connections_of(&self, user_id: &str) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.user_id == user_id)
            .count()
    }

    async fn prune(&self, ids: &[ConnectionId]) {
        let mut connections = self.connections.write().await;
        for id in ids {
            if connections.remove(id).is_some() {
                tracing::info!(connection_id = %id, "Dropped slow or closed connection");
            }
        }
    }
}

fn log_send_failure(id: ConnectionId, error: &TrySendError<String>) {
    match error {
        TrySendError::Full(_) => {
            tracing::warn!(connection_id = %id, "Outbound queue full")
        }
        TrySendError::Closed(_) => {
            tracing::debug!(connection_id = %id, "Outbound queue closed")
        }
    }
}
